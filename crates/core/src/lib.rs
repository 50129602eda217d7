pub mod embedding;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod verdict;

pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{ClaimError, Result};
pub use extract::{discover_pdfs, expand_invoice_archive, extract_pdf_text};
pub use normalize::extract_date;
pub use verdict::{parse_verdict, ReimbursementStatus, Verdict};
