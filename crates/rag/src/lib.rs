pub mod chat;
pub mod classify;
pub mod embedding;
pub mod export;
pub mod ingest;
pub mod store;

pub use chat::{answer_question, ChatFilters, GroundedAnswer, CHAT_TOP_K};
pub use classify::{Classifier, ClassifierConfig, ClassifyOutcome, Generate};
pub use embedding::{EmbeddingBackend, EmbeddingClient};
pub use export::{export_csv_bytes, export_rows, export_to_path, write_export_csv, ExportRow};
pub use ingest::{analyze_batch, analyze_invoice_text, InvoiceAnalysis};
pub use store::{RecordStore, ScoredRecord, StoredRecord, OVERSAMPLE};

pub use claimlens_core::{
    extract_date, parse_verdict, ReimbursementStatus, Verdict,
};
pub use claimlens_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse};
