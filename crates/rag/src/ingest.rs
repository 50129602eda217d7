use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

use claimlens_core::{extract_date, extract_pdf_text, parse_verdict};

use crate::classify::{Classifier, Generate};
use crate::store::RecordStore;

const PREVIEW_CHARS: usize = 200;

/// Per-file result of a batch run. A failed file carries `analysis =
/// "Failed"` and an error message; it never has a store entry.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceAnalysis {
    pub filename: String,
    pub analysis: String,
    #[serde(rename = "invoice_text_start")]
    pub text_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvoiceAnalysis {
    fn failed(filename: String, error: impl ToString) -> Self {
        Self {
            filename,
            analysis: "Failed".to_string(),
            text_preview: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Classify and store a batch of invoice PDFs against one policy text.
///
/// Files are processed in parallel; each file's failure is isolated to its
/// own result entry and never aborts siblings. Results follow the order of
/// `files`.
pub fn analyze_batch<G: Generate>(
    store: &RecordStore,
    classifier: &Classifier<G>,
    policy_text: &str,
    employee: &str,
    files: &[impl AsRef<Path> + Sync],
) -> Vec<InvoiceAnalysis> {
    info!(count = files.len(), employee, "analyzing invoice batch");
    files
        .par_iter()
        .map(|file| analyze_file(store, classifier, policy_text, employee, file.as_ref()))
        .collect()
}

fn analyze_file<G: Generate>(
    store: &RecordStore,
    classifier: &Classifier<G>,
    policy_text: &str,
    employee: &str,
    file: &Path,
) -> InvoiceAnalysis {
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string_lossy().into_owned());
    let invoice_text = match extract_pdf_text(file) {
        Ok(text) => text,
        Err(err) => {
            error!(%filename, error = %err, "invoice text extraction failed");
            return InvoiceAnalysis::failed(filename, err);
        }
    };
    if invoice_text.is_empty() {
        error!(%filename, "no text extracted from invoice");
        return InvoiceAnalysis::failed(filename, "no text extracted from PDF");
    }
    analyze_invoice_text(store, classifier, policy_text, employee, &filename, &invoice_text)
}

/// The per-invoice pipeline once text is in hand: extract date, classify,
/// parse the verdict, store the record. Exposed separately so callers with
/// non-PDF sources (and tests) can reuse it.
pub fn analyze_invoice_text<G: Generate>(
    store: &RecordStore,
    classifier: &Classifier<G>,
    policy_text: &str,
    employee: &str,
    filename: &str,
    invoice_text: &str,
) -> InvoiceAnalysis {
    let invoice_date = extract_date(invoice_text);
    let raw = classifier.classify(policy_text, invoice_text).into_raw();
    let verdict = parse_verdict(&raw);
    let mut metadata = BTreeMap::new();
    metadata.insert("employee".to_string(), employee.trim().to_lowercase());
    metadata.insert("status".to_string(), verdict.status.as_str().to_string());
    metadata.insert("reason".to_string(), verdict.reason);
    metadata.insert("invoice_id".to_string(), filename.to_string());
    metadata.insert("date".to_string(), invoice_date);
    if let Err(err) = store.add(filename, invoice_text, &metadata) {
        error!(%filename, error = %err, "failed to store classified invoice");
        return InvoiceAnalysis::failed(filename.to_string(), err);
    }
    InvoiceAnalysis {
        filename: filename.to_string(),
        analysis: raw,
        text_preview: preview(invoice_text),
        error: None,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierConfig;
    use crate::embedding::EmbeddingClient;
    use anyhow::Result;
    use std::path::PathBuf;
    use std::time::Duration;

    struct CannedService(&'static str);

    impl Generate for CannedService {
        fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn classifier(response: &'static str) -> Classifier<CannedService> {
        Classifier::with_config(
            CannedService(response),
            ClassifierConfig {
                max_retries: 3,
                base_delay: Duration::ZERO,
            },
        )
    }

    #[test]
    fn stores_record_with_composed_metadata() {
        let store = RecordStore::in_memory(EmbeddingClient::hash()).unwrap();
        let classifier = classifier("Status: Declined\nReason: alcohol not covered");
        let result = analyze_invoice_text(
            &store,
            &classifier,
            "no alcohol reimbursed",
            "  Anand ",
            "inv_5.pdf",
            "dinner with wine, $40, on 12/03/2024",
        );
        assert!(result.error.is_none());
        assert_eq!(result.filename, "inv_5.pdf");
        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        let metadata = &records[0].metadata;
        assert_eq!(metadata.get("employee").unwrap(), "anand");
        assert_eq!(metadata.get("status").unwrap(), "Declined");
        assert_eq!(metadata.get("reason").unwrap(), "alcohol not covered");
        assert_eq!(metadata.get("invoice_id").unwrap(), "inv_5.pdf");
        assert_eq!(metadata.get("date").unwrap(), "12/03/2024");
    }

    #[test]
    fn date_falls_back_to_unknown() {
        let store = RecordStore::in_memory(EmbeddingClient::hash()).unwrap();
        let classifier = classifier("Status: Fully Reimbursed\nReason: within policy");
        analyze_invoice_text(&store, &classifier, "policy", "kim", "a.pdf", "taxi, no date");
        let records = store.records().unwrap();
        assert_eq!(records[0].metadata.get("date").unwrap(), "Unknown");
    }

    #[test]
    fn unparseable_files_fail_without_aborting_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good_less = dir.path().join("a_bogus.pdf");
        let also_bad = dir.path().join("b_bogus.pdf");
        std::fs::write(&good_less, b"not a pdf at all").unwrap();
        std::fs::write(&also_bad, b"still not a pdf").unwrap();
        let store = RecordStore::in_memory(EmbeddingClient::hash()).unwrap();
        let classifier = classifier("Status: Declined\nReason: n/a");
        let files: Vec<PathBuf> = vec![good_less, also_bad];
        let results = analyze_batch(&store, &classifier, "policy", "kim", &files);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].filename, "a_bogus.pdf");
        assert_eq!(results[1].filename, "b_bogus.pdf");
        for result in &results {
            assert_eq!(result.analysis, "Failed");
            assert!(result.error.is_some());
        }
        // Failed files never reach the store.
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn preview_is_char_safe_and_bounded() {
        let text = "é".repeat(500);
        assert_eq!(preview(&text).chars().count(), PREVIEW_CHARS);
    }
}
