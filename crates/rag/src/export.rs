use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::store::RecordStore;

const SNIPPET_CHARS: usize = 200;

/// One spreadsheet row per stored record.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Invoice ID")]
    pub invoice_id: String,
    #[serde(rename = "Employee")]
    pub employee: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Text Snippet")]
    pub snippet: String,
}

/// Flat table of every stored record, ordered by invoice id.
pub fn export_rows(store: &RecordStore) -> Result<Vec<ExportRow>> {
    let records = store.records()?;
    Ok(records
        .into_iter()
        .map(|record| {
            let get = |key: &str| record.metadata.get(key).cloned().unwrap_or_default();
            ExportRow {
                invoice_id: record.id,
                employee: get("employee"),
                status: get("status"),
                reason: get("reason"),
                date: get("date"),
                snippet: record.text.chars().take(SNIPPET_CHARS).collect(),
            }
        })
        .collect())
}

pub fn write_export_csv<W: Write>(store: &RecordStore, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in export_rows(store)? {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn export_csv_bytes(store: &RecordStore) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_export_csv(store, &mut buffer)?;
    Ok(buffer)
}

pub fn export_to_path(store: &RecordStore, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    write_export_csv(store, BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClient;
    use std::collections::BTreeMap;

    fn seeded_store() -> RecordStore {
        let store = RecordStore::in_memory(EmbeddingClient::hash()).unwrap();
        let mut meta = BTreeMap::new();
        meta.insert("employee".to_string(), "anand".to_string());
        meta.insert("status".to_string(), "Declined".to_string());
        meta.insert("reason".to_string(), "alcohol not covered".to_string());
        meta.insert("date".to_string(), "12/03/2024".to_string());
        store
            .add("inv_5.pdf", &"dinner with wine ".repeat(40), &meta)
            .unwrap();
        store
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let store = seeded_store();
        let bytes = export_csv_bytes(&store).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Invoice ID,Employee,Status,Reason,Date,Text Snippet"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("inv_5.pdf,anand,Declined,alcohol not covered,12/03/2024"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn snippet_is_truncated() {
        let store = seeded_store();
        let rows = export_rows(&store).unwrap();
        assert_eq!(rows[0].snippet.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn missing_metadata_keys_export_as_empty() {
        let store = RecordStore::in_memory(EmbeddingClient::hash()).unwrap();
        store
            .add("bare.pdf", "text only", &BTreeMap::new())
            .unwrap();
        let rows = export_rows(&store).unwrap();
        assert_eq!(rows[0].employee, "");
        assert_eq!(rows[0].status, "");
    }
}
