use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytemuck::cast_slice;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::embedding::EmbeddingClient;

/// Similarity-search oversampling factor. Metadata filtering happens after
/// retrieval, so the scan requests `top_k * OVERSAMPLE` candidates to keep
/// recall up when filters discard most of the head of the ranking.
pub const OVERSAMPLE: usize = 5;

/// Persisted collection of classified invoices, keyed by invoice id.
///
/// The store owns the embedding function and serializes all SQLite access
/// behind one connection, which gives concurrent batch workers the required
/// single-writer discipline without blocking their network-bound
/// classification calls.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    embeddings: EmbeddingClient,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub score: f32,
}

impl RecordStore {
    pub fn open<P: AsRef<Path>>(path: P, embeddings: EmbeddingClient) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open store at {}", path.as_ref().display()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            embeddings,
            path: Some(path.as_ref().to_path_buf()),
        };
        store.init()?;
        Ok(store)
    }

    /// Ephemeral variant; same contract, lifetime of the process.
    pub fn in_memory(embeddings: EmbeddingClient) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            embeddings,
            path: None,
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;
        Ok(())
    }

    /// Embed `text` and upsert the record. Re-adding an id overwrites the
    /// previous content; the `employee` metadata value is normalized to
    /// lower-cased trimmed form so equality filters are case-insensitive.
    pub fn add(&self, id: &str, text: &str, metadata: &BTreeMap<String, String>) -> Result<()> {
        if id.is_empty() {
            bail!("record id must not be empty");
        }
        let embedding = self.embeddings.embed(text)?;
        if embedding.is_empty() {
            bail!("embedding function produced an empty vector for '{id}'");
        }
        let mut metadata = metadata.clone();
        if let Some(employee) = metadata.get_mut("employee") {
            *employee = employee.trim().to_lowercase();
        }
        let metadata_json = serde_json::to_string(&metadata)?;
        let conn = self.conn.lock();
        if let Some(existing_dim) = stored_dimensionality(&conn)? {
            if existing_dim != embedding.len() {
                bail!(
                    "embedding dimensionality mismatch: store has {existing_dim}, got {}",
                    embedding.len()
                );
            }
        }
        conn.execute(
            "INSERT INTO records (id, text, embedding, metadata) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 text = excluded.text,
                 embedding = excluded.embedding,
                 metadata = excluded.metadata",
            params![id, text, cast_slice::<f32, u8>(&embedding), metadata_json],
        )?;
        debug!(id, "record stored");
        Ok(())
    }

    /// Similarity search with post-retrieval metadata filtering.
    ///
    /// Candidates are ranked by cosine similarity, oversampled by
    /// [`OVERSAMPLE`], then walked in rank order keeping only records whose
    /// metadata matches every `(key, value)` filter pair exactly, up to
    /// `top_k`. Fewer than `top_k` survivors is a normal outcome, never an
    /// error.
    pub fn query(
        &self,
        query_text: &str,
        top_k: usize,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embeddings.embed(query_text)?;
        let candidates = self.similarity_scan(&query_embedding, top_k.saturating_mul(OVERSAMPLE))?;
        let mut kept = Vec::new();
        for candidate in candidates {
            let matches = filters
                .iter()
                .all(|(key, value)| candidate.metadata.get(key) == Some(value));
            if matches {
                kept.push(candidate);
                if kept.len() >= top_k {
                    break;
                }
            }
        }
        Ok(kept)
    }

    /// Filterless convenience form of [`RecordStore::query`].
    pub fn search_similar(&self, query_text: &str, top_k: usize) -> Result<Vec<ScoredRecord>> {
        self.query(query_text, top_k, &BTreeMap::new())
    }

    /// All records ordered by id, for bulk export.
    pub fn records(&self) -> Result<Vec<StoredRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, text, metadata FROM records ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let metadata_json: String = row.get(2)?;
            records.push(StoredRecord {
                id: row.get(0)?,
                text: row.get(1)?,
                metadata: serde_json::from_str(&metadata_json)?,
            });
        }
        Ok(records)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn similarity_scan(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, text, embedding, metadata FROM records")?;
        let mut rows = stmt.query([])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let embedding_blob: Vec<u8> = row.get(2)?;
            let embedding: Vec<f32> = bytemuck::pod_collect_to_vec(&embedding_blob);
            let metadata_json: String = row.get(3)?;
            hits.push(ScoredRecord {
                id: row.get(0)?,
                text: row.get(1)?,
                metadata: serde_json::from_str(&metadata_json)?,
                score: cosine_similarity(query_embedding, &embedding),
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

fn stored_dimensionality(conn: &Connection) -> Result<Option<usize>> {
    let blob: Option<Vec<u8>> = conn
        .query_row("SELECT embedding FROM records LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(blob.map(|b| b.len() / std::mem::size_of::<f32>()))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
