use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use claimlens_core::{discover_pdfs, expand_invoice_archive, extract_pdf_text};
use claimlens_llm::LlmClient;
use claimlens_rag::{
    analyze_batch, answer_question, export_to_path, ChatFilters, Classifier, EmbeddingClient,
    RecordStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "claimlens", version = VERSION, about = "Invoice classification and retrieval")]
struct Cli {
    /// Record store path; use ':memory:' for an ephemeral run.
    #[arg(long, global = true, default_value = "claimlens.sqlite")]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a batch of invoice PDFs against a policy document.
    Analyze {
        /// Policy document (PDF, or plain text with any other extension).
        #[arg(long)]
        policy: PathBuf,
        /// Directory of invoice PDFs, or a zip archive of them.
        #[arg(long)]
        invoices: PathBuf,
        #[arg(long)]
        employee: String,
    },
    /// Similarity search over stored invoice records.
    Search {
        query: String,
        #[arg(long)]
        employee: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "invoice-id")]
        invoice_id: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Ask a natural-language question grounded in stored records.
    Ask {
        question: String,
        #[arg(long)]
        employee: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Optional policy document to include in the grounding prompt.
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Export all stored records as a flat CSV table.
    Export {
        #[arg(long, default_value = "invoice_analysis_export.csv")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let store = open_store(&cli.db)?;
    match cli.command {
        Commands::Analyze {
            policy,
            invoices,
            employee,
        } => run_analyze(&store, &policy, &invoices, &employee),
        Commands::Search {
            query,
            employee,
            status,
            invoice_id,
            date,
            top_k,
        } => run_search(&store, &query, employee, status, invoice_id, date, top_k),
        Commands::Ask {
            question,
            employee,
            status,
            policy,
        } => run_ask(&store, &question, employee, status, policy.as_deref()),
        Commands::Export { out } => {
            export_to_path(&store, &out)?;
            println!("export written to {}", out.display());
            Ok(())
        }
    }
}

fn open_store(db: &str) -> Result<RecordStore> {
    let embeddings = EmbeddingClient::from_env()?;
    if db == ":memory:" {
        RecordStore::in_memory(embeddings)
    } else {
        RecordStore::open(db, embeddings)
    }
}

fn run_analyze(store: &RecordStore, policy: &Path, invoices: &Path, employee: &str) -> Result<()> {
    let policy_text = read_policy(policy)?;
    if policy_text.is_empty() {
        bail!("policy document {} contains no text", policy.display());
    }
    let workdir = tempfile::tempdir()?;
    let files = if invoices
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    {
        expand_invoice_archive(invoices, workdir.path())?
    } else {
        discover_pdfs(invoices)?
    };
    if files.is_empty() {
        bail!("no invoice PDFs found under {}", invoices.display());
    }
    let llm = LlmClient::from_env()?;
    let classifier = Classifier::new(llm);
    let results = analyze_batch(store, &classifier, &policy_text, employee, &files);
    println!("{}", serde_json::to_string_pretty(&results)?);
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        eprintln!("[claimlens] {failed} of {} invoices failed", results.len());
    }
    Ok(())
}

fn read_policy(policy: &Path) -> Result<String> {
    let is_pdf = policy
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        Ok(extract_pdf_text(policy)?)
    } else {
        Ok(std::fs::read_to_string(policy)
            .with_context(|| format!("failed to read policy {}", policy.display()))?
            .trim()
            .to_string())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_search(
    store: &RecordStore,
    query: &str,
    employee: Option<String>,
    status: Option<String>,
    invoice_id: Option<String>,
    date: Option<String>,
    top_k: usize,
) -> Result<()> {
    let mut filters = BTreeMap::new();
    if let Some(employee) = employee {
        filters.insert("employee".to_string(), employee.trim().to_lowercase());
    }
    if let Some(status) = status {
        filters.insert("status".to_string(), status.trim().to_string());
    }
    if let Some(invoice_id) = invoice_id {
        filters.insert("invoice_id".to_string(), invoice_id.trim().to_string());
    }
    if let Some(date) = date {
        filters.insert("date".to_string(), date.trim().to_string());
    }
    let results = store.query(query, top_k, &filters)?;
    if results.is_empty() {
        println!("no matching records");
        return Ok(());
    }
    for record in results {
        let status = record
            .metadata
            .get("status")
            .map(String::as_str)
            .unwrap_or("Unknown");
        let snippet: String = record.text.chars().take(120).collect();
        println!("{:.3}  {}  [{}]  {}", record.score, record.id, status, snippet);
    }
    Ok(())
}

fn run_ask(
    store: &RecordStore,
    question: &str,
    employee: Option<String>,
    status: Option<String>,
    policy: Option<&Path>,
) -> Result<()> {
    let policy_text = match policy {
        Some(path) => Some(read_policy(path)?),
        None => None,
    };
    let llm = LlmClient::from_env()?;
    let filters = ChatFilters { employee, status };
    let answer = answer_question(store, &llm, question, &filters, policy_text.as_deref())?;
    if answer.used_fallback {
        eprintln!("[claimlens] no filtered match; answered from an unfiltered search");
    }
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        eprintln!("[claimlens] grounded in:");
        for source in &answer.sources {
            eprintln!("  {:.3}  {}", source.score, source.id);
        }
    }
    Ok(())
}
