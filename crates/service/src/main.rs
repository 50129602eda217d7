use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::tempdir;
use thiserror::Error;
use tokio::task;
use tracing::{error, info};

use claimlens_core::{expand_invoice_archive, extract_pdf_text};
use claimlens_llm::LlmClient;
use claimlens_rag::{
    analyze_batch, answer_question, export_csv_bytes, ChatFilters, Classifier, EmbeddingClient,
    InvoiceAnalysis, RecordStore, ScoredRecord,
};

struct AppState {
    store: RecordStore,
    llm: LlmClient,
    // Last uploaded policy text, used to ground chat answers.
    policy_text: RwLock<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let store_path = std::env::var("CLAIMLENS_DB").unwrap_or_else(|_| "claimlens.sqlite".to_string());
    let embeddings = EmbeddingClient::from_env()?;
    let store = RecordStore::open(&store_path, embeddings)?;
    let llm = LlmClient::from_env()?;
    info!(
        store = %store_path,
        provider = llm.provider().as_str(),
        model = llm.model(),
        "claimlens service starting"
    );
    let state = Arc::new(AppState {
        store,
        llm,
        policy_text: RwLock::new(String::new()),
    });
    let app = Router::new()
        .route("/", get(root))
        .route("/analyze-invoices", post(handle_analyze_invoices))
        .route("/search-invoices", get(handle_search_invoices))
        .route("/ask", post(handle_ask))
        .route("/export-excel", get(handle_export))
        .with_state(state);
    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "claimlens invoice analyzer" }))
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    message: String,
    employee_name: String,
    results: BTreeMap<String, InvoiceAnalysis>,
}

async fn handle_analyze_invoices(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let mut policy_pdf: Option<Vec<u8>> = None;
    let mut invoices_zip: Option<Vec<u8>> = None;
    let mut employee_name: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(AppError::bad_request)?
    {
        match field.name() {
            Some("policy_pdf") => {
                policy_pdf = Some(field.bytes().await.map_err(AppError::bad_request)?.to_vec());
            }
            Some("invoices_zip") => {
                invoices_zip = Some(field.bytes().await.map_err(AppError::bad_request)?.to_vec());
            }
            Some("employee_name") => {
                employee_name = Some(field.text().await.map_err(AppError::bad_request)?);
            }
            _ => {}
        }
    }
    let policy_pdf = policy_pdf.ok_or_else(|| AppError::bad_request("missing policy_pdf"))?;
    let invoices_zip = invoices_zip.ok_or_else(|| AppError::bad_request("missing invoices_zip"))?;
    let employee_name = employee_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("missing employee_name"))?;
    let state = state.clone();
    let employee = employee_name.clone();
    let response = task::spawn_blocking(move || {
        run_batch_analysis(&state, &policy_pdf, &invoices_zip, &employee)
    })
    .await
    .map_err(AppError::internal)??;
    Ok(Json(AnalyzeResponse {
        message: "analysis completed".to_string(),
        employee_name,
        results: response,
    }))
}

fn run_batch_analysis(
    state: &AppState,
    policy_pdf: &[u8],
    invoices_zip: &[u8],
    employee: &str,
) -> Result<BTreeMap<String, InvoiceAnalysis>, AppError> {
    let workdir = tempdir().map_err(AppError::internal)?;
    let policy_path = workdir.path().join("policy.pdf");
    std::fs::write(&policy_path, policy_pdf).map_err(AppError::internal)?;
    let policy_text = extract_pdf_text(&policy_path)
        .map_err(|err| AppError::bad_request(format!("could not read policy PDF: {err}")))?;
    if policy_text.is_empty() {
        return Err(AppError::bad_request("policy PDF contains no text"));
    }
    let archive_path = workdir.path().join("invoices.zip");
    std::fs::write(&archive_path, invoices_zip).map_err(AppError::internal)?;
    let invoice_dir = workdir.path().join("invoices");
    let files = expand_invoice_archive(&archive_path, &invoice_dir)
        .map_err(|err| AppError::bad_request(format!("could not expand archive: {err}")))?;
    if files.is_empty() {
        return Err(AppError::bad_request("archive contains no top-level PDFs"));
    }
    let classifier = Classifier::new(state.llm.clone());
    let results = analyze_batch(&state.store, &classifier, &policy_text, employee, &files);
    *state.policy_text.write() = policy_text;
    Ok(results
        .into_iter()
        .map(|analysis| (analysis.filename.clone(), analysis))
        .collect())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    employee: Option<String>,
    status: Option<String>,
    invoice_id: Option<String>,
    date: Option<String>,
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    id: String,
    score: f32,
    snippet: String,
    metadata: BTreeMap<String, String>,
}

impl From<ScoredRecord> for SearchHit {
    fn from(record: ScoredRecord) -> Self {
        Self {
            id: record.id,
            score: record.score,
            snippet: record.text.chars().take(300).collect(),
            metadata: record.metadata,
        }
    }
}

async fn handle_search_invoices(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    if params.query.trim().is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }
    let mut filters = BTreeMap::new();
    if let Some(employee) = &params.employee {
        filters.insert("employee".to_string(), employee.trim().to_lowercase());
    }
    if let Some(status) = &params.status {
        filters.insert("status".to_string(), status.trim().to_string());
    }
    if let Some(invoice_id) = &params.invoice_id {
        filters.insert("invoice_id".to_string(), invoice_id.trim().to_string());
    }
    if let Some(date) = &params.date {
        filters.insert("date".to_string(), date.trim().to_string());
    }
    let top_k = params.top_k.unwrap_or(5);
    let state = state.clone();
    let records = task::spawn_blocking(move || state.store.query(&params.query, top_k, &filters))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)?;
    Ok(Json(SearchResponse {
        results: records.into_iter().map(SearchHit::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
    employee: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    answer: String,
    used_fallback: bool,
    sources: Vec<SearchHit>,
}

async fn handle_ask(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if body.question.trim().is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }
    let state = state.clone();
    let answer = task::spawn_blocking(move || {
        let filters = ChatFilters {
            employee: body.employee.clone(),
            status: body.status.clone(),
        };
        let policy_text = state.policy_text.read().clone();
        let policy = (!policy_text.is_empty()).then_some(policy_text.as_str());
        answer_question(&state.store, &state.llm, &body.question, &filters, policy)
    })
    .await
    .map_err(AppError::internal)?
    .map_err(AppError::internal)?;
    Ok(Json(AskResponse {
        answer: answer.answer,
        used_fallback: answer.used_fallback,
        sources: answer.sources.into_iter().map(SearchHit::from).collect(),
    }))
}

async fn handle_export(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let state = state.clone();
    let bytes = task::spawn_blocking(move || export_csv_bytes(&state.store))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"invoice_analysis_export.csv\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Internal(err) => {
                error!("internal_error" = %err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}
