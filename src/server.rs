//! HTTP API for submitting and inspecting analysis jobs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/health` | Store reachability, provider, dispatch mode |
//! | `POST` | `/analyze` | Run an analysis inline and return the report |
//! | `POST` | `/analyze/async` | Submit a job for queued execution |
//! | `GET`  | `/jobs/{job_id}` | Job status view |
//! | `GET`  | `/jobs` | Jobs newest first (`status`, `limit`, `offset`) |
//! | `GET`  | `/results/{job_id}` | Report and stage outputs of a completed job |
//!
//! Documents are referenced by `document_path`, which must name a `.pdf`
//! inside `[storage].upload_dir`. The job owns that file from then on and
//! removes it when it finishes.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "job not found: 3f2a…" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `analysis_failed` (500), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::error::AnalysisError;
use crate::jobs::JobManager;
use crate::migrate::create_schema;
use crate::models::{JobStatus, JobView, ResultView};
use crate::queue::{drain_pending, Dispatcher, ExternalDispatch, TaskMessage, WorkerPool};
use crate::storage::{validate_document_path, DocumentHandle};
use crate::store::{JobQuery, JobStore, SqliteJobStore};

const MAX_PAGE: usize = 100;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    manager: Arc<JobManager>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// Starts the server with the SQLite store and the configured dispatch mode.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool));
    let manager = Arc::new(JobManager::from_config(config, store)?);

    let dispatcher: Arc<dyn Dispatcher> = if config.queue.is_local() {
        // Jobs left pending by `finsight submit` or an earlier server.
        let backlog = Arc::clone(&manager);
        tokio::spawn(async move {
            match drain_pending(&backlog, "local-backlog").await {
                Ok(done) if !done.is_empty() => info!(jobs = done.len(), "pending backlog processed"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "pending backlog scan failed"),
            }
        });
        Arc::new(WorkerPool::start(Arc::clone(&manager), config.queue.workers))
    } else {
        Arc::new(ExternalDispatch)
    };

    let app = router(Arc::new(config.clone()), manager, dispatcher);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, dispatch = %config.queue.dispatch, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the route table over an existing manager and dispatcher.
pub fn router(
    config: Arc<Config>,
    manager: Arc<JobManager>,
    dispatcher: Arc<dyn Dispatcher>,
) -> Router {
    let state = AppState {
        config,
        manager,
        dispatcher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/analyze", post(handle_analyze))
        .route("/analyze/async", post(handle_analyze_async))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{job_id}", get(handle_get_job))
        .route("/results/{job_id}", get(handle_get_result))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn analysis_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "analysis_failed",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        let message = err.to_string();
        match err {
            AnalysisError::JobNotFound(_) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            AnalysisError::InvalidQuery(_) | AnalysisError::InvalidDocument(_) => {
                bad_request(message)
            }
            AnalysisError::DocumentUnreadable { .. } | AnalysisError::Stage { .. } => {
                analysis_failed(message)
            }
            _ => internal(message),
        }
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    status: &'static str,
    version: &'static str,
    features: Vec<&'static str>,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Financial Document Analyzer API is running",
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        features: vec!["synchronous_analysis", "async_queue", "database_storage"],
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    llm_provider: String,
    dispatch: String,
    timestamp: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = state.manager.store().count(None).await.is_ok();
    Json(HealthResponse {
        status: if db_ok { "healthy" } else { "degraded" },
        database: if db_ok { "connected" } else { "unavailable" },
        llm_provider: state.config.llm.provider.clone(),
        dispatch: state.dispatcher.mode().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ============ POST /analyze, /analyze/async ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    document_path: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    original_name: Option<String>,
}

impl AnalyzeRequest {
    fn display_name(&self, path: &std::path::Path) -> String {
        self.original_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "document.pdf".to_string())
    }
}

#[derive(Serialize)]
struct AnalyzeResponse {
    status: &'static str,
    job_id: String,
    query: String,
    analysis: String,
    degraded: bool,
    file_processed: String,
    duration_seconds: Option<f64>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let path = validate_document_path(&state.config.storage.upload_dir, &req.document_path)?;
    let original_name = req.display_name(&path);
    let document = path.display().to_string();

    // A rejected submission leaves the caller's file alone.
    let job_id = state
        .manager
        .submit(req.query.as_deref(), &document, &original_name)
        .await?;
    let handle = DocumentHandle::new(&path);
    let outcome = state.manager.run(&job_id, handle).await?;

    let job = state.manager.get(&job_id).await?;
    match (outcome.status, job.result()) {
        (JobStatus::Completed, Some(report)) => Ok(Json(AnalyzeResponse {
            status: "success",
            job_id,
            query: job.query().to_string(),
            analysis: report.to_string(),
            degraded: job.degraded(),
            file_processed: original_name,
            duration_seconds: job.duration_seconds(),
        })),
        _ => {
            let message = outcome.error.unwrap_or_else(|| "analysis failed".to_string());
            error!(job_id = %job_id, error = %message, "inline analysis failed");
            Err(analysis_failed(format!(
                "Error processing financial document: {}",
                message
            )))
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse {
    status: &'static str,
    job_id: String,
    query: String,
    file_processed: String,
    message: String,
}

async fn handle_analyze_async(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let path = validate_document_path(&state.config.storage.upload_dir, &req.document_path)?;
    let original_name = req.display_name(&path);
    let document = path.display().to_string();

    let job_id = state
        .manager
        .submit(req.query.as_deref(), &document, &original_name)
        .await?;
    let job = state.manager.get(&job_id).await?;

    state
        .dispatcher
        .dispatch(TaskMessage {
            job_id: job_id.clone(),
            query: job.query().to_string(),
            document,
            original_name: original_name.clone(),
        })
        .await
        .map_err(|e| internal(format!("could not queue job {}: {}", job_id, e)))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "queued",
            message: format!("Job submitted. Use GET /jobs/{} to check status.", job_id),
            job_id,
            query: job.query().to_string(),
            file_processed: original_name,
        }),
    ))
}

// ============ GET /jobs ============

#[derive(Deserialize)]
struct ListParams {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobView>,
    total: u64,
}

async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<JobListResponse>, AppError> {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<JobStatus>().map_err(bad_request)?),
        None => None,
    };
    let query = JobQuery {
        status,
        limit: params.limit.unwrap_or(20).clamp(1, MAX_PAGE),
        offset: params.offset.unwrap_or(0),
    };
    let (jobs, total) = state.manager.list(&query).await?;
    Ok(Json(JobListResponse {
        jobs: jobs.iter().map(|j| j.view()).collect(),
        total,
    }))
}

async fn handle_get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, AppError> {
    let job = state.manager.get(&job_id).await?;
    Ok(Json(job.view()))
}

async fn handle_get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultView>, AppError> {
    let job = state.manager.get(&job_id).await?;
    job.result_view().map(Json).ok_or_else(|| AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: format!("result for job {} not found (status: {})", job_id, job.status()),
    })
}
