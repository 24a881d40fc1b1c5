//! HTTP API for the question-answering service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/get_answer` | Answer a question for one user, continuing a conversation |
//! | `POST` | `/ingest` | Build missing indexes (all users, or one) |
//! | `GET`  | `/users` | Configured users and whether their index exists |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unknown_user", "message": "unknown user: Bob" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `unknown_user` | 404 |
//! | `index_not_built` | 409 |
//! | `upstream_unavailable` | 503 |
//! | `upstream_invalid_response` | 502 |
//! | `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser client
//! can call the API directly.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::AskRequest;
use crate::app::App;
use crate::error::Error;
use crate::ingest::{run_ingest, IngestReport};
use crate::models::TimeRange;
use crate::progress::NoProgress;
use crate::users::{user_statuses, UserStatus};

#[derive(Clone)]
pub struct AppState {
    app: Arc<App>,
    /// Ingestion is an administrative operation; one at a time.
    ingest_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(app: App) -> Self {
        Self {
            app: Arc::new(app),
            ingest_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/get_answer", post(handle_get_answer))
        .route("/ingest", post(handle_ingest))
        .route("/users", get(handle_users))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    println!("eqa server listening on http://{}", bind_addr);

    axum::serve(listener, router(AppState::new(app))).await?;
    Ok(())
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

pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::UnknownUser(_) => StatusCode::NOT_FOUND,
            Error::IndexNotBuilt(_) => StatusCode::CONFLICT,
            Error::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            Error::EmptyQuery => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => err.into(),
            Err(err) => {
                tracing::error!(error = %err, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message: format!("{:#}", err),
                }
            }
        }
    }
}

// ============ POST /get_answer ============

#[derive(Deserialize)]
pub struct GetAnswerRequest {
    #[serde(default)]
    pub query: String,
    pub user: String,
    /// Conversation to continue; omitted or empty starts a new one.
    #[serde(default)]
    pub memory_id: Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
}

#[derive(Serialize)]
pub struct SourceRef {
    pub name: String,
}

#[derive(Serialize)]
pub struct GetAnswerResponse {
    pub query: String,
    pub answer: String,
    pub source: Vec<SourceRef>,
    pub memory_id: String,
}

async fn handle_get_answer(
    State(state): State<AppState>,
    Json(req): Json<GetAnswerRequest>,
) -> Result<Json<GetAnswerResponse>, AppError> {
    let range = TimeRange::from_dates(req.since.as_deref(), req.until.as_deref())
        .map_err(|e| bad_request(format!("invalid date range: {}", e)))?;

    let answer = state
        .app
        .qa
        .ask(AskRequest {
            query: req.query,
            user: req.user,
            session_id: req.memory_id,
            range,
        })
        .await?;

    Ok(Json(GetAnswerResponse {
        query: answer.query,
        answer: answer.answer,
        source: answer
            .sources
            .into_iter()
            .map(|name| SourceRef { name })
            .collect(),
        memory_id: answer.session_id,
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize, Default)]
struct IngestRequest {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct IngestResponse {
    reports: Vec<IngestReport>,
}

/// The body is optional; an empty POST ingests every user.
async fn handle_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let req: IngestRequest = if body.is_empty() {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };

    let _guard = state.ingest_lock.lock().await;
    let app = &state.app;
    let reports = run_ingest(
        &app.config,
        req.user.as_deref(),
        req.force,
        app.backends.embedder.as_ref(),
        &NoProgress,
        Some(app.backends.registry.as_ref()),
    )
    .await?;

    Ok(Json(IngestResponse { reports }))
}

// ============ GET /users ============

#[derive(Serialize)]
struct UsersResponse {
    users: Vec<UserStatus>,
}

async fn handle_users(State(state): State<AppState>) -> Json<UsersResponse> {
    Json(UsersResponse {
        users: user_statuses(&state.app.config),
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
