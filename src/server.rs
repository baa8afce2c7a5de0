//! HTTP review API.
//!
//! Lets a review UI list a document's positioned chunks, confirm a
//! position, or submit a corrected span.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents/{id}/chunks` | Chunks of a document, in order |
//! | `POST` | `/chunks/{id}/validate` | Mark a chunk's position as reviewed |
//! | `POST` | `/chunks/{id}/correct` | Move a chunk to a new span |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "overlap", "message": "...", "neighbor": { ... } } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_range` (400),
//! `out_of_bounds` (400), `not_found` (404), `overlap` (409),
//! `internal` (500). Only `overlap` carries a `neighbor` object.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use chunk_locator_core::ledger::{self, CorrectionRequest, LedgerError, LedgerPolicy, NeighborSide};
use chunk_locator_core::models::ChunkRecord;
use chunk_locator_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    policy: LedgerPolicy,
}

/// Serve the review API on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

    let app = router(store, config.ledger_policy());
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("review API listening on http://{}", config.server.bind);
    tracing::info!(bind = %config.server.bind, "review API started");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Routes over any [`Store`].
pub fn router(store: Arc<dyn Store>, policy: LedgerPolicy) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents/{id}/chunks", get(handle_list_chunks))
        .route("/chunks/{id}/validate", post(handle_validate))
        .route("/chunks/{id}/correct", post(handle_correct))
        .layer(cors)
        .with_state(AppState { store, policy })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    neighbor: Option<NeighborDetail>,
}

/// The chunk a rejected correction collided with.
#[derive(Serialize)]
struct NeighborDetail {
    id: String,
    index: usize,
    start: usize,
    end: usize,
    side: NeighborSide,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    neighbor: Option<NeighborDetail>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            neighbor: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                neighbor: self.neighbor,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            LedgerError::InvalidRange { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, "invalid_range", message)
            }
            LedgerError::OutOfBounds { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, "out_of_bounds", message)
            }
            LedgerError::Overlap {
                neighbor_id,
                neighbor_index,
                neighbor_start,
                neighbor_end,
                side,
            } => AppError {
                neighbor: Some(NeighborDetail {
                    id: neighbor_id,
                    index: neighbor_index,
                    start: neighbor_start,
                    end: neighbor_end,
                    side,
                }),
                ..AppError::new(StatusCode::CONFLICT, "overlap", message)
            },
            LedgerError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
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

// ============ GET /documents/{id}/chunks ============

#[derive(Serialize)]
struct ChunkListResponse {
    document_id: String,
    chunks: Vec<ChunkRecord>,
}

async fn handle_list_chunks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChunkListResponse>, AppError> {
    let doc = state
        .store
        .get_document(&id)
        .await
        .map_err(|e| AppError::from(LedgerError::Storage(e)))?;
    if doc.is_none() {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("document not found: {}", id),
        ));
    }
    let chunks = state
        .store
        .list_chunks(&id)
        .await
        .map_err(|e| AppError::from(LedgerError::Storage(e)))?;
    Ok(Json(ChunkListResponse {
        document_id: id,
        chunks,
    }))
}

// ============ POST /chunks/{id}/validate ============

async fn handle_validate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChunkRecord>, AppError> {
    let record = ledger::validate(state.store.as_ref(), &id).await?;
    Ok(Json(record))
}

// ============ POST /chunks/{id}/correct ============

async fn handle_correct(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<ChunkRecord>, AppError> {
    let request: CorrectionRequest = serde_json::from_value(params).map_err(|e| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("expected {{\"start\", \"end\", \"reason\"}}: {}", e),
        )
    })?;
    if request.reason.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "reason must not be empty",
        ));
    }
    let record = ledger::correct(state.store.as_ref(), &id, &request, &state.policy).await?;
    Ok(Json(record))
}
