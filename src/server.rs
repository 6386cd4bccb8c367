// src/server.rs

use crate::error::{StoreError, StoreResult};
use crate::pipeline::Extractor;
use crate::receipt::{ReceiptItem, ReceiptRecord};
use crate::receipt_db::{ReceiptStore, StoredReceipt};
use crate::stats::{AggregateStats, ChartSeries, chart_series, compute_stats};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Extractor,
    pub store: Arc<Mutex<ReceiptStore>>,
    pub upload_dir: PathBuf,
}

impl AppState {
    /// Run `f` against the store on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut ReceiptStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || -> Result<T, ApiError> {
            let mut store = store.lock().map_err(|_| ApiError::LockPoisoned)?;
            Ok(f(&mut *store)?)
        })
        .await?
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid upload: {0}")]
    BadUpload(String),

    #[error("receipt {0} not found")]
    NotFound(i64),

    #[error("failed to save upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error("receipt store lock poisoned")]
    LockPoisoned,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Io(_) | ApiError::Store(_) | ApiError::LockPoisoned | ApiError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ReceiptList {
    receipts: Vec<StoredReceipt>,
    stats: AggregateStats,
}

#[derive(Debug, Serialize)]
struct ReceiptDetails {
    receipt: StoredReceipt,
    items: Vec<ReceiptItem>,
    stats: AggregateStats,
    charts: ChartSeries,
}

/// Returned with 422 when the model could not read the upload.
#[derive(Debug, Serialize)]
struct ExtractionFailed {
    success: bool,
    message: String,
    record: ReceiptRecord,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(list_receipts))
        .route("/upload", post(upload_receipt))
        .route("/details/:id", get(receipt_details))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Every stored receipt plus stats over all of them. A broken store shows up
/// as an empty list rather than an error page.
async fn list_receipts(State(state): State<AppState>) -> Json<ReceiptList> {
    let receipts = state
        .with_store(|db| db.list_receipts())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Could not list receipts");
            Vec::new()
        });
    let stats = compute_stats(&receipts);
    Json(ReceiptList { receipts, stats })
}

async fn upload_receipt(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadUpload(format!("multipart error: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadUpload(format!("read error: {e}")))?;
            upload = Some((filename, data.to_vec()));
            break;
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::BadUpload("no file provided".into()))?;
    let stored_name = stored_file_name(&filename, &data)
        .ok_or_else(|| ApiError::BadUpload(format!("unusable file name {filename:?}")))?;

    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let path = state.upload_dir.join(&stored_name);
    tokio::fs::write(&path, &data).await?;

    info!(file = %stored_name, bytes = data.len(), "Saved upload");

    let record = state.extractor.extract(&path).await;
    if record.is_parse_error() {
        let message = record.error.clone().unwrap_or_default();
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ExtractionFailed {
                success: false,
                message,
                record,
            }),
        )
            .into_response());
    }

    let id = state
        .with_store(move |db| db.insert_receipt(&record, Some(&stored_name)))
        .await?;
    Ok(Redirect::to(&format!("/details/{id}")).into_response())
}

async fn receipt_details(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReceiptDetails>, ApiError> {
    let receipt = state
        .with_store(move |db| db.get_receipt(id))
        .await?
        .ok_or(ApiError::NotFound(id))?;

    let stats = compute_stats(std::slice::from_ref(&receipt));
    let charts = chart_series([&receipt.record]);
    let items = receipt.record.items().to_vec();
    Ok(Json(ReceiptDetails {
        receipt,
        items,
        stats,
        charts,
    }))
}

/// `{first 12 hex chars of sha256}-{base name}`; `None` when the client sent
/// no usable file name.
fn stored_file_name(filename: &str, data: &[u8]) -> Option<String> {
    let base = std::path::Path::new(filename)
        .file_name()?
        .to_str()?
        .replace(|c: char| c.is_control() || c == '\\', "_");
    let digest = format!("{:x}", Sha256::digest(data));
    Some(format!("{}-{base}", &digest[..12]))
}
