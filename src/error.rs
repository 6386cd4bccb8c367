// src/error.rs

use thiserror::Error;

/// Everything that can go wrong between receiving a file and holding a
/// validated `ReceiptRecord`.
///
/// None of these are fatal: `pipeline::Extractor::extract` turns every variant
/// into the "ParseError" placeholder record.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0:?}")]
    UnsupportedFileType(String),

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render first PDF page: {0}")]
    PdfRender(String),

    #[error("file encoding task failed: {0}")]
    EncodeTask(#[from] tokio::task::JoinError),

    #[error("GEMINI_API_KEY not configured")]
    MissingCredential,

    #[error("request to extraction endpoint failed: {0}")]
    NetworkFailure(#[from] reqwest::Error),

    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("model reply is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("model reply does not match the receipt schema: {0}")]
    SchemaViolation(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("refusing to store a ParseError placeholder")]
    PlaceholderRecord,
}

pub type StoreResult<T> = Result<T, StoreError>;
