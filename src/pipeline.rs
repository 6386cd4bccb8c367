// src/pipeline.rs

use crate::error::ExtractError;
use crate::file_encode::encode_file;
use crate::llm_extract::ReceiptModel;
use crate::receipt::ReceiptRecord;
use crate::validate::validate_reply;
use std::path::Path;
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use tracing::{Instrument, info, warn};

/// Runs encode → model call → validation for one uploaded file.
#[derive(Clone)]
pub struct Extractor {
    model: Arc<dyn ReceiptModel>,
}

impl Extractor {
    pub fn new(model: Arc<dyn ReceiptModel>) -> Self {
        Self { model }
    }

    /// Every stage in order; the first failure is returned as-is.
    ///
    /// Encoding reads the file and may rasterise a PDF, so it runs on the
    /// blocking pool.
    pub async fn try_extract(&self, path: &Path) -> Result<ReceiptRecord, ExtractError> {
        let owned = path.to_path_buf();
        let encoded = tokio::task::spawn_blocking(move || encode_file(&owned)).await??;
        let reply = self.model.complete(&encoded).await?;
        validate_reply(&reply)
    }

    /// Like [`Extractor::try_extract`], but a failure becomes the "ParseError"
    /// placeholder dated today instead of an `Err`.
    pub async fn extract(&self, path: &Path) -> ReceiptRecord {
        let span = tracing::info_span!("extract", file = %path.display());
        self.extract_on(path, today()).instrument(span).await
    }

    async fn extract_on(&self, path: &Path, today: Date) -> ReceiptRecord {
        match self.try_extract(path).await {
            Ok(record) => {
                let (filled, total) = record.coverage();
                info!(
                    vendor = %record.vendor,
                    amount = record.amount,
                    items = record.items().len(),
                    filled,
                    total,
                    "Receipt extracted"
                );
                record
            }
            Err(e) => {
                warn!(error = %e, "Extraction failed, returning placeholder");
                ReceiptRecord::parse_error(e.to_string(), today)
            }
        }
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_encode::EncodedFile;
    use crate::receipt::PARSE_ERROR_VENDOR;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use time::macros::date;

    /// Replies with a canned answer and counts how often it was asked.
    struct CannedModel {
        reply: Result<String, fn() -> ExtractError>,
        calls: AtomicUsize,
    }

    impl CannedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: fn() -> ExtractError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReceiptModel for CannedModel {
        async fn complete(&self, _file: &EncodedFile) -> Result<String, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|make| make())
        }
    }

    fn receipt_file(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"\x89PNG fake").unwrap();
        path
    }

    #[tokio::test]
    async fn test_success_returns_record() {
        let dir = TempDir::new().unwrap();
        let model = CannedModel::replying(
            "```json\n{\"vendor\":\"Cafe\",\"date\":\"2024-01-01\",\"amount\":12.5}\n```",
        );
        let extractor = Extractor::new(model.clone());

        let record = extractor.extract(&receipt_file(&dir, "r.png")).await;
        assert!(!record.is_parse_error());
        assert_eq!(record.vendor, "Cafe");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_file_never_reaches_model() {
        let dir = TempDir::new().unwrap();
        let model = CannedModel::replying("{}");
        let extractor = Extractor::new(model.clone());

        let err = extractor
            .try_extract(&receipt_file(&dir, "r.gif"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schema_violation_becomes_placeholder() {
        let dir = TempDir::new().unwrap();
        let extractor = Extractor::new(CannedModel::replying(r#"{"vendor":"Cafe","amount":3}"#));

        let record = extractor
            .extract_on(&receipt_file(&dir, "r.jpeg"), date!(2025 - 03 - 14))
            .await;
        assert_eq!(record.vendor, PARSE_ERROR_VENDOR);
        assert_eq!(record.amount, 0.0);
        assert_eq!(record.category, "Unknown");
        assert_eq!(record.date, date!(2025 - 03 - 14));
        assert!(record.error.as_deref().unwrap().contains("missing field `date`"));
    }

    #[tokio::test]
    async fn test_model_failure_becomes_placeholder() {
        let dir = TempDir::new().unwrap();
        let extractor = Extractor::new(CannedModel::failing(|| ExtractError::MissingCredential));

        let record = extractor.extract(&receipt_file(&dir, "r.webp")).await;
        assert!(record.is_parse_error());
        assert_eq!(
            record.error.as_deref(),
            Some("GEMINI_API_KEY not configured")
        );
    }

    #[tokio::test]
    async fn test_every_failure_kind_is_caught() {
        let dir = TempDir::new().unwrap();
        let path = receipt_file(&dir, "r.tiff");
        for reply in ["not json", "[]", r#"{"vendor":"A","date":"2024-13-01","amount":1}"#] {
            let extractor = Extractor::new(CannedModel::replying(reply));
            assert!(extractor.extract(&path).await.is_parse_error(), "{reply}");
        }
        let extractor = Extractor::new(CannedModel::failing(|| {
            ExtractError::MalformedUpstreamResponse("no candidates".into())
        }));
        assert!(extractor.extract(&path).await.is_parse_error());
    }
}
