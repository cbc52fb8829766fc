//! The pluggable extraction engine seam.
//!
//! The worker hosts exactly one engine instance and treats it as an untrusted
//! black box: it may fail, panic, hang, or leak resources. Failure and panic
//! are recovered inside the worker; a hang is bounded by the watchdog.

use std::path::Path;

use async_trait::async_trait;

use crate::metadata::{
    CONTENT_LENGTH_KEY, ExtractionResult, MetadataRecord, RESOURCE_NAME_KEY,
};

/// Errors surfaced by an extraction engine.
///
/// These never cross the worker boundary as errors: the worker converts them
/// into an error description on the first record of the result.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The document could not be read at all.
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    /// Extraction failed before producing any records.
    #[error("extraction failed: {message}")]
    Extraction { message: String },

    /// Extraction failed after producing some records. The partial result is
    /// preserved and returned to the caller with the error attached.
    #[error("extraction aborted: {message}")]
    Aborted {
        message: String,
        partial: ExtractionResult,
    },
}

impl EngineError {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    pub fn aborted(message: impl Into<String>, partial: ExtractionResult) -> Self {
        Self::Aborted {
            message: message.into(),
            partial,
        }
    }

    /// Split into the error description and whatever partial result exists.
    pub fn into_parts(self) -> (String, ExtractionResult) {
        match self {
            Self::Aborted { message, partial } => {
                (format!("extraction aborted: {message}"), partial)
            }
            other => (other.to_string(), ExtractionResult::new()),
        }
    }
}

/// One document-parsing capability, hosted inside a worker process.
///
/// Implementations own all per-document state; [`reset`](Self::reset) is
/// called after every extraction regardless of outcome so state never leaks
/// between documents.
#[async_trait]
pub trait ExtractionEngine: Send + 'static {
    /// Parse the document at `path` into an ordered record list. The first
    /// record describes the document itself.
    async fn extract(&mut self, path: &Path) -> Result<ExtractionResult, EngineError>;

    /// Clear all per-document state. Default implementations that hold no
    /// state need not override this.
    fn reset(&mut self) {}
}

/// Minimal built-in engine: one record with the document's name and byte
/// length. This is the pluggable seam's default, not a format parser.
#[derive(Debug, Default)]
pub struct StatEngine;

#[async_trait]
impl ExtractionEngine for StatEngine {
    async fn extract(&mut self, path: &Path) -> Result<ExtractionResult, EngineError> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(EngineError::extraction(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let mut record = MetadataRecord::new();
        if let Some(name) = path.file_name() {
            record.set(RESOURCE_NAME_KEY, name.to_string_lossy());
        }
        record.set(CONTENT_LENGTH_KEY, meta.len().to_string());

        let mut result = ExtractionResult::new();
        result.push(record);
        Ok(result)
    }
}
