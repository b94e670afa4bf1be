//! Error types for Actigraphy Flux

use crate::batch::BatchReport;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or joining a feature corpus
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Base directory not found: {}", .0.display())]
    NotFoundError(PathBuf),

    #[error("Failed to read series for subject {subject}: {reason}")]
    ReadError { subject: String, reason: String },

    #[error("Series for subject {subject} does not match the expected schema: {reason}")]
    SchemaError { subject: String, reason: String },

    #[error("Duplicate subject identifier in corpus: {0}")]
    ScanError(String),

    #[error(
        "No subject produced any daily feature rows ({} failed, {} without wear time, {} cancelled)",
        .report.failures.len(),
        .report.subjects_without_wear.len(),
        .report.cancelled.len()
    )]
    EmptyCorpusError { report: Box<BatchReport> },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Label table error: {0}")]
    LabelError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl PipelineError {
    /// Whether this error is confined to a single subject and must not abort a batch
    pub fn is_subject_scoped(&self) -> bool {
        matches!(
            self,
            PipelineError::ReadError { .. } | PipelineError::SchemaError { .. }
        )
    }
}
