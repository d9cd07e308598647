//! Error types for contextcore
//!
//! Every rejected operation surfaces a typed error with a stable
//! [`ErrorKind`]. Structural errors (validation, transition, cycle,
//! integrity) are returned synchronously to the caller; export failures stay
//! at the sink boundary and are only retried and logged there.

use contextcore_span::SpanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::handoff::HandoffStatus;
use crate::sink::ExportError;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or out-of-range field; nothing was recorded
    #[error("Validation failed for {record}.{field}: {message}")]
    Validation {
        record: String,
        field: String,
        message: String,
    },

    /// Handoff lifecycle transition not allowed from the current status
    #[error("Invalid transition for handoff {handoff_id}: {from} -> {to}")]
    InvalidTransition {
        handoff_id: String,
        from: HandoffStatus,
        to: HandoffStatus,
    },

    /// The stage dependency graph contains a cycle
    #[error("Dependency cycle detected: {}", members.join(" -> "))]
    CycleDetected { members: Vec<String> },

    /// A propagated checksum differs from the expected value
    #[error("Checksum mismatch for '{key}' at stage '{stage}': expected {expected}, found {actual}")]
    IntegrityMismatch {
        stage: String,
        key: String,
        expected: String,
        actual: String,
    },

    /// No ancestor propagated the checksum at all
    #[error("Checksum '{key}' missing at stage '{stage}'")]
    MissingChecksum { stage: String, key: String },

    /// Stage name not present in the pipeline definition
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Handoff id not known to the registry
    #[error("Unknown handoff: {0}")]
    UnknownHandoff(String),

    /// Stage released before its predecessors closed
    #[error("Stage '{stage}' is not ready; waiting on {}", pending.join(", "))]
    StageNotReady { stage: String, pending: Vec<String> },

    /// Span tracker rejected the operation
    #[error("Span error: {0}")]
    Span(#[from] SpanError),

    /// Telemetry sink failure
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Internal lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Stable, serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InvalidTransition,
    CycleDetected,
    IntegrityMismatch,
    MissingChecksum,
    UnknownStage,
    UnknownHandoff,
    StageNotReady,
    Span,
    Export,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::CycleDetected => "cycle_detected",
            ErrorKind::IntegrityMismatch => "integrity_mismatch",
            ErrorKind::MissingChecksum => "missing_checksum",
            ErrorKind::UnknownStage => "unknown_stage",
            ErrorKind::UnknownHandoff => "unknown_handoff",
            ErrorKind::StageNotReady => "stage_not_ready",
            ErrorKind::Span => "span",
            ErrorKind::Export => "export",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    /// Create a validation error
    pub fn validation(
        record: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CoreError::Validation {
            record: record.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CoreError::CycleDetected { .. } => ErrorKind::CycleDetected,
            CoreError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            CoreError::MissingChecksum { .. } => ErrorKind::MissingChecksum,
            CoreError::UnknownStage(_) => ErrorKind::UnknownStage,
            CoreError::UnknownHandoff(_) => ErrorKind::UnknownHandoff,
            CoreError::StageNotReady { .. } => ErrorKind::StageNotReady,
            CoreError::Span(_) => ErrorKind::Span,
            CoreError::Export(_) => ErrorKind::Export,
            CoreError::LockPoisoned(_) => ErrorKind::Internal,
        }
    }

    /// Only sink failures may be retried; everything else needs new input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Export(e) if e.is_retryable())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

pub(crate) fn poisoned<E: fmt::Display>(what: &str) -> impl FnOnce(E) -> CoreError + '_ {
    move |e| CoreError::LockPoisoned(format!("{}: {}", what, e))
}
