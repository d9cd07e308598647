//! Error types for span tracking.

use thiserror::Error;

use crate::context::{SpanId, TraceId};

/// Errors raised by [`crate::SpanTracker`] operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpanError {
    /// The referenced span is not known to the tracker
    #[error("Unknown span: {trace_id}/{span_id}")]
    UnknownSpan { trace_id: TraceId, span_id: SpanId },

    /// The referenced trace is not known to the tracker
    #[error("Unknown trace: {0}")]
    UnknownTrace(TraceId),

    /// A run with this trace id is still live in the tracker
    #[error("Trace {0} already has a live run")]
    TraceActive(TraceId),

    /// The span was already closed and only accepts reads
    #[error("Span '{name}' ({span_id}) is already closed")]
    SpanClosed { span_id: SpanId, name: String },

    /// A reported progress value fell outside [0, 1]
    #[error("Progress {value} for span {span_id} is outside [0, 1]")]
    ProgressOutOfRange { span_id: SpanId, value: f64 },

    /// A stage weight was zero, negative or not finite
    #[error("Invalid weight {value} for stage '{name}'")]
    InvalidWeight { name: String, value: f64 },

    /// Malformed W3C `traceparent` header value
    #[error("Invalid traceparent: {0}")]
    InvalidTraceparent(String),

    /// Internal lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type alias for span operations
pub type Result<T> = std::result::Result<T, SpanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpanError::ProgressOutOfRange {
            span_id: SpanId::from(7u64),
            value: 1.5,
        };
        assert_eq!(
            err.to_string(),
            "Progress 1.5 for span 0000000000000007 is outside [0, 1]"
        );
    }
}
