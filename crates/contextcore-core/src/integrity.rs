//! Checksum propagation between stages
//!
//! A producing stage registers a checksum in its span baggage. Because
//! baggage is copied into every descendant (and the pipeline coordinator
//! merges predecessor baggage into dependent stages), consumers downstream
//! can verify what they are about to read. A missing checksum and a wrong
//! checksum are reported as different errors.

use contextcore_span::{SpanRef, SpanTracker};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::{CoreError, ErrorKind, Result};
use crate::metrics::CoreMetrics;

const FINGERPRINT_PREFIX: &str = "sha256:";

/// Content fingerprint in the form `sha256:<hex>`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}{}", FINGERPRINT_PREFIX, hex::encode(digest))
}

/// Registers and verifies checksums carried in span baggage.
pub struct IntegrityGate {
    tracker: Arc<SpanTracker>,
    metrics: Option<Arc<CoreMetrics>>,
}

impl IntegrityGate {
    pub fn new(tracker: Arc<SpanTracker>) -> Self {
        Self {
            tracker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Record `value` under `key` in the stage's baggage.
    ///
    /// Only stages opened afterwards inherit it.
    pub fn register_checksum(&self, stage: SpanRef, key: &str, value: &str) -> Result<()> {
        self.tracker.set_baggage(stage, key, value)?;
        tracing::debug!(
            trace_id = %stage.trace_id,
            span_id = %stage.span_id,
            key = key,
            "Checksum registered"
        );
        Ok(())
    }

    /// Register the fingerprint of `content` and return it.
    pub fn register_fingerprint(&self, stage: SpanRef, key: &str, content: &[u8]) -> Result<String> {
        let value = fingerprint(content);
        self.register_checksum(stage, key, &value)?;
        Ok(value)
    }

    /// Check the checksum visible to `stage` against `expected`.
    pub fn verify(&self, stage: SpanRef, key: &str, expected: &str) -> Result<()> {
        let span = self.tracker.get(stage)?;

        let outcome = match span.baggage.get(key) {
            None => Err(CoreError::MissingChecksum {
                stage: span.name.clone(),
                key: key.to_string(),
            }),
            Some(actual) if actual != expected => Err(CoreError::IntegrityMismatch {
                stage: span.name.clone(),
                key: key.to_string(),
                expected: expected.to_string(),
                actual: actual.clone(),
            }),
            Some(_) => Ok(()),
        };

        if let Err(e) = &outcome {
            if let Some(metrics) = &self.metrics {
                metrics.record_integrity_failure(e.kind().as_str());
            }
            tracing::warn!(
                trace_id = %stage.trace_id,
                span_id = %stage.span_id,
                stage = %span.name,
                key = key,
                kind = %e.kind(),
                "Integrity check failed"
            );
        }
        outcome
    }

    /// Verify against the fingerprint of `content`.
    pub fn verify_content(&self, stage: SpanRef, key: &str, content: &[u8]) -> Result<()> {
        self.verify(stage, key, &fingerprint(content))
    }
}

/// Whether an error came out of an integrity check.
pub fn is_integrity_error(error: &CoreError) -> bool {
    matches!(
        error.kind(),
        ErrorKind::IntegrityMismatch | ErrorKind::MissingChecksum
    )
}
