//! Prometheus metrics for contextcore
//!
//! - `contextcore_spans_closed_total` (counter) - closed spans by status
//! - `contextcore_span_duration_seconds` (histogram) - span durations by status
//! - `contextcore_events_emitted_total` (counter) - span events by name
//! - `contextcore_handoff_transitions_total` (counter) - applied transitions by from/to
//! - `contextcore_handoff_transitions_rejected_total` (counter) - rejected transitions
//! - `contextcore_integrity_failures_total` (counter) - failed checksum checks by kind
//! - `contextcore_export_failures_total` (counter) - sink failures by retryability
//! - `contextcore_export_dropped_total` (counter) - items dropped by the export queue
//! - `contextcore_run_progress` (gauge) - latest root progress by run
//!
//! # Example
//!
//! ```rust,no_run
//! use contextcore_core::metrics::CoreMetrics;
//!
//! let metrics = CoreMetrics::new().unwrap();
//! metrics.record_transition("pending", "accepted");
//! metrics.set_run_progress("nightly-etl", 0.5);
//! println!("{}", metrics.encode_text().unwrap());
//! ```

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry};
use std::sync::Arc;

const NAMESPACE: &str = "contextcore";

/// Core metrics, registered into one Prometheus registry
pub struct CoreMetrics {
    registry: Arc<Registry>,
    spans_closed_total: CounterVec,
    span_duration_seconds: HistogramVec,
    events_emitted_total: CounterVec,
    handoff_transitions_total: CounterVec,
    handoff_transitions_rejected_total: IntCounter,
    integrity_failures_total: CounterVec,
    export_failures_total: CounterVec,
    export_dropped_total: IntCounter,
    run_progress: GaugeVec,
}

impl CoreMetrics {
    /// Create metrics in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create metrics and register them with an existing registry
    pub fn with_registry(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let spans_closed_total = CounterVec::new(
            Opts::new("spans_closed_total", "Total number of closed spans by status")
                .namespace(NAMESPACE),
            &["status"],
        )?;

        let span_duration_seconds = HistogramVec::new(
            HistogramOpts::new("span_duration_seconds", "Span duration in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
            &["status"],
        )?;

        let events_emitted_total = CounterVec::new(
            Opts::new("events_emitted_total", "Total number of span events by name")
                .namespace(NAMESPACE),
            &["name"],
        )?;

        let handoff_transitions_total = CounterVec::new(
            Opts::new(
                "handoff_transitions_total",
                "Total number of applied handoff status transitions",
            )
            .namespace(NAMESPACE),
            &["from", "to"],
        )?;

        let handoff_transitions_rejected_total = IntCounter::with_opts(
            Opts::new(
                "handoff_transitions_rejected_total",
                "Total number of rejected handoff status transitions",
            )
            .namespace(NAMESPACE),
        )?;

        let integrity_failures_total = CounterVec::new(
            Opts::new(
                "integrity_failures_total",
                "Total number of failed checksum verifications by kind",
            )
            .namespace(NAMESPACE),
            &["kind"],
        )?;

        let export_failures_total = CounterVec::new(
            Opts::new("export_failures_total", "Total number of telemetry export failures")
                .namespace(NAMESPACE),
            &["retryable"],
        )?;

        let export_dropped_total = IntCounter::with_opts(
            Opts::new(
                "export_dropped_total",
                "Total number of telemetry items dropped by the export queue",
            )
            .namespace(NAMESPACE),
        )?;

        let run_progress = GaugeVec::new(
            Opts::new("run_progress", "Aggregated progress of a pipeline run (0.0 - 1.0)")
                .namespace(NAMESPACE),
            &["run"],
        )?;

        registry.register(Box::new(spans_closed_total.clone()))?;
        registry.register(Box::new(span_duration_seconds.clone()))?;
        registry.register(Box::new(events_emitted_total.clone()))?;
        registry.register(Box::new(handoff_transitions_total.clone()))?;
        registry.register(Box::new(handoff_transitions_rejected_total.clone()))?;
        registry.register(Box::new(integrity_failures_total.clone()))?;
        registry.register(Box::new(export_failures_total.clone()))?;
        registry.register(Box::new(export_dropped_total.clone()))?;
        registry.register(Box::new(run_progress.clone()))?;

        Ok(Self {
            registry,
            spans_closed_total,
            span_duration_seconds,
            events_emitted_total,
            handoff_transitions_total,
            handoff_transitions_rejected_total,
            integrity_failures_total,
            export_failures_total,
            export_dropped_total,
            run_progress,
        })
    }

    /// Record a closed span
    pub fn record_span_closed(&self, status: &str, duration_ms: Option<u64>) {
        self.spans_closed_total.with_label_values(&[status]).inc();
        if let Some(ms) = duration_ms {
            self.span_duration_seconds
                .with_label_values(&[status])
                .observe(ms as f64 / 1000.0);
        }
    }

    /// Record a span event
    pub fn record_event(&self, name: &str) {
        self.events_emitted_total.with_label_values(&[name]).inc();
    }

    /// Record an applied handoff transition
    pub fn record_transition(&self, from: &str, to: &str) {
        self.handoff_transitions_total
            .with_label_values(&[from, to])
            .inc();
    }

    /// Record a rejected handoff transition
    pub fn record_rejected_transition(&self) {
        self.handoff_transitions_rejected_total.inc();
    }

    /// Record a failed checksum verification
    pub fn record_integrity_failure(&self, kind: &str) {
        self.integrity_failures_total.with_label_values(&[kind]).inc();
    }

    /// Record a sink failure
    pub fn record_export_failure(&self, retryable: bool) {
        let label = if retryable { "true" } else { "false" };
        self.export_failures_total.with_label_values(&[label]).inc();
    }

    /// Record an item dropped by a full export queue
    pub fn record_export_dropped(&self) {
        self.export_dropped_total.inc();
    }

    /// Set the latest progress of a run
    pub fn set_run_progress(&self, run: &str, progress: f64) {
        self.run_progress.with_label_values(&[run]).set(progress);
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Encode metrics as text for scraping
    pub fn encode_text(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
