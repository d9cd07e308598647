//! Bounded, retrying export queue
//!
//! Span tracking never waits on the backend: the tracker's export hook only
//! does a `try_send` into a bounded channel. A background task drains the
//! channel and retries retryable failures with exponential backoff. When the
//! queue is full the item is dropped and counted.

use contextcore_span::{ExportHook, Span, SpanEvent, SpanRef};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{ExportError, ExportItem, TelemetrySink};
use crate::config::CoreConfig;
use crate::metrics::CoreMetrics;

/// Retry schedule for retryable export failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first try
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            max_retries: config.export_max_retries,
            initial_backoff_ms: config.export_initial_backoff_ms,
            max_backoff_ms: config.export_max_backoff_ms,
            ..Default::default()
        }
    }
}

/// Sink wrapper with a bounded queue and a background delivery task.
pub struct QueuedExporter {
    sender: Mutex<Option<mpsc::Sender<ExportItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<CoreMetrics>>,
    capacity: usize,
}

impl QueuedExporter {
    /// Start the delivery task. Must be called from within a Tokio runtime.
    pub fn spawn(
        sink: Arc<dyn TelemetrySink>,
        policy: RetryPolicy,
        queue_size: usize,
        metrics: Option<Arc<CoreMetrics>>,
    ) -> Self {
        let capacity = queue_size.max(1);
        let (sender, mut receiver) = mpsc::channel::<ExportItem>(capacity);

        let worker_metrics = metrics.clone();
        let worker = tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                // Failures end here; the tracker never sees them
                if let Err(e) = deliver(sink.as_ref(), &item, &policy, worker_metrics.as_deref()).await {
                    tracing::warn!(
                        sink = sink.name(),
                        kind = item.kind(),
                        name = %item.name(),
                        trace_id = %item.trace_id(),
                        error = %e,
                        "Dropping telemetry item after failed export"
                    );
                }
            }
            tracing::debug!(sink = sink.name(), "Export queue drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            metrics,
            capacity,
        }
    }

    /// Start the delivery task with queue size and retries from `config`.
    pub fn from_config(
        sink: Arc<dyn TelemetrySink>,
        config: &CoreConfig,
        metrics: Option<Arc<CoreMetrics>>,
    ) -> Self {
        Self::spawn(
            sink,
            RetryPolicy::from_config(config),
            config.export_queue_size,
            metrics,
        )
    }

    /// Queue an item without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, item: ExportItem) -> bool {
        let Ok(guard) = self.sender.lock() else {
            tracing::warn!("Export queue lock poisoned, dropping item");
            return false;
        };
        let Some(sender) = guard.as_ref() else {
            tracing::debug!(kind = item.kind(), "Export queue closed, dropping item");
            return false;
        };

        match sender.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_export_dropped();
                }
                tracing::warn!(
                    capacity = self.capacity,
                    kind = item.kind(),
                    name = %item.name(),
                    "Export queue full, dropping item"
                );
                false
            }
            Err(TrySendError::Closed(item)) => {
                tracing::warn!(kind = item.kind(), "Export task stopped, dropping item");
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting items and wait until everything queued was handled.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        drop(sender);

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Export task ended abnormally");
            }
        }
    }
}

impl ExportHook for QueuedExporter {
    fn on_span_closed(&self, span: &Span) {
        if let Some(metrics) = &self.metrics {
            metrics.record_span_closed(span.status.as_str(), span.duration_ms());
        }
        self.enqueue(ExportItem::span(span.clone()));
    }

    fn on_event(&self, span: SpanRef, event: &SpanEvent) {
        if let Some(metrics) = &self.metrics {
            metrics.record_event(&event.name);
        }
        self.enqueue(ExportItem::event(span, event.clone()));
    }
}

async fn deliver(
    sink: &dyn TelemetrySink,
    item: &ExportItem,
    policy: &RetryPolicy,
    metrics: Option<&CoreMetrics>,
) -> Result<(), ExportError> {
    let mut backoff_ms = policy.initial_backoff_ms;
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            tracing::debug!(
                attempt = attempt,
                backoff_ms = backoff_ms,
                kind = item.kind(),
                "Retrying telemetry export"
            );
            sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms as f64 * policy.backoff_multiplier) as u64;
            backoff_ms = backoff_ms.min(policy.max_backoff_ms);
        }

        match sink.export(item).await {
            Ok(()) => {
                tracing::debug!(sink = sink.name(), kind = item.kind(), "Exported telemetry item");
                return Ok(());
            }
            Err(e) => {
                let retryable = e.is_retryable();
                if let Some(metrics) = metrics {
                    metrics.record_export_failure(retryable);
                }
                tracing::warn!(
                    attempt = attempt,
                    sink = sink.name(),
                    error = %e,
                    "Failed to export telemetry item"
                );
                if !retryable || attempt >= policy.max_retries {
                    return Err(e);
                }
            }
        }
        attempt += 1;
    }
}
