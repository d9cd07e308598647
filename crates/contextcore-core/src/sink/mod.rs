//! Telemetry sinks
//!
//! The core pushes every closed span and every recorded event through a
//! [`TelemetrySink`]. Sinks may fail; a failure is classified as retryable
//! or permanent and never flows back into span state.
//!
//! - [`InMemorySink`] keeps items for inspection (tests, dry runs)
//! - [`HttpSink`] posts JSON to a collector
//! - [`QueuedExporter`] puts any sink behind a bounded queue with retries

mod http;
mod queue;

use async_trait::async_trait;
use contextcore_span::{Span, SpanEvent, SpanId, SpanRef, TraceId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use http::HttpSink;
pub use queue::{QueuedExporter, RetryPolicy};

/// Failure at the sink boundary
#[derive(Error, Debug)]
pub enum ExportError {
    /// Transient failure; the item may be sent again
    #[error("Retryable export failure: {0}")]
    Retryable(String),

    /// The backend refused the item; resending will not help
    #[error("Permanent export failure: {0}")]
    Permanent(String),

    #[error("Failed to serialize export item: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::Retryable(_))
    }
}

/// One unit handed to a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportItem {
    /// A closed span
    Span(Box<Span>),
    /// An event recorded on a span
    Event {
        trace_id: TraceId,
        span_id: SpanId,
        event: SpanEvent,
    },
}

impl ExportItem {
    pub fn span(span: Span) -> Self {
        ExportItem::Span(Box::new(span))
    }

    pub fn event(span: SpanRef, event: SpanEvent) -> Self {
        ExportItem::Event {
            trace_id: span.trace_id,
            span_id: span.span_id,
            event,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExportItem::Span(_) => "span",
            ExportItem::Event { .. } => "event",
        }
    }

    pub fn trace_id(&self) -> TraceId {
        match self {
            ExportItem::Span(span) => span.trace_id,
            ExportItem::Event { trace_id, .. } => *trace_id,
        }
    }

    /// Span or event name
    pub fn name(&self) -> &str {
        match self {
            ExportItem::Span(span) => &span.name,
            ExportItem::Event { event, .. } => &event.name,
        }
    }
}

/// Destination for exported spans and events
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn export(&self, item: &ExportItem) -> Result<(), ExportError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    async fn export(&self, item: &ExportItem) -> Result<(), ExportError> {
        (**self).export(item).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Sink that keeps every item in memory.
#[derive(Default)]
pub struct InMemorySink {
    items: Mutex<Vec<ExportItem>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything exported so far, in arrival order.
    pub fn items(&self) -> Vec<ExportItem> {
        self.items.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                ExportItem::Span(span) => Some(*span),
                ExportItem::Event { .. } => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<SpanEvent> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                ExportItem::Event { event, .. } => Some(event),
                ExportItem::Span(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TelemetrySink for InMemorySink {
    async fn export(&self, item: &ExportItem) -> Result<(), ExportError> {
        self.items
            .lock()
            .map_err(|e| ExportError::Permanent(format!("Failed to acquire lock: {}", e)))?
            .push(item.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
