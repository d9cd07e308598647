//! Core span types for pipeline execution traces.
//!
//! Defines `Span`, `SpanStatus`, `SpanEvent`, `SpanLink` and the flat
//! attribute model shared by every record the system emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::context::{Baggage, SpanId, SpanRef, TraceId};

/// Attribute key carrying an explicit aggregation weight for a stage.
pub const ATTR_STAGE_WEIGHT: &str = "stage.weight";

/// Attribute key marking a stage whose failure fails the whole run.
pub const ATTR_STAGE_REQUIRED: &str = "stage.required";

/// Attribute key set on ancestors once any descendant closes with error.
pub const ATTR_HAS_FAILED_CHILD: &str = "has_failed_child";

/// Span attribute; `false` keeps the span out of its parent's progress.
pub const ATTR_PROGRESS_TRACKED: &str = "progress.tracked";

/// Weight a span holds for children that have not opened yet.
///
/// The reservation counts as progress 0 in the span's aggregate. Each
/// tracked child opening under the span takes its own weight out of it.
pub const ATTR_RESERVED_WEIGHT: &str = "progress.reserved_weight";

/// A scalar attribute value.
///
/// Attribute sets are flat; structured data is flattened into indexed keys
/// (see [`crate::gate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        AttributeValue::String(value.clone())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value as i64)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(value as i64)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::Int(value.min(i64::MAX as u64) as i64)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        AttributeValue::Int(value.min(i64::MAX as usize) as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

/// Flat string-keyed attribute set. Ordered so emitted output is stable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Open, or closed without an explicit verdict
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "unset",
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped, named occurrence recorded on a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            attributes,
        }
    }
}

/// A causal reference from one span to another, possibly in another trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub target: SpanRef,
    pub link_type: String,
}

/// A node in a pipeline execution trace.
///
/// Spans are owned by the tracker while the run is live. Once closed, a span
/// only accepts reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub baggage: Baggage,
    /// Aggregated (non-leaf) or reported (leaf) progress in [0, 1]
    pub progress: f64,
    /// Set once any descendant closed with error
    pub has_failed_child: bool,
}

impl Span {
    /// Create an open span.
    pub fn new(
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
        name: impl Into<String>,
        attributes: Attributes,
        baggage: Baggage,
    ) -> Self {
        Self {
            trace_id,
            span_id: SpanId::generate(),
            parent_span_id,
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            status: SpanStatus::Unset,
            attributes,
            events: Vec::new(),
            links: Vec::new(),
            baggage,
            progress: 0.0,
            has_failed_child: false,
        }
    }

    pub fn span_ref(&self) -> SpanRef {
        SpanRef::new(self.trace_id, self.span_id)
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Aggregation weight declared through [`ATTR_STAGE_WEIGHT`], default 1.
    pub fn weight(&self) -> f64 {
        self.attributes
            .get(ATTR_STAGE_WEIGHT)
            .and_then(AttributeValue::as_f64)
            .unwrap_or(1.0)
    }

    /// Weight still reserved for unopened children, default 0.
    pub fn reserved_weight(&self) -> f64 {
        self.attributes
            .get(ATTR_RESERVED_WEIGHT)
            .and_then(AttributeValue::as_f64)
            .unwrap_or(0.0)
    }

    /// Whether the stage was declared required by the scheduler.
    pub fn is_required(&self) -> bool {
        self.attributes
            .get(ATTR_STAGE_REQUIRED)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(false)
    }

    /// Whether the span counts towards its parent's progress, default true.
    pub fn is_progress_tracked(&self) -> bool {
        self.attributes
            .get(ATTR_PROGRESS_TRACKED)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(true)
    }

    /// Wall-clock duration, once closed.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }

    pub(crate) fn close(&mut self, status: SpanStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}
