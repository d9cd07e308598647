//! Pipeline execution traces for contextcore.
//!
//! Every pipeline run is a trace: one root span for the run and one child
//! span per stage invocation. Spans carry flat attributes, ordered events,
//! links and baggage that children inherit at creation time.
//!
//! # Span Hierarchy
//!
//! ```text
//! run (root)
//!   ├─ stage: ingest
//!   │    └─ handoff / insight emission spans
//!   └─ stage: analyze
//! ```
//!
//! # Usage
//!
//! 1. Use `SpanTracker::start_run` to open the root span.
//! 2. Use `SpanTracker::start_stage` for each stage the scheduler releases.
//! 3. Use `SpanTracker::close` to finish a stage; parent progress is
//!    recomputed in the same step.
//! 4. Use `SpanTracker::finish` to take the final `TraceSnapshot`.

pub mod context;
pub mod error;
#[cfg(feature = "axum")]
pub mod extract;
pub mod gate;
pub mod snapshot;
pub mod span;
pub mod tracker;

pub use context::{decode_baggage, encode_baggage, Baggage, SpanId, SpanRef, TraceContext, TraceId};
pub use error::{Result, SpanError};
#[cfg(feature = "axum")]
pub use extract::{TraceContextExtractor, TraceContextRejection};
pub use gate::{GateOutcome, GateResult, GateViolation, GATE_EVENT_NAME};
pub use snapshot::{SpanNode, TraceSnapshot};
pub use span::{
    AttributeValue, Attributes, Span, SpanEvent, SpanLink, SpanStatus, ATTR_HAS_FAILED_CHILD,
    ATTR_PROGRESS_TRACKED, ATTR_RESERVED_WEIGHT, ATTR_STAGE_REQUIRED, ATTR_STAGE_WEIGHT,
};
pub use tracker::{ExportHook, SpanTracker};
