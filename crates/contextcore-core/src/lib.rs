//! contextcore: agent collaboration telemetry
//!
//! Agents exchange insights, guidance, delegated work (handoffs) and
//! capabilities. This crate models those records, validates them against
//! one attribute schema, and emits them as span data through a translator
//! that can write legacy keys, standardized `gen_ai.*` keys, or both.
//! Pipeline runs are traces: the scheduler orders stages from their
//! dependencies, the tracker keeps the span tree, and checksums travel from
//! stage to stage in baggage.
//!
//! # Architecture
//!
//! ```text
//! model records ──▶ EmissionEnvelope ──▶ DualNamespaceTranslator ──┐
//!                                                                  ▼
//! DependencyScheduler ──▶ PipelineRun / HandoffRegistry ──▶ SpanTracker
//!                         IntegrityGate                         │
//!                                                               ▼
//!                               QueuedExporter ──▶ TelemetrySink
//! ```
//!
//! # Example
//!
//! ```no_run
//! use contextcore_core::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> contextcore_core::Result<()> {
//! let tracker = Arc::new(SpanTracker::new());
//! let definition = PipelineDefinition::new("etl")
//!     .stage(StageDefinition::new("ingest"))
//!     .stage(StageDefinition::new("report").after(["ingest"]));
//!
//! let run = PipelineRun::start(Arc::clone(&tracker), definition, GuidanceSet::default())?;
//! for stage in run.ready_stages()? {
//!     run.start_stage(&stage)?;
//!     run.complete_stage(&stage, SpanStatus::Ok)?;
//! }
//! let snapshot = run.finish()?;
//! println!("progress: {}", snapshot.progress());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod emit;
pub mod envelope;
pub mod error;
pub mod handoff;
pub mod integrity;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod schema;
pub mod sink;
pub mod translate;

pub use config::{CoreConfig, CoreConfigBuilder};
pub use emit::RecordEmitter;
pub use envelope::EmissionEnvelope;
pub use error::{CoreError, ErrorKind, Result};
pub use handoff::{can_transition_to, HandoffRegistry, HandoffStatus};
pub use integrity::{fingerprint, IntegrityGate};
pub use metrics::CoreMetrics;
pub use pipeline::PipelineRun;
pub use scheduler::{DependencyScheduler, ExecutionPlan, PipelineDefinition, StageDefinition};
pub use schema::{AttributeSchema, RecordKind};
pub use sink::{
    ExportError, ExportItem, HttpSink, InMemorySink, QueuedExporter, RetryPolicy, TelemetrySink,
};
pub use translate::{DualNamespaceTranslator, EmitMode};

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::config::CoreConfig;
    pub use crate::emit::RecordEmitter;
    pub use crate::envelope::EmissionEnvelope;
    pub use crate::error::{CoreError, ErrorKind, Result};
    pub use crate::handoff::{HandoffRegistry, HandoffStatus};
    pub use crate::integrity::IntegrityGate;
    pub use crate::model::{
        Agent, Capability, CapabilityRegistry, Evidence, ExpectedOutput, Guidance, GuidanceSet,
        Handoff, Insight, InsightLedger, Record,
    };
    pub use crate::pipeline::PipelineRun;
    pub use crate::scheduler::{DependencyScheduler, PipelineDefinition, StageDefinition};
    pub use crate::schema::{
        AgentType, Audience, EvidenceType, GuidanceType, InsightType, Priority, RecordKind,
        RiskTier,
    };
    pub use crate::translate::{DualNamespaceTranslator, EmitMode};
    pub use contextcore_span::{
        Attributes, GateResult, GateViolation, SpanRef, SpanStatus, SpanTracker, TraceSnapshot,
    };
}
