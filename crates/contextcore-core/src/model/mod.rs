//! Typed records exchanged between agents
//!
//! Every record knows its kind, its identifier and how to flatten itself
//! into logical attributes. Validation runs against [`AttributeSchema`] on
//! the flattened form, so a record can never be emitted with attributes the
//! schema would reject.

pub mod agent;
pub mod capability;
pub mod evidence;
pub mod guidance;
pub mod handoff;
pub mod insight;

use chrono::{DateTime, SecondsFormat, Utc};
use contextcore_span::{AttributeValue, Attributes};

use crate::error::Result;
use crate::schema::{AttributeSchema, RecordKind};

pub use agent::Agent;
pub use capability::{Capability, CapabilityRegistry};
pub use evidence::Evidence;
pub use guidance::{Guidance, GuidanceSet};
pub use handoff::{ExpectedOutput, Handoff, HandoffValue, ValueShape};
pub use insight::{Insight, InsightLedger};

/// A record that can be validated and emitted.
pub trait Record {
    fn kind(&self) -> RecordKind;

    fn record_id(&self) -> &str;

    /// Flatten into logical (namespace-free) attributes.
    fn logical_attributes(&self) -> Attributes;

    /// Validate the flattened form against the schema.
    fn validate(&self) -> Result<()> {
        AttributeSchema::validate(self.kind(), &self.logical_attributes())
    }
}

pub(crate) fn timestamp(ts: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub(crate) fn insert_opt<V: Into<AttributeValue>>(
    attrs: &mut Attributes,
    key: &str,
    value: Option<V>,
) {
    if let Some(value) = value {
        attrs.insert(key.to_string(), value.into());
    }
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}
