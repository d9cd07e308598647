use chrono::{DateTime, Duration, Utc};
use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{insert_opt, new_id, Record};
use crate::error::{CoreError, Result};
use crate::handoff::HandoffStatus;
use crate::schema::{Priority, RecordKind};

/// Typed value of a handoff input or result field.
pub type HandoffValue = serde_json::Value;

/// JSON shape a result field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl ValueShape {
    fn matches(&self, value: &HandoffValue) -> bool {
        match self {
            ValueShape::String => value.is_string(),
            ValueShape::Number => value.is_number(),
            ValueShape::Bool => value.is_boolean(),
            ValueShape::Array => value.is_array(),
            ValueShape::Object => value.is_object(),
        }
    }
}

/// Contract the delegate's result must satisfy before `completed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shapes: BTreeMap<String, ValueShape>,
    /// Upper bound on the serialized result, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<usize>,
}

impl ExpectedOutput {
    pub fn new<I, S>(required_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_fields: required_fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_shape(mut self, field: impl Into<String>, shape: ValueShape) -> Self {
        self.shapes.insert(field.into(), shape);
        self
    }

    pub fn with_max_size(mut self, bytes: usize) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required_fields.is_empty() && self.shapes.is_empty() && self.max_size_bytes.is_none()
    }

    /// Check a result payload against the contract.
    pub fn check(&self, result: Option<&HandoffValue>) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let violation = |message: String| CoreError::validation("handoff", "handoff.result", message);

        let Some(result) = result else {
            return Err(violation("a result payload is required".to_string()));
        };

        if let Some(max) = self.max_size_bytes {
            let size = serde_json::to_vec(result)
                .map_err(|e| violation(format!("result is not serializable: {}", e)))?
                .len();
            if size > max {
                return Err(violation(format!(
                    "result is {} bytes, limit is {}",
                    size, max
                )));
            }
        }

        if self.required_fields.is_empty() && self.shapes.is_empty() {
            return Ok(());
        }
        let Some(fields) = result.as_object() else {
            return Err(violation("result must be an object".to_string()));
        };

        if let Some(missing) = self.required_fields.iter().find(|f| !fields.contains_key(*f)) {
            return Err(violation(format!("missing required field '{}'", missing)));
        }
        for (field, shape) in &self.shapes {
            if let Some(value) = fields.get(field) {
                if !shape.matches(value) {
                    return Err(violation(format!(
                        "field '{}' must be {:?}",
                        field, shape
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A delegated unit of work between two agents.
///
/// Status changes only go through [`HandoffRegistry`]; once terminal the
/// record is frozen apart from the result attached on terminal entry.
///
/// [`HandoffRegistry`]: crate::handoff::HandoffRegistry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub capability_id: String,
    pub task: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, HandoffValue>,
    #[serde(default)]
    pub expected_output: ExpectedOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub status: HandoffStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<HandoffValue>,
}

impl Handoff {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        capability_id: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("ho"),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            capability_id: capability_id.into(),
            task: task.into(),
            inputs: BTreeMap::new(),
            expected_output: ExpectedOutput::default(),
            priority: None,
            timeout_ms: None,
            status: HandoffStatus::Pending,
            created_at: Utc::now(),
            result: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<HandoffValue>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn expecting(mut self, expected: ExpectedOutput) -> Self {
        self.expected_output = expected;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Instant after which an active handoff counts as timed out.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.timeout_ms
            .map(|ms| self.created_at + Duration::milliseconds(ms as i64))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.deadline().is_some_and(|d| d <= now)
    }
}

impl Record for Handoff {
    fn kind(&self) -> RecordKind {
        RecordKind::Handoff
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn logical_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("handoff.id".into(), self.id.as_str().into());
        attrs.insert("handoff.from_agent".into(), self.from_agent.as_str().into());
        attrs.insert("handoff.to_agent".into(), self.to_agent.as_str().into());
        attrs.insert(
            "handoff.capability_id".into(),
            self.capability_id.as_str().into(),
        );
        attrs.insert("handoff.task".into(), self.task.as_str().into());
        attrs.insert("handoff.status".into(), self.status.as_str().into());
        insert_opt(&mut attrs, "handoff.priority", self.priority.map(|p| p.as_str()));
        insert_opt(
            &mut attrs,
            "handoff.timeout_ms",
            self.timeout_ms.map(|ms| ms as i64),
        );
        if !self.inputs.is_empty() {
            // flat attribute maps carry structured inputs as one JSON string
            if let Ok(json) = serde_json::to_string(&self.inputs) {
                attrs.insert("handoff.inputs".into(), json.into());
            }
        }
        attrs
    }
}
