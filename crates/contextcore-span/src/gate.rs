//! Gate validation results as flat span-event attributes.
//!
//! A gate result with N violations is written as
//!
//! ```text
//! gate.name               = "schema"
//! gate.result             = "fail"
//! gate.violations         = N
//! gate.violation.<i>.field
//! gate.violation.<i>.message
//! ```
//!
//! for `i` in `0..N`. Readers rebuild the list by grouping keys sharing the
//! `gate.violation.<i>.` prefix.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::span::{AttributeValue, Attributes};

/// Event name used for gate results.
pub const GATE_EVENT_NAME: &str = "gate.validation";

pub const ATTR_GATE_NAME: &str = "gate.name";
pub const ATTR_GATE_RESULT: &str = "gate.result";
pub const ATTR_GATE_VIOLATIONS: &str = "gate.violations";
const VIOLATION_PREFIX: &str = "gate.violation.";

/// Verdict of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Pass,
    Fail,
    Warn,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Pass => "pass",
            GateOutcome::Fail => "fail",
            GateOutcome::Warn => "warn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(GateOutcome::Pass),
            "fail" => Some(GateOutcome::Fail),
            "warn" => Some(GateOutcome::Warn),
            _ => None,
        }
    }
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One violation found by a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateViolation {
    pub field: String,
    pub message: String,
}

impl GateViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result of one gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub outcome: GateOutcome,
    pub violations: Vec<GateViolation>,
}

impl GateResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: GateOutcome::Pass,
            violations: Vec::new(),
        }
    }

    pub fn fail(name: impl Into<String>, violations: Vec<GateViolation>) -> Self {
        Self {
            name: name.into(),
            outcome: GateOutcome::Fail,
            violations,
        }
    }

    pub fn with_violation(mut self, violation: GateViolation) -> Self {
        self.violations.push(violation);
        self
    }

    pub fn passed(&self) -> bool {
        self.outcome != GateOutcome::Fail
    }

    /// Flatten into event attributes.
    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(ATTR_GATE_NAME.to_string(), self.name.as_str().into());
        attrs.insert(ATTR_GATE_RESULT.to_string(), self.outcome.as_str().into());
        attrs.insert(
            ATTR_GATE_VIOLATIONS.to_string(),
            self.violations.len().into(),
        );
        for (i, violation) in self.violations.iter().enumerate() {
            attrs.insert(
                format!("{}{}.field", VIOLATION_PREFIX, i),
                violation.field.as_str().into(),
            );
            attrs.insert(
                format!("{}{}.message", VIOLATION_PREFIX, i),
                violation.message.as_str().into(),
            );
        }
        attrs
    }

    /// Rebuild a gate result from flattened attributes.
    ///
    /// Returns `None` when the name or result key is missing. Violations are
    /// grouped by index and returned in index order; a group missing either
    /// key keeps an empty string for it.
    pub fn from_attributes(attrs: &Attributes) -> Option<Self> {
        let name = attrs.get(ATTR_GATE_NAME)?.as_str()?.to_string();
        let outcome = GateOutcome::parse(attrs.get(ATTR_GATE_RESULT)?.as_str()?)?;

        let mut grouped: BTreeMap<usize, GateViolation> = BTreeMap::new();
        for (key, value) in attrs.range(VIOLATION_PREFIX.to_string()..) {
            let Some(rest) = key.strip_prefix(VIOLATION_PREFIX) else {
                break;
            };
            let Some((index, field)) = rest.split_once('.') else {
                continue;
            };
            let Ok(index) = index.parse::<usize>() else {
                continue;
            };
            let entry = grouped
                .entry(index)
                .or_insert_with(|| GateViolation::new("", ""));
            let text = match value {
                AttributeValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            match field {
                "field" => entry.field = text,
                "message" => entry.message = text,
                _ => {}
            }
        }

        Some(Self {
            name,
            outcome,
            violations: grouped.into_values().collect(),
        })
    }
}
