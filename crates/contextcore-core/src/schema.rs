//! Attribute schema for emitted records
//!
//! Lists the canonical logical fields of every record kind together with
//! their legal values. Records are validated against this table before any
//! span or event is created, so a rejected record is never partially
//! recorded.

use chrono::DateTime;
use contextcore_span::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Declare a closed string enum with snake_case wire names.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Wire names of every variant, in declaration order
            pub const NAMES: &'static [&'static str] = &[$($wire),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}', expected one of: {}",
                        stringify!($name),
                        other,
                        Self::NAMES.join(", ")
                    )),
                }
            }
        }
    };
}

pub(crate) use string_enum;

string_enum! {
    /// Kind of acting agent
    AgentType {
        CodeAssistant => "code_assistant",
        Orchestrator => "orchestrator",
        Specialist => "specialist",
        Automation => "automation",
    }
}

string_enum! {
    /// Kind of supporting data an evidence item points at
    EvidenceType {
        Trace => "trace",
        LogQuery => "log_query",
        MetricQuery => "metric_query",
        File => "file",
        Commit => "commit",
        Pr => "pr",
        Adr => "adr",
        Doc => "doc",
        Task => "task",
        Capability => "capability",
    }
}

string_enum! {
    /// Kind of agent-generated knowledge
    InsightType {
        Analysis => "analysis",
        Recommendation => "recommendation",
        Decision => "decision",
        Question => "question",
        Blocker => "blocker",
        Discovery => "discovery",
        Risk => "risk",
        Progress => "progress",
    }
}

string_enum! {
    /// Intended reader of a record
    Audience {
        Agent => "agent",
        Human => "human",
        Both => "both",
    }
}

string_enum! {
    /// Kind of human-to-agent direction
    GuidanceType {
        Focus => "focus",
        Constraint => "constraint",
        Preference => "preference",
        Question => "question",
        Context => "context",
    }
}

string_enum! {
    /// Priority shared by guidance and handoffs
    Priority {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

impl Priority {
    /// Sort rank, lower is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

string_enum! {
    /// Risk tier of a registered capability
    RiskTier {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

string_enum! {
    /// Record kinds that share the emission substrate
    RecordKind {
        Agent => "agent",
        Evidence => "evidence",
        Insight => "insight",
        Guidance => "guidance",
        Handoff => "handoff",
        Capability => "capability",
    }
}

/// Legal-value constraint for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Any string
    Text,
    /// String with at least one non-whitespace character
    NonEmpty,
    /// One of a closed set of wire names
    OneOf(&'static [&'static str]),
    /// Float within [0.0, 1.0]
    UnitInterval,
    /// RFC 3339 timestamp string
    Timestamp,
    /// Integer >= 0
    NonNegative,
    /// Integer > 0
    Positive,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Text => write!(f, "string"),
            Constraint::NonEmpty => write!(f, "non-empty string"),
            Constraint::OneOf(names) => write!(f, "one of [{}]", names.join(", ")),
            Constraint::UnitInterval => write!(f, "number within [0.0, 1.0]"),
            Constraint::Timestamp => write!(f, "RFC 3339 timestamp"),
            Constraint::NonNegative => write!(f, "integer >= 0"),
            Constraint::Positive => write!(f, "integer > 0"),
        }
    }
}

/// One logical field of a record kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub constraint: Constraint,
}

const fn required(name: &'static str, constraint: Constraint) -> FieldSpec {
    FieldSpec {
        name,
        required: true,
        constraint,
    }
}

const fn optional(name: &'static str, constraint: Constraint) -> FieldSpec {
    FieldSpec {
        name,
        required: false,
        constraint,
    }
}

const AGENT_FIELDS: &[FieldSpec] = &[
    required("agent.id", Constraint::NonEmpty),
    required("agent.session_id", Constraint::NonEmpty),
    required("agent.type", Constraint::OneOf(AgentType::NAMES)),
    optional("agent.version", Constraint::NonEmpty),
    optional("agent.capabilities", Constraint::Text),
    optional("agent.parent_session_id", Constraint::NonEmpty),
    optional("gen_ai.system", Constraint::NonEmpty),
    optional("gen_ai.request.model", Constraint::NonEmpty),
];

const EVIDENCE_FIELDS: &[FieldSpec] = &[
    required("evidence.type", Constraint::OneOf(EvidenceType::NAMES)),
    required("evidence.ref", Constraint::NonEmpty),
    optional("evidence.description", Constraint::Text),
    optional("evidence.query", Constraint::Text),
    optional("evidence.timestamp", Constraint::Timestamp),
];

const INSIGHT_FIELDS: &[FieldSpec] = &[
    required("insight.id", Constraint::NonEmpty),
    required("insight.type", Constraint::OneOf(InsightType::NAMES)),
    required("insight.summary", Constraint::NonEmpty),
    required("insight.confidence", Constraint::UnitInterval),
    required("insight.audience", Constraint::OneOf(Audience::NAMES)),
    optional("insight.rationale", Constraint::Text),
    optional("insight.supersedes", Constraint::NonEmpty),
    optional("insight.expires_at", Constraint::Timestamp),
    optional("insight.evidence_count", Constraint::NonNegative),
];

const GUIDANCE_FIELDS: &[FieldSpec] = &[
    required("guidance.id", Constraint::NonEmpty),
    required("guidance.type", Constraint::OneOf(GuidanceType::NAMES)),
    required("guidance.content", Constraint::NonEmpty),
    optional("guidance.priority", Constraint::OneOf(Priority::NAMES)),
    optional("guidance.scope", Constraint::NonEmpty),
    optional("guidance.expires_at", Constraint::Timestamp),
    optional("guidance.author", Constraint::Text),
    required("guidance.created_at", Constraint::Timestamp),
];

const HANDOFF_FIELDS: &[FieldSpec] = &[
    required("handoff.id", Constraint::NonEmpty),
    required("handoff.from_agent", Constraint::NonEmpty),
    required("handoff.to_agent", Constraint::NonEmpty),
    required("handoff.capability_id", Constraint::NonEmpty),
    required("handoff.task", Constraint::NonEmpty),
    required(
        "handoff.status",
        Constraint::OneOf(crate::handoff::HandoffStatus::NAMES),
    ),
    optional("handoff.priority", Constraint::OneOf(Priority::NAMES)),
    optional("handoff.timeout_ms", Constraint::Positive),
    optional("handoff.inputs", Constraint::Text),
];

const CAPABILITY_FIELDS: &[FieldSpec] = &[
    required("capability.id", Constraint::NonEmpty),
    required("capability.owner", Constraint::NonEmpty),
    required("capability.risk_tier", Constraint::OneOf(RiskTier::NAMES)),
    required("capability.confidence", Constraint::UnitInterval),
    required("capability.audience", Constraint::OneOf(Audience::NAMES)),
    required("capability.created_at", Constraint::Timestamp),
    optional("capability.updated_at", Constraint::Timestamp),
    optional("capability.expires_at", Constraint::Timestamp),
    optional("capability.supersedes", Constraint::NonEmpty),
    optional("capability.invocation_count", Constraint::NonNegative),
    optional("capability.success_count", Constraint::NonNegative),
];

/// Canonical field table and validator.
pub struct AttributeSchema;

impl AttributeSchema {
    /// Logical fields of a record kind.
    pub fn fields(kind: RecordKind) -> &'static [FieldSpec] {
        match kind {
            RecordKind::Agent => AGENT_FIELDS,
            RecordKind::Evidence => EVIDENCE_FIELDS,
            RecordKind::Insight => INSIGHT_FIELDS,
            RecordKind::Guidance => GUIDANCE_FIELDS,
            RecordKind::Handoff => HANDOFF_FIELDS,
            RecordKind::Capability => CAPABILITY_FIELDS,
        }
    }

    /// Look up one field of a record kind.
    pub fn field(kind: RecordKind, name: &str) -> Option<&'static FieldSpec> {
        Self::fields(kind).iter().find(|f| f.name == name)
    }

    /// Validate a logical attribute set against the fields of `kind`.
    ///
    /// Fields outside the table are not checked. The first violation is
    /// reported with the record kind and field name.
    pub fn validate(kind: RecordKind, attrs: &Attributes) -> Result<()> {
        for spec in Self::fields(kind) {
            match attrs.get(spec.name) {
                None if spec.required => {
                    return Err(CoreError::validation(kind.as_str(), spec.name, "is required"));
                }
                None => {}
                Some(value) => check(spec.constraint, value).map_err(|message| {
                    CoreError::validation(kind.as_str(), spec.name, message)
                })?,
            }
        }
        Ok(())
    }
}

/// Reject confidence values outside [0.0, 1.0], including NaN.
pub fn check_confidence(record: RecordKind, field: &str, value: f64) -> Result<()> {
    check(Constraint::UnitInterval, &AttributeValue::Float(value))
        .map_err(|message| CoreError::validation(record.as_str(), field, message))
}

fn check(constraint: Constraint, value: &AttributeValue) -> std::result::Result<(), String> {
    match constraint {
        Constraint::Text => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| format!("must be a {}", constraint)),
        Constraint::NonEmpty => match value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(()),
            _ => Err(format!("must be a {}", constraint)),
        },
        Constraint::OneOf(names) => match value.as_str() {
            Some(s) if names.contains(&s) => Ok(()),
            _ => Err(format!("'{}' is not {}", value, constraint)),
        },
        Constraint::UnitInterval => match value.as_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => Ok(()),
            _ => Err(format!("must be within [0.0, 1.0], got {}", value)),
        },
        Constraint::Timestamp => match value.as_str() {
            Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => Ok(()),
            _ => Err(format!("'{}' is not an {}", value, constraint)),
        },
        Constraint::NonNegative => match value.as_i64() {
            Some(v) if v >= 0 => Ok(()),
            _ => Err(format!("must be an {}", constraint)),
        },
        Constraint::Positive => match value.as_i64() {
            Some(v) if v > 0 => Ok(()),
            _ => Err(format!("must be an {}", constraint)),
        },
    }
}

/// Serializable description of one field, for tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    pub required: bool,
    pub constraint: String,
}

impl From<&FieldSpec> for FieldDescription {
    fn from(spec: &FieldSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            required: spec.required,
            constraint: spec.constraint.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    fn insight_attrs(confidence: f64) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("insight.id".into(), "ins-1".into());
        attrs.insert("insight.type".into(), "analysis".into());
        attrs.insert("insight.summary".into(), "Cache misses spike after deploy".into());
        attrs.insert("insight.confidence".into(), confidence.into());
        attrs.insert("insight.audience".into(), "both".into());
        attrs
    }

    #[test]
    fn test_enum_round_trip_names() {
        assert_eq!("log_query".parse::<EvidenceType>().unwrap(), EvidenceType::LogQuery);
        assert_eq!(AgentType::CodeAssistant.as_str(), "code_assistant");
        assert!("bogus".parse::<InsightType>().unwrap_err().contains("expected one of"));
        assert_eq!(
            serde_json::to_string(&InsightType::Recommendation).unwrap(),
            "\"recommendation\""
        );
    }

    #[test]
    fn test_valid_insight() {
        assert!(AttributeSchema::validate(RecordKind::Insight, &insight_attrs(0.8)).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let mut attrs = insight_attrs(0.8);
        attrs.remove("insight.summary");
        let err = AttributeSchema::validate(RecordKind::Insight, &attrs).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("insight.summary"));
    }

    #[test]
    fn test_blank_summary_rejected() {
        let mut attrs = insight_attrs(0.8);
        attrs.insert("insight.summary".into(), "   ".into());
        assert!(AttributeSchema::validate(RecordKind::Insight, &attrs).is_err());
    }

    #[test]
    fn test_enum_constraint() {
        let mut attrs = insight_attrs(0.8);
        attrs.insert("insight.audience".into(), "robots".into());
        let err = AttributeSchema::validate(RecordKind::Insight, &attrs).unwrap_err();
        assert!(err.to_string().contains("insight.audience"));
    }

    #[test]
    fn test_confidence_edges() {
        assert!(check_confidence(RecordKind::Insight, "insight.confidence", 0.0).is_ok());
        assert!(check_confidence(RecordKind::Insight, "insight.confidence", 1.0).is_ok());
        assert!(check_confidence(RecordKind::Insight, "insight.confidence", 1.0001).is_err());
        assert!(check_confidence(RecordKind::Insight, "insight.confidence", -0.0001).is_err());
        assert!(check_confidence(RecordKind::Insight, "insight.confidence", f64::NAN).is_err());
    }

    #[test]
    fn test_timestamp_constraint() {
        let mut attrs = insight_attrs(0.5);
        attrs.insert("insight.expires_at".into(), "2026-01-01T00:00:00Z".into());
        assert!(AttributeSchema::validate(RecordKind::Insight, &attrs).is_ok());
        attrs.insert("insight.expires_at".into(), "tomorrow".into());
        assert!(AttributeSchema::validate(RecordKind::Insight, &attrs).is_err());
    }

    #[test]
    fn test_every_kind_has_an_id_field() {
        for name in RecordKind::NAMES {
            let kind: RecordKind = name.parse().unwrap();
            assert!(!AttributeSchema::fields(kind).is_empty());
        }
        assert!(AttributeSchema::field(RecordKind::Handoff, "handoff.capability_id").is_some());
    }

    proptest! {
        #[test]
        fn prop_confidence_accepted_iff_in_unit_interval(v in -2.0f64..3.0) {
            let accepted = AttributeSchema::validate(RecordKind::Insight, &insight_attrs(v)).is_ok();
            prop_assert_eq!(accepted, (0.0..=1.0).contains(&v));
        }
    }
}
