//! Identity envelope attached to every emitted record.

use chrono::{DateTime, Utc};
use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::model::{insert_opt, timestamp, Agent, Record};

pub const ATTR_AGENT_ID: &str = "agent.id";
pub const ATTR_SESSION_ID: &str = "agent.session_id";
pub const ATTR_PROJECT_ID: &str = "project.id";
pub const ATTR_EMITTED_AT: &str = "contextcore.emitted_at";
// Standardized-only keys; legacy mode drops them.
pub const ATTR_GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const ATTR_GEN_AI_OPERATION: &str = "gen_ai.operation.name";
pub const ATTR_GEN_AI_MODEL: &str = "gen_ai.request.model";

/// Who emitted a record, for which project, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionEnvelope {
    pub agent_id: String,
    pub session_id: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    /// Model provider behind the emitting agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// What the agent was doing, e.g. `chat` or `execute_tool`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl EmissionEnvelope {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            project_id: project_id.into(),
            timestamp: Utc::now(),
            system: None,
            operation: None,
            model: None,
        }
    }

    /// Envelope for records emitted by `agent` within `project_id`.
    ///
    /// Carries the agent's provider and model when it declares them.
    pub fn for_agent(agent: &Agent, project_id: impl Into<String>) -> Self {
        Self {
            system: agent.system.clone(),
            model: agent.model.clone(),
            ..Self::new(agent.id.clone(), agent.session_id.clone(), project_id)
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Same identity, stamped with the current time.
    pub fn restamped(&self) -> Self {
        Self {
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            (ATTR_AGENT_ID, &self.agent_id),
            (ATTR_SESSION_ID, &self.session_id),
            (ATTR_PROJECT_ID, &self.project_id),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::validation(
                    "envelope",
                    field,
                    "must be a non-empty string",
                ));
            }
        }
        for (field, value) in [
            (ATTR_GEN_AI_SYSTEM, &self.system),
            (ATTR_GEN_AI_OPERATION, &self.operation),
            (ATTR_GEN_AI_MODEL, &self.model),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(CoreError::validation(
                    "envelope",
                    field,
                    "must be non-empty when set",
                ));
            }
        }
        Ok(())
    }

    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(ATTR_AGENT_ID.into(), self.agent_id.as_str().into());
        attrs.insert(ATTR_SESSION_ID.into(), self.session_id.as_str().into());
        attrs.insert(ATTR_PROJECT_ID.into(), self.project_id.as_str().into());
        attrs.insert(ATTR_EMITTED_AT.into(), timestamp(&self.timestamp));
        insert_opt(&mut attrs, ATTR_GEN_AI_SYSTEM, self.system.as_deref());
        insert_opt(&mut attrs, ATTR_GEN_AI_OPERATION, self.operation.as_deref());
        insert_opt(&mut attrs, ATTR_GEN_AI_MODEL, self.model.as_deref());
        attrs
    }

    /// Validate envelope and record, then merge them into one logical
    /// attribute set. Record fields never overwrite envelope fields.
    pub fn wrap<R: Record + ?Sized>(&self, record: &R) -> Result<Attributes> {
        self.validate()?;
        record.validate()?;

        let mut attrs = record.logical_attributes();
        attrs.extend(self.to_attributes());
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Insight;
    use crate::schema::{AgentType, InsightType};

    #[test]
    fn test_wrap_merges_identity() {
        let agent = Agent::new("claude-code", "sess-7", AgentType::CodeAssistant);
        let envelope = EmissionEnvelope::for_agent(&agent, "checkout");
        let insight = Insight::new(InsightType::Blocker, "Missing API key", 0.95).unwrap();

        let attrs = envelope.wrap(&insight).unwrap();
        assert_eq!(attrs[ATTR_AGENT_ID].as_str(), Some("claude-code"));
        assert_eq!(attrs[ATTR_PROJECT_ID].as_str(), Some("checkout"));
        assert_eq!(attrs["insight.type"].as_str(), Some("blocker"));
        assert!(attrs.contains_key(ATTR_EMITTED_AT));
    }

    #[test]
    fn test_blank_identity_rejected() {
        let envelope = EmissionEnvelope::new("agent", "", "project");
        let err = envelope.validate().unwrap_err();
        assert!(err.to_string().contains(ATTR_SESSION_ID));
    }

    #[test]
    fn test_model_identity_copied_from_agent() {
        let agent = Agent::new("claude-code", "sess-7", AgentType::CodeAssistant)
            .with_model("anthropic", "claude-sonnet");
        let attrs = EmissionEnvelope::for_agent(&agent, "checkout")
            .with_operation("execute_tool")
            .to_attributes();
        assert_eq!(attrs[ATTR_GEN_AI_SYSTEM].as_str(), Some("anthropic"));
        assert_eq!(attrs[ATTR_GEN_AI_MODEL].as_str(), Some("claude-sonnet"));
        assert_eq!(attrs[ATTR_GEN_AI_OPERATION].as_str(), Some("execute_tool"));

        let plain = EmissionEnvelope::new("agent", "sess", "project").to_attributes();
        assert!(!plain.contains_key(ATTR_GEN_AI_SYSTEM));

        let blank = EmissionEnvelope::new("agent", "sess", "project").with_operation(" ");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_invalid_record_rejected_through_envelope() {
        let envelope = EmissionEnvelope::new("agent", "sess", "project");
        let mut insight = Insight::new(InsightType::Risk, "x", 0.5).unwrap();
        insight.confidence = 7.0;
        assert!(envelope.wrap(&insight).is_err());
    }
}
