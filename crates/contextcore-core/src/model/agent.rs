use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};

use super::{insert_opt, Record};
use crate::envelope::{ATTR_GEN_AI_MODEL, ATTR_GEN_AI_SYSTEM};
use crate::schema::{AgentType, RecordKind};

/// Identity of an acting entity.
///
/// Created at session start and never mutated; other records reference it
/// through the emission envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable across sessions
    pub id: String,
    /// Unique per run
    pub session_id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Session of the agent that spawned this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// Model provider, e.g. `anthropic`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            agent_type,
            version: None,
            capabilities: Vec::new(),
            parent_session_id: None,
            system: None,
            model: None,
        }
    }

    /// Provider and model backing this agent.
    pub fn with_model(mut self, system: impl Into<String>, model: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Identity for a sub-agent spawned from this session.
    pub fn spawn(
        &self,
        id: impl Into<String>,
        session_id: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        let mut child = Agent::new(id, session_id, agent_type);
        child.parent_session_id = Some(self.session_id.clone());
        child
    }
}

impl Record for Agent {
    fn kind(&self) -> RecordKind {
        RecordKind::Agent
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn logical_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("agent.id".into(), self.id.as_str().into());
        attrs.insert("agent.session_id".into(), self.session_id.as_str().into());
        attrs.insert("agent.type".into(), self.agent_type.as_str().into());
        insert_opt(&mut attrs, "agent.version", self.version.as_deref());
        if !self.capabilities.is_empty() {
            attrs.insert(
                "agent.capabilities".into(),
                self.capabilities.join(",").into(),
            );
        }
        insert_opt(
            &mut attrs,
            "agent.parent_session_id",
            self.parent_session_id.as_deref(),
        );
        insert_opt(&mut attrs, ATTR_GEN_AI_SYSTEM, self.system.as_deref());
        insert_opt(&mut attrs, ATTR_GEN_AI_MODEL, self.model.as_deref());
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_agent_references_parent_session() {
        let parent = Agent::new("claude-code", "sess-1", AgentType::CodeAssistant);
        let child = parent.spawn("reviewer", "sess-2", AgentType::Specialist);
        assert_eq!(child.parent_session_id.as_deref(), Some("sess-1"));
        assert!(child.validate().is_ok());
    }

    #[test]
    fn test_blank_session_rejected() {
        let agent = Agent::new("claude-code", " ", AgentType::CodeAssistant);
        assert!(agent.validate().is_err());
    }

    #[test]
    fn test_capabilities_flattened() {
        let agent = Agent::new("a", "s", AgentType::Automation)
            .with_version("1.2.0")
            .with_capabilities(["triage", "summarize"]);
        let attrs = agent.logical_attributes();
        assert_eq!(attrs["agent.capabilities"].as_str(), Some("triage,summarize"));
        assert_eq!(attrs["agent.version"].as_str(), Some("1.2.0"));
    }
}
