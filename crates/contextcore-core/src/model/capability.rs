use chrono::{DateTime, Utc};
use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{insert_opt, timestamp, Evidence, Record};
use crate::error::{poisoned, CoreError, Result};
use crate::schema::{check_confidence, AttributeSchema, Audience, RecordKind, RiskTier};

/// A registered, reusable unit of agent-usable behavior.
///
/// Never deleted. Deprecation sets `expires_at` or registers a successor
/// that supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub owner: String,
    pub risk_tier: RiskTier,
    pub confidence: f64,
    pub audience: Audience,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub invocation_count: u64,
    #[serde(default)]
    pub success_count: u64,
}

impl Capability {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        risk_tier: RiskTier,
        confidence: f64,
    ) -> Result<Self> {
        check_confidence(RecordKind::Capability, "capability.confidence", confidence)?;
        Ok(Self {
            id: id.into(),
            owner: owner.into(),
            risk_tier,
            confidence,
            audience: Audience::Agent,
            created_at: Utc::now(),
            updated_at: None,
            expires_at: None,
            supersedes: None,
            evidence: Vec::new(),
            invocation_count: 0,
            success_count: 0,
        })
    }

    pub fn for_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn superseding(mut self, previous: impl Into<String>) -> Self {
        self.supersedes = Some(previous.into());
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn is_deprecated(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    /// Share of invocations that completed, `None` before the first one.
    pub fn success_rate(&self) -> Option<f64> {
        (self.invocation_count > 0)
            .then(|| self.success_count as f64 / self.invocation_count as f64)
    }
}

impl Record for Capability {
    fn kind(&self) -> RecordKind {
        RecordKind::Capability
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn logical_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("capability.id".into(), self.id.as_str().into());
        attrs.insert("capability.owner".into(), self.owner.as_str().into());
        attrs.insert("capability.risk_tier".into(), self.risk_tier.as_str().into());
        attrs.insert("capability.confidence".into(), self.confidence.into());
        attrs.insert("capability.audience".into(), self.audience.as_str().into());
        attrs.insert("capability.created_at".into(), timestamp(&self.created_at));
        insert_opt(
            &mut attrs,
            "capability.updated_at",
            self.updated_at.as_ref().map(timestamp),
        );
        insert_opt(
            &mut attrs,
            "capability.expires_at",
            self.expires_at.as_ref().map(timestamp),
        );
        insert_opt(&mut attrs, "capability.supersedes", self.supersedes.as_deref());
        attrs.insert(
            "capability.invocation_count".into(),
            self.invocation_count.into(),
        );
        attrs.insert("capability.success_count".into(), self.success_count.into());
        attrs.extend(Evidence::flatten_list("capability.evidence", &self.evidence));
        attrs
    }

    fn validate(&self) -> Result<()> {
        AttributeSchema::validate(RecordKind::Capability, &self.logical_attributes())?;
        self.evidence.iter().try_for_each(|e| e.validate())
    }
}

/// Registered capabilities and their usage counters.
///
/// Counters are written only by the handoff lifecycle; callers outside the
/// crate can read them but not bump them.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new capability.
    ///
    /// When it supersedes another capability, the predecessor is deprecated
    /// at the successor's creation time.
    pub fn register(&self, capability: Capability) -> Result<()> {
        capability.validate()?;

        let mut capabilities = self
            .capabilities
            .write()
            .map_err(poisoned("capability registry"))?;
        if capabilities.contains_key(&capability.id) {
            return Err(CoreError::validation(
                "capability",
                "capability.id",
                format!("'{}' is already registered", capability.id),
            ));
        }

        if let Some(previous) = capability
            .supersedes
            .as_ref()
            .and_then(|id| capabilities.get_mut(id))
        {
            let at = capability.created_at;
            previous.expires_at = Some(previous.expires_at.map_or(at, |t| t.min(at)));
            previous.updated_at = Some(at);
        }

        tracing::debug!(capability_id = %capability.id, owner = %capability.owner, "Capability registered");
        capabilities.insert(capability.id.clone(), capability);
        Ok(())
    }

    /// Mark a capability deprecated from `at` onwards.
    pub fn deprecate(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut capabilities = self
            .capabilities
            .write()
            .map_err(poisoned("capability registry"))?;
        let capability = capabilities.get_mut(id).ok_or_else(|| {
            CoreError::validation("capability", "capability.id", format!("unknown capability '{}'", id))
        })?;
        capability.expires_at = Some(at);
        capability.updated_at = Some(Utc::now());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Capability>> {
        let capabilities = self
            .capabilities
            .read()
            .map_err(poisoned("capability registry"))?;
        Ok(capabilities.get(id).cloned())
    }

    /// Capabilities not deprecated at `now`.
    pub fn available(&self, now: DateTime<Utc>) -> Result<Vec<Capability>> {
        let capabilities = self
            .capabilities
            .read()
            .map_err(poisoned("capability registry"))?;
        let mut available: Vec<_> = capabilities
            .values()
            .filter(|c| !c.is_deprecated(now))
            .cloned()
            .collect();
        available.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(available)
    }

    pub(crate) fn record_invocation(&self, id: &str) -> Result<bool> {
        self.bump(id, |c| c.invocation_count += 1)
    }

    pub(crate) fn record_success(&self, id: &str) -> Result<bool> {
        self.bump(id, |c| c.success_count += 1)
    }

    fn bump(&self, id: &str, apply: impl FnOnce(&mut Capability)) -> Result<bool> {
        let mut capabilities = self
            .capabilities
            .write()
            .map_err(poisoned("capability registry"))?;
        match capabilities.get_mut(id) {
            Some(capability) => {
                apply(capability);
                capability.updated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
