use chrono::{DateTime, Utc};
use contextcore_span::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{insert_opt, new_id, timestamp, Evidence, Record};
use crate::error::{poisoned, CoreError, Result};
use crate::schema::{check_confidence, AttributeSchema, Audience, InsightType, RecordKind};

const EVIDENCE_PREFIX: &str = "insight.evidence";

/// Agent-generated knowledge.
///
/// Immutable once emitted. A correction is a new insight whose `supersedes`
/// names the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub summary: String,
    pub confidence: f64,
    pub audience: Audience,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    /// Create an insight with a generated id and `both` audience.
    ///
    /// Fails when the summary is blank or confidence is outside [0.0, 1.0].
    pub fn new(
        insight_type: InsightType,
        summary: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        let summary = summary.into();
        if summary.trim().is_empty() {
            return Err(CoreError::validation(
                "insight",
                "insight.summary",
                "must be a non-empty string",
            ));
        }
        check_confidence(RecordKind::Insight, "insight.confidence", confidence)?;

        Ok(Self {
            id: new_id("ins"),
            insight_type,
            summary,
            confidence,
            audience: Audience::Both,
            rationale: None,
            evidence: Vec::new(),
            supersedes: None,
            expires_at: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn for_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn superseding(mut self, previous: impl Into<String>) -> Self {
        self.supersedes = Some(previous.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

impl Record for Insight {
    fn kind(&self) -> RecordKind {
        RecordKind::Insight
    }

    fn record_id(&self) -> &str {
        &self.id
    }

    fn logical_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("insight.id".into(), self.id.as_str().into());
        attrs.insert("insight.type".into(), self.insight_type.as_str().into());
        attrs.insert("insight.summary".into(), self.summary.as_str().into());
        attrs.insert("insight.confidence".into(), self.confidence.into());
        attrs.insert("insight.audience".into(), self.audience.as_str().into());
        insert_opt(&mut attrs, "insight.rationale", self.rationale.as_deref());
        insert_opt(&mut attrs, "insight.supersedes", self.supersedes.as_deref());
        insert_opt(
            &mut attrs,
            "insight.expires_at",
            self.expires_at.as_ref().map(timestamp),
        );
        attrs.insert("insight.evidence_count".into(), self.evidence.len().into());
        attrs.extend(Evidence::flatten_list(EVIDENCE_PREFIX, &self.evidence));
        attrs
    }

    fn validate(&self) -> Result<()> {
        AttributeSchema::validate(RecordKind::Insight, &self.logical_attributes())?;
        for item in &self.evidence {
            item.validate()?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    insights: HashMap<String, Insight>,
    order: Vec<String>,
    /// superseded id -> id of the insight that replaced it
    replaced_by: HashMap<String, String>,
}

/// In-process index of emitted insights.
///
/// Keeps the supersedes -> replaced-by back-reference. Nothing is ever
/// removed; staleness is decided at query time.
#[derive(Default)]
pub struct InsightLedger {
    state: RwLock<LedgerState>,
}

impl InsightLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a validated insight and index its supersession.
    pub fn record(&self, insight: Insight) -> Result<()> {
        insight.validate()?;

        let mut state = self.state.write().map_err(poisoned("insight ledger"))?;
        if state.insights.contains_key(&insight.id) {
            return Err(CoreError::validation(
                "insight",
                "insight.id",
                format!("'{}' was already recorded", insight.id),
            ));
        }

        if let Some(previous) = &insight.supersedes {
            if previous == &insight.id {
                return Err(CoreError::validation(
                    "insight",
                    "insight.supersedes",
                    "an insight cannot supersede itself",
                ));
            }
            if let Some(earlier) = state.replaced_by.insert(previous.clone(), insight.id.clone()) {
                tracing::debug!(
                    insight_id = %previous,
                    previous_replacement = %earlier,
                    replacement = %insight.id,
                    "Insight superseded more than once; newest replacement wins"
                );
            }
        }

        state.order.push(insight.id.clone());
        state.insights.insert(insight.id.clone(), insight);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Insight>> {
        let state = self.state.read().map_err(poisoned("insight ledger"))?;
        Ok(state.insights.get(id).cloned())
    }

    /// Id of the insight that superseded `id`, if any.
    pub fn replaced_by(&self, id: &str) -> Result<Option<String>> {
        let state = self.state.read().map_err(poisoned("insight ledger"))?;
        Ok(state.replaced_by.get(id).cloned())
    }

    /// Follow the replaced-by chain to the newest insight.
    pub fn latest(&self, id: &str) -> Result<Option<Insight>> {
        let state = self.state.read().map_err(poisoned("insight ledger"))?;
        let mut current = id;
        // bounded by the number of insights, guards against cycles
        for _ in 0..=state.insights.len() {
            match state.replaced_by.get(current) {
                Some(next) if state.insights.contains_key(next) => current = next,
                _ => break,
            }
        }
        Ok(state.insights.get(current).cloned())
    }

    /// Insights that are neither expired at `now` nor superseded, in
    /// recording order.
    pub fn active(&self, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        let state = self.state.read().map_err(poisoned("insight ledger"))?;
        Ok(state
            .order
            .iter()
            .filter(|id| !state.replaced_by.contains_key(*id))
            .filter_map(|id| state.insights.get(id))
            .filter(|i| !i.is_expired(now))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.insights.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EvidenceType;
    use chrono::Duration;

    #[test]
    fn test_confidence_out_of_range_rejected() {
        assert!(Insight::new(InsightType::Risk, "disk filling", 1.5).is_err());
        assert!(Insight::new(InsightType::Risk, "disk filling", -0.1).is_err());
        assert!(Insight::new(InsightType::Risk, "", 0.5).is_err());
    }

    #[test]
    fn test_attributes_validate() {
        let insight = Insight::new(InsightType::Decision, "Use Redis for sessions", 0.9)
            .unwrap()
            .with_rationale("latency budget")
            .with_evidence(Evidence::new(EvidenceType::Adr, "adr-0042"));
        let attrs = insight.logical_attributes();
        assert_eq!(attrs["insight.evidence_count"].as_i64(), Some(1));
        assert_eq!(attrs["insight.evidence.0.ref"].as_str(), Some("adr-0042"));
        assert!(insight.validate().is_ok());
    }

    #[test]
    fn test_mutated_confidence_caught_by_validate() {
        let mut insight = Insight::new(InsightType::Analysis, "x", 0.5).unwrap();
        insight.confidence = f64::NAN;
        assert!(insight.validate().is_err());
    }

    #[test]
    fn test_supersession_is_query_time() {
        let ledger = InsightLedger::new();
        let first = Insight::new(InsightType::Analysis, "Root cause is DNS", 0.6)
            .unwrap()
            .with_id("ins-1");
        let second = Insight::new(InsightType::Analysis, "Root cause is TLS expiry", 0.9)
            .unwrap()
            .with_id("ins-2")
            .superseding("ins-1");

        ledger.record(first).unwrap();
        ledger.record(second).unwrap();

        assert_eq!(ledger.replaced_by("ins-1").unwrap().as_deref(), Some("ins-2"));
        // superseded record is kept
        assert!(ledger.get("ins-1").unwrap().is_some());
        let active: Vec<_> = ledger
            .active(Utc::now())
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(active, vec!["ins-2"]);
        assert_eq!(ledger.latest("ins-1").unwrap().unwrap().id, "ins-2");
    }

    #[test]
    fn test_expired_filtered() {
        let ledger = InsightLedger::new();
        let now = Utc::now();
        let stale = Insight::new(InsightType::Progress, "50% done", 1.0)
            .unwrap()
            .expiring_at(now - Duration::minutes(5));
        ledger.record(stale).unwrap();
        assert!(ledger.active(now).unwrap().is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_duplicate_and_self_supersession_rejected() {
        let ledger = InsightLedger::new();
        let insight = Insight::new(InsightType::Question, "Why?", 0.1)
            .unwrap()
            .with_id("q");
        ledger.record(insight.clone()).unwrap();
        assert!(ledger.record(insight).is_err());

        let looped = Insight::new(InsightType::Question, "Why?", 0.1)
            .unwrap()
            .with_id("q2")
            .superseding("q2");
        assert!(ledger.record(looped).is_err());
    }
}
