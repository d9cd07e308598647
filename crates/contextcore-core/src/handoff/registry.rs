use chrono::{DateTime, Utc};
use contextcore_span::{Attributes, SpanRef, SpanTracker, ATTR_PROGRESS_TRACKED};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::HandoffStatus;
use crate::envelope::EmissionEnvelope;
use crate::error::{poisoned, CoreError, Result};
use crate::metrics::CoreMetrics;
use crate::model::{timestamp, CapabilityRegistry, Handoff, HandoffValue};
use crate::schema::RecordKind;
use crate::translate::DualNamespaceTranslator;

/// Event recorded on a handoff span when it is created.
pub const HANDOFF_CREATED_EVENT: &str = "handoff.created";

/// Event recorded on a handoff span for every applied transition.
pub const HANDOFF_STATUS_EVENT: &str = "handoff.status_changed";

struct Entry {
    handoff: Handoff,
    span: SpanRef,
}

/// Live handoffs and their spans.
///
/// Each handoff sits behind its own mutex and every transition names the
/// status the caller observed. Attempts on one id are applied one at a time,
/// and an attempt whose observed status is no longer current fails with
/// `InvalidTransition`. Of several callers racing out of the same status
/// exactly one wins, even when the losers' moves would be legal from the
/// winner's result.
pub struct HandoffRegistry {
    tracker: Arc<SpanTracker>,
    translator: DualNamespaceTranslator,
    capabilities: Option<Arc<CapabilityRegistry>>,
    metrics: Option<Arc<CoreMetrics>>,
    handoffs: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl HandoffRegistry {
    pub fn new(tracker: Arc<SpanTracker>, translator: DualNamespaceTranslator) -> Self {
        Self {
            tracker,
            translator,
            capabilities: None,
            metrics: None,
            handoffs: RwLock::new(HashMap::new()),
        }
    }

    /// Update usage counters of `capabilities` from lifecycle events.
    pub fn with_capabilities(mut self, capabilities: Arc<CapabilityRegistry>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a pending handoff and open its span under `parent`.
    ///
    /// The span is kept out of the parent's progress. A retried handoff is a
    /// new record with a new id.
    pub fn create(
        &self,
        parent: SpanRef,
        envelope: &EmissionEnvelope,
        handoff: Handoff,
    ) -> Result<SpanRef> {
        if handoff.status != HandoffStatus::Pending {
            return Err(CoreError::validation(
                "handoff",
                "handoff.status",
                format!("new handoffs start pending, got {}", handoff.status),
            ));
        }
        let logical = envelope.wrap(&handoff)?;

        let mut handoffs = self.handoffs.write().map_err(poisoned("handoff registry"))?;
        if handoffs.contains_key(&handoff.id) {
            return Err(CoreError::validation(
                "handoff",
                "handoff.id",
                format!("'{}' already exists", handoff.id),
            ));
        }

        let mut attrs = self.translator.translate(RecordKind::Handoff, &logical);
        attrs.insert(ATTR_PROGRESS_TRACKED.to_string(), false.into());
        let span = self.tracker.start_stage(
            parent,
            &format!("handoff {}", handoff.capability_id),
            attrs,
        )?;
        self.tracker
            .add_event(span, HANDOFF_CREATED_EVENT, Attributes::new())?;

        tracing::info!(
            handoff_id = %handoff.id,
            from_agent = %handoff.from_agent,
            to_agent = %handoff.to_agent,
            capability_id = %handoff.capability_id,
            "Handoff created"
        );
        handoffs.insert(
            handoff.id.clone(),
            Arc::new(Mutex::new(Entry { handoff, span })),
        );
        Ok(span)
    }

    /// Move the handoff from `from`, the status the caller observed, to `to`.
    ///
    /// Fails with `InvalidTransition` when the handoff is no longer in
    /// `from` or the lifecycle does not allow `from -> to`.
    pub fn apply_transition(
        &self,
        id: &str,
        from: HandoffStatus,
        to: HandoffStatus,
    ) -> Result<()> {
        self.apply(id, from, to, None)
    }

    /// Enter a terminal status and attach the delegate's result.
    ///
    /// Entering `completed` checks the result against the handoff's expected
    /// output contract first.
    pub fn finish(
        &self,
        id: &str,
        from: HandoffStatus,
        to: HandoffStatus,
        result: HandoffValue,
    ) -> Result<()> {
        self.apply(id, from, to, Some(result))
    }

    fn apply(
        &self,
        id: &str,
        observed: HandoffStatus,
        to: HandoffStatus,
        result: Option<HandoffValue>,
    ) -> Result<()> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock().map_err(poisoned("handoff"))?;
        let from = entry.handoff.status;

        if observed != from || !from.can_transition_to(to) {
            if let Some(metrics) = &self.metrics {
                metrics.record_rejected_transition();
            }
            tracing::warn!(handoff_id = %id, from = %from, to = %to, "Rejected handoff transition");
            return Err(CoreError::InvalidTransition {
                handoff_id: id.to_string(),
                from,
                to,
            });
        }

        if result.is_some() && !to.is_terminal() {
            return Err(CoreError::validation(
                "handoff",
                "handoff.result",
                format!("a result can only be attached on terminal entry, not {}", to),
            ));
        }
        if to == HandoffStatus::Completed {
            entry.handoff.expected_output.check(result.as_ref())?;
        }

        let span = entry.span;
        let mut attrs = Attributes::new();
        attrs.insert("from".into(), from.as_str().into());
        attrs.insert("to".into(), to.as_str().into());
        attrs.insert("timestamp".into(), timestamp(&Utc::now()));
        self.tracker.add_event(span, HANDOFF_STATUS_EVENT, attrs)?;
        self.tracker.set_attribute(span, "handoff.status", to.as_str())?;

        entry.handoff.status = to;
        if result.is_some() {
            entry.handoff.result = result;
        }
        if let Some(status) = to.span_status() {
            self.tracker.close(span, status)?;
        }

        self.update_capability(&entry.handoff.capability_id, from, to);
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(from.as_str(), to.as_str());
        }
        tracing::info!(handoff_id = %id, from = %from, to = %to, "Handoff transitioned");
        Ok(())
    }

    fn update_capability(&self, capability_id: &str, from: HandoffStatus, to: HandoffStatus) {
        let Some(capabilities) = &self.capabilities else {
            return;
        };
        let outcome = match (from, to) {
            (HandoffStatus::Accepted, HandoffStatus::InProgress) => {
                capabilities.record_invocation(capability_id)
            }
            (_, HandoffStatus::Completed) => capabilities.record_success(capability_id),
            _ => return,
        };
        match outcome {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                capability_id = %capability_id,
                "Handoff references an unregistered capability; counters not updated"
            ),
            Err(e) => tracing::warn!(capability_id = %capability_id, error = %e, "Failed to update capability counters"),
        }
    }

    /// Copy of a handoff's current state.
    pub fn get(&self, id: &str) -> Result<Handoff> {
        let entry = self.entry(id)?;
        let entry = entry.lock().map_err(poisoned("handoff"))?;
        Ok(entry.handoff.clone())
    }

    pub fn status(&self, id: &str) -> Result<HandoffStatus> {
        self.get(id).map(|h| h.status)
    }

    /// Span carrying the handoff's lifecycle events.
    pub fn span(&self, id: &str) -> Result<SpanRef> {
        let entry = self.entry(id)?;
        let entry = entry.lock().map_err(poisoned("handoff"))?;
        Ok(entry.span)
    }

    /// Ids of active handoffs whose timeout elapsed at `now`.
    ///
    /// Nothing is transitioned here; the owning scheduler applies `timeout`.
    pub fn expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let entries: Vec<_> = {
            let handoffs = self.handoffs.read().map_err(poisoned("handoff registry"))?;
            handoffs.values().cloned().collect()
        };

        let mut overdue = Vec::new();
        for entry in entries {
            let entry = entry.lock().map_err(poisoned("handoff"))?;
            if entry.handoff.is_overdue(now) {
                overdue.push(entry.handoff.id.clone());
            }
        }
        overdue.sort();
        Ok(overdue)
    }

    pub fn len(&self) -> usize {
        self.handoffs.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<Entry>>> {
        let handoffs = self.handoffs.read().map_err(poisoned("handoff registry"))?;
        handoffs
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownHandoff(id.to_string()))
    }
}
