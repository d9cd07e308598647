//! Record emission onto spans
//!
//! Every record goes out the same way: the envelope validates and wraps it,
//! the translator maps the logical attributes into the configured
//! namespaces, and the result is recorded on a span. Records either land
//! as a `<kind>.emitted` event on the enclosing span, or get a dedicated
//! short-lived child span that stays out of progress aggregation.

use contextcore_span::{
    Attributes, GateResult, SpanRef, SpanStatus, SpanTracker, ATTR_PROGRESS_TRACKED,
};
use std::sync::Arc;

use crate::envelope::EmissionEnvelope;
use crate::error::Result;
use crate::model::{Capability, CapabilityRegistry, Guidance, Insight, InsightLedger, Record};
use crate::translate::{DualNamespaceTranslator, EmitMode};

/// Event name for a record emitted onto an enclosing span.
pub fn emitted_event_name(record: &dyn Record) -> String {
    format!("{}.emitted", record.kind())
}

/// Validates, translates and records agent records on spans.
pub struct RecordEmitter {
    tracker: Arc<SpanTracker>,
    translator: DualNamespaceTranslator,
    ledger: Option<Arc<InsightLedger>>,
    capabilities: Option<Arc<CapabilityRegistry>>,
}

impl RecordEmitter {
    pub fn new(tracker: Arc<SpanTracker>, translator: DualNamespaceTranslator) -> Self {
        Self {
            tracker,
            translator,
            ledger: None,
            capabilities: None,
        }
    }

    /// Keep emitted insights in `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<InsightLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Register emitted capabilities in `capabilities`.
    pub fn with_capabilities(mut self, capabilities: Arc<CapabilityRegistry>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn mode(&self) -> EmitMode {
        self.translator.mode()
    }

    /// Physical attributes for `record`, validated and translated.
    ///
    /// Nothing is recorded; an invalid record fails here.
    pub fn render(&self, envelope: &EmissionEnvelope, record: &dyn Record) -> Result<Attributes> {
        let logical = envelope.wrap(record)?;
        Ok(self.translator.translate(record.kind(), &logical))
    }

    /// Record `record` as a `<kind>.emitted` event on `span`.
    pub fn emit(
        &self,
        span: SpanRef,
        envelope: &EmissionEnvelope,
        record: &dyn Record,
    ) -> Result<()> {
        let attrs = self.render(envelope, record)?;
        self.tracker
            .add_event(span, &emitted_event_name(record), attrs)?;

        tracing::debug!(
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            kind = %record.kind(),
            record_id = record.record_id(),
            "Record emitted"
        );
        Ok(())
    }

    /// Record `record` on its own child span of `parent`, closed right away.
    pub fn emit_in_span(
        &self,
        parent: SpanRef,
        envelope: &EmissionEnvelope,
        record: &dyn Record,
    ) -> Result<SpanRef> {
        let mut attrs = self.render(envelope, record)?;
        attrs.insert(ATTR_PROGRESS_TRACKED.to_string(), false.into());

        let name = format!("{} {}", record.kind(), record.record_id());
        let span = self.tracker.start_stage(parent, &name, attrs)?;
        self.tracker.close(span, SpanStatus::Ok)?;

        tracing::debug!(
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            kind = %record.kind(),
            record_id = record.record_id(),
            "Record emitted on dedicated span"
        );
        Ok(span)
    }

    /// Emit an insight and, with a ledger, index it for supersession.
    ///
    /// A ledger rejection (duplicate id, self-supersession) happens before
    /// anything is recorded on the span.
    pub fn emit_insight(
        &self,
        span: SpanRef,
        envelope: &EmissionEnvelope,
        insight: Insight,
    ) -> Result<()> {
        let attrs = self.render(envelope, &insight)?;
        let event = emitted_event_name(&insight);
        self.tracker.add_event_with(span, &event, attrs, || match &self.ledger {
            Some(ledger) => ledger.record(insight),
            None => Ok(()),
        })
    }

    pub fn emit_guidance(
        &self,
        span: SpanRef,
        envelope: &EmissionEnvelope,
        guidance: &Guidance,
    ) -> Result<()> {
        self.emit(span, envelope, guidance)
    }

    /// Emit a capability and, with a registry, register it.
    pub fn emit_capability(
        &self,
        span: SpanRef,
        envelope: &EmissionEnvelope,
        capability: Capability,
    ) -> Result<()> {
        let attrs = self.render(envelope, &capability)?;
        let event = emitted_event_name(&capability);
        self.tracker.add_event_with(span, &event, attrs, || match &self.capabilities {
            Some(registry) => registry.register(capability),
            None => Ok(()),
        })
    }

    /// Record a gate result as a flattened `gate.validation` event.
    ///
    /// Gate keys have no standardized equivalent and are kept as is in
    /// every mode.
    pub fn emit_gate(&self, span: SpanRef, gate: &GateResult) -> Result<()> {
        self.tracker.record_gate(span, gate)?;
        if !gate.passed() {
            tracing::warn!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                gate = %gate.name,
                violations = gate.violations.len(),
                "Gate failed"
            );
        }
        Ok(())
    }
}
