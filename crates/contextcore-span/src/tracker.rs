//! Span tracker for pipeline runs.
//!
//! Owns every span of every live run. Each run gets a root span; each stage
//! gets a child span that inherits the parent's trace id and a copy of the
//! parent's baggage.
//!
//! # Concurrency
//!
//! All state of one trace sits behind a single mutex. Closing a span and
//! recomputing its ancestors' progress happen inside that critical section,
//! so sibling stages closing concurrently cannot race on the shared ancestor
//! chain. Different traces never contend with each other.
//!
//! # Progress
//!
//! A leaf reports 0 while open (or whatever was reported through
//! [`SpanTracker::report_progress`]) and 1 after a non-error close. A span
//! with children reports the weighted mean of its direct children, weight 1
//! unless the child carries [`ATTR_STAGE_WEIGHT`]. Children marked
//! `progress.tracked = false` are skipped; a span whose children are all
//! skipped is treated as a leaf. Weight reserved through
//! [`ATTR_RESERVED_WEIGHT`] for children that have not opened yet counts at
//! progress 0, so a parent does not report completion before its later
//! children exist. Ancestors are recomputed eagerly whenever a descendant
//! opens, reports or closes.
//!
//! # Failure
//!
//! Closing a span with [`SpanStatus::Error`] never closes its ancestors. It
//! sets `has_failed_child` on every ancestor, and fails the run only when the
//! span was declared required through [`ATTR_STAGE_REQUIRED`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::context::{Baggage, SpanId, SpanRef, TraceContext, TraceId};
use crate::error::{Result, SpanError};
use crate::gate::{GateResult, GATE_EVENT_NAME};
use crate::snapshot::{SpanNode, TraceSnapshot};
use crate::span::{
    AttributeValue, Attributes, Span, SpanEvent, SpanLink, SpanStatus, ATTR_HAS_FAILED_CHILD,
    ATTR_RESERVED_WEIGHT, ATTR_STAGE_WEIGHT,
};

/// Receives closed spans and recorded events for export.
///
/// Hooks are called after the trace lock is released and must not block;
/// export is a side channel that never feeds back into span state.
pub trait ExportHook: Send + Sync {
    fn on_span_closed(&self, span: &Span);

    fn on_event(&self, span: SpanRef, event: &SpanEvent);
}

/// Mutable state of one run.
struct TraceState {
    root: SpanId,
    spans: HashMap<SpanId, Span>,
    children: HashMap<SpanId, Vec<SpanId>>,
    run_failed: bool,
}

impl TraceState {
    fn span(&self, trace_id: TraceId, span_id: SpanId) -> Result<&Span> {
        self.spans
            .get(&span_id)
            .ok_or(SpanError::UnknownSpan { trace_id, span_id })
    }

    fn span_mut(&mut self, trace_id: TraceId, span_id: SpanId) -> Result<&mut Span> {
        self.spans
            .get_mut(&span_id)
            .ok_or(SpanError::UnknownSpan { trace_id, span_id })
    }

    fn open_span_mut(&mut self, trace_id: TraceId, span_id: SpanId) -> Result<&mut Span> {
        let span = self.span_mut(trace_id, span_id)?;
        if span.is_closed() {
            return Err(SpanError::SpanClosed {
                span_id,
                name: span.name.clone(),
            });
        }
        Ok(span)
    }

    /// Parent inside this trace; the root's remote parent is not tracked.
    fn local_parent(&self, span_id: SpanId) -> Option<SpanId> {
        if span_id == self.root {
            return None;
        }
        self.spans.get(&span_id).and_then(|s| s.parent_span_id)
    }

    /// Weighted mean over progress-tracked children and the span's
    /// reservation, `None` for a leaf.
    fn aggregate(&self, span_id: SpanId) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = self
            .spans
            .get(&span_id)
            .map(Span::reserved_weight)
            .unwrap_or(0.0);
        let tracked = self
            .children
            .get(&span_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.spans.get(id))
            .filter(|child| child.is_progress_tracked());
        for child in tracked {
            let weight = child.weight();
            weighted += weight * child.progress;
            total += weight;
        }
        (total > 0.0).then(|| weighted / total)
    }

    /// Recompute `start` (if it has children) and every ancestor up to the root.
    fn recompute_from(&mut self, start: SpanId) {
        let mut current = Some(start);
        while let Some(span_id) = current {
            if let Some(progress) = self.aggregate(span_id) {
                if let Some(span) = self.spans.get_mut(&span_id) {
                    span.progress = progress;
                }
            }
            current = self.local_parent(span_id);
        }
    }

    fn mark_failed_ancestors(&mut self, span_id: SpanId) {
        let mut current = self.local_parent(span_id);
        while let Some(ancestor) = current {
            if let Some(span) = self.spans.get_mut(&ancestor) {
                span.has_failed_child = true;
                span.attributes
                    .insert(ATTR_HAS_FAILED_CHILD.to_string(), AttributeValue::Bool(true));
            }
            current = self.local_parent(ancestor);
        }
    }

    fn node(&self, span_id: SpanId) -> Option<SpanNode> {
        let span = self.spans.get(&span_id)?.clone();
        let children = self
            .children
            .get(&span_id)
            .map(|ids| ids.iter().filter_map(|id| self.node(*id)).collect())
            .unwrap_or_default();
        Some(SpanNode { span, children })
    }

    fn snapshot(&self, trace_id: TraceId) -> Result<TraceSnapshot> {
        let root = self.node(self.root).ok_or(SpanError::UnknownSpan {
            trace_id,
            span_id: self.root,
        })?;
        Ok(TraceSnapshot {
            trace_id,
            run_failed: self.run_failed,
            root,
        })
    }
}

/// Builds and owns the hierarchical traces of pipeline runs.
pub struct SpanTracker {
    traces: RwLock<HashMap<TraceId, Arc<Mutex<TraceState>>>>,
    hook: Option<Arc<dyn ExportHook>>,
}

impl Default for SpanTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanTracker {
    /// Create a tracker that exports nothing.
    pub fn new() -> Self {
        Self {
            traces: RwLock::new(HashMap::new()),
            hook: None,
        }
    }

    /// Create a tracker that hands closed spans and events to `hook`.
    pub fn with_hook(hook: Arc<dyn ExportHook>) -> Self {
        Self {
            traces: RwLock::new(HashMap::new()),
            hook: Some(hook),
        }
    }

    /// Open the root span of a new run.
    pub fn start_run(&self, name: &str) -> Result<SpanRef> {
        self.start_run_with(name, Attributes::new(), None)
    }

    /// Open the root span of a new run, optionally joining an upstream trace.
    ///
    /// With a context, the root joins the upstream trace id, records the
    /// upstream span as its parent and starts from the upstream baggage.
    /// One trace id holds at most one live run; joining a trace whose run
    /// has not been finished fails with `TraceActive`.
    pub fn start_run_with(
        &self,
        name: &str,
        attributes: Attributes,
        context: Option<&TraceContext>,
    ) -> Result<SpanRef> {
        validate_weight(name, &attributes)?;
        let (trace_id, parent, baggage) = match context {
            Some(ctx) => (ctx.trace_id, Some(ctx.parent_span_id), ctx.baggage.clone()),
            None => (TraceId::generate(), None, Baggage::new()),
        };

        let root = Span::new(trace_id, parent, name, attributes, baggage);
        let root_ref = root.span_ref();

        let mut spans = HashMap::new();
        spans.insert(root.span_id, root);
        let state = TraceState {
            root: root_ref.span_id,
            spans,
            children: HashMap::new(),
            run_failed: false,
        };

        let mut traces = self.traces.write().map_err(poisoned)?;
        match traces.entry(trace_id) {
            Entry::Occupied(_) => {
                tracing::warn!(trace_id = %trace_id, run = name, "Trace already has a live run");
                return Err(SpanError::TraceActive(trace_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(state)));
            }
        }

        tracing::info!(trace_id = %trace_id, span_id = %root_ref.span_id, run = name, "Run started");
        Ok(root_ref)
    }

    /// Open a child span under `parent`.
    pub fn start_stage(
        &self,
        parent: SpanRef,
        name: &str,
        attributes: Attributes,
    ) -> Result<SpanRef> {
        self.start_stage_with_baggage(parent, name, attributes, Baggage::new())
    }

    /// Open a child span whose inherited baggage is extended by `extra`.
    ///
    /// Entries in `extra` override inherited entries with the same key.
    pub fn start_stage_with_baggage(
        &self,
        parent: SpanRef,
        name: &str,
        attributes: Attributes,
        extra: Baggage,
    ) -> Result<SpanRef> {
        validate_weight(name, &attributes)?;
        let trace = self.trace(parent.trace_id)?;
        let mut state = lock(&trace)?;

        let parent_span = state.open_span_mut(parent.trace_id, parent.span_id)?;
        let mut baggage = parent_span.baggage.clone();
        baggage.extend(extra);

        let child = Span::new(parent.trace_id, Some(parent.span_id), name, attributes, baggage);
        let child_ref = child.span_ref();

        let reserved = parent_span.reserved_weight();
        if reserved > 0.0 && child.is_progress_tracked() {
            let remaining = (reserved - child.weight()).max(0.0);
            parent_span
                .attributes
                .insert(ATTR_RESERVED_WEIGHT.to_string(), remaining.into());
        }

        state.spans.insert(child.span_id, child);
        state
            .children
            .entry(parent.span_id)
            .or_default()
            .push(child_ref.span_id);
        state.recompute_from(parent.span_id);

        tracing::debug!(
            trace_id = %parent.trace_id,
            span_id = %child_ref.span_id,
            parent_span_id = %parent.span_id,
            stage = name,
            "Stage span opened"
        );
        Ok(child_ref)
    }

    /// Record a named event on an open span.
    pub fn add_event(&self, span: SpanRef, name: &str, attributes: Attributes) -> Result<()> {
        let event = SpanEvent::new(name, attributes);
        {
            let trace = self.trace(span.trace_id)?;
            let mut state = lock(&trace)?;
            state
                .open_span_mut(span.trace_id, span.span_id)?
                .events
                .push(event.clone());
        }

        if let Some(hook) = &self.hook {
            hook.on_event(span, &event);
        }
        Ok(())
    }

    /// Record an event only if `commit` succeeds.
    ///
    /// `commit` runs while the trace is locked and after the span is known to
    /// be open, so either both the caller's side effect and the event happen
    /// or neither does.
    pub fn add_event_with<E, F>(
        &self,
        span: SpanRef,
        name: &str,
        attributes: Attributes,
        commit: F,
    ) -> std::result::Result<(), E>
    where
        E: From<SpanError>,
        F: FnOnce() -> std::result::Result<(), E>,
    {
        let event = SpanEvent::new(name, attributes);
        {
            let trace = self.trace(span.trace_id)?;
            let mut state = lock(&trace)?;
            let target = state.open_span_mut(span.trace_id, span.span_id)?;
            commit()?;
            target.events.push(event.clone());
        }

        if let Some(hook) = &self.hook {
            hook.on_event(span, &event);
        }
        Ok(())
    }

    /// Record a gate result as a flattened `gate.validation` event.
    pub fn record_gate(&self, span: SpanRef, gate: &GateResult) -> Result<()> {
        self.add_event(span, GATE_EVENT_NAME, gate.to_attributes())
    }

    /// Link an open span to another span, possibly in another trace.
    pub fn add_link(&self, span: SpanRef, target: SpanRef, link_type: &str) -> Result<()> {
        let trace = self.trace(span.trace_id)?;
        let mut state = lock(&trace)?;
        state
            .open_span_mut(span.trace_id, span.span_id)?
            .links
            .push(SpanLink {
                target,
                link_type: link_type.to_string(),
            });
        Ok(())
    }

    /// Set one attribute on an open span.
    pub fn set_attribute(
        &self,
        span: SpanRef,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        let value = value.into();
        if key == ATTR_STAGE_WEIGHT || key == ATTR_RESERVED_WEIGHT {
            let mut single = Attributes::new();
            single.insert(key.to_string(), value.clone());
            validate_weight(key, &single)?;
        }

        let trace = self.trace(span.trace_id)?;
        let mut state = lock(&trace)?;
        state
            .open_span_mut(span.trace_id, span.span_id)?
            .attributes
            .insert(key.to_string(), value);
        if key == ATTR_STAGE_WEIGHT {
            if let Some(parent) = state.local_parent(span.span_id) {
                state.recompute_from(parent);
            }
        } else if key == ATTR_RESERVED_WEIGHT {
            state.recompute_from(span.span_id);
        }
        Ok(())
    }

    /// Set a baggage entry on an open span.
    ///
    /// Only descendants created afterwards see the entry; existing children
    /// keep the copy they inherited.
    pub fn set_baggage(&self, span: SpanRef, key: &str, value: &str) -> Result<()> {
        let trace = self.trace(span.trace_id)?;
        let mut state = lock(&trace)?;
        state
            .open_span_mut(span.trace_id, span.span_id)?
            .baggage
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Report fractional progress for an open span.
    ///
    /// Only meaningful for leaves; a span with children always reports the
    /// aggregate of its children.
    pub fn report_progress(&self, span: SpanRef, value: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(SpanError::ProgressOutOfRange {
                span_id: span.span_id,
                value,
            });
        }

        let trace = self.trace(span.trace_id)?;
        let mut state = lock(&trace)?;
        state.open_span_mut(span.trace_id, span.span_id)?.progress = value;
        state.recompute_from(span.span_id);
        Ok(())
    }

    /// Close a span with a terminal status.
    ///
    /// Recomputes progress for the span and its ancestors in the same
    /// critical section. A required span closing with error fails the run.
    pub fn close(&self, span: SpanRef, status: SpanStatus) -> Result<()> {
        let closed = {
            let trace = self.trace(span.trace_id)?;
            let mut state = lock(&trace)?;

            let is_leaf = state.aggregate(span.span_id).is_none();
            let target = state.open_span_mut(span.trace_id, span.span_id)?;
            target.close(status);
            if is_leaf && status != SpanStatus::Error {
                target.progress = 1.0;
            }
            let required = target.is_required();
            let closed = target.clone();

            if status == SpanStatus::Error {
                state.mark_failed_ancestors(span.span_id);
                if required {
                    state.run_failed = true;
                    tracing::warn!(
                        trace_id = %span.trace_id,
                        span_id = %span.span_id,
                        stage = %closed.name,
                        "Required stage failed, run marked failed"
                    );
                }
            }
            state.recompute_from(span.span_id);
            closed
        };

        tracing::debug!(
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            status = %status,
            progress = closed.progress,
            "Span closed"
        );

        if let Some(hook) = &self.hook {
            hook.on_span_closed(&closed);
        }
        Ok(())
    }

    /// Copy of a span's current state.
    pub fn get(&self, span: SpanRef) -> Result<Span> {
        let trace = self.trace(span.trace_id)?;
        let state = lock(&trace)?;
        state.span(span.trace_id, span.span_id).cloned()
    }

    pub fn progress(&self, span: SpanRef) -> Result<f64> {
        self.get(span).map(|s| s.progress)
    }

    /// Baggage visible to a span (inherited plus its own entries).
    pub fn baggage(&self, span: SpanRef) -> Result<Baggage> {
        self.get(span).map(|s| s.baggage)
    }

    /// Direct children in creation order.
    pub fn children(&self, span: SpanRef) -> Result<Vec<SpanRef>> {
        let trace = self.trace(span.trace_id)?;
        let state = lock(&trace)?;
        state.span(span.trace_id, span.span_id)?;
        Ok(state
            .children
            .get(&span.span_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| SpanRef::new(span.trace_id, *id))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Root span of a live run.
    pub fn root(&self, trace_id: TraceId) -> Result<SpanRef> {
        let trace = self.trace(trace_id)?;
        let state = lock(&trace)?;
        Ok(SpanRef::new(trace_id, state.root))
    }

    /// Whether a required stage of the run has failed.
    pub fn is_run_failed(&self, trace_id: TraceId) -> Result<bool> {
        let trace = self.trace(trace_id)?;
        let state = lock(&trace)?;
        Ok(state.run_failed)
    }

    /// Copy of the whole trace.
    pub fn snapshot(&self, trace_id: TraceId) -> Result<TraceSnapshot> {
        let trace = self.trace(trace_id)?;
        let state = lock(&trace)?;
        state.snapshot(trace_id)
    }

    /// Drop a run's state and return its final snapshot.
    pub fn finish(&self, trace_id: TraceId) -> Result<TraceSnapshot> {
        let trace = {
            let mut traces = self.traces.write().map_err(poisoned)?;
            traces
                .remove(&trace_id)
                .ok_or(SpanError::UnknownTrace(trace_id))?
        };
        let state = lock(&trace)?;
        let snapshot = state.snapshot(trace_id)?;
        tracing::info!(
            trace_id = %trace_id,
            run_failed = snapshot.run_failed,
            progress = snapshot.progress(),
            spans = snapshot.span_count(),
            "Run finished"
        );
        Ok(snapshot)
    }

    /// Number of live runs.
    pub fn active_runs(&self) -> usize {
        self.traces.read().map(|t| t.len()).unwrap_or(0)
    }

    fn trace(&self, trace_id: TraceId) -> Result<Arc<Mutex<TraceState>>> {
        let traces = self.traces.read().map_err(poisoned)?;
        traces
            .get(&trace_id)
            .cloned()
            .ok_or(SpanError::UnknownTrace(trace_id))
    }
}

fn lock(trace: &Arc<Mutex<TraceState>>) -> Result<MutexGuard<'_, TraceState>> {
    trace
        .lock()
        .map_err(|e| SpanError::LockPoisoned(format!("trace state: {}", e)))
}

fn poisoned<E: std::fmt::Display>(e: E) -> SpanError {
    SpanError::LockPoisoned(format!("trace registry: {}", e))
}

/// Stage weights must be positive, reservations non-negative; both finite.
fn validate_weight(name: &str, attributes: &Attributes) -> Result<()> {
    let checks = [
        (ATTR_STAGE_WEIGHT, false),
        (ATTR_RESERVED_WEIGHT, true),
    ];
    for (key, zero_ok) in checks {
        let Some(value) = attributes.get(key) else {
            continue;
        };
        match value.as_f64() {
            Some(w) if w.is_finite() && (w > 0.0 || (zero_ok && w == 0.0)) => {}
            other => {
                return Err(SpanError::InvalidWeight {
                    name: name.to_string(),
                    value: other.unwrap_or(f64::NAN),
                })
            }
        }
    }
    Ok(())
}
