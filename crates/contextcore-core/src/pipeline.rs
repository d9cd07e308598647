//! Pipeline run coordination
//!
//! Ties the scheduler to the tracker for one run. The plan is computed
//! before any span exists, so a cyclic definition never opens a trace.
//! A stage is released only when every predecessor's span has closed; its
//! span then starts with the merged baggage of those predecessors, so
//! checksums registered upstream are visible to it.
//!
//! A stage whose predecessor closed with error is blocked: it can never be
//! released in this run.
//!
//! The root reserves the declared weight of every stage up front, so run
//! progress counts stages that have not been released yet at 0 instead of
//! averaging over whatever happens to be open.

use chrono::Utc;
use contextcore_span::{
    Attributes, Baggage, SpanRef, SpanStatus, SpanTracker, TraceContext, TraceId, TraceSnapshot,
    ATTR_RESERVED_WEIGHT, ATTR_STAGE_REQUIRED, ATTR_STAGE_WEIGHT,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{poisoned, CoreError, Result};
use crate::metrics::CoreMetrics;
use crate::model::{Guidance, GuidanceSet};
use crate::scheduler::{DependencyScheduler, ExecutionPlan, PipelineDefinition};

pub const ATTR_PIPELINE_NAME: &str = "pipeline.name";
pub const ATTR_PIPELINE_STAGES: &str = "pipeline.stages";
pub const ATTR_STAGE_GROUP: &str = "stage.group";
pub const ATTR_GUIDANCE_APPLIED: &str = "guidance.applied";

#[derive(Debug, Clone, Copy, PartialEq)]
enum StageState {
    Pending,
    Running(SpanRef),
    Closed(SpanRef, SpanStatus),
}

/// One execution of a pipeline definition.
pub struct PipelineRun {
    tracker: Arc<SpanTracker>,
    definition: PipelineDefinition,
    plan: ExecutionPlan,
    guidance: GuidanceSet,
    metrics: Option<Arc<CoreMetrics>>,
    root: SpanRef,
    stages: Mutex<HashMap<String, StageState>>,
}

impl PipelineRun {
    /// Plan `definition` and open the run's root span.
    pub fn start(
        tracker: Arc<SpanTracker>,
        definition: PipelineDefinition,
        guidance: GuidanceSet,
    ) -> Result<Self> {
        Self::start_with(tracker, definition, guidance, None)
    }

    /// Like [`PipelineRun::start`], joining an upstream trace when given.
    pub fn start_with(
        tracker: Arc<SpanTracker>,
        definition: PipelineDefinition,
        guidance: GuidanceSet,
        context: Option<&TraceContext>,
    ) -> Result<Self> {
        let plan = DependencyScheduler::plan(&definition)?;

        let mut attrs = Attributes::new();
        attrs.insert(ATTR_PIPELINE_NAME.into(), definition.name.as_str().into());
        attrs.insert(ATTR_PIPELINE_STAGES.into(), definition.stages.len().into());
        attrs.insert(ATTR_RESERVED_WEIGHT.into(), definition.total_weight().into());
        let root = tracker.start_run_with(&definition.name, attrs, context)?;

        let stages = definition
            .stages
            .iter()
            .map(|s| (s.name.clone(), StageState::Pending))
            .collect();

        tracing::info!(
            trace_id = %root.trace_id,
            pipeline = %definition.name,
            stages = definition.stages.len(),
            groups = plan.groups.len(),
            guidance = guidance.len(),
            "Pipeline run started"
        );

        Ok(Self {
            tracker,
            definition,
            plan,
            guidance,
            metrics: None,
            root,
            stages: Mutex::new(stages),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn trace_id(&self) -> TraceId {
        self.root.trace_id
    }

    pub fn root(&self) -> SpanRef {
        self.root
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Pending stages whose predecessors all closed without error, in plan
    /// order.
    pub fn ready_stages(&self) -> Result<Vec<String>> {
        let stages = self.stages.lock().map_err(poisoned("pipeline stages"))?;
        Ok(self
            .plan
            .order()
            .into_iter()
            .filter(|name| stages.get(*name) == Some(&StageState::Pending))
            .filter(|name| self.waiting_on(&stages, name).is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Pending stages that can no longer run because a predecessor, direct
    /// or transitive, failed.
    pub fn blocked_stages(&self) -> Result<Vec<String>> {
        let stages = self.stages.lock().map_err(poisoned("pipeline stages"))?;
        Ok(self.blocked(&stages))
    }

    /// Open the span of a ready stage.
    ///
    /// Fails with `StageNotReady` naming the predecessors that are still
    /// open, unstarted or failed.
    pub fn start_stage(&self, name: &str) -> Result<SpanRef> {
        let definition = self
            .definition
            .get(name)
            .ok_or_else(|| CoreError::UnknownStage(name.to_string()))?;

        let mut stages = self.stages.lock().map_err(poisoned("pipeline stages"))?;
        if stages.get(name) != Some(&StageState::Pending) {
            return Err(CoreError::validation(
                "pipeline",
                format!("stages.{}", name),
                "stage was already started",
            ));
        }

        let pending = self.waiting_on(&stages, name);
        if !pending.is_empty() {
            tracing::debug!(stage = name, pending = %pending.join(", "), "Stage not ready");
            return Err(CoreError::StageNotReady {
                stage: name.to_string(),
                pending,
            });
        }

        let mut baggage = Baggage::new();
        for predecessor in &definition.depends_on {
            if let Some(StageState::Closed(span, _)) = stages.get(predecessor) {
                baggage.extend(self.tracker.baggage(*span)?);
            }
        }

        let mut attrs = Attributes::new();
        attrs.insert(ATTR_STAGE_REQUIRED.into(), definition.required.into());
        if let Some(weight) = definition.weight {
            attrs.insert(ATTR_STAGE_WEIGHT.into(), weight.into());
        }
        if let Some(group) = self.plan.group_of(name) {
            attrs.insert(ATTR_STAGE_GROUP.into(), group.into());
        }
        let applied: Vec<&str> = self
            .guidance
            .applicable(name, Utc::now())
            .into_iter()
            .map(|g| g.id.as_str())
            .collect();
        if !applied.is_empty() {
            attrs.insert(ATTR_GUIDANCE_APPLIED.into(), applied.join(",").into());
        }

        let span = self
            .tracker
            .start_stage_with_baggage(self.root, name, attrs, baggage)?;
        stages.insert(name.to_string(), StageState::Running(span));
        Ok(span)
    }

    /// Close a running stage.
    pub fn complete_stage(&self, name: &str, status: SpanStatus) -> Result<()> {
        if self.definition.get(name).is_none() {
            return Err(CoreError::UnknownStage(name.to_string()));
        }

        let mut stages = self.stages.lock().map_err(poisoned("pipeline stages"))?;
        let Some(StageState::Running(span)) = stages.get(name).copied() else {
            return Err(CoreError::validation(
                "pipeline",
                format!("stages.{}", name),
                "stage is not running",
            ));
        };

        self.tracker.close(span, status)?;
        stages.insert(name.to_string(), StageState::Closed(span, status));
        drop(stages);

        if status == SpanStatus::Error {
            tracing::warn!(trace_id = %span.trace_id, stage = name, "Stage failed");
        }
        self.publish_progress()
    }

    /// Span of a started stage.
    pub fn stage_span(&self, name: &str) -> Option<SpanRef> {
        let stages = self.stages.lock().ok()?;
        match stages.get(name)? {
            StageState::Running(span) | StageState::Closed(span, _) => Some(*span),
            StageState::Pending => None,
        }
    }

    /// Guidance in effect for a stage right now.
    pub fn guidance_for(&self, stage: &str) -> Vec<&Guidance> {
        self.guidance.applicable(stage, Utc::now())
    }

    pub fn progress(&self) -> Result<f64> {
        Ok(self.tracker.progress(self.root)?)
    }

    /// Whether a required stage failed.
    pub fn is_failed(&self) -> Result<bool> {
        Ok(self.tracker.is_run_failed(self.root.trace_id)?)
    }

    /// True when nothing is running and nothing can be released.
    pub fn is_settled(&self) -> Result<bool> {
        let stages = self.stages.lock().map_err(poisoned("pipeline stages"))?;
        let blocked = self.blocked(&stages);
        Ok(stages.iter().all(|(name, state)| match state {
            StageState::Closed(..) => true,
            StageState::Running(_) => false,
            StageState::Pending => blocked.iter().any(|b| b == name),
        }))
    }

    /// Close the run and return its trace.
    ///
    /// Stages still running are closed with error. The root closes with
    /// error when a required stage failed, ok otherwise.
    pub fn finish(self) -> Result<TraceSnapshot> {
        let running: Vec<(String, SpanRef)> = {
            let stages = self.stages.lock().map_err(poisoned("pipeline stages"))?;
            stages
                .iter()
                .filter_map(|(name, state)| match state {
                    StageState::Running(span) => Some((name.clone(), *span)),
                    _ => None,
                })
                .collect()
        };
        for (name, span) in running {
            tracing::warn!(trace_id = %span.trace_id, stage = %name, "Closing unfinished stage");
            self.tracker.close(span, SpanStatus::Error)?;
        }

        let status = if self.tracker.is_run_failed(self.root.trace_id)? {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        };
        self.tracker.close(self.root, status)?;
        self.publish_progress()?;

        Ok(self.tracker.finish(self.root.trace_id)?)
    }

    /// Predecessors of `name` that are not closed ok.
    fn waiting_on(&self, stages: &HashMap<String, StageState>, name: &str) -> Vec<String> {
        let Some(definition) = self.definition.get(name) else {
            return Vec::new();
        };
        definition
            .depends_on
            .iter()
            .filter(|p| {
                !matches!(
                    stages.get(p.as_str()),
                    Some(StageState::Closed(_, status)) if *status != SpanStatus::Error
                )
            })
            .cloned()
            .collect()
    }

    fn blocked(&self, stages: &HashMap<String, StageState>) -> Vec<String> {
        let mut blocked: Vec<String> = Vec::new();
        for name in self.plan.order() {
            if stages.get(name) != Some(&StageState::Pending) {
                continue;
            }
            let Some(definition) = self.definition.get(name) else {
                continue;
            };
            // plan order puts every predecessor before its dependents
            let is_blocked = definition.depends_on.iter().any(|p| {
                matches!(stages.get(p.as_str()), Some(StageState::Closed(_, SpanStatus::Error)))
                    || blocked.iter().any(|b| b == p)
            });
            if is_blocked {
                blocked.push(name.to_string());
            }
        }
        blocked
    }

    fn publish_progress(&self) -> Result<()> {
        if let Some(metrics) = &self.metrics {
            metrics.set_run_progress(&self.definition.name, self.progress()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::integrity::IntegrityGate;
    use crate::scheduler::StageDefinition;

    fn diamond() -> PipelineDefinition {
        PipelineDefinition::new("etl")
            .stage(StageDefinition::new("ingest"))
            .stage(StageDefinition::new("clean").after(["ingest"]))
            .stage(StageDefinition::new("profile").after(["ingest"]).optional())
            .stage(StageDefinition::new("report").after(["clean", "profile"]))
    }

    fn start(definition: PipelineDefinition) -> (Arc<SpanTracker>, PipelineRun) {
        let tracker = Arc::new(SpanTracker::new());
        let run = PipelineRun::start(Arc::clone(&tracker), definition, GuidanceSet::default()).unwrap();
        (tracker, run)
    }

    #[test]
    fn test_stage_released_only_after_predecessors_close() {
        let (_tracker, run) = start(diamond());
        assert_eq!(run.ready_stages().unwrap(), vec!["ingest"]);

        match run.start_stage("clean").unwrap_err() {
            CoreError::StageNotReady { pending, .. } => assert_eq!(pending, vec!["ingest"]),
            other => panic!("expected StageNotReady, got {:?}", other),
        }

        run.start_stage("ingest").unwrap();
        // started is not enough
        assert!(run.ready_stages().unwrap().is_empty());
        run.complete_stage("ingest", SpanStatus::Ok).unwrap();
        assert_eq!(run.ready_stages().unwrap(), vec!["clean", "profile"]);
    }

    #[test]
    fn test_cycle_opens_no_trace() {
        let tracker = Arc::new(SpanTracker::new());
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("a").after(["b"]))
            .stage(StageDefinition::new("b").after(["a"]));
        let err = PipelineRun::start(Arc::clone(&tracker), definition, GuidanceSet::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
        assert_eq!(tracker.active_runs(), 0);
    }

    #[test]
    fn test_predecessor_baggage_reaches_dependent() {
        let (tracker, run) = start(diamond());
        let gate = IntegrityGate::new(Arc::clone(&tracker));

        let ingest = run.start_stage("ingest").unwrap();
        gate.register_checksum(ingest, "source_checksum", "abc123").unwrap();
        run.complete_stage("ingest", SpanStatus::Ok).unwrap();

        let clean = run.start_stage("clean").unwrap();
        assert!(gate.verify(clean, "source_checksum", "abc123").is_ok());
    }

    #[test]
    fn test_optional_failure_blocks_dependents_but_not_run() {
        let (_tracker, run) = start(diamond());
        for stage in ["ingest", "clean"] {
            run.start_stage(stage).unwrap();
            run.complete_stage(stage, SpanStatus::Ok).unwrap();
        }
        run.start_stage("profile").unwrap();
        run.complete_stage("profile", SpanStatus::Error).unwrap();

        assert_eq!(run.blocked_stages().unwrap(), vec!["report"]);
        assert!(run.is_settled().unwrap());
        assert!(!run.is_failed().unwrap());

        let snapshot = run.finish().unwrap();
        assert!(snapshot.success());
        assert!(snapshot.root.span.has_failed_child);
    }

    #[test]
    fn test_required_failure_fails_run() {
        let (_tracker, run) = start(diamond());
        run.start_stage("ingest").unwrap();
        run.complete_stage("ingest", SpanStatus::Error).unwrap();
        assert!(run.is_failed().unwrap());

        let snapshot = run.finish().unwrap();
        assert!(!snapshot.success());
        assert_eq!(snapshot.root.span.status, SpanStatus::Error);
    }

    #[test]
    fn test_finish_closes_running_stages() {
        let (_tracker, run) = start(diamond());
        run.start_stage("ingest").unwrap();
        let snapshot = run.finish().unwrap();
        let ingest = snapshot.find("ingest").unwrap();
        assert_eq!(ingest.span.status, SpanStatus::Error);
    }

    #[test]
    fn test_double_start_and_unknown_stage() {
        let (_tracker, run) = start(diamond());
        run.start_stage("ingest").unwrap();
        assert_eq!(run.start_stage("ingest").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(run.start_stage("ghost").unwrap_err().kind(), ErrorKind::UnknownStage);
        assert_eq!(
            run.complete_stage("clean", SpanStatus::Ok).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_weighted_progress_and_attributes() {
        let definition = PipelineDefinition::new("p")
            .stage(StageDefinition::new("a"))
            .stage(StageDefinition::new("b").weighted(3.0));
        let (tracker, run) = start(definition);

        run.start_stage("a").unwrap();
        let b = run.start_stage("b").unwrap();
        run.complete_stage("a", SpanStatus::Ok).unwrap();
        tracker.report_progress(b, 0.5).unwrap();

        assert!((run.progress().unwrap() - 0.625).abs() < 1e-9);
        let span = tracker.get(b).unwrap();
        assert!(span.is_required());
        assert_eq!(span.weight(), 3.0);
        assert_eq!(span.attributes[ATTR_STAGE_GROUP].as_i64(), Some(0));
    }

    #[test]
    fn test_unreleased_stages_count_toward_progress() {
        let definition = PipelineDefinition::new("chain")
            .stage(StageDefinition::new("a"))
            .stage(StageDefinition::new("b").after(["a"]))
            .stage(StageDefinition::new("c").after(["b"]))
            .stage(StageDefinition::new("d").after(["c"]));
        let metrics = Arc::new(CoreMetrics::new().unwrap());
        let tracker = Arc::new(SpanTracker::new());
        let run = PipelineRun::start(tracker, definition, GuidanceSet::default())
            .unwrap()
            .with_metrics(Arc::clone(&metrics));
        assert_eq!(run.progress().unwrap(), 0.0);

        run.start_stage("a").unwrap();
        run.complete_stage("a", SpanStatus::Ok).unwrap();

        assert!((run.progress().unwrap() - 0.25).abs() < 1e-9);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("contextcore_run_progress{run=\"chain\"} 0.25"));
    }

    #[test]
    fn test_blocked_stage_keeps_run_below_complete() {
        let (_tracker, run) = start(diamond());
        for stage in ["ingest", "clean"] {
            run.start_stage(stage).unwrap();
            run.complete_stage(stage, SpanStatus::Ok).unwrap();
        }
        run.start_stage("profile").unwrap();
        run.complete_stage("profile", SpanStatus::Error).unwrap();

        assert_eq!(run.blocked_stages().unwrap(), vec!["report"]);
        let progress = run.progress().unwrap();
        assert!((progress - 0.5).abs() < 1e-9, "got {}", progress);
    }
}
