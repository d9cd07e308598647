//! Integration tests for scheduling and pipeline runs
//!
//! Covers concurrency groups on random DAGs, cycle reporting, checksum
//! propagation across stages and the exported trace of a complete run.

use contextcore_core::prelude::*;
use contextcore_core::{fingerprint, InMemorySink, QueuedExporter, RetryPolicy};
use proptest::prelude::*;
use std::sync::Arc;

/// Stage `i` may depend on any stage with a lower index, so the graph is acyclic.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| prop::collection::vec(0..i.max(1), 0..=i.min(3)))
            .collect::<Vec<_>>()
    })
}

fn definition_from(deps: &[Vec<usize>]) -> PipelineDefinition {
    deps.iter()
        .enumerate()
        .fold(PipelineDefinition::new("random"), |def, (i, preds)| {
            let mut preds: Vec<String> = preds
                .iter()
                .filter(|p| **p < i)
                .map(|p| format!("s{}", p))
                .collect();
            preds.sort();
            preds.dedup();
            def.stage(StageDefinition::new(format!("s{}", i)).after(preds))
        })
}

proptest! {
    #[test]
    fn prop_groups_respect_dependencies(deps in dag_strategy()) {
        let definition = definition_from(&deps);
        let plan = DependencyScheduler::plan(&definition).unwrap();

        prop_assert_eq!(plan.stage_count(), deps.len());
        for stage in &definition.stages {
            let group = plan.group_of(&stage.name).unwrap();
            for pred in &stage.depends_on {
                prop_assert!(plan.group_of(pred).unwrap() < group);
            }
            // a stage only waits as long as its deepest predecessor requires
            if group > 0 {
                prop_assert!(stage
                    .depends_on
                    .iter()
                    .any(|p| plan.group_of(p).unwrap() == group - 1));
            }
        }
    }

    #[test]
    fn prop_back_edge_is_reported_as_cycle(deps in dag_strategy(), pick in any::<prop::sample::Index>()) {
        let mut definition = definition_from(&deps);
        // close a loop: the first stage now depends on some stage that can reach it
        let last = pick.index(definition.stages.len());
        definition.stages[0].depends_on.push(format!("s{}", last));
        let chain_exists = last == 0 || reaches(&definition, &format!("s{}", last), "s0");

        let outcome = DependencyScheduler::plan(&definition);
        if chain_exists {
            match outcome {
                Err(CoreError::CycleDetected { members }) => prop_assert!(!members.is_empty()),
                other => prop_assert!(false, "expected cycle, got {:?}", other),
            }
        } else {
            prop_assert!(outcome.is_ok());
        }
    }
}

/// Whether `from` transitively depends on `to`.
fn reaches(definition: &PipelineDefinition, from: &str, to: &str) -> bool {
    let mut stack = vec![from.to_string()];
    let mut seen = std::collections::HashSet::new();
    while let Some(name) = stack.pop() {
        if name == to {
            return true;
        }
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(stage) = definition.get(&name) {
            stack.extend(stage.depends_on.iter().cloned());
        }
    }
    false
}

#[test]
fn test_cycle_names_members() {
    let definition = PipelineDefinition::new("p")
        .stage(StageDefinition::new("A").after(["B"]))
        .stage(StageDefinition::new("B").after(["C"]))
        .stage(StageDefinition::new("C").after(["A"]));
    let err = DependencyScheduler::plan(&definition).unwrap_err();
    let CoreError::CycleDetected { mut members } = err else {
        panic!("expected a cycle");
    };
    members.sort();
    assert_eq!(members, vec!["A", "B", "C"]);
}

#[test]
fn test_checksum_flows_through_pipeline() {
    let tracker = Arc::new(SpanTracker::new());
    let gate = IntegrityGate::new(Arc::clone(&tracker));
    let definition = PipelineDefinition::new("etl")
        .stage(StageDefinition::new("extract"))
        .stage(StageDefinition::new("transform").after(["extract"]))
        .stage(StageDefinition::new("load").after(["transform"]));
    let run = PipelineRun::start(Arc::clone(&tracker), definition, GuidanceSet::default()).unwrap();

    let rows = b"id,total\n1,9.99\n";
    let extract = run.start_stage("extract").unwrap();
    let checksum = gate.register_fingerprint(extract, "source_checksum", rows).unwrap();
    assert_eq!(checksum, fingerprint(rows));
    run.complete_stage("extract", SpanStatus::Ok).unwrap();

    let transform = run.start_stage("transform").unwrap();
    gate.verify_content(transform, "source_checksum", rows).unwrap();
    run.complete_stage("transform", SpanStatus::Ok).unwrap();

    // two hops downstream the checksum is still visible
    let load = run.start_stage("load").unwrap();
    assert_eq!(
        gate.verify(load, "source_checksum", "sha256:00").unwrap_err().kind(),
        ErrorKind::IntegrityMismatch
    );
    assert_eq!(
        gate.verify(load, "schema_checksum", &checksum).unwrap_err().kind(),
        ErrorKind::MissingChecksum
    );

    // the consumer fails; the producer's span is untouched
    run.complete_stage("load", SpanStatus::Error).unwrap();
    let snapshot = run.finish().unwrap();
    assert_eq!(snapshot.find("extract").unwrap().span.status, SpanStatus::Ok);
    assert!(!snapshot.success());
}

#[test]
fn test_guidance_is_attached_to_stages() {
    let tracker = Arc::new(SpanTracker::new());
    let guidance = GuidanceSet::load(vec![
        Guidance::new(GuidanceType::Constraint, "Do not touch prod tables")
            .unwrap()
            .with_id("g-load")
            .scoped_to("load"),
        Guidance::new(GuidanceType::Focus, "Prefer small batches")
            .unwrap()
            .with_id("g-all"),
    ])
    .unwrap();
    let definition = PipelineDefinition::new("etl")
        .stage(StageDefinition::new("extract"))
        .stage(StageDefinition::new("load").after(["extract"]));
    let run = PipelineRun::start(Arc::clone(&tracker), definition, guidance).unwrap();

    let ids: Vec<_> = run.guidance_for("load").iter().map(|g| g.id.clone()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"g-load".to_string()));
    assert_eq!(run.guidance_for("extract").len(), 1);

    let extract = run.start_stage("extract").unwrap();
    let span = tracker.get(extract).unwrap();
    assert_eq!(span.attributes["guidance.applied"].as_str(), Some("g-all"));
}

#[tokio::test]
async fn test_full_run_exports_every_span() {
    let sink = Arc::new(InMemorySink::new());
    let exporter = Arc::new(QueuedExporter::spawn(
        sink.clone(),
        RetryPolicy::default(),
        256,
        None,
    ));
    let tracker = Arc::new(SpanTracker::with_hook(exporter.clone()));
    let emitter = RecordEmitter::new(Arc::clone(&tracker), DualNamespaceTranslator::default());
    let agent = Agent::new("analyst", "sess-9", AgentType::Specialist);
    let envelope = EmissionEnvelope::for_agent(&agent, "checkout");

    let definition = PipelineDefinition::new("review")
        .stage(StageDefinition::new("lint"))
        .stage(StageDefinition::new("test"))
        .stage(StageDefinition::new("summarize").after(["lint", "test"]));
    let run = PipelineRun::start(Arc::clone(&tracker), definition, GuidanceSet::default()).unwrap();

    while !run.is_settled().unwrap() {
        for stage in run.ready_stages().unwrap() {
            let span = run.start_stage(&stage).unwrap();
            emitter
                .emit_gate(span, &GateResult::pass(format!("{}-gate", stage)))
                .unwrap();
            if stage == "summarize" {
                let insight = Insight::new(InsightType::Analysis, "All checks green", 0.8).unwrap();
                emitter.emit(span, &envelope, &insight).unwrap();
            }
            run.complete_stage(&stage, SpanStatus::Ok).unwrap();
        }
    }
    let snapshot = run.finish().unwrap();
    assert!(snapshot.success());
    assert_eq!(snapshot.progress(), 1.0);
    assert_eq!(snapshot.span_count(), 4);

    exporter.shutdown().await;
    assert_eq!(sink.spans().len(), 4);
    let events: Vec<_> = sink.events().into_iter().map(|e| e.name).collect();
    assert_eq!(events.iter().filter(|n| *n == "gate.validation").count(), 3);
    assert!(events.contains(&"insight.emitted".to_string()));
}
