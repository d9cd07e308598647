//! Integration tests for the span tracker
//!
//! Covers concurrent sibling closes against the shared ancestor chain,
//! export hook delivery and weighted progress properties.

use contextcore_span::{
    Attributes, ExportHook, Span, SpanEvent, SpanRef, SpanStatus, SpanTracker, ATTR_STAGE_WEIGHT,
};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Default)]
struct RecordingHook {
    closed: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
}

impl ExportHook for RecordingHook {
    fn on_span_closed(&self, span: &Span) {
        self.closed.lock().unwrap().push(span.name.clone());
    }

    fn on_event(&self, _span: SpanRef, event: &SpanEvent) {
        self.events.lock().unwrap().push(event.name.clone());
    }
}

#[test]
fn test_concurrent_sibling_closes_converge() {
    let tracker = Arc::new(SpanTracker::new());
    let root = tracker.start_run("fan-out").unwrap();

    let stages: Vec<SpanRef> = (0..32)
        .map(|i| {
            tracker
                .start_stage(root, &format!("stage-{}", i), Attributes::new())
                .unwrap()
        })
        .collect();

    let handles: Vec<_> = stages
        .into_iter()
        .enumerate()
        .map(|(i, stage)| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                tracker
                    .add_event(stage, "started", Attributes::new())
                    .unwrap();
                let status = if i % 8 == 0 {
                    SpanStatus::Error
                } else {
                    SpanStatus::Ok
                };
                tracker.close(stage, status).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // 28 of 32 leaves closed ok
    let progress = tracker.progress(root).unwrap();
    assert!((progress - 28.0 / 32.0).abs() < 1e-9);
    assert!(tracker.get(root).unwrap().has_failed_child);
    assert!(!tracker.is_run_failed(root.trace_id).unwrap());
}

#[test]
fn test_hook_sees_closed_spans_and_events() {
    let hook = Arc::new(RecordingHook::default());
    let tracker = SpanTracker::with_hook(hook.clone());

    let root = tracker.start_run("run").unwrap();
    let stage = tracker.start_stage(root, "ingest", Attributes::new()).unwrap();
    tracker.add_event(stage, "rows.loaded", Attributes::new()).unwrap();
    tracker.close(stage, SpanStatus::Ok).unwrap();
    tracker.close(root, SpanStatus::Ok).unwrap();

    assert_eq!(*hook.closed.lock().unwrap(), vec!["ingest", "run"]);
    assert_eq!(*hook.events.lock().unwrap(), vec!["rows.loaded"]);
}

#[test]
fn test_snapshot_serializes_nested_tree() {
    let tracker = SpanTracker::new();
    let root = tracker.start_run("run").unwrap();
    let stage = tracker.start_stage(root, "ingest", Attributes::new()).unwrap();
    tracker.close(stage, SpanStatus::Ok).unwrap();
    tracker.close(root, SpanStatus::Ok).unwrap();

    let snapshot = tracker.finish(root.trace_id).unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["root"]["name"], "run");
    assert_eq!(json["root"]["children"][0]["name"], "ingest");
    assert_eq!(json["root"]["children"][0]["status"], "ok");
}

proptest! {
    #[test]
    fn prop_root_progress_is_weighted_mean(
        children in prop::collection::vec((1u32..10, 0u32..=100, any::<bool>()), 1..12)
    ) {
        let tracker = SpanTracker::new();
        let root = tracker.start_run("run").unwrap();

        let mut weighted = 0.0;
        let mut total = 0.0;
        for (i, (weight, pct, close)) in children.iter().enumerate() {
            let mut attrs = Attributes::new();
            attrs.insert(ATTR_STAGE_WEIGHT.to_string(), (*weight as f64).into());
            let stage = tracker.start_stage(root, &format!("s{}", i), attrs).unwrap();

            let value = if *close {
                tracker.close(stage, SpanStatus::Ok).unwrap();
                1.0
            } else {
                let value = *pct as f64 / 100.0;
                tracker.report_progress(stage, value).unwrap();
                value
            };
            weighted += *weight as f64 * value;
            total += *weight as f64;
        }

        let progress = tracker.progress(root).unwrap();
        prop_assert!((progress - weighted / total).abs() < 1e-9);
        prop_assert!((0.0..=1.0).contains(&progress));
    }
}
