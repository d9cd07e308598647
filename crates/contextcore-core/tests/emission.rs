//! Integration tests for record emission and export
//!
//! Covers confidence validation, dual-namespace translation per mode and
//! the collector sink's failure classification against a mock server.

use contextcore_core::prelude::*;
use contextcore_core::translate::physical_keys;
use contextcore_core::{ExportItem, HttpSink, TelemetrySink};
use contextcore_span::{SpanEvent, SpanId, TraceId};
use proptest::prelude::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

proptest! {
    #[test]
    fn prop_confidence_accepted_iff_unit_interval(v in prop_oneof![
        -10.0f64..10.0,
        Just(0.0),
        Just(1.0),
        Just(f64::NAN),
        Just(f64::INFINITY),
    ]) {
        let accepted = Insight::new(InsightType::Analysis, "summary", v).is_ok();
        prop_assert_eq!(accepted, (0.0..=1.0).contains(&v));
    }
}

fn handoff_attrs() -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("handoff.capability_id".into(), "investigate_error".into());
    attrs.insert("insight.summary".into(), "kept as is".into());
    attrs
}

#[test]
fn test_capability_id_per_mode() {
    let logical = handoff_attrs();

    let dual = DualNamespaceTranslator::new(EmitMode::Dual).translate(RecordKind::Handoff, &logical);
    assert_eq!(dual["handoff.capability_id"].as_str(), Some("investigate_error"));
    assert_eq!(dual["gen_ai.tool.name"].as_str(), Some("investigate_error"));

    let otel = DualNamespaceTranslator::new(EmitMode::Otel).translate(RecordKind::Handoff, &logical);
    assert!(!otel.contains_key("handoff.capability_id"));
    assert_eq!(otel["gen_ai.tool.name"].as_str(), Some("investigate_error"));

    let legacy =
        DualNamespaceTranslator::new(EmitMode::Legacy).translate(RecordKind::Handoff, &logical);
    assert_eq!(legacy["handoff.capability_id"].as_str(), Some("investigate_error"));
    assert!(!legacy.contains_key("gen_ai.tool.name"));

    for attrs in [&dual, &otel, &legacy] {
        assert_eq!(attrs["insight.summary"].as_str(), Some("kept as is"));
    }
}

#[test]
fn test_translation_is_stateless() {
    let translator = DualNamespaceTranslator::new(EmitMode::Legacy);
    let logical = handoff_attrs();
    let first = translator.translate(RecordKind::Handoff, &logical);
    let overridden = translator.translate_with_mode(RecordKind::Handoff, &logical, EmitMode::Otel);
    let again = translator.translate(RecordKind::Handoff, &logical);

    assert_eq!(first, again);
    assert_ne!(first, overridden);
    assert_eq!(translator.mode(), EmitMode::Legacy);
}

#[test]
fn test_insight_fields_have_one_key_in_every_mode() {
    for mode in [EmitMode::Legacy, EmitMode::Otel, EmitMode::Dual] {
        assert_eq!(
            physical_keys(RecordKind::Insight, "insight.confidence", mode),
            vec!["insight.confidence"]
        );
    }
}

#[test]
fn test_emitted_record_carries_envelope_in_both_namespaces() {
    let tracker = std::sync::Arc::new(SpanTracker::new());
    let emitter = RecordEmitter::new(tracker.clone(), DualNamespaceTranslator::new(EmitMode::Dual));
    let root = tracker.start_run("session").unwrap();
    let agent = Agent::new("claude-code", "sess-3", AgentType::CodeAssistant);
    let envelope = EmissionEnvelope::for_agent(&agent, "checkout");

    let guidance = Guidance::new(GuidanceType::Constraint, "No schema changes").unwrap();
    emitter.emit(root, &envelope, &guidance).unwrap();

    let event = &tracker.get(root).unwrap().events[0];
    assert_eq!(event.name, "guidance.emitted");
    assert_eq!(event.attributes["agent.session_id"].as_str(), Some("sess-3"));
    assert_eq!(event.attributes["gen_ai.conversation.id"].as_str(), Some("sess-3"));
    assert_eq!(event.attributes["project.id"].as_str(), Some("checkout"));
}

fn event_item() -> ExportItem {
    let span = SpanRef::new(TraceId::generate(), SpanId::generate());
    ExportItem::event(span, SpanEvent::new("insight.emitted", Attributes::new()))
}

async fn sink_with_status(status: u16) -> (MockServer, HttpSink) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/contextcore/events"))
        .and(header("X-Service-Name", "contextcore-test"))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(&server)
        .await;
    let sink = HttpSink::new(server.uri(), "contextcore-test", 2000).unwrap();
    (server, sink)
}

#[tokio::test]
async fn test_http_sink_accepts_success() {
    let (_server, sink) = sink_with_status(200).await;
    assert!(sink.export(&event_item()).await.is_ok());
}

#[tokio::test]
async fn test_http_sink_server_errors_are_retryable() {
    for status in [429, 500, 503] {
        let (_server, sink) = sink_with_status(status).await;
        let err = sink.export(&event_item()).await.unwrap_err();
        assert!(err.is_retryable(), "{} should be retryable", status);
    }
}

#[tokio::test]
async fn test_http_sink_client_errors_are_permanent() {
    let (_server, sink) = sink_with_status(400).await;
    let err = sink.export(&event_item()).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn test_http_sink_unreachable_is_retryable() {
    let sink = HttpSink::new("http://127.0.0.1:9", "contextcore-test", 200).unwrap();
    let err = sink.export(&event_item()).await.unwrap_err();
    assert!(err.is_retryable());
}
