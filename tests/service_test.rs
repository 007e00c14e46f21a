mod common;

use std::sync::Arc;

use mockall::mock;
use serde_json::json;
use suspicious_input_guard::config::{DetectionConfig, RedactionScope};
use suspicious_input_guard::core::{
    load_state, SignatureMatcher, ThrottleReason, TRUNCATION_MARKER,
};
use suspicious_input_guard::service::PipelineStage;
use suspicious_input_guard::{
    EventSink, GuardError, GuardResult, InputGuardService, InspectionOutcome, RequestInput,
    SecurityEvent,
};

use common::{immediate_config, manual_store, RecordingSink};

const PAYLOAD: &str = "admin' OR '1'='1' --";

mock! {
    pub Sink {}
    impl EventSink for Sink {
        fn emit(&self, event: &SecurityEvent, message: &str) -> GuardResult<()>;
    }
}

struct PanickingSink;

impl EventSink for PanickingSink {
    fn emit(&self, _event: &SecurityEvent, _message: &str) -> GuardResult<()> {
        panic!("sink exploded");
    }
}

fn guard_with(
    dir: &tempfile::TempDir,
    sink: Arc<dyn EventSink>,
    detection: DetectionConfig,
) -> InputGuardService {
    let (store, _clock) = manual_store(immediate_config(dir.path()));
    InputGuardService::new(
        SignatureMatcher::new(detection.sample_max_len),
        store,
        sink,
        &detection,
    )
}

fn login_request(ip: &str) -> RequestInput {
    RequestInput {
        method: "POST".to_string(),
        path: "/auth/login".to_string(),
        ip: ip.to_string(),
        user_agent: Some("jest".to_string()),
        query: json!({ "x": PAYLOAD }),
        params: json!({}),
        body: json!({
            "email": "test@example.com",
            "password": PAYLOAD,
            "token": PAYLOAD,
            "sid": PAYLOAD,
        }),
    }
}

#[test_log::test(tokio::test)]
async fn test_sensitive_body_fields_never_reach_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let guard = guard_with(&dir, sink.clone(), DetectionConfig::default());

    let outcome = guard.inspect(&login_request("1.2.3.4")).await;

    let hits = match outcome {
        InspectionOutcome::Emitted { hits } => hits,
        other => panic!("expected an emitted event, got {:?}", other),
    };
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pattern, "sql_tautology");
    assert_eq!(hits[0].sample, PAYLOAD);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(sink.messages(), vec!["Suspicious input detected"]);
    let logged = serde_json::to_string(&events[0]).unwrap();
    assert!(logged.contains("security.suspicious_input"));
    assert!(!logged.contains("\"password\""));
    assert!(!logged.contains("\"token\""));
    assert!(!logged.contains("\"sid\""));
    assert_eq!(events[0].ip, "1.2.3.4");
    assert_eq!(events[0].user_agent.as_deref(), Some("jest"));
}

#[tokio::test]
async fn test_clean_request_touches_neither_store_nor_sink() -> GuardResult<()> {
    let dir = tempfile::tempdir()?;
    let mut sink = MockSink::new();
    sink.expect_emit().never();
    let guard = guard_with(&dir, Arc::new(sink), DetectionConfig::default());

    let request = RequestInput {
        method: "GET".to_string(),
        path: "/health".to_string(),
        ip: "1.2.3.4".to_string(),
        query: json!({ "q": "plain search", "page": 2 }),
        ..RequestInput::default()
    };
    assert_eq!(guard.inspect(&request).await, InspectionOutcome::Clean);
    assert!(guard.store().is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn test_events_are_throttled_per_source() -> GuardResult<()> {
    let dir = tempfile::tempdir()?;
    let mut sink = MockSink::new();
    sink.expect_emit()
        .times(6)
        .withf(|event, message| {
            event.event == "security.suspicious_input" && message == "Suspicious input detected"
        })
        .returning(|_, _| Ok(()));
    let guard = guard_with(&dir, Arc::new(sink), DetectionConfig::default());

    for _ in 0..5 {
        assert!(matches!(
            guard.inspect(&login_request("6.6.6.6")).await,
            InspectionOutcome::Emitted { .. }
        ));
    }
    assert_eq!(
        guard.inspect(&login_request("6.6.6.6")).await,
        InspectionOutcome::Suppressed {
            reason: ThrottleReason::RateLimited,
            hits: 1
        }
    );
    assert_eq!(
        guard.inspect(&login_request("6.6.6.6")).await,
        InspectionOutcome::Suppressed {
            reason: ThrottleReason::Blocked,
            hits: 1
        }
    );

    // Another source still has its own budget
    assert!(matches!(
        guard.inspect(&login_request("8.8.8.8")).await,
        InspectionOutcome::Emitted { .. }
    ));

    let stats = guard.diagnostics();
    assert_eq!(stats.inspections, 8);
    assert_eq!(stats.emitted, 6);
    assert_eq!(stats.suppressed, 2);
    assert_eq!(stats.failures, 0);
    assert_eq!(guard.store().get("6.6.6.6").await?.unwrap().total_count, 7);
    Ok(())
}

#[tokio::test]
async fn test_sink_failure_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = MockSink::new();
    sink.expect_emit()
        .times(1)
        .returning(|_, _| Err(GuardError::Sink("log pipe closed".to_string())));
    let guard = guard_with(&dir, Arc::new(sink), DetectionConfig::default());

    let outcome = guard.inspect(&login_request("1.2.3.4")).await;
    assert!(matches!(
        outcome,
        InspectionOutcome::Failed {
            stage: PipelineStage::Emit,
            ..
        }
    ));
    assert_eq!(guard.diagnostics().failures, 1);
}

#[tokio::test]
async fn test_missing_identifier_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = MockSink::new();
    sink.expect_emit().never();
    let guard = guard_with(&dir, Arc::new(sink), DetectionConfig::default());

    let outcome = guard.inspect(&login_request("")).await;
    assert!(matches!(
        outcome,
        InspectionOutcome::Failed {
            stage: PipelineStage::Throttle,
            ..
        }
    ));
}

#[tokio::test]
async fn test_panicking_sink_is_contained() {
    let dir = tempfile::tempdir().unwrap();
    let guard = guard_with(&dir, Arc::new(PanickingSink), DetectionConfig::default());

    let outcome = guard.inspect(&login_request("1.2.3.4")).await;
    assert!(matches!(
        outcome,
        InspectionOutcome::Failed {
            stage: PipelineStage::Panic,
            ..
        }
    ));

    // The guard keeps working afterwards
    let request = RequestInput {
        ip: "1.2.3.4".to_string(),
        ..RequestInput::default()
    };
    assert_eq!(guard.inspect(&request).await, InspectionOutcome::Clean);
}

#[tokio::test]
async fn test_query_is_scanned_whole_unless_scope_is_all() {
    let request = RequestInput {
        method: "GET".to_string(),
        path: "/search".to_string(),
        ip: "2.2.2.2".to_string(),
        query: json!({ "token": "1 UNION SELECT secret" }),
        params: json!({ "id": ["ok"] }),
        body: json!({ "session": { "id": "x' OR 1=1" } }),
        ..RequestInput::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let detection = DetectionConfig {
        redaction_scope: RedactionScope::All,
        ..DetectionConfig::default()
    };
    let guard = guard_with(&dir, Arc::new(RecordingSink::default()), detection);
    assert_eq!(guard.candidates(&request), vec!["ok"]);
    assert_eq!(guard.inspect(&request).await, InspectionOutcome::Clean);

    // Default: only the body is redacted
    let dir = tempfile::tempdir().unwrap();
    let guard = guard_with(&dir, Arc::new(RecordingSink::default()), DetectionConfig::default());
    assert_eq!(
        guard.candidates(&request),
        vec!["1 UNION SELECT secret", "ok"]
    );
    let outcome = guard.inspect(&request).await;
    let hits = match outcome {
        InspectionOutcome::Emitted { hits } => hits,
        other => panic!("expected an emitted event, got {:?}", other),
    };
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pattern, "sql_union_select");
}

#[tokio::test]
async fn test_extra_sensitive_keys_and_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let detection = DetectionConfig {
        sample_max_len: 20,
        extra_sensitive_keys: vec!["X-Api-Key".to_string()],
        ..DetectionConfig::default()
    };
    let sink = Arc::new(RecordingSink::default());
    let guard = guard_with(&dir, sink.clone(), detection);

    let long = format!("1; DROP TABLE users {}", "a".repeat(500));
    let request = RequestInput {
        ip: "4.4.4.4".to_string(),
        body: json!({
            "x-api-key": "k' OR 1=1",
            "comments": [{ "text": long }, { "text": "nice post" }],
        }),
        ..RequestInput::default()
    };

    guard.inspect(&request).await;
    let events = sink.events();
    assert_eq!(events.len(), 1);
    let hits = &events[0].hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pattern, "sql_stacked_statement");
    assert!(hits[0].sample.ends_with(TRUNCATION_MARKER));
    assert!(hits[0].sample.chars().count() <= 20 + TRUNCATION_MARKER.chars().count());
}

#[tokio::test]
async fn test_spawned_inspection_and_shutdown_flush() -> GuardResult<()> {
    let dir = tempfile::tempdir()?;
    let sink = Arc::new(RecordingSink::default());
    let guard = Arc::new(guard_with(&dir, sink.clone(), DetectionConfig::default()));

    let outcome = guard.spawn_inspect(login_request("1.2.3.4")).await?;
    assert!(matches!(outcome, InspectionOutcome::Emitted { .. }));

    guard.shutdown().await?;
    let persisted = load_state(guard.store().path());
    assert_eq!(persisted["1.2.3.4"].total_count, 1);
    assert_eq!(sink.events().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_identifier_is_trimmed_for_throttling_and_logging() -> GuardResult<()> {
    let dir = tempfile::tempdir()?;
    let sink = Arc::new(RecordingSink::default());
    let guard = guard_with(&dir, sink.clone(), DetectionConfig::default());

    guard.inspect(&login_request(" 1.2.3.4 ")).await;
    guard.inspect(&login_request("1.2.3.4")).await;

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.ip == "1.2.3.4"));
    assert_eq!(guard.store().len().await?, 1);
    assert_eq!(guard.store().get(" 1.2.3.4").await?.unwrap().total_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_deeply_nested_payload_is_still_detected() {
    let dir = tempfile::tempdir().unwrap();
    let guard = guard_with(&dir, Arc::new(RecordingSink::default()), DetectionConfig::default());

    let levels = 100;
    let text = format!("{}\"1 UNION SELECT x\"{}", "[".repeat(levels), "]".repeat(levels));
    let request = RequestInput {
        ip: "3.3.3.3".to_string(),
        body: json!({ "filter": serde_json::from_str::<serde_json::Value>(&text).unwrap() }),
        ..RequestInput::default()
    };
    assert!(matches!(
        guard.inspect(&request).await,
        InspectionOutcome::Emitted { .. }
    ));
}

#[test]
fn test_request_input_deserializes_with_defaults() {
    let request: RequestInput = serde_json::from_value(json!({
        "method": "GET",
        "path": "/x",
        "ip": "1.1.1.1",
        "userAgent": "curl",
        "query": { "a": "b" }
    }))
    .unwrap();
    assert_eq!(request.user_agent.as_deref(), Some("curl"));
    assert!(request.body.is_null());
    assert!(request.params.is_null());
}
