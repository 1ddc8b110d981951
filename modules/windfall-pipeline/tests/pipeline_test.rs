use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use windfall_common::{CaptureRecord, Opportunity};
use windfall_pipeline::dedup::content_id;
use windfall_pipeline::dispatch::DispatchScheduler;
use windfall_pipeline::oracle::complete_with_backoff;
use windfall_pipeline::testing::{MemoryTransport, MockCaptureAgent, StubOracle};
use windfall_pipeline::transport::{StreamTransport, TOPIC_ENRICHED, TOPIC_RAW_CAPTURE};
use windfall_pipeline::worker::{ExtractionWorker, WorkerConfig};

const HTML_CAP: usize = 200_000;

fn listing_html() -> String {
    let body = "The Greenfield Foundation annual scholarship awards five hundred \
                dollars to undergraduate students pursuing environmental science. \
                Applications close in the spring and winners are notified by mail. "
        .repeat(20);
    format!("<html><head><title>Grants</title></head><body><main><article><p>{body}</p></article></main></body></html>")
}

fn capture(url: &str) -> CaptureRecord {
    CaptureRecord::new(url, "Grants", &listing_html(), "grants", HTML_CAP, Utc::now())
}

fn oracle_response(url: &str) -> String {
    format!(
        r#"```json
[{{
  "title": "Greenfield Scholarship",
  "organization": "Greenfield Foundation",
  "amount_value": 500,
  "amount_display": "$500",
  "deadline": "2026-04-01",
  "description": "Annual award for environmental science undergraduates.",
  "url": "{url}",
  "type": "scholarship",
  "eligibility": "Undergraduate students."
}}]
```"#
    )
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        batch_size: 1,
        batch_window: Duration::from_millis(200),
        poll_timeout: Duration::from_millis(10),
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn dispatch_publishes_captures_and_absorbs_failures() {
    let agent = Arc::new(
        MockCaptureAgent::new()
            .on_page("https://a.example/grants", &listing_html(), "Grants")
            .failing("https://dead.example/list"),
    );
    let transport = Arc::new(MemoryTransport::new());

    let dispatcher = DispatchScheduler::new(agent.clone(), transport.clone(), HTML_CAP, (0, 0));
    let urls = vec![
        "https://dead.example/list".to_string(),
        "https://a.example/grants".to_string(),
    ];
    let report = dispatcher.run(&urls, "grants").await.unwrap();

    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 1);
    assert!(agent.session_closed());

    let published = transport.published(TOPIC_RAW_CAPTURE);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key.as_deref(), Some("https://a.example/grants"));
    let record: CaptureRecord = serde_json::from_value(published[0].value.clone()).unwrap();
    assert_eq!(record.url, "https://a.example/grants");
    assert_eq!(record.source_domain, "a.example");
    assert_eq!(record.intent, "grants");
}

#[tokio::test]
async fn dispatch_caps_oversized_html() {
    let big = "a".repeat(10_000);
    let agent = Arc::new(MockCaptureAgent::new().on_page("https://a.example/big", &big, "Big"));
    let transport = Arc::new(MemoryTransport::new());

    let dispatcher = DispatchScheduler::new(agent, transport.clone(), 1000, (0, 0));
    let urls = vec!["https://a.example/big".to_string()];
    dispatcher.run(&urls, "grants").await.unwrap();

    let published = transport.published(TOPIC_RAW_CAPTURE);
    let record: CaptureRecord = serde_json::from_value(published[0].value.clone()).unwrap();
    assert_eq!(record.html.len(), 1000);
}

#[tokio::test]
async fn worker_extracts_and_publishes_enriched_opportunity() {
    let url = "https://a.example/grants";
    let transport = Arc::new(MemoryTransport::new().with_subscription(&[TOPIC_RAW_CAPTURE]));
    let oracle = Arc::new(StubOracle::new().respond(&oracle_response(url)));
    let mut worker = ExtractionWorker::new(
        transport.clone(),
        oracle.clone(),
        Duration::from_secs(3600),
        worker_config(),
    );

    transport
        .publish(
            TOPIC_RAW_CAPTURE,
            url,
            &serde_json::to_value(capture(url)).unwrap(),
        )
        .await
        .unwrap();

    let emitted = worker.tick().await;
    assert_eq!(emitted, 1);

    let enriched = transport.published(TOPIC_ENRICHED);
    assert_eq!(enriched.len(), 1);

    let opportunity: Opportunity =
        serde_json::from_value(enriched[0].value["opportunity"].clone()).unwrap();
    assert_eq!(opportunity.title, "Greenfield Scholarship");
    assert_eq!(opportunity.amount_value, 500);
    assert_eq!(opportunity.content_id, content_id(&opportunity));
    assert_eq!(enriched[0].key.as_deref(), Some(opportunity.content_id.as_str()));
    assert_eq!(enriched[0].value["ai_model"], "stub-model");
    assert_eq!(enriched[0].value["origin_url"], url);
}

#[tokio::test]
async fn duplicate_capture_within_window_is_suppressed() {
    let url = "https://a.example/grants";
    let transport = Arc::new(MemoryTransport::new().with_subscription(&[TOPIC_RAW_CAPTURE]));
    let oracle = Arc::new(
        StubOracle::new()
            .respond(&oracle_response(url))
            .respond(&oracle_response(url)),
    );
    let mut worker = ExtractionWorker::new(
        transport.clone(),
        oracle,
        Duration::from_secs(3600),
        worker_config(),
    );

    for _ in 0..2 {
        transport
            .publish(
                TOPIC_RAW_CAPTURE,
                url,
                &serde_json::to_value(capture(url)).unwrap(),
            )
            .await
            .unwrap();
    }

    assert_eq!(worker.tick().await, 1);
    assert_eq!(worker.tick().await, 0);
    assert_eq!(transport.published(TOPIC_ENRICHED).len(), 1);
    assert_eq!(worker.dedup_stats().dropped, 1);
}

#[tokio::test]
async fn malformed_capture_is_dropped_without_poisoning_batch() {
    let url = "https://a.example/grants";
    let transport = Arc::new(MemoryTransport::new().with_subscription(&[TOPIC_RAW_CAPTURE]));
    let oracle = Arc::new(StubOracle::new().respond(&oracle_response(url)));
    let mut worker = ExtractionWorker::new(
        transport.clone(),
        oracle,
        Duration::from_secs(3600),
        worker_config(),
    );

    transport
        .publish(
            TOPIC_RAW_CAPTURE,
            "junk",
            &serde_json::json!({"not": "a capture record"}),
        )
        .await
        .unwrap();
    transport
        .publish(
            TOPIC_RAW_CAPTURE,
            url,
            &serde_json::to_value(capture(url)).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(worker.tick().await, 1);
    assert_eq!(transport.published(TOPIC_ENRICHED).len(), 1);
}

#[tokio::test]
async fn oracle_failure_drops_batch_without_emitting() {
    let url = "https://a.example/grants";
    let transport = Arc::new(MemoryTransport::new().with_subscription(&[TOPIC_RAW_CAPTURE]));
    let oracle = Arc::new(StubOracle::new().fail("invalid api key"));
    let mut worker = ExtractionWorker::new(
        transport.clone(),
        oracle.clone(),
        Duration::from_secs(3600),
        worker_config(),
    );

    transport
        .publish(
            TOPIC_RAW_CAPTURE,
            url,
            &serde_json::to_value(capture(url)).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(worker.tick().await, 0);
    assert_eq!(oracle.call_count(), 1);
    assert!(transport.published(TOPIC_ENRICHED).is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_batch_flushes_at_window_deadline() {
    let url = "https://a.example/grants";
    let batch_window = Duration::from_millis(200);
    let poll_timeout = Duration::from_millis(80);
    let transport = Arc::new(MemoryTransport::new().with_subscription(&[TOPIC_RAW_CAPTURE]));
    let oracle = Arc::new(StubOracle::new().respond(&oracle_response(url)));
    let mut worker = ExtractionWorker::new(
        transport.clone(),
        oracle,
        Duration::from_secs(3600),
        WorkerConfig {
            batch_size: 2,
            batch_window,
            poll_timeout,
            ..WorkerConfig::default()
        },
    );

    transport
        .publish(
            TOPIC_RAW_CAPTURE,
            url,
            &serde_json::to_value(capture(url)).unwrap(),
        )
        .await
        .unwrap();

    // One record waiting, batch size two: the window is the flush ceiling,
    // with at most one poll bound of slack past it.
    let start = tokio::time::Instant::now();
    let emitted = worker.tick().await;
    assert_eq!(emitted, 1);
    assert!(start.elapsed() <= batch_window + poll_timeout);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_retries_back_off_exponentially() {
    let oracle = StubOracle::new().rate_limited().rate_limited().rate_limited();

    let result = complete_with_backoff(&oracle, "prompt", 3, Duration::from_secs(10)).await;
    assert!(result.is_none());
    assert_eq!(oracle.call_count(), 3);

    let times = oracle.call_times();
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert_eq!(first_gap, Duration::from_secs(10));
    assert_eq!(second_gap, Duration::from_secs(20));
}
