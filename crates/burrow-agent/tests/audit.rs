mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use burrow_agent::audit::AuditBatcher;
use burrow_core::audit::{AccessDecision, AuditReason, RequestContext};
use burrow_core::config::AuditSection;

use common::{FakeGateway, RecordingSink};

fn decision(org_id: Option<&str>) -> AccessDecision {
    let mut decision = AccessDecision::new(AuditReason::ValidPassword);
    decision.org_id = org_id.map(str::to_string);
    decision.resource_id = Some(7);
    decision
}

fn request() -> RequestContext {
    RequestContext {
        path: "/dashboard".to_string(),
        original_request_url: "https://app.example.com/dashboard".to_string(),
        scheme: "https".to_string(),
        host: "app.example.com".to_string(),
        method: "GET".to_string(),
        tls: true,
        request_ip: Some("203.0.113.9:51000".to_string()),
    }
}

#[tokio::test]
async fn test_batch_of_25_is_sent_and_cleared() {
    let sink = Arc::new(RecordingSink::default());
    let gateway = Arc::new(FakeGateway::with_retention(30));
    let (batcher, _task) = AuditBatcher::spawn(sink.clone(), gateway, &AuditSection::default());

    for _ in 0..25 {
        batcher.record(&decision(Some("org-1")), &request()).await;
    }

    assert_eq!(batcher.len().await, 0);
    assert_eq!(sink.batch_sizes(), vec![25]);

    let batches = sink.batches.lock().unwrap();
    let event = &batches[0][0];
    assert_eq!(event.org_id.as_deref(), Some("org-1"));
    assert_eq!(event.ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(event.reason, AuditReason::ValidPassword);
}

#[tokio::test]
async fn test_partial_queue_waits_for_flush() {
    let sink = Arc::new(RecordingSink::default());
    let gateway = Arc::new(FakeGateway::with_retention(30));
    let (batcher, _task) = AuditBatcher::spawn(sink.clone(), gateway, &AuditSection::default());

    for _ in 0..24 {
        batcher.record(&decision(Some("org-1")), &request()).await;
    }
    assert_eq!(batcher.len().await, 24);
    assert!(sink.batch_sizes().is_empty());

    batcher.flush().await;
    assert!(batcher.is_empty().await);
    assert_eq!(sink.batch_sizes(), vec![24]);
}

#[tokio::test]
async fn test_failed_send_still_clears_queue() {
    let sink = Arc::new(RecordingSink::failing());
    let gateway = Arc::new(FakeGateway::with_retention(30));
    let (batcher, _task) = AuditBatcher::spawn(sink.clone(), gateway, &AuditSection::default());

    for _ in 0..25 {
        batcher.record(&decision(Some("org-1")), &request()).await;
    }
    assert_eq!(batcher.len().await, 0);

    // the next event starts a fresh queue
    batcher.record(&decision(Some("org-1")), &request()).await;
    assert_eq!(batcher.len().await, 1);
    assert_eq!(sink.batch_sizes(), vec![25]);
}

#[tokio::test]
async fn test_zero_retention_is_not_logged() {
    let sink = Arc::new(RecordingSink::default());
    let gateway = Arc::new(FakeGateway::with_retention(0));
    let (batcher, _task) = AuditBatcher::spawn(sink.clone(), gateway.clone(), &AuditSection::default());

    batcher.record(&decision(Some("org-1")), &request()).await;

    assert_eq!(batcher.len().await, 0);
    assert_eq!(gateway.retention_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_decision_without_org_skips_retention_lookup() {
    let sink = Arc::new(RecordingSink::default());
    let gateway = Arc::new(FakeGateway::with_retention(0));
    let (batcher, _task) = AuditBatcher::spawn(sink.clone(), gateway.clone(), &AuditSection::default());

    batcher.record(&decision(None), &request()).await;

    assert_eq!(batcher.len().await, 1);
    assert_eq!(gateway.retention_lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_records_are_batched_exactly() {
    let sink = Arc::new(RecordingSink::default());
    let gateway = Arc::new(FakeGateway::with_retention(30));
    let (batcher, _task) = AuditBatcher::spawn(sink.clone(), gateway, &AuditSection::default());

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let batcher = batcher.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                batcher.record(&decision(Some("org-1")), &request()).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(batcher.len().await, 0);
    assert_eq!(sink.batch_sizes(), vec![25, 25, 25, 25]);
}
