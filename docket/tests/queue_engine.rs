//! Queue engine integration tests: dedup, due order, leases, resolutions
//! and dead-lettering against the memory driver.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use docket::{
    DocketError, DocumentStatus, NewDocument, PickRequest, QueueSettingsPatch, Schedule,
};
use docket_testkit::{seed_documents, test_queue};
use serde_json::json;

#[tokio::test]
async fn push_skips_existing_subjects() {
    let (_client, queue) = test_queue("dedup").await;

    let outcome = queue.push(["d1", "d2", "d2"]).await.unwrap();
    assert_eq!(outcome.created, 2);
    assert_eq!(outcome.skipped, 1);

    let again = queue
        .push([NewDocument::new("d1").with_payload(json!({ "overwrite": true }))])
        .await
        .unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.skipped, 1);

    let d1 = queue.get("d1").await.unwrap().unwrap();
    assert_eq!(d1.payload, json!({}));
    assert_eq!(queue.stats().await.unwrap().total, 2);
}

#[tokio::test]
async fn pick_returns_oldest_due_first() {
    let (_client, queue) = test_queue("due-order").await;
    queue.push(seed_documents()).await.unwrap();

    let first = queue.pick(PickRequest::default()).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].subject, "d2");

    let second = queue.pick(PickRequest::default()).await.unwrap();
    assert_eq!(second[0].subject, "d1");

    // d3 is a thousand years out and stays planned.
    assert!(queue.pick(PickRequest::new(10)).await.unwrap().is_empty());
    let d3 = queue.get("d3").await.unwrap().unwrap();
    assert_eq!(d3.status, DocumentStatus::Planned);
}

#[tokio::test]
async fn pick_sets_lease_and_attempts() {
    let (_client, queue) = test_queue("lease").await;
    queue.push(seed_documents()).await.unwrap();

    let before = Utc::now();
    let picked = queue
        .pick(PickRequest::new(1).with_lock(Duration::seconds(1)))
        .await
        .unwrap();
    let doc = &picked[0];
    assert_eq!(doc.subject, "d2");
    assert_eq!(doc.status, DocumentStatus::Active);
    assert_eq!(doc.attempts, 1);

    let expected = before + Duration::seconds(1);
    let drift = (doc.next_iteration - expected).num_milliseconds().abs();
    assert!(drift < 1_000, "lease expiry drifted by {drift}ms");

    let next = queue.pick(PickRequest::new(1)).await.unwrap();
    assert_eq!(next[0].subject, "d1");
}

#[tokio::test]
async fn claimed_documents_are_not_picked_again() {
    let (_client, queue) = test_queue("no-double").await;
    queue
        .push((0..5).map(|i| format!("doc-{i}")))
        .await
        .unwrap();

    assert_eq!(queue.pick(PickRequest::new(10)).await.unwrap().len(), 5);
    assert!(queue.pick(PickRequest::new(10)).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_picks_never_share_a_document() {
    let (_client, queue) = test_queue("concurrent").await;
    queue
        .push((0..60).map(|i| format!("doc-{i}")))
        .await
        .unwrap();

    let picks = futures::future::join_all((0..12).map(|_| {
        let queue = queue.clone();
        tokio::spawn(async move { queue.pick(PickRequest::new(7)).await.unwrap() })
    }))
    .await;

    let mut seen = HashSet::new();
    for batch in picks {
        for doc in batch.unwrap() {
            assert!(seen.insert(doc.subject.clone()), "{} picked twice", doc.subject);
        }
    }
    assert_eq!(seen.len(), 60);
}

#[tokio::test]
async fn terminal_documents_are_never_picked() {
    let (_client, queue) = test_queue("terminal").await;
    queue.push(["a", "b", "c"]).await.unwrap();
    queue.pick(PickRequest::new(3)).await.unwrap();

    let a = queue
        .apply("a", docket::Action::complete().with_payload(json!({ "done": true })))
        .await
        .unwrap();
    assert_eq!(a.status, DocumentStatus::Completed);
    assert_eq!(a.payload, json!({ "done": true }));
    assert_eq!(a.iterations, 1);
    assert!(a.last_iteration.is_some());

    assert_eq!(queue.kill("b").await.unwrap().status, DocumentStatus::Killed);

    queue.mnt_make_pending().await.unwrap();
    queue.mnt_reschedule_orphans().await.unwrap();
    queue.mnt_kill_orphans().await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.killed, 1);
    assert_eq!(stats.active, 1);
    assert!(queue.pick(PickRequest::new(10)).await.unwrap().is_empty());
}

#[tokio::test]
async fn reject_with_zero_tolerance_kills() {
    let (_client, queue) = test_queue("tolerance-zero").await;
    queue
        .apply_settings(QueueSettingsPatch::default().tolerance(0))
        .await
        .unwrap();
    queue.push(["d1"]).await.unwrap();
    queue.pick(PickRequest::default()).await.unwrap();

    let doc = queue.reject("d1", "boom", None).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Killed);
    assert_eq!(doc.attempts, 1);
}

#[tokio::test]
async fn reject_below_tolerance_retries() {
    let (_client, queue) = test_queue("reject-retry").await;
    queue.push(["d1", "d2"]).await.unwrap();
    let picked = queue.pick(PickRequest::new(2)).await.unwrap();
    let lease_expiry = picked[0].next_iteration;

    // Without a due time the document waits for its lease to run out.
    let d1 = queue.reject("d1", "flaky", None).await.unwrap();
    assert_eq!(d1.status, DocumentStatus::Planned);
    assert_eq!(d1.next_iteration, lease_expiry);
    assert_eq!(d1.attempts, 1);

    let d2 = queue.reject("d2", "flaky", Some(Schedule::Now)).await.unwrap();
    assert_eq!(d2.status, DocumentStatus::Pending);

    let again = queue.pick(PickRequest::default()).await.unwrap();
    assert_eq!(again[0].subject, "d2");
    assert_eq!(again[0].attempts, 2);

    let rescheduled = queue.reschedule("d2", Duration::hours(1)).await.unwrap();
    assert_eq!(rescheduled.status, DocumentStatus::Planned);
    assert_eq!(rescheduled.attempts, 0);
    assert_eq!(queue.stats().await.unwrap().errored, 2);
}

#[tokio::test]
async fn repeated_rejects_exhaust_tolerance() {
    let (_client, queue) = test_queue("reject-chain").await;
    queue
        .apply_settings(QueueSettingsPatch::default().tolerance(3))
        .await
        .unwrap();
    queue.push(["d1"]).await.unwrap();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let picked = queue.pick(PickRequest::default()).await.unwrap();
        assert_eq!(picked.len(), 1);
        let doc = queue.reject("d1", "still failing", Some(Schedule::Now)).await.unwrap();
        statuses.push(doc.status);
    }

    assert_eq!(
        statuses,
        vec![DocumentStatus::Pending, DocumentStatus::Pending, DocumentStatus::Killed]
    );
}

#[tokio::test]
async fn pushed_schedule_expressions_are_resolved() {
    let (_client, queue) = test_queue("schedules").await;
    queue
        .push([
            NewDocument::new("in-a-year").with_next_iteration(Schedule::parse("1y").unwrap()),
            NewDocument::new("past").with_next_iteration(Schedule::parse("2018-05-29").unwrap()),
        ])
        .await
        .unwrap();

    let later = queue.get("in-a-year").await.unwrap().unwrap();
    assert_eq!(later.status, DocumentStatus::Planned);
    assert!(later.next_iteration > Utc::now() + Duration::days(364));

    let past = queue.get("past").await.unwrap().unwrap();
    assert_eq!(past.status, DocumentStatus::Pending);
}

#[tokio::test]
async fn resolving_unknown_subjects_fails() {
    let (_client, queue) = test_queue("unknown").await;
    for result in [
        queue.complete("ghost").await,
        queue.kill("ghost").await,
        queue.reschedule("ghost", Schedule::Now).await,
    ] {
        assert!(matches!(result, Err(DocketError::DocumentNotFound { .. })));
    }
    assert!(matches!(
        queue.drop_document("ghost").await,
        Err(DocketError::DocumentNotFound { .. })
    ));
}
