//! Worker loop integration tests: wake-ups, batching, handler actions,
//! failure propagation and pause/resume.

use std::sync::Arc;
use std::time::{Duration, Instant};

use docket::{
    handler_fn, Action, Client, DocketError, DocumentStatus, PickRequest, QueueSettingsPatch,
    Schedule, WorkerConfig, WorkerPhase,
};
use docket_testkit::{
    test_config, test_queue, wait_until, FailureControl, FlakyDriver, RecordingHandler, StoreOp,
};
use tokio::time::timeout;

async fn flaky_client(name: &str) -> (Client, FailureControl) {
    let control = FailureControl::new();
    let client = Client::with_driver(test_config(name), Arc::new(FlakyDriver::new(control.clone())));
    client.ready().await.unwrap();
    (client, control)
}

#[tokio::test]
async fn push_wakes_a_sleeping_worker() {
    let (_client, queue) = test_queue("wake").await;
    let handler = RecordingHandler::new();
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(10_000))
        .await
        .unwrap();

    // Let the worker reach its idle sleep.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    queue.push(["d1"]).await.unwrap();
    assert!(handler.wait_for(1, Duration::from_secs(2)).await);
    assert!(started.elapsed() < Duration::from_secs(2));

    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn worker_drains_queue_in_batches() {
    let (_client, queue) = test_queue("batches").await;
    queue
        .push((0..10).map(|i| format!("doc-{i}")))
        .await
        .unwrap();

    let handler = RecordingHandler::new();
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_batch(3).with_sleep(20))
        .await
        .unwrap();

    assert!(handler.wait_for(10, Duration::from_secs(5)).await);
    let done = wait_until(Duration::from_secs(2), || {
        let queue = queue.clone();
        async move { queue.stats().await.unwrap().completed == 10 }
    })
    .await;
    assert!(done);

    let mut subjects = handler.subjects();
    subjects.sort();
    subjects.dedup();
    assert_eq!(subjects.len(), 10);

    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn rejecting_handler_dead_letters_after_tolerance() {
    let (_client, queue) = test_queue("dead-letter").await;
    queue
        .apply_settings(QueueSettingsPatch::default().tolerance(2))
        .await
        .unwrap();
    queue.push(["d1"]).await.unwrap();

    let handler = RecordingHandler::with_action(Action::reject_at("nope", Schedule::Now));
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(20))
        .await
        .unwrap();

    let killed = wait_until(Duration::from_secs(5), || {
        let queue = queue.clone();
        async move {
            queue.get("d1").await.unwrap().map(|doc| doc.status) == Some(DocumentStatus::Killed)
        }
    })
    .await;
    assert!(killed);

    let attempts: Vec<u32> = handler.records().iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![1, 2]);
    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn handler_payload_replaces_stored_payload() {
    let (_client, queue) = test_queue("payload").await;
    queue.push(["counter"]).await.unwrap();

    let handler = handler_fn(|doc: docket::Document| async move {
        let n = doc.payload.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
        if n >= 2 {
            Action::complete()
        } else {
            Action::reschedule(Schedule::Now).with_payload(serde_json::json!({ "n": n + 1 }))
        }
    });
    let worker = queue
        .register_worker(handler, WorkerConfig::new().with_sleep(20))
        .await
        .unwrap();

    let done = wait_until(Duration::from_secs(5), || {
        let queue = queue.clone();
        async move {
            queue.get("counter").await.unwrap().map(|doc| doc.status)
                == Some(DocumentStatus::Completed)
        }
    })
    .await;
    assert!(done);

    let doc = queue.get("counter").await.unwrap().unwrap();
    assert_eq!(doc.payload["n"], 2);
    assert_eq!(doc.iterations, 3);
    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn resolve_failure_stops_the_worker() {
    let (client, control) = flaky_client("resolve-fails").await;
    let queue = client.queue("q1").await.unwrap();
    queue.push(["d1"]).await.unwrap();
    control.fail(StoreOp::Resolve);

    let handler = RecordingHandler::new();
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(20))
        .await
        .unwrap();

    assert!(handler.wait_for(1, Duration::from_secs(2)).await);
    assert!(wait_until(Duration::from_secs(2), || {
        let finished = worker.is_finished();
        async move { finished }
    })
    .await);

    let err = worker.unregister().await.unwrap_err();
    match err {
        DocketError::Resolve { client, queue, action, .. } => {
            assert_eq!(client, "resolve-fails");
            assert_eq!(queue, "q1");
            assert_eq!(action, "complete");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn resolve_failure_during_shutdown_is_swallowed() {
    let (client, control) = flaky_client("shutdown-swallow").await;
    let queue = client.queue("q1").await.unwrap();
    queue.push(["d1"]).await.unwrap();
    control.fail(StoreOp::Resolve);

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(200));
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(20))
        .await
        .unwrap();
    assert!(handler.wait_for(1, Duration::from_secs(2)).await);

    timeout(Duration::from_secs(5), worker.unregister())
        .await
        .expect("unregister timed out")
        .unwrap();

    // Left for maintenance to reclaim.
    control.heal_all();
    let doc = queue.get("d1").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Active);
}

#[tokio::test]
async fn pick_failures_do_not_kill_the_worker() {
    let (client, control) = flaky_client("pick-fails").await;
    let queue = client.queue("q1").await.unwrap();
    control.fail(StoreOp::Claim);

    let handler = RecordingHandler::new();
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(20))
        .await
        .unwrap();

    let control_probe = control.clone();
    assert!(wait_until(Duration::from_secs(2), move || {
        let calls = control_probe.calls(StoreOp::Claim);
        async move { calls >= 3 }
    })
    .await);
    assert!(!worker.is_finished());

    control.heal(StoreOp::Claim);
    queue.push(["d1"]).await.unwrap();
    assert!(handler.wait_for(1, Duration::from_secs(2)).await);
    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn paused_worker_waits_for_resume() {
    let (_client, queue) = test_queue("pause").await;
    let handler = RecordingHandler::new();
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(20))
        .await
        .unwrap();

    timeout(Duration::from_secs(2), worker.pause())
        .await
        .expect("pause timed out");
    assert_eq!(worker.phase(), WorkerPhase::Parked);

    queue.push(["d1"]).await.unwrap();
    assert!(!handler.wait_for(1, Duration::from_millis(100)).await);

    worker.resume();
    assert!(handler.wait_for(1, Duration::from_secs(2)).await);
    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn settings_swap_pauses_and_resumes_workers() {
    let (_client, queue) = test_queue("settings-swap").await;
    queue
        .push((0..20).map(|i| format!("doc-{i}")))
        .await
        .unwrap();

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(5));
    let workers = futures::future::join_all((0..3).map(|_| {
        queue.register_worker(handler.clone(), WorkerConfig::new().with_sleep(20))
    }))
    .await;

    let version = queue
        .apply_settings(QueueSettingsPatch::default().tolerance(9))
        .await
        .unwrap();
    assert_eq!(version, 2);
    assert_eq!(queue.settings().tolerance, 9);

    assert!(handler.wait_for(20, Duration::from_secs(5)).await);
    for worker in workers {
        let worker = worker.unwrap();
        assert_ne!(worker.phase(), WorkerPhase::Parked);
        worker.unregister().await.unwrap();
    }
    assert_eq!(queue.worker_count(), 0);
}

#[tokio::test]
async fn invalid_worker_config_is_rejected() {
    let (_client, queue) = test_queue("bad-config").await;
    let err = queue
        .register_worker(RecordingHandler::new(), WorkerConfig::new().with_batch(0))
        .await
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn pause_keeps_buffered_documents() {
    let (_client, queue) = test_queue("pause-buffer").await;
    queue.push(["a", "b", "c"]).await.unwrap();

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(50));
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_batch(3).with_sleep(20))
        .await
        .unwrap();

    assert!(handler.wait_for(1, Duration::from_secs(2)).await);
    timeout(Duration::from_secs(2), worker.pause())
        .await
        .expect("pause timed out");
    let handled_while_parked = handler.count();

    // The rest of the batch is still claimed by the parked worker.
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.active as usize, 3 - handled_while_parked);
    assert!(queue.pick(PickRequest::new(10)).await.unwrap().is_empty());

    worker.resume();
    assert!(handler.wait_for(3, Duration::from_secs(2)).await);
    worker.unregister().await.unwrap();
}

#[tokio::test]
async fn unregistered_worker_leaves_orphans() {
    let (_client, queue) = test_queue("orphaned").await;
    queue.push(["a", "b", "c"]).await.unwrap();

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(50));
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_batch(3).with_sleep(20))
        .await
        .unwrap();

    assert!(handler.wait_for(1, Duration::from_secs(2)).await);
    worker.unregister().await.unwrap();

    let handled = handler.count();
    assert!(handled < 3);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed as usize, handled);
    assert_eq!(stats.active as usize, 3 - handled);
}

#[tokio::test]
async fn handler_decision_can_change_between_documents() {
    let (_client, queue) = test_queue("switch").await;
    let handler = RecordingHandler::with_action(Action::reschedule(chrono::Duration::hours(1)));
    let worker = queue
        .register_worker(handler.clone(), WorkerConfig::new().with_sleep(50))
        .await
        .unwrap();

    queue.push(["a"]).await.unwrap();
    let rescheduled = wait_until(Duration::from_secs(2), || {
        let queue = queue.clone();
        async move {
            queue.get("a").await.unwrap().map(|doc| doc.status) == Some(DocumentStatus::Planned)
        }
    })
    .await;
    assert!(rescheduled);
    handler.assert_handled_count_eq(1);

    handler.clear();
    handler.set_action(Action::complete());
    queue.push(["b"]).await.unwrap();
    let completed = wait_until(Duration::from_secs(2), || {
        let queue = queue.clone();
        async move {
            queue.get("b").await.unwrap().map(|doc| doc.status) == Some(DocumentStatus::Completed)
        }
    })
    .await;
    assert!(completed);
    handler.assert_handled_count_eq(1);
    assert_eq!(handler.subjects(), vec!["b"]);

    worker.unregister().await.unwrap();
}
