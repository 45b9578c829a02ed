use chrono::{DateTime, TimeZone, Utc};
use docket::{Client, ClientConfig, NewDocument, Queue};
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// Midnight UTC of the given day.
pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid fixture date")
}

/// Three documents: `d2` is due before `d1`, `d3` is a thousand years out.
pub fn seed_documents() -> Vec<NewDocument> {
    vec![
        NewDocument::new("d1")
            .with_payload(json!({ "n": 1 }))
            .with_next_iteration(date(2018, 5, 30)),
        NewDocument::new("d2")
            .with_payload(json!({ "n": 2 }))
            .with_next_iteration(date(2018, 5, 29)),
        NewDocument::new("d3")
            .with_payload(json!({ "n": 3 }))
            .with_next_iteration(date(3018, 5, 29)),
    ]
}

/// Configuration of a memory client without background maintenance.
pub fn test_config(name: &str) -> ClientConfig {
    ClientConfig::new(name)
        .with_maintenance(false)
        .with_shutdown_timeout(2_000)
}

pub fn test_client(name: &str) -> Client {
    Client::new(test_config(name)).expect("memory client")
}

/// A fresh client and one of its queues.
pub async fn test_queue(name: &str) -> (Client, Queue) {
    let client = test_client("testkit");
    let queue = client.queue(name).await.expect("queue ready");
    (client, queue)
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
