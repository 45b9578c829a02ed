//! Simple queue example: push documents, run a worker, inspect the result.
//!
//! Runs entirely on the memory driver with background maintenance enabled,
//! so a scheduled document and a rejected one both come back on their own.

use std::time::Duration;

use docket::*;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Docket Simple Queue Example ===\n");

    let client = connect(
        ClientConfig::new("example")
            .with_maintenance_config(MaintenanceConfig {
                sleep_ms: 50,
                batch: 10,
            })
            .with_queue_defaults(QueueSettings {
                tolerance: 3,
                make_pending_delay_ms: 100,
                reschedule_orphans_delay_ms: 100,
                kill_orphans_delay_ms: 100,
            }),
    )
    .await?;
    let queue = client.queue("emails").await?;

    println!("1. Pushing documents...\n");
    let outcome = queue
        .push([
            NewDocument::new("welcome:1").with_payload(json!({ "to": "ada@example.com" })),
            NewDocument::new("welcome:2").with_payload(json!({ "to": "bob@example.com" })),
            NewDocument::new("digest:1")
                .with_payload(json!({ "to": "ada@example.com" }))
                .with_next_iteration(Schedule::parse("500ms")?),
            NewDocument::new("bounce:1").with_payload(json!({ "to": "nobody@invalid" })),
            NewDocument::new("welcome:1"),
        ])
        .await?;
    println!("   created {} / skipped {}\n", outcome.created, outcome.skipped);

    println!("2. Starting a worker...\n");
    let handler = handler_fn(|doc: Document| async move {
        let to = doc.payload["to"].as_str().unwrap_or_default().to_string();
        if to.ends_with("@invalid") {
            println!("   [{}] attempt {} failed for {}", doc.subject, doc.attempts, to);
            Action::reject_at("mailbox does not exist", Schedule::Now)
        } else {
            println!("   [{}] sent to {}", doc.subject, to);
            Action::complete().with_payload(json!({ "to": to, "sent": true }))
        }
    });
    let worker = queue
        .register_worker(handler, WorkerConfig::new().with_sleep(5_000))
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("\n3. Queue statistics:\n");
    let stats = queue.stats().await?;
    println!("   completed: {}", stats.completed);
    println!("   killed:    {}", stats.killed);
    println!("   errored:   {}", stats.errored);

    if let Some(bounce) = queue.get("bounce:1").await? {
        println!("\n   bounce:1 ended as {} after {} iterations", bounce.status, bounce.iterations);
    }

    worker.unregister().await?;
    destroy_all().await?;
    println!("\n=== Done ===");
    Ok(())
}
