//! Time-based reconciliation of queue documents.
//!
//! Three idempotent operations move documents that no caller will touch
//! again on their own: planned documents that became due, and active
//! documents whose lease ran out. Each client drives them through ordinary
//! task documents on its reserved maintenance queue, one task per
//! (queue, operation), handled by a dedicated worker that reschedules every
//! task by the target queue's configured delay.

use std::fmt;
use std::str::FromStr;
use std::sync::Weak;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientInner};
use crate::config::QueueSettings;
use crate::document::{Document, DocumentStatus, NewDocument};
use crate::error::{DocketError, Result};
use crate::lease::{process_expired_lease, OrphanOutcome};
use crate::queue::Queue;
use crate::runtime::handler::{Action, Handler};
use crate::schedule::Schedule;

/// Name of the per-client queue holding maintenance tasks.
pub const MAINTENANCE_QUEUE: &str = "__docket_maintenance";

/// A maintenance transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOp {
    /// Planned documents whose due time passed become pending.
    MakePending,
    /// Expired leases below tolerance become pending.
    RescheduleOrphans,
    /// Expired leases at or above tolerance are killed.
    KillOrphans,
}

impl MaintenanceOp {
    pub const ALL: [MaintenanceOp; 3] = [
        MaintenanceOp::MakePending,
        MaintenanceOp::RescheduleOrphans,
        MaintenanceOp::KillOrphans,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceOp::MakePending => "make_pending",
            MaintenanceOp::RescheduleOrphans => "reschedule_orphans",
            MaintenanceOp::KillOrphans => "kill_orphans",
        }
    }

    /// Whether the operation applies to `document` at `now`.
    pub fn matches(&self, document: &Document, now: DateTime<Utc>, tolerance: u32) -> bool {
        match self {
            MaintenanceOp::MakePending => {
                document.status == DocumentStatus::Planned && document.is_due(now)
            }
            MaintenanceOp::RescheduleOrphans => {
                document.lease_expired(now)
                    && process_expired_lease(document.attempts, tolerance) == OrphanOutcome::Reclaim
            }
            MaintenanceOp::KillOrphans => {
                document.lease_expired(now)
                    && process_expired_lease(document.attempts, tolerance)
                        == OrphanOutcome::DeadLetter
            }
        }
    }

    /// Status matching documents move to.
    pub fn target_status(&self) -> DocumentStatus {
        match self {
            MaintenanceOp::MakePending | MaintenanceOp::RescheduleOrphans => DocumentStatus::Pending,
            MaintenanceOp::KillOrphans => DocumentStatus::Killed,
        }
    }

    /// Whether affected documents become pickable.
    pub fn wakes_workers(&self) -> bool {
        self.target_status() == DocumentStatus::Pending
    }
}

impl fmt::Display for MaintenanceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceOp {
    type Err = DocketError;

    fn from_str(s: &str) -> Result<Self> {
        MaintenanceOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DocketError::InvalidConfig(format!("unknown maintenance operation {s}")))
    }
}

/// Result of one maintenance run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceOutcome {
    /// Documents that changed status.
    pub affected: u64,
}

/// Payload of a maintenance task document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub queue: String,
    pub operation: MaintenanceOp,
    pub delay_ms: u64,
}

impl MaintenanceTask {
    pub fn new(queue: impl Into<String>, operation: MaintenanceOp, settings: &QueueSettings) -> Self {
        Self {
            queue: queue.into(),
            operation,
            delay_ms: settings.delay_for(operation).num_milliseconds().max(0) as u64,
        }
    }

    /// Subject of the task document, `<operation>:<queue>`.
    pub fn subject(&self) -> String {
        task_subject(self.operation, &self.queue)
    }

    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.delay_ms.min(i64::MAX as u64) as i64)
    }

    fn to_document(&self) -> Result<NewDocument> {
        let payload = serde_json::to_value(self).map_err(anyhow::Error::from)?;
        Ok(NewDocument::new(self.subject()).with_payload(payload))
    }
}

pub fn task_subject(operation: MaintenanceOp, queue: &str) -> String {
    format!("{}:{}", operation.as_str(), queue)
}

/// Ensure `queue` has one live task per operation on the maintenance queue.
pub(crate) async fn register_tasks(
    maintenance: &Queue,
    queue: &str,
    settings: &QueueSettings,
) -> Result<()> {
    let tasks: Vec<MaintenanceTask> = MaintenanceOp::ALL
        .into_iter()
        .map(|op| MaintenanceTask::new(queue, op, settings))
        .collect();
    let documents = tasks
        .iter()
        .map(MaintenanceTask::to_document)
        .collect::<Result<Vec<_>>>()?;

    let outcome = maintenance.push(documents).await?;
    tracing::debug!(
        queue,
        created = outcome.created,
        skipped = outcome.skipped,
        "maintenance tasks registered"
    );

    if outcome.skipped > 0 {
        // Tasks killed by hand or by a malformed payload come back.
        for task in &tasks {
            let subject = task.subject();
            if let Some(document) = maintenance.get(&subject).await? {
                if document.status.is_terminal() {
                    maintenance.reschedule(&subject, Schedule::Now).await?;
                }
            }
        }
    }

    Ok(())
}

/// Handler run by the client's maintenance worker.
pub(crate) struct MaintenanceHandler {
    client: Weak<ClientInner>,
}

impl MaintenanceHandler {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Handler for MaintenanceHandler {
    async fn handle(&self, document: Document) -> Action {
        let task: MaintenanceTask = match serde_json::from_value(document.payload) {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!(subject = %document.subject, error = %err, "malformed maintenance task");
                return Action::kill();
            }
        };

        let Some(client) = self.client.upgrade().map(Client::from_inner) else {
            return Action::kill();
        };
        let Some(queue) = client.cached_queue(&task.queue) else {
            // Idle until the queue is opened again.
            tracing::trace!(queue = %task.queue, operation = %task.operation, "queue closed, maintenance skipped");
            return Action::reschedule(task.delay());
        };

        let settings = queue.settings();
        match queue.run_maintenance(task.operation).await {
            Ok(outcome) if outcome.affected > 0 => {
                tracing::debug!(
                    queue = %task.queue,
                    operation = %task.operation,
                    affected = outcome.affected,
                    "maintenance applied"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    queue = %task.queue,
                    operation = %task.operation,
                    error = %err,
                    "maintenance failed"
                );
            }
        }

        let next = MaintenanceTask::new(task.queue, task.operation, &settings);
        let action = Action::reschedule(settings.delay_for(task.operation));
        match serde_json::to_value(&next) {
            Ok(payload) => action.with_payload(payload),
            Err(_) => action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::lease::PickRequest;
    use chrono::Duration;

    fn active(attempts: u32, lease_expiry: DateTime<Utc>) -> Document {
        let now = Utc::now();
        let mut doc = Document::from_new(NewDocument::new("d1"), now);
        doc.status = DocumentStatus::Active;
        doc.attempts = attempts;
        doc.next_iteration = lease_expiry;
        doc
    }

    #[test]
    fn test_orphan_classification() {
        let now = Utc::now();
        let expired = now - Duration::seconds(1);

        let doc = active(1, expired);
        assert!(MaintenanceOp::RescheduleOrphans.matches(&doc, now, 5));
        assert!(!MaintenanceOp::KillOrphans.matches(&doc, now, 5));

        let doc = active(5, expired);
        assert!(!MaintenanceOp::RescheduleOrphans.matches(&doc, now, 5));
        assert!(MaintenanceOp::KillOrphans.matches(&doc, now, 5));

        let doc = active(5, now + Duration::minutes(1));
        assert!(!MaintenanceOp::KillOrphans.matches(&doc, now, 5));
    }

    #[test]
    fn test_make_pending_only_due_planned() {
        let now = Utc::now();
        let mut doc = Document::from_new(
            NewDocument::new("d1").with_next_iteration(Duration::seconds(10)),
            now,
        );
        assert!(!MaintenanceOp::MakePending.matches(&doc, now, 5));
        assert!(MaintenanceOp::MakePending.matches(&doc, now + Duration::seconds(10), 5));

        doc.status = DocumentStatus::Completed;
        assert!(!MaintenanceOp::MakePending.matches(&doc, now + Duration::seconds(10), 5));
    }

    #[test]
    fn test_task_subject_and_payload() {
        let task = MaintenanceTask::new("q1", MaintenanceOp::KillOrphans, &QueueSettings::default());
        assert_eq!(task.subject(), "kill_orphans:q1");
        assert_eq!(task.delay_ms, 3_000);

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["operation"], "kill_orphans");
        let back: MaintenanceTask = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[tokio::test]
    async fn test_task_of_reopened_queue_survives_stale_run() {
        let client = Client::new(ClientConfig::new("stale-run").with_maintenance(false)).unwrap();
        let queue = client.queue("q1").await.unwrap();
        let settings = queue.settings();
        let maintenance = client.maintenance_queue();
        register_tasks(&maintenance, "q1", &settings).await.unwrap();

        queue.destroy().await.unwrap();
        let subject = task_subject(MaintenanceOp::MakePending, "q1");
        let claimed = maintenance.pick(PickRequest::new(3)).await.unwrap();
        let task = claimed
            .into_iter()
            .find(|doc| doc.subject == subject)
            .unwrap();

        let action = MaintenanceHandler::new(client.downgrade()).handle(task).await;
        assert_eq!(action.name(), "reschedule");

        client.queue("q1").await.unwrap();
        register_tasks(&maintenance, "q1", &settings).await.unwrap();
        let document = maintenance.apply(&subject, action).await.unwrap();
        assert_eq!(document.status, DocumentStatus::Planned);

        client.destroy().await.unwrap();
    }

    #[test]
    fn test_op_from_str() {
        assert_eq!(
            "reschedule_orphans".parse::<MaintenanceOp>().unwrap(),
            MaintenanceOp::RescheduleOrphans
        );
        assert!("vacuum".parse::<MaintenanceOp>().is_err());
    }
}
