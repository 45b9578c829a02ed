use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::client::{Client, ClientInner};
use crate::config::{ClientConfig, QueueSettings, QueueSettingsPatch, SettingsCell};
use crate::document::{Document, NewDocument};
use crate::error::{DocketError, Result};
use crate::events::{QueueEvent, QueueEventPayload, QueueEvents};
use crate::lease::PickRequest;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::maintenance::{self, MaintenanceOp, MaintenanceOutcome};
use crate::runtime::handler::{Action, Handler};
use crate::runtime::supervisor::{self, WorkerControl, WorkerHandle};
use crate::runtime::worker::WorkerConfig;
use crate::schedule::Schedule;
use crate::store::{DocumentStore, ResolveContext};
use crate::telemetry;

/// Result of a push call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub created: u64,
    pub skipped: u64,
}

/// Snapshot of a queue's documents and lifetime counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Documents currently stored.
    pub total: u64,
    pub planned: u64,
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub killed: u64,
    /// Documents handed out by picks.
    pub picked: u64,
    /// Documents removed with `drop_document`.
    pub dropped: u64,
    /// Rejections recorded.
    pub errored: u64,
}

#[derive(Debug, Default)]
struct QueueCounters {
    picked: AtomicU64,
    dropped: AtomicU64,
    errored: AtomicU64,
}

/// Handle to a named queue of documents.
///
/// Cheap to clone; clones share the same store binding, settings, counters
/// and workers. Every operation waits for the owning client and the queue's
/// store to be ready.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    name: String,
    client_name: String,
    internal: bool,
    client: Weak<ClientInner>,
    lifecycle: Lifecycle,
    store: OnceLock<Arc<dyn DocumentStore>>,
    settings: SettingsCell,
    counters: QueueCounters,
    events: QueueEvents,
    workers: Mutex<Vec<WorkerControl>>,
    next_worker_id: AtomicU64,
    shutdown_timeout: std::time::Duration,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.name)
            .field("client", &self.inner.client_name)
            .field("state", &self.inner.lifecycle.state())
            .field("workers", &self.worker_count())
            .finish()
    }
}

impl Queue {
    pub(crate) fn new(
        name: impl Into<String>,
        client: Weak<ClientInner>,
        config: &ClientConfig,
        internal: bool,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(QueueInner {
                lifecycle: Lifecycle::new(format!("queue \"{name}\"")),
                name,
                client_name: config.name.clone(),
                internal,
                client,
                store: OnceLock::new(),
                settings: SettingsCell::new(config.queue_defaults.clone()),
                counters: QueueCounters::default(),
                events: QueueEvents::default(),
                workers: Mutex::new(Vec::new()),
                next_worker_id: AtomicU64::new(1),
                shutdown_timeout: config.shutdown_timeout(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client_name(&self) -> &str {
        &self.inner.client_name
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Whether this is the client's reserved maintenance queue.
    pub fn is_internal(&self) -> bool {
        self.inner.internal
    }

    fn client(&self) -> Result<Client> {
        self.inner
            .client
            .upgrade()
            .map(Client::from_inner)
            .ok_or_else(|| DocketError::destroyed(format!("client \"{}\"", self.inner.client_name)))
    }

    /// Wait until the client is ready and the queue's store is open.
    pub async fn ready(&self) -> Result<()> {
        match self.inner.lifecycle.state() {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Destroyed => return self.inner.lifecycle.ensure_alive(),
            _ => {}
        }

        let client = self.client()?;
        // The maintenance queue is opened while its client is initialising.
        if !self.inner.internal {
            Box::pin(client.ready()).await?;
        }

        if self.inner.lifecycle.begin_init() {
            match self.initialise(&client).await {
                Ok(()) => {
                    self.inner.lifecycle.mark_ready();
                    tracing::info!(queue = %self.inner.name, client = %self.inner.client_name, "queue ready");
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!(queue = %self.inner.name, error = %err, "queue initialisation failed");
                    self.inner.lifecycle.reset();
                    Err(err)
                }
            }
        } else {
            self.inner.lifecycle.wait_ready().await
        }
    }

    async fn initialise(&self, client: &Client) -> Result<()> {
        if self.inner.store.get().is_none() {
            let store = client.driver().open_store(&self.inner.name).await?;
            let _ = self.inner.store.set(store);
        }

        if !self.inner.internal && client.config().run_maintenance {
            let settings = self.settings();
            Box::pin(maintenance::register_tasks(
                &client.maintenance_queue(),
                &self.inner.name,
                &settings,
            ))
            .await?;
        }

        Ok(())
    }

    async fn ready_store(&self) -> Result<Arc<dyn DocumentStore>> {
        self.ready().await?;
        self.inner
            .store
            .get()
            .cloned()
            .ok_or_else(|| DocketError::destroyed(format!("queue \"{}\"", self.inner.name)))
    }

    fn publish(&self, payload: QueueEventPayload) {
        self.inner
            .events
            .publish(QueueEvent::new(self.inner.name.clone(), payload));
    }

    /// Subscribe to this queue's events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Insert documents; subjects that already exist are skipped.
    pub async fn push<D>(&self, documents: impl IntoIterator<Item = D>) -> Result<PushOutcome>
    where
        D: Into<NewDocument>,
    {
        let documents: Vec<NewDocument> = documents.into_iter().map(Into::into).collect();
        let store = self.ready_store().await?;
        let span = telemetry::push_span(&self.inner.name, documents.len());

        async move {
            let now = Utc::now();
            let documents = documents
                .into_iter()
                .map(|new| Document::from_new(new, now))
                .collect();
            let outcome = store.insert(documents).await?;

            telemetry::record_pushed(&self.inner.name, outcome.created, outcome.skipped);
            self.publish(QueueEventPayload::Pushed {
                created: outcome.created,
                skipped: outcome.skipped,
                pending: outcome.pending,
            });

            Ok(PushOutcome {
                created: outcome.created,
                skipped: outcome.skipped,
            })
        }
        .instrument(span)
        .await
    }

    /// Push a single document.
    pub async fn push_one(&self, document: impl Into<NewDocument>) -> Result<PushOutcome> {
        self.push([document.into()]).await
    }

    /// Fetch a document; a missing subject is `Ok(None)`.
    pub async fn get(&self, subject: &str) -> Result<Option<Document>> {
        let store = self.ready_store().await?;
        Ok(store.get(subject).await?)
    }

    /// Claim due pending documents under a lease.
    pub async fn pick(&self, request: PickRequest) -> Result<Vec<Document>> {
        let store = self.ready_store().await?;
        let span = telemetry::pick_span(&self.inner.name, request.limit);

        async move {
            let now = Utc::now();
            if self.inner.internal {
                // The maintenance queue has no maintenance of its own.
                let tolerance = self.inner.settings.load().value.tolerance;
                for op in [MaintenanceOp::MakePending, MaintenanceOp::RescheduleOrphans] {
                    store.sweep(op, now, tolerance).await?;
                }
            }

            let documents = store.claim(now, request.limit, request.lock()).await?;

            if !documents.is_empty() {
                self.inner
                    .counters
                    .picked
                    .fetch_add(documents.len() as u64, Ordering::Relaxed);
                telemetry::record_picked(&self.inner.name, documents.len());
                self.publish(QueueEventPayload::Picked {
                    count: documents.len(),
                });
            }

            Ok(documents)
        }
        .instrument(span)
        .await
    }

    /// Apply a handler decision to the stored document named `subject`.
    pub async fn apply(&self, subject: &str, action: Action) -> Result<Document> {
        let store = self.ready_store().await?;
        let name = action.name();
        let span = telemetry::resolve_span(&self.inner.name, subject, name);

        async move {
            let now = Utc::now();
            let ctx = ResolveContext {
                now,
                tolerance: self.inner.settings.load().value.tolerance,
            };
            let is_reject = matches!(action, Action::Reject { .. });
            if let Action::Reject { error, .. } = &action {
                tracing::debug!(queue = %self.inner.name, subject, error = %error, "document rejected");
            }

            let resolution = action.into_resolution(now);
            let document = store
                .resolve(subject, &resolution, ctx)
                .await?
                .ok_or_else(|| DocketError::DocumentNotFound {
                    queue: self.inner.name.clone(),
                    subject: subject.to_string(),
                })?;

            if is_reject {
                self.inner.counters.errored.fetch_add(1, Ordering::Relaxed);
            }
            telemetry::record_resolved(&self.inner.name, name, document.status);
            self.publish(QueueEventPayload::Resolved {
                subject: document.subject.clone(),
                action: name,
                status: document.status,
            });

            Ok(document)
        }
        .instrument(span)
        .await
    }

    /// Run the document again at `at`.
    pub async fn reschedule(&self, subject: &str, at: impl Into<Schedule>) -> Result<Document> {
        self.apply(subject, Action::reschedule(at)).await
    }

    /// Mark the document completed.
    pub async fn complete(&self, subject: &str) -> Result<Document> {
        self.apply(subject, Action::complete()).await
    }

    /// Mark the document killed.
    pub async fn kill(&self, subject: &str) -> Result<Document> {
        self.apply(subject, Action::kill()).await
    }

    /// Record a failure; the document is retried until the queue's
    /// tolerance is exhausted, then killed.
    pub async fn reject(
        &self,
        subject: &str,
        error: impl Into<String>,
        at: Option<Schedule>,
    ) -> Result<Document> {
        let action = match at {
            Some(at) => Action::reject_at(error, at),
            None => Action::reject(error),
        };
        self.apply(subject, action).await
    }

    /// Remove a document from the queue.
    pub async fn drop_document(&self, subject: &str) -> Result<()> {
        let store = self.ready_store().await?;
        if !store.remove(subject).await? {
            return Err(DocketError::DocumentNotFound {
                queue: self.inner.name.clone(),
                subject: subject.to_string(),
            });
        }

        self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(queue = %self.inner.name, subject, "document dropped");
        self.publish(QueueEventPayload::Dropped {
            subject: subject.to_string(),
        });
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let store = self.ready_store().await?;
        let counts = store.counts().await?;
        telemetry::set_queue_documents(&self.inner.name, &counts);

        Ok(QueueStats {
            total: counts.total(),
            planned: counts.planned,
            pending: counts.pending,
            active: counts.active,
            completed: counts.completed,
            killed: counts.killed,
            picked: self.inner.counters.picked.load(Ordering::Relaxed),
            dropped: self.inner.counters.dropped.load(Ordering::Relaxed),
            errored: self.inner.counters.errored.load(Ordering::Relaxed),
        })
    }

    /// Current settings.
    pub fn settings(&self) -> QueueSettings {
        self.inner.settings.load().value.clone()
    }

    pub fn settings_version(&self) -> u64 {
        self.inner.settings.load().version
    }

    /// Swap in new settings while every bound worker is parked.
    ///
    /// Returns the new settings version.
    pub async fn apply_settings(&self, patch: QueueSettingsPatch) -> Result<u64> {
        self.inner.lifecycle.ensure_alive()?;

        let workers = self.workers();
        let paused = futures::future::join_all(workers.iter().map(|worker| worker.pause())).await;

        let result = self.inner.settings.apply(&patch);

        for (worker, was_running) in workers.iter().zip(paused) {
            if was_running {
                worker.resume();
            }
        }

        let next = result?;
        tracing::info!(
            queue = %self.inner.name,
            version = next.version,
            tolerance = next.value.tolerance,
            "queue settings applied"
        );
        Ok(next.version)
    }

    /// Promote planned documents whose due time has passed.
    pub async fn mnt_make_pending(&self) -> Result<MaintenanceOutcome> {
        self.run_maintenance(MaintenanceOp::MakePending).await
    }

    /// Return expired leases below tolerance to pending.
    pub async fn mnt_reschedule_orphans(&self) -> Result<MaintenanceOutcome> {
        self.run_maintenance(MaintenanceOp::RescheduleOrphans).await
    }

    /// Kill expired leases that exhausted their tolerance.
    pub async fn mnt_kill_orphans(&self) -> Result<MaintenanceOutcome> {
        self.run_maintenance(MaintenanceOp::KillOrphans).await
    }

    pub async fn run_maintenance(&self, op: MaintenanceOp) -> Result<MaintenanceOutcome> {
        let store = self.ready_store().await?;
        let tolerance = self.inner.settings.load().value.tolerance;
        let affected = store
            .sweep(op, Utc::now(), tolerance)
            .instrument(telemetry::maintenance_span(&self.inner.name, op.as_str()))
            .await?;

        telemetry::record_maintenance(&self.inner.name, op.as_str(), affected);
        self.publish(QueueEventPayload::Maintained {
            operation: op,
            affected,
        });
        Ok(MaintenanceOutcome { affected })
    }

    /// Start a worker that feeds claimed documents to `handler`.
    pub async fn register_worker<H: Handler>(
        &self,
        handler: H,
        config: WorkerConfig,
    ) -> Result<WorkerHandle> {
        config.validate()?;
        self.ready().await?;

        let id = self.inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let events = self.subscribe();
        let handle = supervisor::spawn_worker(
            id,
            self.clone(),
            Arc::new(handler),
            config,
            events,
            self.inner.shutdown_timeout,
        );
        self.inner.workers.lock().push(handle.control());

        tracing::info!(queue = %self.inner.name, worker_id = id, "worker registered");
        Ok(handle)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    fn workers(&self) -> Vec<WorkerControl> {
        self.inner.workers.lock().clone()
    }

    pub(crate) fn remove_worker(&self, id: u64) {
        self.inner.workers.lock().retain(|worker| worker.id() != id);
    }

    /// Stop every bound worker and wait for each to finish.
    pub(crate) async fn stop_workers(&self) {
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in &workers {
            worker.stop();
        }
        let timeout = self.inner.shutdown_timeout;
        futures::future::join_all(workers.iter().map(|worker| async move {
            if tokio::time::timeout(timeout, worker.finished()).await.is_err() {
                tracing::warn!(worker_id = worker.id(), "worker did not stop before shutdown timeout");
            }
        }))
        .await;
    }

    /// Stop the queue's workers and refuse further operations.
    ///
    /// Documents stay in the store; opening the queue again through the
    /// client binds to the same data.
    pub async fn destroy(&self) -> Result<()> {
        self.stop_workers().await;
        if self.inner.lifecycle.mark_destroyed() {
            if let Ok(client) = self.client() {
                client.forget_queue(&self.inner.name, self);
            }
            tracing::info!(queue = %self.inner.name, "queue destroyed");
        }
        Ok(())
    }

    pub(crate) fn same_as(&self, other: &Queue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
