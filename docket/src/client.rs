use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::driver::{drivers, Driver, DriverRegistry};
use crate::error::Result;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::maintenance::{MaintenanceHandler, MAINTENANCE_QUEUE};
use crate::queue::Queue;
use crate::runtime::supervisor::WorkerHandle;
use crate::runtime::worker::WorkerConfig;

/// Connection to a backend plus the queues opened through it.
///
/// Cheap to clone. The client initialises lazily: the first call that needs
/// the backend connects the driver and, unless disabled, starts the
/// maintenance worker.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    name: String,
    config: ClientConfig,
    driver: Arc<dyn Driver>,
    lifecycle: Lifecycle,
    queues: Mutex<HashMap<String, Queue>>,
    maintenance_queue: Queue,
    maintenance_worker: Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("driver", &self.inner.driver.kind())
            .field("state", &self.inner.lifecycle.state())
            .field("queues", &self.queue_names())
            .finish()
    }
}

impl Client {
    /// Create a client using the process-wide driver registry.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_drivers(config, &drivers())
    }

    /// Create a client resolving its driver from `registry`.
    pub fn with_drivers(config: ClientConfig, registry: &DriverRegistry) -> Result<Self> {
        config.validate()?;
        let driver = registry.create(&config.driver)?;
        Ok(Self::with_driver(config, driver))
    }

    /// Create a client around an already built driver.
    pub fn with_driver(config: ClientConfig, driver: Arc<dyn Driver>) -> Self {
        let inner = Arc::new_cyclic(|weak| {
            let maintenance_queue = Queue::new(MAINTENANCE_QUEUE, weak.clone(), &config, true);
            ClientInner {
                name: config.name.clone(),
                lifecycle: Lifecycle::new(format!("client \"{}\"", config.name)),
                config,
                driver,
                queues: Mutex::new(HashMap::new()),
                maintenance_queue,
                maintenance_worker: Mutex::new(None),
            }
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.is_ready()
    }

    pub(crate) fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.inner.driver)
    }

    pub(crate) fn downgrade(&self) -> Weak<ClientInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn maintenance_queue(&self) -> Queue {
        self.inner.maintenance_queue.clone()
    }

    /// Connect the driver and start maintenance.
    ///
    /// Idempotent; concurrent callers wait for the first one.
    pub async fn init(&self) -> Result<()> {
        let lifecycle = &self.inner.lifecycle;
        match lifecycle.state() {
            LifecycleState::Ready => return Ok(()),
            LifecycleState::Destroyed => return lifecycle.ensure_alive(),
            _ => {}
        }

        if !lifecycle.begin_init() {
            return lifecycle.wait_ready().await;
        }

        if let Err(err) = self.inner.driver.connect().await {
            tracing::warn!(client = %self.inner.name, error = %err, "driver connect failed");
            lifecycle.reset();
            return Err(err.into());
        }
        #[cfg(feature = "metrics")]
        if let Err(err) = crate::metrics::init_metrics() {
            tracing::warn!(error = %err, "metrics registration failed");
        }

        if self.inner.config.run_maintenance {
            if let Err(err) = Box::pin(self.start_maintenance()).await {
                tracing::warn!(client = %self.inner.name, error = %err, "maintenance worker failed to start");
                lifecycle.reset();
                return Err(err);
            }
        }

        lifecycle.mark_ready();
        tracing::info!(
            client = %self.inner.name,
            driver = %self.inner.driver.kind(),
            "client ready"
        );
        Ok(())
    }

    /// Wait until the client is ready, initialising it if needed.
    pub async fn ready(&self) -> Result<()> {
        self.init().await
    }

    async fn start_maintenance(&self) -> Result<()> {
        let config = WorkerConfig::new()
            .with_sleep(self.inner.config.maintenance.sleep_ms)
            .with_batch(self.inner.config.maintenance.batch);
        let handler = MaintenanceHandler::new(self.downgrade());
        let handle = self
            .inner
            .maintenance_queue
            .register_worker(handler, config)
            .await?;

        tracing::debug!(client = %self.inner.name, worker_id = handle.id(), "maintenance worker started");
        *self.inner.maintenance_worker.lock() = Some(handle);
        Ok(())
    }

    /// Open (or reuse) the queue called `name` and wait for it to be ready.
    pub async fn queue(&self, name: &str) -> Result<Queue> {
        self.inner.lifecycle.ensure_alive()?;

        let queue = if name == MAINTENANCE_QUEUE {
            self.ready().await?;
            self.maintenance_queue()
        } else {
            self.inner
                .queues
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| {
                    Queue::new(name, Arc::downgrade(&self.inner), &self.inner.config, false)
                })
                .clone()
        };

        queue.ready().await?;
        Ok(queue)
    }

    /// Queue previously opened with [`queue`](Self::queue), if still open.
    pub fn cached_queue(&self, name: &str) -> Option<Queue> {
        self.inner.queues.lock().get(name).cloned()
    }

    pub(crate) fn forget_queue(&self, name: &str, queue: &Queue) {
        let mut queues = self.inner.queues.lock();
        if queues.get(name).is_some_and(|cached| cached.same_as(queue)) {
            queues.remove(name);
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Tear down every worker, then every queue, then the driver.
    pub async fn destroy(&self) -> Result<()> {
        if !self.inner.lifecycle.mark_destroyed() {
            return Ok(());
        }
        tracing::info!(client = %self.inner.name, "destroying client");

        let maintenance_worker = self.inner.maintenance_worker.lock().take();
        if let Some(worker) = maintenance_worker {
            if let Err(err) = worker.unregister().await {
                tracing::warn!(client = %self.inner.name, error = %err, "maintenance worker ended with error");
            }
        }

        let queues: Vec<Queue> = self
            .inner
            .queues
            .lock()
            .drain()
            .map(|(_, queue)| queue)
            .collect();
        for queue in &queues {
            queue.stop_workers().await;
        }
        self.inner.maintenance_queue.stop_workers().await;

        for queue in &queues {
            queue.destroy().await?;
        }
        self.inner.maintenance_queue.destroy().await?;

        self.inner.driver.destroy().await?;
        tracing::info!(client = %self.inner.name, "client destroyed");
        Ok(())
    }
}
