//! Backend drivers and the registry that creates them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::config::{DriverConfig, MEMORY_DRIVER};
use crate::error::{DocketError, Result};
use crate::store::{DocumentStore, MemoryStore};

/// Trait for storage backends.
///
/// A driver owns the connection to a backend and hands out one
/// [`DocumentStore`] per queue name. Opening the same name twice must bind
/// to the same data.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registered kind of this driver.
    fn kind(&self) -> &str;

    /// Establish the backend connection.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Open the store backing `queue`.
    async fn open_store(&self, queue: &str) -> anyhow::Result<Arc<dyn DocumentStore>>;

    /// Release every resource held by the driver.
    async fn destroy(&self) -> anyhow::Result<()>;
}

/// Constructor registered for a driver kind.
pub type DriverFactory =
    Arc<dyn Fn(&DriverConfig) -> anyhow::Result<Arc<dyn Driver>> + Send + Sync>;

/// Driver keeping every queue in process memory.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
    destroyed: AtomicBool,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory() -> DriverFactory {
        Arc::new(|_config: &DriverConfig| Ok(Arc::new(MemoryDriver::new()) as Arc<dyn Driver>))
    }

    /// Names of the queues opened so far.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.stores.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> &str {
        MEMORY_DRIVER
    }

    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn open_store(&self, queue: &str) -> anyhow::Result<Arc<dyn DocumentStore>> {
        if self.destroyed.load(Ordering::SeqCst) {
            anyhow::bail!("memory driver destroyed, cannot open queue \"{queue}\"");
        }
        let mut stores = self.stores.lock();
        let store = stores
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(queue)));
        Ok(Arc::clone(store) as Arc<dyn DocumentStore>)
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        for store in self.stores.lock().values() {
            store.close();
        }
        Ok(())
    }
}

/// Registry mapping driver kinds to their factories.
pub struct DriverRegistry {
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Registry with the `memory` driver.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry
            .factories
            .write()
            .insert(MEMORY_DRIVER.to_string(), MemoryDriver::factory());
        registry
    }

    /// Registry without any driver.
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, kind: impl Into<String>, factory: DriverFactory) -> Result<()> {
        let kind = kind.into();
        let mut factories = self.factories.write();
        if factories.contains_key(&kind) {
            return Err(DocketError::DuplicateDriver(kind));
        }
        tracing::debug!(kind = %kind, "driver registered");
        factories.insert(kind, factory);
        Ok(())
    }

    pub fn unregister(&self, kind: &str) -> bool {
        self.factories.write().remove(kind).is_some()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.read().contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build a driver for `config.kind`.
    pub fn create(&self, config: &DriverConfig) -> Result<Arc<dyn Driver>> {
        let factory = self
            .factories
            .read()
            .get(&config.kind)
            .cloned()
            .ok_or_else(|| DocketError::DriverNotFound(config.kind.clone()))?;
        Ok(factory(config)?)
    }
}

static DRIVERS: LazyLock<Arc<DriverRegistry>> = LazyLock::new(|| Arc::new(DriverRegistry::new()));

/// Process-wide driver registry.
pub fn drivers() -> Arc<DriverRegistry> {
    Arc::clone(&DRIVERS)
}

/// Register a driver kind in the process-wide registry.
pub fn register_driver(kind: impl Into<String>, factory: DriverFactory) -> Result<()> {
    DRIVERS.register(kind, factory)
}
