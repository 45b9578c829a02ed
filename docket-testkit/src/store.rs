use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use docket::{
    Document, DocumentStore, Driver, InsertOutcome, MaintenanceOp, MemoryDriver, Resolution,
    ResolveContext, StatusCounts,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Store operations a [`FailureControl`] can break.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreOp {
    Connect,
    Open,
    Insert,
    Get,
    Claim,
    Resolve,
    Remove,
    Sweep,
    Counts,
}

/// Shared switchboard of injected failures and per-operation call counts.
#[derive(Clone, Default)]
pub struct FailureControl {
    failing: Arc<Mutex<HashSet<StoreOp>>>,
    calls: Arc<Mutex<HashMap<StoreOp, usize>>>,
}

impl FailureControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `op` call fail until [`heal`](Self::heal).
    pub fn fail(&self, op: StoreOp) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        self.failing.lock().remove(&op);
    }

    pub fn heal_all(&self) {
        self.failing.lock().clear();
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    fn check(&self, op: StoreOp) -> anyhow::Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        if self.failing.lock().contains(&op) {
            anyhow::bail!("injected {op:?} failure");
        }
        Ok(())
    }
}

/// Store wrapper failing the operations switched on in its control.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    control: FailureControl,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>, control: FailureControl) -> Self {
        Self { inner, control }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn insert(&self, documents: Vec<Document>) -> anyhow::Result<InsertOutcome> {
        self.control.check(StoreOp::Insert)?;
        self.inner.insert(documents).await
    }

    async fn get(&self, subject: &str) -> anyhow::Result<Option<Document>> {
        self.control.check(StoreOp::Get)?;
        self.inner.get(subject).await
    }

    async fn claim(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lock: Duration,
    ) -> anyhow::Result<Vec<Document>> {
        self.control.check(StoreOp::Claim)?;
        self.inner.claim(now, limit, lock).await
    }

    async fn resolve(
        &self,
        subject: &str,
        resolution: &Resolution,
        ctx: ResolveContext,
    ) -> anyhow::Result<Option<Document>> {
        self.control.check(StoreOp::Resolve)?;
        self.inner.resolve(subject, resolution, ctx).await
    }

    async fn remove(&self, subject: &str) -> anyhow::Result<bool> {
        self.control.check(StoreOp::Remove)?;
        self.inner.remove(subject).await
    }

    async fn sweep(
        &self,
        op: MaintenanceOp,
        now: DateTime<Utc>,
        tolerance: u32,
    ) -> anyhow::Result<u64> {
        self.control.check(StoreOp::Sweep)?;
        self.inner.sweep(op, now, tolerance).await
    }

    async fn counts(&self) -> anyhow::Result<StatusCounts> {
        self.control.check(StoreOp::Counts)?;
        self.inner.counts().await
    }
}

/// Memory driver whose stores are wrapped in [`FlakyStore`].
pub struct FlakyDriver {
    inner: MemoryDriver,
    control: FailureControl,
}

impl FlakyDriver {
    pub fn new(control: FailureControl) -> Self {
        Self {
            inner: MemoryDriver::new(),
            control,
        }
    }
}

#[async_trait]
impl Driver for FlakyDriver {
    fn kind(&self) -> &str {
        "flaky"
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.control.check(StoreOp::Connect)?;
        self.inner.connect().await
    }

    async fn open_store(&self, queue: &str) -> anyhow::Result<Arc<dyn DocumentStore>> {
        self.control.check(StoreOp::Open)?;
        let store = self.inner.open_store(queue).await?;
        Ok(Arc::new(FlakyStore::new(store, self.control.clone())))
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.inner.destroy().await
    }
}
