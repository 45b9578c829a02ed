use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::{DocumentStore, InsertOutcome, ResolveContext, StatusCounts};
use crate::document::{Document, DocumentStatus, Resolution};
use crate::maintenance::MaintenanceOp;

/// Document store kept in process memory.
///
/// Pending documents are additionally indexed by `(next_iteration, seq)` so
/// that a claim walks them in due order, ties broken by insertion order.
pub struct MemoryStore {
    name: String,
    state: Mutex<MemoryState>,
    closed: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, StoredDocument>,
    pending: BTreeSet<(DateTime<Utc>, u64, String)>,
    next_seq: u64,
}

struct StoredDocument {
    seq: u64,
    document: Document,
}

impl MemoryState {
    fn unindex(&mut self, subject: &str) {
        if let Some(stored) = self.documents.get(subject) {
            if stored.document.status == DocumentStatus::Pending {
                self.pending.remove(&(
                    stored.document.next_iteration,
                    stored.seq,
                    subject.to_string(),
                ));
            }
        }
    }

    fn index(&mut self, subject: &str) {
        if let Some(stored) = self.documents.get(subject) {
            if stored.document.status == DocumentStatus::Pending {
                self.pending.insert((
                    stored.document.next_iteration,
                    stored.seq,
                    subject.to_string(),
                ));
            }
        }
    }

    /// Mutate a document while keeping the pending index in sync.
    fn update<R>(&mut self, subject: &str, f: impl FnOnce(&mut Document) -> R) -> Option<R> {
        if !self.documents.contains_key(subject) {
            return None;
        }
        self.unindex(subject);
        let result = self
            .documents
            .get_mut(subject)
            .map(|stored| f(&mut stored.document));
        self.index(subject);
        result
    }
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.state.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject every further call.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.is_closed() {
            bail!("memory store \"{}\" is closed", self.name);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("documents", &state.documents.len())
            .field("pending", &state.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, documents: Vec<Document>) -> anyhow::Result<InsertOutcome> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let mut outcome = InsertOutcome::default();

        for document in documents {
            if state.documents.contains_key(&document.subject) {
                outcome.skipped += 1;
                continue;
            }
            outcome.created += 1;
            if document.status == DocumentStatus::Pending {
                outcome.pending += 1;
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let subject = document.subject.clone();
            state
                .documents
                .insert(subject.clone(), StoredDocument { seq, document });
            state.index(&subject);
        }

        Ok(outcome)
    }

    async fn get(&self, subject: &str) -> anyhow::Result<Option<Document>> {
        self.ensure_open()?;
        let state = self.state.lock();
        Ok(state
            .documents
            .get(subject)
            .map(|stored| stored.document.clone()))
    }

    async fn claim(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lock: Duration,
    ) -> anyhow::Result<Vec<Document>> {
        self.ensure_open()?;
        let mut state = self.state.lock();

        let due: Vec<_> = state
            .pending
            .iter()
            .take_while(|(next_iteration, _, _)| *next_iteration <= now)
            .take(limit)
            .cloned()
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        for key in due {
            state.pending.remove(&key);
            let (_, _, subject) = key;
            if let Some(stored) = state.documents.get_mut(&subject) {
                stored.document.claim(now, lock);
                claimed.push(stored.document.clone());
            }
        }

        Ok(claimed)
    }

    async fn resolve(
        &self,
        subject: &str,
        resolution: &Resolution,
        ctx: ResolveContext,
    ) -> anyhow::Result<Option<Document>> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        Ok(state.update(subject, |document| {
            document.apply(resolution, ctx.now, ctx.tolerance);
            document.clone()
        }))
    }

    async fn remove(&self, subject: &str) -> anyhow::Result<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.unindex(subject);
        Ok(state.documents.remove(subject).is_some())
    }

    async fn sweep(
        &self,
        op: MaintenanceOp,
        now: DateTime<Utc>,
        tolerance: u32,
    ) -> anyhow::Result<u64> {
        self.ensure_open()?;
        let mut state = self.state.lock();

        let matching: Vec<String> = state
            .documents
            .values()
            .filter(|stored| op.matches(&stored.document, now, tolerance))
            .map(|stored| stored.document.subject.clone())
            .collect();

        let target = op.target_status();
        for subject in &matching {
            state.update(subject, |document| document.status = target);
        }

        Ok(matching.len() as u64)
    }

    async fn counts(&self) -> anyhow::Result<StatusCounts> {
        self.ensure_open()?;
        let state = self.state.lock();
        let mut counts = StatusCounts::default();
        for stored in state.documents.values() {
            counts.add(stored.document.status);
        }
        Ok(counts)
    }
}
