//! Storage seam for queue documents.
//!
//! A [`DocumentStore`] owns the documents of exactly one queue. The engine in
//! [`crate::queue`] never mutates documents itself; every transition goes
//! through one of these calls so that a backend can make each of them a
//! single atomic read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentStatus, Resolution};
use crate::maintenance::MaintenanceOp;

/// In-memory store used by the `memory` driver.
pub mod memory;

pub use memory::MemoryStore;

/// Result of inserting a batch of documents.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InsertOutcome {
    /// Documents that did not exist before.
    pub created: u64,
    /// Documents whose subject already existed (or repeated in the batch).
    pub skipped: u64,
    /// Created documents that landed directly in `pending`.
    pub pending: u64,
}

/// Per-status document counts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub planned: u64,
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub killed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.planned + self.pending + self.active + self.completed + self.killed
    }

    pub fn get(&self, status: DocumentStatus) -> u64 {
        match status {
            DocumentStatus::Planned => self.planned,
            DocumentStatus::Pending => self.pending,
            DocumentStatus::Active => self.active,
            DocumentStatus::Completed => self.completed,
            DocumentStatus::Killed => self.killed,
        }
    }

    pub fn add(&mut self, status: DocumentStatus) {
        match status {
            DocumentStatus::Planned => self.planned += 1,
            DocumentStatus::Pending => self.pending += 1,
            DocumentStatus::Active => self.active += 1,
            DocumentStatus::Completed => self.completed += 1,
            DocumentStatus::Killed => self.killed += 1,
        }
    }
}

/// Clock and policy inputs for a resolve call.
#[derive(Clone, Copy, Debug)]
pub struct ResolveContext {
    pub now: DateTime<Utc>,
    pub tolerance: u32,
}

/// Trait for queue storage backends.
///
/// Implementors must make `claim` atomic with respect to concurrent callers:
/// two claims never return the same document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert new documents, skipping subjects that already exist.
    async fn insert(&self, documents: Vec<Document>) -> anyhow::Result<InsertOutcome>;

    /// Fetch a document by subject.
    async fn get(&self, subject: &str) -> anyhow::Result<Option<Document>>;

    /// Claim up to `limit` due pending documents, oldest due time first.
    async fn claim(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lock: Duration,
    ) -> anyhow::Result<Vec<Document>>;

    /// Apply a resolution to the stored document.
    ///
    /// Returns `None` when the subject does not exist.
    async fn resolve(
        &self,
        subject: &str,
        resolution: &Resolution,
        ctx: ResolveContext,
    ) -> anyhow::Result<Option<Document>>;

    /// Remove a document, returning whether it existed.
    async fn remove(&self, subject: &str) -> anyhow::Result<bool>;

    /// Run a maintenance transition over every matching document.
    async fn sweep(
        &self,
        op: MaintenanceOp,
        now: DateTime<Utc>,
        tolerance: u32,
    ) -> anyhow::Result<u64>;

    /// Count documents per status.
    async fn counts(&self) -> anyhow::Result<StatusCounts>;
}
