use std::fmt::{self, Display};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::Schedule;

/// Lifecycle status of a stored document.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Waiting for its due time.
    Planned,
    /// Due and eligible for picking.
    Pending,
    /// Claimed by a worker under a lease.
    Active,
    /// Finished successfully.
    Completed,
    /// Dead-lettered or killed by its handler.
    Killed,
}

impl DocumentStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [DocumentStatus; 5] = [
        DocumentStatus::Planned,
        DocumentStatus::Pending,
        DocumentStatus::Active,
        DocumentStatus::Completed,
        DocumentStatus::Killed,
    ];

    /// Terminal documents are never picked again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Killed)
    }

    /// Status a non-active document takes for a given due time.
    pub fn for_due(due: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if due > now {
            DocumentStatus::Planned
        } else {
            DocumentStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Planned => "planned",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Active => "active",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Killed => "killed",
        }
    }
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A uniquely keyed unit of work stored in a queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique key within the queue.
    pub subject: String,
    /// Opaque application data.
    pub payload: Value,
    pub status: DocumentStatus,
    /// Claims since the last successful resolution.
    pub attempts: u32,
    /// Number of resolutions, never reset.
    pub iterations: u64,
    /// Time of the most recent resolution.
    pub last_iteration: Option<DateTime<Utc>>,
    /// Due time, or lease expiry while active.
    pub next_iteration: DateTime<Utc>,
}

impl Document {
    /// Materialise a push request at `now`.
    pub fn from_new(new: NewDocument, now: DateTime<Utc>) -> Self {
        let next_iteration = new.next_iteration.unwrap_or_default().resolve(now);
        Self {
            subject: new.subject,
            payload: new.payload.unwrap_or_else(empty_payload),
            status: DocumentStatus::for_due(next_iteration, now),
            attempts: 0,
            iterations: 0,
            last_iteration: None,
            next_iteration,
        }
    }

    /// Whether a pending document may be picked at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_iteration <= now
    }

    /// Whether an active document's lease ran out.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == DocumentStatus::Active && self.next_iteration <= now
    }

    /// Flip a pending document to active under a lease of `lock`.
    pub fn claim(&mut self, now: DateTime<Utc>, lock: Duration) {
        self.status = DocumentStatus::Active;
        self.attempts = self.attempts.saturating_add(1);
        self.next_iteration = now + lock;
    }

    /// Apply a resolution, returning the resulting status.
    pub fn apply(
        &mut self,
        resolution: &Resolution,
        now: DateTime<Utc>,
        tolerance: u32,
    ) -> DocumentStatus {
        if let Some(payload) = resolution.payload() {
            self.payload = payload.clone();
        }
        self.iterations = self.iterations.saturating_add(1);
        self.last_iteration = Some(now);

        match resolution {
            Resolution::Reschedule { next_iteration, .. } => {
                self.attempts = 0;
                self.next_iteration = *next_iteration;
                self.status = DocumentStatus::for_due(*next_iteration, now);
            }
            Resolution::Complete { .. } => {
                self.attempts = 0;
                self.status = DocumentStatus::Completed;
            }
            Resolution::Kill { .. } => {
                self.attempts = 0;
                self.status = DocumentStatus::Killed;
            }
            Resolution::Reject { next_iteration, .. } => {
                if crate::lease::should_dead_letter(self.attempts, tolerance) {
                    self.status = DocumentStatus::Killed;
                } else {
                    let due = next_iteration.unwrap_or(self.next_iteration);
                    self.next_iteration = due;
                    self.status = DocumentStatus::for_due(due, now);
                }
            }
        }

        self.status
    }
}

/// Push request for a single document.
#[derive(Clone, Debug, PartialEq)]
pub struct NewDocument {
    pub subject: String,
    pub payload: Option<Value>,
    pub next_iteration: Option<Schedule>,
}

impl NewDocument {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            payload: None,
            next_iteration: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_next_iteration(mut self, schedule: impl Into<Schedule>) -> Self {
        self.next_iteration = Some(schedule.into());
        self
    }
}

impl From<&str> for NewDocument {
    fn from(subject: &str) -> Self {
        Self::new(subject)
    }
}

impl From<String> for NewDocument {
    fn from(subject: String) -> Self {
        Self::new(subject)
    }
}

/// Store-level resolution with every due time already made absolute.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Reschedule {
        next_iteration: DateTime<Utc>,
        payload: Option<Value>,
    },
    Complete {
        payload: Option<Value>,
    },
    Kill {
        payload: Option<Value>,
    },
    Reject {
        error: String,
        /// Defaults to the stored `next_iteration` (the lease expiry).
        next_iteration: Option<DateTime<Utc>>,
        payload: Option<Value>,
    },
}

impl Resolution {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Resolution::Reschedule { payload, .. }
            | Resolution::Complete { payload }
            | Resolution::Kill { payload }
            | Resolution::Reject { payload, .. } => payload.as_ref(),
        }
    }

    /// Name of the engine call this resolution came from.
    pub fn action(&self) -> &'static str {
        match self {
            Resolution::Reschedule { .. } => "reschedule",
            Resolution::Complete { .. } => "complete",
            Resolution::Kill { .. } => "kill",
            Resolution::Reject { .. } => "reject",
        }
    }
}

pub(crate) fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}
