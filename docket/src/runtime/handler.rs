use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{Document, Resolution};
use crate::schedule::Schedule;

/// Decision a handler returns for one document.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Run again at `at`.
    Reschedule {
        at: Schedule,
        payload: Option<Value>,
    },
    /// Finished successfully.
    Complete { payload: Option<Value> },
    /// Stop processing for good.
    Kill { payload: Option<Value> },
    /// Failed; retried at `at` (default: the lease expiry) until the queue's
    /// tolerance is exhausted.
    Reject {
        error: String,
        at: Option<Schedule>,
        payload: Option<Value>,
    },
}

impl Action {
    pub fn reschedule(at: impl Into<Schedule>) -> Self {
        Action::Reschedule {
            at: at.into(),
            payload: None,
        }
    }

    pub fn complete() -> Self {
        Action::Complete { payload: None }
    }

    pub fn kill() -> Self {
        Action::Kill { payload: None }
    }

    pub fn reject(error: impl Into<String>) -> Self {
        Action::Reject {
            error: error.into(),
            at: None,
            payload: None,
        }
    }

    pub fn reject_at(error: impl Into<String>, at: impl Into<Schedule>) -> Self {
        Action::Reject {
            error: error.into(),
            at: Some(at.into()),
            payload: None,
        }
    }

    /// Replace the stored payload together with the decision.
    pub fn with_payload(mut self, value: Value) -> Self {
        match &mut self {
            Action::Reschedule { payload, .. }
            | Action::Complete { payload }
            | Action::Kill { payload }
            | Action::Reject { payload, .. } => *payload = Some(value),
        }
        self
    }

    /// Name of the engine call that applies this action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Reschedule { .. } => "reschedule",
            Action::Complete { .. } => "complete",
            Action::Kill { .. } => "kill",
            Action::Reject { .. } => "reject",
        }
    }

    pub(crate) fn into_resolution(self, now: DateTime<Utc>) -> Resolution {
        match self {
            Action::Reschedule { at, payload } => Resolution::Reschedule {
                next_iteration: at.resolve(now),
                payload,
            },
            Action::Complete { payload } => Resolution::Complete { payload },
            Action::Kill { payload } => Resolution::Kill { payload },
            Action::Reject { error, at, payload } => Resolution::Reject {
                error,
                next_iteration: at.map(|at| at.resolve(now)),
                payload,
            },
        }
    }
}

/// Trait for application logic run by queue workers.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Decide what happens to a claimed document.
    async fn handle(&self, document: Document) -> Action;
}

/// Handler backed by an async closure, see [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Action> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Action> + Send + 'static,
{
    async fn handle(&self, document: Document) -> Action {
        (self.f)(document).await
    }
}
