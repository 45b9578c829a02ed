//! Readiness tracking for clients and queues.

use tokio::sync::watch;

use crate::error::{DocketError, Result};

/// Lifecycle of a client or queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// Observable lifecycle state shared by a component and its waiters.
#[derive(Debug)]
pub struct Lifecycle {
    component: String,
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new(component: impl Into<String>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Uninitialized);
        Self {
            component: component.into(),
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    /// Claim the right to initialise.
    ///
    /// Returns true for exactly one caller while uninitialised; that caller
    /// must follow up with [`mark_ready`](Self::mark_ready) or
    /// [`reset`](Self::reset).
    pub fn begin_init(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Uninitialized {
                *state = LifecycleState::Initializing;
                true
            } else {
                false
            }
        })
    }

    pub fn mark_ready(&self) {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Initializing {
                *state = LifecycleState::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Return to uninitialised after a failed initialisation.
    pub fn reset(&self) {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Initializing {
                *state = LifecycleState::Uninitialized;
                true
            } else {
                false
            }
        });
    }

    /// Mark destroyed; returns false if it already was.
    pub fn mark_destroyed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Destroyed {
                false
            } else {
                *state = LifecycleState::Destroyed;
                true
            }
        })
    }

    /// Fail fast when destroyed.
    pub fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DocketError::destroyed(self.component.clone()));
        }
        Ok(())
    }

    /// Wait until an in-flight initialisation settles.
    ///
    /// Returns the settled state, never `Initializing`.
    pub async fn settled(&self) -> LifecycleState {
        let mut rx = self.state.subscribe();
        let settled = match rx
            .wait_for(|state| *state != LifecycleState::Initializing)
            .await
        {
            Ok(state) => *state,
            Err(_) => LifecycleState::Destroyed,
        };
        settled
    }

    /// Wait for another caller's initialisation to finish.
    pub async fn wait_ready(&self) -> Result<()> {
        match self.settled().await {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Destroyed => Err(DocketError::destroyed(self.component.clone())),
            _ => Err(DocketError::Backend(anyhow::anyhow!(
                "initialisation of {} failed",
                self.component
            ))),
        }
    }
}
