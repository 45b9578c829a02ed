use async_trait::async_trait;
use docket::{Action, Document, Handler};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Handler that records every document it sees and answers with a
/// configurable action.
#[derive(Clone)]
pub struct RecordingHandler {
    records: Arc<Mutex<Vec<HandledRecord>>>,
    action: Arc<Mutex<Action>>,
    delay: Arc<Mutex<Option<Duration>>>,
    notify: Arc<Notify>,
}

#[derive(Clone, Debug)]
pub struct HandledRecord {
    pub subject: String,
    pub payload: Value,
    pub attempts: u32,
    pub iterations: u64,
}

impl RecordingHandler {
    /// Handler completing every document.
    pub fn new() -> Self {
        Self::with_action(Action::complete())
    }

    pub fn with_action(action: Action) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            action: Arc::new(Mutex::new(action)),
            delay: Arc::new(Mutex::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Sleep this long inside every call before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn set_action(&self, action: Action) {
        *self.action.lock() = action;
    }

    pub fn records(&self) -> Vec<HandledRecord> {
        self.records.lock().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|record| record.subject.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn assert_handled_count_eq(&self, expected: usize) {
        let count = self.count();
        assert_eq!(count, expected, "Expected {expected} handled documents, got {count}");
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Wait until at least `count` documents were handled.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.count() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() >= count;
            }
        }
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, document: Document) -> Action {
        self.records.lock().push(HandledRecord {
            subject: document.subject.clone(),
            payload: document.payload.clone(),
            attempts: document.attempts,
            iterations: document.iterations,
        });
        self.notify.notify_waiters();

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.action.lock().clone()
    }
}
