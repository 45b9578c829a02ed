use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default number of documents claimed per pick.
pub const DEFAULT_PICK_LIMIT: usize = 1;

/// Default lease length granted to a picked document.
pub const DEFAULT_LOCK_MS: u64 = 5 * 60 * 1000;

/// Request to claim due documents from a queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PickRequest {
    /// Maximum number of documents to claim.
    pub limit: usize,
    /// Lease length in milliseconds.
    pub lock_ms: u64,
}

impl Default for PickRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PICK_LIMIT,
            lock_ms: DEFAULT_LOCK_MS,
        }
    }
}

impl PickRequest {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Set the lease length.
    pub fn with_lock(mut self, lock: Duration) -> Self {
        self.lock_ms = lock.num_milliseconds().max(0) as u64;
        self
    }

    /// Set the lease length in milliseconds.
    pub fn with_lock_ms(mut self, ms: u64) -> Self {
        self.lock_ms = ms;
        self
    }

    pub fn lock(&self) -> Duration {
        Duration::milliseconds(self.lock_ms.min(i64::MAX as u64) as i64)
    }
}

/// Determines if a document should be dead-lettered based on attempt count.
///
/// Returns true when attempts >= tolerance.
pub fn should_dead_letter(attempts: u32, tolerance: u32) -> bool {
    attempts >= tolerance
}

/// What maintenance does with an active document whose lease ran out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrphanOutcome {
    /// Back to pending for another worker.
    Reclaim,
    /// Out of attempts.
    DeadLetter,
}

/// Classify an orphaned document by its attempt count.
pub fn process_expired_lease(attempts: u32, tolerance: u32) -> OrphanOutcome {
    if should_dead_letter(attempts, tolerance) {
        OrphanOutcome::DeadLetter
    } else {
        OrphanOutcome::Reclaim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_request_defaults() {
        let request = PickRequest::default();
        assert_eq!(request.limit, 1);
        assert_eq!(request.lock(), Duration::minutes(5));

        let request = PickRequest::new(10).with_lock(Duration::seconds(30));
        assert_eq!(request.limit, 10);
        assert_eq!(request.lock_ms, 30_000);
    }

    #[test]
    fn test_should_dead_letter() {
        assert!(!should_dead_letter(0, 3));
        assert!(!should_dead_letter(1, 3));
        assert!(!should_dead_letter(2, 3));
        assert!(should_dead_letter(3, 3));
        assert!(should_dead_letter(4, 3));
    }

    #[test]
    fn test_process_expired_lease() {
        assert_eq!(process_expired_lease(1, 5), OrphanOutcome::Reclaim);
        assert_eq!(process_expired_lease(4, 5), OrphanOutcome::Reclaim);
        assert_eq!(process_expired_lease(5, 5), OrphanOutcome::DeadLetter);
    }
}
