//! Tracing and telemetry instrumentation for docket.
//!
//! Span constructors for the queue operations and `record_*` helpers that
//! log through `tracing` and, with the `metrics` feature, update the
//! Prometheus collectors in [`crate::metrics`]. Every helper works with the
//! feature disabled.
//!
//! # Example
//!
//! ```ignore
//! use docket::telemetry::{pick_span, record_picked};
//!
//! let span = pick_span("emails", 10);
//! let _enter = span.enter();
//! record_picked("emails", 3);
//! ```

use crate::document::DocumentStatus;
use crate::store::StatusCounts;
use tracing::{info_span, Span};

/// Span around a worker's whole loop.
#[must_use]
pub fn worker_span(queue: impl AsRef<str>, worker_id: u64) -> Span {
    info_span!("docket.worker", queue = %queue.as_ref(), worker_id = worker_id)
}

/// Span for a push of `count` documents.
#[must_use]
pub fn push_span(queue: impl AsRef<str>, count: usize) -> Span {
    info_span!("docket.push", queue = %queue.as_ref(), count = count)
}

/// Span for a pick of up to `limit` documents.
#[must_use]
pub fn pick_span(queue: impl AsRef<str>, limit: usize) -> Span {
    info_span!("docket.pick", queue = %queue.as_ref(), limit = limit)
}

/// Span for resolving one document.
#[must_use]
pub fn resolve_span(queue: impl AsRef<str>, subject: impl AsRef<str>, action: &str) -> Span {
    info_span!(
        "docket.resolve",
        queue = %queue.as_ref(),
        subject = %subject.as_ref(),
        action = action,
    )
}

/// Span for a handler invocation inside a worker.
#[must_use]
pub fn handle_span(queue: impl AsRef<str>, subject: impl AsRef<str>, worker_id: u64) -> Span {
    info_span!(
        "docket.handle",
        queue = %queue.as_ref(),
        subject = %subject.as_ref(),
        worker_id = worker_id,
    )
}

/// Span for one maintenance sweep.
#[must_use]
pub fn maintenance_span(queue: impl AsRef<str>, operation: &str) -> Span {
    info_span!(
        "docket.maintenance",
        queue = %queue.as_ref(),
        operation = operation,
    )
}

pub fn record_pushed(queue: impl AsRef<str>, created: u64, skipped: u64) {
    tracing::info!(
        queue = %queue.as_ref(),
        created = created,
        skipped = skipped,
        "documents pushed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_pushed(queue.as_ref(), created, skipped);
}

pub fn record_picked(queue: impl AsRef<str>, count: usize) {
    tracing::debug!(queue = %queue.as_ref(), count = count, "documents picked");

    #[cfg(feature = "metrics")]
    crate::metrics::record_picked(queue.as_ref(), count as u64);
}

/// Record a resolution and the status it produced.
pub fn record_resolved(queue: impl AsRef<str>, action: &str, status: DocumentStatus) {
    if status == DocumentStatus::Killed {
        tracing::warn!(queue = %queue.as_ref(), action = action, status = %status, "document resolved");
    } else {
        tracing::info!(queue = %queue.as_ref(), action = action, status = %status, "document resolved");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_resolved(queue.as_ref(), action, status.as_str());
}

pub fn record_maintenance(queue: impl AsRef<str>, operation: &str, affected: u64) {
    if affected > 0 {
        tracing::info!(
            queue = %queue.as_ref(),
            operation = operation,
            affected = affected,
            "maintenance moved documents"
        );
    } else {
        tracing::trace!(queue = %queue.as_ref(), operation = operation, "maintenance idle");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_maintenance(queue.as_ref(), operation, affected);
}

/// Publish the per-status document counts of a queue.
pub fn set_queue_documents(queue: impl AsRef<str>, counts: &StatusCounts) {
    tracing::debug!(
        queue = %queue.as_ref(),
        planned = counts.planned,
        pending = counts.pending,
        active = counts.active,
        completed = counts.completed,
        killed = counts.killed,
        "queue documents counted"
    );

    #[cfg(feature = "metrics")]
    for status in DocumentStatus::ALL {
        crate::metrics::set_queue_documents(queue.as_ref(), status.as_str(), counts.get(status) as f64);
    }
}

/// Start timing a handler call; pass the handle to [`record_handle_end`].
pub fn record_handle_start(subject: impl AsRef<str>) -> HandleTimingHandle {
    HandleTimingHandle {
        subject: subject.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Finish timing a handler call that returned `action`.
pub fn record_handle_end(handle: HandleTimingHandle, queue: impl AsRef<str>, action: &str) {
    let duration_secs = handle.start.elapsed().as_secs_f64();
    tracing::debug!(
        queue = %queue.as_ref(),
        subject = %handle.subject,
        action = action,
        duration_secs = duration_secs,
        "handler finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_handler_duration(queue.as_ref(), action, duration_secs);
}

/// Timing handle returned by [`record_handle_start`].
#[derive(Debug)]
pub struct HandleTimingHandle {
    subject: String,
    start: std::time::Instant,
}

impl HandleTimingHandle {
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names() {
        let cases = [
            (worker_span("q1", 1), "docket.worker"),
            (push_span("q1", 3), "docket.push"),
            (pick_span("q1", 1), "docket.pick"),
            (resolve_span("q1", "d1", "complete"), "docket.resolve"),
            (handle_span("q1", "d1", 1), "docket.handle"),
            (maintenance_span("q1", "make_pending"), "docket.maintenance"),
        ];
        for (span, name) in cases {
            // Disabled spans carry no metadata when no subscriber is set.
            if let Some(metadata) = span.metadata() {
                assert_eq!(metadata.name(), name);
            }
        }
    }

    #[test]
    fn test_timing_handle() {
        let handle = record_handle_start("d1");
        assert_eq!(handle.subject(), "d1");

        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(handle.elapsed().as_nanos() > 0);

        record_handle_end(handle, "q1", "complete");
    }

    #[test]
    fn test_recorders_do_not_panic() {
        record_pushed("q1", 2, 1);
        record_picked("q1", 2);
        record_resolved("q1", "kill", DocumentStatus::Killed);
        record_maintenance("q1", "kill_orphans", 0);

        let mut counts = StatusCounts::default();
        counts.add(DocumentStatus::Pending);
        set_queue_documents("q1", &counts);
    }
}
