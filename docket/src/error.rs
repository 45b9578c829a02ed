//! Error types for the docket crate.

use thiserror::Error;

/// Errors surfaced by queues, clients, drivers and workers.
#[derive(Debug, Error)]
pub enum DocketError {
    /// No driver factory is registered under the requested kind.
    #[error("driver \"{0}\" not found")]
    DriverNotFound(String),

    /// A driver factory is already registered under this kind.
    #[error("driver \"{0}\" already defined")]
    DuplicateDriver(String),

    /// A client with this name already exists in the registry.
    #[error("client \"{0}\" already defined")]
    DuplicateClient(String),

    /// No client with this name exists in the registry.
    #[error("client \"{0}\" not found")]
    ClientNotFound(String),

    /// A schedule expression could not be understood.
    #[error("invalid schedule expression: {0}")]
    InvalidSchedule(String),

    /// A configuration value is out of range or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A resolve-family call named a subject the queue does not hold.
    #[error("document \"{subject}\" not found in queue \"{queue}\"")]
    DocumentNotFound { queue: String, subject: String },

    /// A worker could not apply its handler's decision.
    #[error("could not perform \"{client}/{queue}/{action}()\": {source}")]
    Resolve {
        client: String,
        queue: String,
        action: &'static str,
        #[source]
        source: Box<DocketError>,
    },

    /// The component was torn down and can no longer be used.
    #[error("{component} has been destroyed")]
    Destroyed { component: String },

    /// A worker task panicked.
    #[error("worker panicked: {reason}")]
    WorkerPanicked { reason: String },

    /// Failure reported by a storage backend or driver.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl DocketError {
    pub(crate) fn destroyed(component: impl Into<String>) -> Self {
        Self::Destroyed {
            component: component.into(),
        }
    }

    /// Whether this error is a configuration error that must not be retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::DriverNotFound(_)
                | Self::DuplicateDriver(_)
                | Self::DuplicateClient(_)
                | Self::ClientNotFound(_)
                | Self::InvalidSchedule(_)
                | Self::InvalidConfig(_)
        )
    }
}

/// Result alias used across the crate's public API.
pub type Result<T> = std::result::Result<T, DocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_error_names_the_failed_call() {
        let err = DocketError::Resolve {
            client: "default".into(),
            queue: "q1".into(),
            action: "complete",
            source: Box::new(DocketError::DocumentNotFound {
                queue: "q1".into(),
                subject: "d1".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("default/q1/complete()"));
        assert!(msg.contains("\"d1\""));
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(DocketError::DriverNotFound("pg".into()).is_config());
        assert!(DocketError::DuplicateClient("a".into()).is_config());
        assert!(!DocketError::destroyed("queue q1").is_config());
    }
}
