//! Docket - document queues with pluggable storage backends.
//!
//! A queue holds documents keyed by a unique subject. Documents are pushed
//! with an optional due time, claimed by workers under a time-limited lease,
//! and resolved by the handler's decision. A maintenance cycle run by each
//! client promotes due documents and recovers or kills abandoned leases.
//!
//! # Core Concepts
//!
//! - **Document**: a subject, a JSON payload and scheduling state moving
//!   through [`DocumentStatus`] (planned, pending, active, completed, killed).
//!
//! - **Queue**: the [`Queue`] handle exposes push, pick, the resolve family
//!   (reschedule, complete, kill, reject), drop and maintenance operations.
//!
//! - **Store**: the [`DocumentStore`] trait is the backend contract; the
//!   in-memory [`MemoryStore`] ships with the crate.
//!
//! - **Driver**: a [`Driver`] connects a backend and opens one store per
//!   queue. Drivers are created by kind from a [`DriverRegistry`].
//!
//! - **Worker**: [`Queue::register_worker`] runs a [`Handler`] over claimed
//!   documents and turns its [`Action`] into a resolution.
//!
//! - **Client**: a [`Client`] owns a driver, its queues and the maintenance
//!   worker. Named clients live in a [`ClientRegistry`].
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use docket::*;
//!
//! let client = connect(ClientConfig::new("app")).await?;
//! let queue = client.queue("emails").await?;
//! queue.push(["welcome:42"]).await?;
//!
//! queue
//!     .register_worker(handler_fn(|doc| async move { Action::complete() }), WorkerConfig::new())
//!     .await?;
//! ```

/// Client owning a driver, its queues and the maintenance worker.
pub mod client;

/// Client, driver, maintenance and queue settings.
///
/// Includes [`SettingsCell`] for versioned settings swaps.
pub mod config;

/// Documents, statuses and resolutions.
pub mod document;

/// Backend drivers and the driver registry.
pub mod driver;

pub mod error;

/// Queue events published on an in-process broadcast bus.
pub mod events;

/// Pick requests and lease expiry classification.
pub mod lease;

/// Readiness state machine shared by clients and queues.
pub mod lifecycle;

/// Maintenance operations and the tasks that schedule them.
pub mod maintenance;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled by the `metrics` feature.
pub mod metrics;

/// The queue handle and its operations.
pub mod queue;

/// Named clients and the process-wide convenience functions.
pub mod registry;

/// Workers, handlers and their control handles.
pub mod runtime;

/// Due-time expressions.
pub mod schedule;

/// The storage contract and the in-memory store.
pub mod store;

/// Tracing spans and metric recorders.
pub mod telemetry;

pub use client::Client;
pub use config::*;
pub use document::*;
pub use driver::{drivers, register_driver, Driver, DriverFactory, DriverRegistry, MemoryDriver};
pub use error::{DocketError, Result};
pub use events::*;
pub use lease::*;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use maintenance::{MaintenanceOp, MaintenanceOutcome, MaintenanceTask, MAINTENANCE_QUEUE};
pub use queue::{PushOutcome, Queue, QueueStats};
pub use registry::{
    clients, connect, create_client, destroy_all, get_client, push, queue, set_defaults,
    use_client, ClientRegistry,
};
pub use runtime::*;
pub use schedule::*;
pub use store::{DocumentStore, InsertOutcome, MemoryStore, ResolveContext, StatusCounts};
