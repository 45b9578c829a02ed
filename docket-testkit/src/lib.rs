//! Test support for docket: recording handlers, failure-injecting stores and
//! fixtures shared by the integration tests and benches.

pub mod fixtures;
pub mod handler;
pub mod store;

pub use fixtures::*;
pub use handler::{HandledRecord, RecordingHandler};
pub use store::{FailureControl, FlakyDriver, FlakyStore, StoreOp};
