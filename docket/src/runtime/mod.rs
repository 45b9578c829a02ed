/// Handler trait and the actions it returns.
pub mod handler;
/// Worker loop, control channel and handles.
pub mod supervisor;
/// Worker configuration.
pub mod worker;

pub use handler::{handler_fn, Action, Handler, HandlerFn};
pub use supervisor::{WorkerCommand, WorkerHandle, WorkerPhase};
pub use worker::WorkerConfig;
