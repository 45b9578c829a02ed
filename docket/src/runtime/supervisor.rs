use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::document::Document;
use crate::error::{DocketError, Result};
use crate::events::QueueEvent;
use crate::lifecycle::LifecycleState;
use crate::queue::Queue;
use crate::runtime::handler::Handler;
use crate::runtime::worker::WorkerConfig;
use crate::telemetry;

/// Requested state of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerCommand {
    Run,
    Pause,
    Stop,
}

/// State a worker reports back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerPhase {
    Running,
    /// Stopped at a cycle boundary, buffer intact.
    Parked,
    Finished,
}

/// Control channel shared by a worker handle and its queue.
#[derive(Clone, Debug)]
pub(crate) struct WorkerControl {
    id: u64,
    command: Arc<watch::Sender<WorkerCommand>>,
    phase: Arc<watch::Sender<WorkerPhase>>,
}

impl WorkerControl {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Ask the worker to park and wait until it did (or finished).
    ///
    /// Returns whether the worker was running before the call.
    pub(crate) async fn pause(&self) -> bool {
        let was_running = self.command.send_if_modified(|command| {
            if *command == WorkerCommand::Run {
                *command = WorkerCommand::Pause;
                true
            } else {
                false
            }
        });

        let mut phase = self.phase.subscribe();
        let _ = phase
            .wait_for(|phase| matches!(phase, WorkerPhase::Parked | WorkerPhase::Finished))
            .await;
        was_running
    }

    pub(crate) fn resume(&self) {
        let resumed = self.command.send_if_modified(|command| {
            if *command == WorkerCommand::Pause {
                *command = WorkerCommand::Run;
                true
            } else {
                false
            }
        });
        if resumed {
            self.phase.send_if_modified(|phase| {
                if *phase == WorkerPhase::Parked {
                    *phase = WorkerPhase::Running;
                    true
                } else {
                    false
                }
            });
        }
    }

    pub(crate) fn stop(&self) {
        self.command.send_replace(WorkerCommand::Stop);
    }

    pub(crate) async fn finished(&self) {
        let mut phase = self.phase.subscribe();
        let _ = phase
            .wait_for(|phase| *phase == WorkerPhase::Finished)
            .await;
    }
}

/// Handle to a running queue worker.
///
/// Dropping the handle leaves the worker running; it stops when
/// [`unregister`](Self::unregister) is called or its client is destroyed.
pub struct WorkerHandle {
    control: WorkerControl,
    queue: Queue,
    join: JoinHandle<Result<()>>,
    shutdown_timeout: Duration,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.control.id)
            .field("queue", &self.queue.name())
            .field("phase", &self.control.phase())
            .finish()
    }
}

impl WorkerHandle {
    pub fn id(&self) -> u64 {
        self.control.id
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn phase(&self) -> WorkerPhase {
        self.control.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub(crate) fn control(&self) -> WorkerControl {
        self.control.clone()
    }

    /// Park the worker at its next cycle boundary.
    ///
    /// Resolves once the worker has parked; documents already claimed stay
    /// buffered.
    pub async fn pause(&self) {
        self.control.pause().await;
    }

    /// Restart a paused worker.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Stop the worker and wait for its task.
    ///
    /// Buffered documents are discarded and stay active until maintenance
    /// reclaims them. Returns the error that ended the worker, if any.
    pub async fn unregister(self) -> Result<()> {
        self.control.stop();
        self.queue.remove_worker(self.control.id);

        let mut join = self.join;
        match tokio::time::timeout(self.shutdown_timeout, &mut join).await {
            Ok(Ok(result)) => {
                tracing::info!(queue = %self.queue.name(), worker_id = self.control.id, "worker unregistered");
                result
            }
            Ok(Err(err)) if err.is_panic() => Err(DocketError::WorkerPanicked {
                reason: panic_message(err.into_panic()),
            }),
            Ok(Err(err)) => Err(DocketError::WorkerPanicked {
                reason: err.to_string(),
            }),
            Err(_) => {
                tracing::warn!(
                    queue = %self.queue.name(),
                    worker_id = self.control.id,
                    "worker task timed out during shutdown"
                );
                join.abort();
                Ok(())
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) fn spawn_worker(
    id: u64,
    queue: Queue,
    handler: Arc<dyn Handler>,
    config: WorkerConfig,
    events: broadcast::Receiver<QueueEvent>,
    shutdown_timeout: Duration,
) -> WorkerHandle {
    let (command_tx, command_rx) = watch::channel(WorkerCommand::Run);
    let (phase_tx, _) = watch::channel(WorkerPhase::Running);
    let control = WorkerControl {
        id,
        command: Arc::new(command_tx),
        phase: Arc::new(phase_tx),
    };

    let worker = Worker {
        id,
        queue: queue.clone(),
        handler,
        config,
        events,
        events_open: true,
        command: command_rx,
        detached: false,
        phase: Arc::clone(&control.phase),
        buffer: VecDeque::new(),
    };

    let span = telemetry::worker_span(queue.name(), id);
    let finished = FinishGuard(Arc::clone(&control.phase));
    let join = tokio::spawn(
        async move {
            let _finished = finished;
            worker.run().await
        }
        .instrument(span),
    );

    WorkerHandle {
        control,
        queue,
        join,
        shutdown_timeout,
    }
}

/// Reports `Finished` however the task ends, panics included.
struct FinishGuard(Arc<watch::Sender<WorkerPhase>>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.send_replace(WorkerPhase::Finished);
    }
}

enum Boundary {
    Run,
    Stop,
}

enum Signal {
    Elapsed,
    Command(bool),
    Event(std::result::Result<QueueEvent, RecvError>),
}

struct Worker {
    id: u64,
    queue: Queue,
    handler: Arc<dyn Handler>,
    config: WorkerConfig,
    events: broadcast::Receiver<QueueEvent>,
    events_open: bool,
    command: watch::Receiver<WorkerCommand>,
    detached: bool,
    phase: Arc<watch::Sender<WorkerPhase>>,
    buffer: VecDeque<Document>,
}

impl Worker {
    async fn run(mut self) -> Result<()> {
        tracing::debug!(queue = %self.queue.name(), worker_id = self.id, "worker started");

        loop {
            if let Boundary::Stop = self.boundary().await {
                break;
            }

            if self.buffer.is_empty() {
                // Pending events are covered by the pick below.
                self.drain_events();
                match self.queue.pick(self.config.pick_request()).await {
                    Ok(documents) => self.buffer.extend(documents),
                    Err(err) => {
                        if self.stopping() {
                            break;
                        }
                        tracing::warn!(
                            queue = %self.queue.name(),
                            worker_id = self.id,
                            error = %err,
                            "pick failed"
                        );
                        self.wait(self.config.sleep(), false).await;
                        continue;
                    }
                }
                if self.stopping() {
                    break;
                }
            }

            let Some(document) = self.buffer.pop_front() else {
                self.wait(self.config.sleep(), true).await;
                continue;
            };

            self.process(document).await?;
            if self.stopping() {
                break;
            }

            if self.config.delay_ms == 0 {
                tokio::task::yield_now().await;
            } else {
                self.wait(self.config.delay(), false).await;
            }
        }

        if !self.buffer.is_empty() {
            tracing::debug!(
                queue = %self.queue.name(),
                worker_id = self.id,
                discarded = self.buffer.len(),
                "worker stopped with buffered documents"
            );
        }
        tracing::debug!(queue = %self.queue.name(), worker_id = self.id, "worker stopped");
        Ok(())
    }

    fn stopping(&self) -> bool {
        self.detached
            || *self.command.borrow() == WorkerCommand::Stop
            || self.queue.state() == LifecycleState::Destroyed
    }

    async fn boundary(&mut self) -> Boundary {
        loop {
            if self.detached {
                return Boundary::Stop;
            }
            let command = *self.command.borrow_and_update();
            match command {
                WorkerCommand::Run => return Boundary::Run,
                WorkerCommand::Stop => return Boundary::Stop,
                WorkerCommand::Pause => {
                    self.phase.send_replace(WorkerPhase::Parked);
                    tracing::debug!(queue = %self.queue.name(), worker_id = self.id, "worker parked");
                    if self.command.changed().await.is_err() {
                        self.detached = true;
                    }
                }
            }
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    self.events_open = false;
                    break;
                }
            }
        }
    }

    /// Sleep for `duration`, cut short by a control change or, when
    /// `wakeable`, by a wake event.
    async fn wait(&mut self, duration: Duration, wakeable: bool) {
        let deadline = Instant::now() + duration;
        loop {
            let listen = wakeable && self.events_open;
            let signal = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => Signal::Elapsed,
                changed = self.command.changed() => Signal::Command(changed.is_ok()),
                event = self.events.recv(), if listen => Signal::Event(event),
            };

            match signal {
                Signal::Elapsed => return,
                Signal::Command(alive) => {
                    if !alive {
                        self.detached = true;
                    }
                    return;
                }
                Signal::Event(Ok(event)) if event.is_wake() => {
                    tracing::trace!(queue = %self.queue.name(), worker_id = self.id, "worker woken");
                    return;
                }
                Signal::Event(Ok(_)) => continue,
                Signal::Event(Err(RecvError::Lagged(_))) => return,
                Signal::Event(Err(RecvError::Closed)) => self.events_open = false,
            }
        }
    }

    async fn process(&mut self, document: Document) -> Result<()> {
        let subject = document.subject.clone();
        let span = telemetry::handle_span(self.queue.name(), &subject, self.id);

        let timing = telemetry::record_handle_start(&subject);
        let action = self
            .handler
            .handle(document)
            .instrument(span.clone())
            .await;
        let name = action.name();
        telemetry::record_handle_end(timing, self.queue.name(), name);

        match self.queue.apply(&subject, action).instrument(span).await {
            Ok(_) => Ok(()),
            Err(err) if self.stopping() => {
                tracing::warn!(
                    queue = %self.queue.name(),
                    worker_id = self.id,
                    subject = %subject,
                    action = name,
                    error = %err,
                    "resolve failed after worker was stopped"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    queue = %self.queue.name(),
                    worker_id = self.id,
                    subject = %subject,
                    action = name,
                    error = %err,
                    "resolve failed, stopping worker"
                );
                Err(DocketError::Resolve {
                    client: self.queue.client_name().to_string(),
                    queue: self.queue.name().to_string(),
                    action: name,
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn control() -> (WorkerControl, watch::Receiver<WorkerCommand>) {
        let (command_tx, command_rx) = watch::channel(WorkerCommand::Run);
        let (phase_tx, _) = watch::channel(WorkerPhase::Running);
        (
            WorkerControl {
                id: 1,
                command: Arc::new(command_tx),
                phase: Arc::new(phase_tx),
            },
            command_rx,
        )
    }

    #[tokio::test]
    async fn test_pause_waits_for_park() {
        let (control, mut command) = control();
        let phase = Arc::clone(&control.phase);

        let parker = tokio::spawn(async move {
            command
                .wait_for(|command| *command == WorkerCommand::Pause)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            phase.send_replace(WorkerPhase::Parked);
        });

        let was_running = timeout(Duration::from_secs(1), control.pause())
            .await
            .expect("pause did not resolve");
        assert!(was_running);
        assert_eq!(control.phase(), WorkerPhase::Parked);
        parker.await.unwrap();

        control.resume();
        assert_eq!(*control.command.borrow(), WorkerCommand::Run);
        assert_eq!(control.phase(), WorkerPhase::Running);
    }

    #[tokio::test]
    async fn test_pause_on_finished_worker_returns() {
        let (control, _command) = control();
        {
            let _guard = FinishGuard(Arc::clone(&control.phase));
        }
        timeout(Duration::from_secs(1), control.pause())
            .await
            .expect("pause hung on finished worker");
        control.resume();
        assert_eq!(control.phase(), WorkerPhase::Finished);
        timeout(Duration::from_secs(1), control.finished())
            .await
            .unwrap();
    }

    #[test]
    fn test_stop_overrides_pause() {
        let (control, _command) = control();
        control.stop();
        control.resume();
        assert_eq!(*control.command.borrow(), WorkerCommand::Stop);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42_u8)), "unknown panic");
    }
}
