use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::protocol::{TranslationRequest, WorkerEvent};
use crate::{Error, Result};

mod process;

pub use process::{ProcessWorkerConfig, ProcessWorkerFactory, default_worker_command};

pub type EventSender = mpsc::UnboundedSender<WorkerEvent>;

/// One live worker context. Events flow back through the [`EventSender`]
/// handed to [`WorkerFactory::spawn`].
pub trait Worker: Send {
    fn kind(&self) -> &str;

    /// Hands one request to the worker without waiting for it to be processed.
    fn post(&mut self, request: &TranslationRequest) -> Result<()>;

    /// Best-effort release of the worker context. Must be idempotent.
    fn terminate(&mut self);
}

pub trait WorkerFactory: Send {
    fn kind(&self) -> &str;

    fn spawn(&self, events: EventSender) -> Result<Box<dyn Worker>>;
}

/// Message boundary to a single worker, established lazily and kept for the
/// owner's lifetime. Events are relayed as-is, in the order the worker
/// produced them.
pub struct WorkerChannel {
    factory: Box<dyn WorkerFactory>,
    worker: Option<Box<dyn Worker>>,
    events_tx: Option<EventSender>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    closed: bool,
}

impl WorkerChannel {
    pub fn new(factory: Box<dyn WorkerFactory>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            worker: None,
            events_tx: Some(events_tx),
            events_rx,
            closed: false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawns the worker unless one already exists. A failed spawn is final:
    /// later calls report [`Error::ChannelClosed`].
    pub fn establish(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let events = self.events_tx.take().ok_or(Error::ChannelClosed)?;

        match self.factory.spawn(events) {
            Ok(worker) => {
                tracing::info!(
                    event = "worker.established",
                    kind = worker.kind(),
                    "worker.established"
                );
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    event = "worker.establish_failed",
                    kind = self.factory.kind(),
                    error = %e,
                    "worker.establish_failed"
                );
                self.closed = true;
                Err(e)
            }
        }
    }

    pub fn send(&mut self, request: &TranslationRequest) -> Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let worker = self.worker.as_mut().ok_or(Error::ChannelNotEstablished)?;
        worker.post(request)
    }

    /// Next event from the worker; `None` once the worker side has gone away.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events_rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WorkerEvent> {
        self.events_rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.terminate();
            tracing::info!(
                event = "worker.closed",
                kind = worker.kind(),
                "worker.closed"
            );
        }
        self.events_tx = None;
        self.events_rx.close();
        self.closed = true;
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker double that records requests and lets tests push events by hand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkerFactory {
    inner: Arc<Mutex<InMemoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    events: Option<EventSender>,
    sent: Vec<TranslationRequest>,
    spawned: usize,
    terminated: bool,
    spawn_error: Option<String>,
}

impl InMemoryWorkerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose spawn always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let factory = Self::default();
        factory.state().spawn_error = Some(message.into());
        factory
    }

    /// Delivers `event` as if the worker emitted it. Returns `false` when no
    /// worker is attached or the receiving side is gone.
    pub fn emit(&self, event: WorkerEvent) -> bool {
        match self.state().events.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulates the worker going away: the channel's event stream ends.
    pub fn disconnect(&self) {
        self.state().events = None;
    }

    pub fn sent(&self) -> Vec<TranslationRequest> {
        self.state().sent.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.state().spawned
    }

    pub fn is_terminated(&self) -> bool {
        self.state().terminated
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerFactory for InMemoryWorkerFactory {
    fn kind(&self) -> &str {
        "test.mem"
    }

    fn spawn(&self, events: EventSender) -> Result<Box<dyn Worker>> {
        let mut state = self.state();
        if let Some(message) = &state.spawn_error {
            return Err(Error::WorkerSpawn {
                message: message.clone(),
            });
        }
        state.events = Some(events);
        state.spawned += 1;
        state.terminated = false;
        Ok(Box::new(InMemoryWorker {
            inner: self.inner.clone(),
        }))
    }
}

struct InMemoryWorker {
    inner: Arc<Mutex<InMemoryState>>,
}

impl Worker for InMemoryWorker {
    fn kind(&self) -> &str {
        "test.mem"
    }

    fn post(&mut self, request: &TranslationRequest) -> Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.terminated {
            return Err(Error::ChannelClosed);
        }
        state.sent.push(request.clone());
        Ok(())
    }

    fn terminate(&mut self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.terminated = true;
        state.events = None;
    }
}
