mod error;

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod output;
pub mod progress;
pub mod protocol;
pub mod session;

pub const APP_NAME: &str = "stream-translate";

pub use channel::{
    InMemoryWorkerFactory, ProcessWorkerConfig, ProcessWorkerFactory, Worker, WorkerChannel,
    WorkerFactory,
};
pub use coordinator::{Coordinator, CoordinatorSnapshot, CoordinatorUpdate, Outcome};
pub use error::{Error, Result};
pub use output::OutputAccumulator;
pub use progress::{ProgressRecord, ProgressRegistry};
pub use protocol::{RequestId, TranslationRequest, WorkerEvent};
pub use session::{SessionState, SessionStateMachine, Transition};
