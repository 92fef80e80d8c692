use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start worker: {message}")]
    WorkerSpawn { message: String },

    #[error("worker channel not established")]
    ChannelNotEstablished,

    #[error("worker channel closed")]
    ChannelClosed,

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("translate rejected: session is {state}")]
    Rejected { state: SessionState },
}
