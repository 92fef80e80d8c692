use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::WorkerEvent;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No worker event has arrived yet.
    #[default]
    Unknown,
    /// Model assets are being fetched.
    Loading,
    /// The worker accepts a translation request.
    Ready,
    /// A request was sent and its `complete` has not arrived.
    Busy,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Readiness view of the worker, driven by its events plus the one external
/// transition `Ready -> Busy` taken when a request is accepted.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn can_translate(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Guarded `Ready -> Busy`. Any other state rejects without changing.
    pub fn begin_request(&mut self) -> Result<Transition> {
        if !self.can_translate() {
            return Err(Error::Rejected { state: self.state });
        }
        Ok(self.set(SessionState::Busy))
    }

    /// Undo [`Self::begin_request`] when the request never reached the worker.
    pub fn abort_request(&mut self) -> Option<Transition> {
        (self.state == SessionState::Busy).then(|| self.set(SessionState::Ready))
    }

    pub fn on_event(&mut self, event: &WorkerEvent) -> Option<Transition> {
        use SessionState::*;

        let next = match (self.state, event) {
            (Unknown, WorkerEvent::Initiate { .. }) => Loading,
            (Unknown | Loading, WorkerEvent::Ready) => Ready,
            (Busy, WorkerEvent::Complete { .. } | WorkerEvent::Error { .. }) => Ready,
            _ => return None,
        };
        Some(self.set(next))
    }

    fn set(&mut self, to: SessionState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }
}
