use serde::Serialize;

use crate::channel::{WorkerChannel, WorkerFactory};
use crate::output::OutputAccumulator;
use crate::progress::{ProgressRecord, ProgressRegistry};
use crate::protocol::{RequestId, TranslationRequest, WorkerEvent};
use crate::session::{SessionState, SessionStateMachine, Transition};
use crate::Result;

/// What a single dispatched event did to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The download registry changed.
    Progress,
    /// The worker reported its pipeline is usable.
    Ready,
    /// A fragment was appended to the output.
    Fragment { text: String },
    /// The active request finished with the accumulated output.
    Completed {
        request_id: Option<RequestId>,
        output: String,
    },
    /// The worker reported a failure. The session stays usable.
    Failed {
        request_id: Option<RequestId>,
        message: String,
    },
    Ignored { reason: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorUpdate {
    pub outcome: Outcome,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub progress: Vec<ProgressRecord>,
    pub output: String,
    pub active_request: Option<RequestId>,
}

/// Owns the single worker channel and every piece of client-side state
/// derived from its events.
///
/// All methods take `&mut self`: the coordinator lives on one task and is
/// fed events one at a time, so nothing here locks.
pub struct Coordinator {
    session_id: String,
    channel: WorkerChannel,
    registry: ProgressRegistry,
    session: SessionStateMachine,
    output: OutputAccumulator,
    active: Option<RequestId>,
    next_request_id: u64,
}

impl Coordinator {
    pub fn new(factory: Box<dyn WorkerFactory>) -> Self {
        Self {
            session_id: format!("ses_{}", uuid::Uuid::new_v4()),
            channel: WorkerChannel::new(factory),
            registry: ProgressRegistry::new(),
            session: SessionStateMachine::new(),
            output: OutputAccumulator::new(),
            active: None,
            next_request_id: 1,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn progress(&self) -> &[ProgressRecord] {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &ProgressRegistry {
        &self.registry
    }

    pub fn output(&self) -> &str {
        self.output.value()
    }

    pub fn active_request(&self) -> Option<RequestId> {
        self.active
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            session_id: self.session_id.clone(),
            state: self.state(),
            progress: self.registry.snapshot().to_vec(),
            output: self.output.value().to_string(),
            active_request: self.active,
        }
    }

    /// Starts the worker if it is not running yet. A failure here is fatal to
    /// this coordinator and leaves the session in [`SessionState::Unknown`].
    pub fn establish(&mut self) -> Result<()> {
        self.channel.establish()
    }

    /// Submits `request` if the session is [`SessionState::Ready`].
    ///
    /// Any other state rejects the call before anything is touched: the
    /// output is not cleared and nothing is sent. The channel is established
    /// on first use. The output is cleared only once the request is on its
    /// way, so a failed send leaves the previous result readable.
    pub fn translate(&mut self, mut request: TranslationRequest) -> Result<RequestId> {
        if let Err(e) = self.session.begin_request() {
            tracing::warn!(
                event = "translate.rejected",
                session_id = %self.session_id,
                state = %self.state(),
                "translate.rejected"
            );
            return Err(e);
        }

        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        request.request_id = Some(id);

        let sent = self
            .channel
            .establish()
            .and_then(|()| self.channel.send(&request));
        if let Err(e) = sent {
            self.session.abort_request();
            tracing::error!(
                event = "translate.send_failed",
                session_id = %self.session_id,
                request_id = %id,
                error = %e,
                "translate.send_failed"
            );
            return Err(e);
        }
        self.output.reset();
        self.active = Some(id);

        tracing::info!(
            event = "translate.sent",
            session_id = %self.session_id,
            request_id = %id,
            src_lang = %request.source_language,
            tgt_lang = %request.target_language,
            chars = request.text.chars().count(),
            "translate.sent"
        );
        Ok(id)
    }

    /// Applies one worker event. Events must be fed in arrival order.
    pub fn on_event(&mut self, event: WorkerEvent) -> CoordinatorUpdate {
        if let Some(id) = event.request_id()
            && self.active != Some(id)
        {
            tracing::debug!(
                event = "worker.event_stale",
                session_id = %self.session_id,
                kind = event.kind(),
                request_id = %id,
                "worker.event_stale"
            );
            return CoordinatorUpdate {
                outcome: Outcome::Ignored {
                    reason: "stale_request",
                },
                transition: None,
            };
        }

        let busy = self.state() == SessionState::Busy;
        let outcome = match &event {
            WorkerEvent::Initiate { file, name } => {
                self.registry.on_initiate(file, name.as_deref());
                Outcome::Progress
            }
            WorkerEvent::Progress {
                file,
                progress,
                loaded,
                total,
            } => {
                self.registry.on_progress(file, *progress, *loaded, *total);
                Outcome::Progress
            }
            WorkerEvent::Done { file } => {
                self.registry.on_done(file);
                Outcome::Progress
            }
            WorkerEvent::Ready => Outcome::Ready,
            WorkerEvent::Update { output, .. } => {
                if busy {
                    self.output.append(output);
                    Outcome::Fragment {
                        text: output.clone(),
                    }
                } else {
                    Outcome::Ignored { reason: "not_busy" }
                }
            }
            WorkerEvent::Complete { output, .. } => {
                if busy {
                    // Workers that do not stream send the whole result here.
                    if self.output.fragments() == 0
                        && let Some(full) = output
                    {
                        self.output.append(full);
                    }
                    Outcome::Completed {
                        request_id: self.active.take(),
                        output: self.output.value().to_string(),
                    }
                } else {
                    Outcome::Ignored { reason: "not_busy" }
                }
            }
            WorkerEvent::Error { message, .. } => {
                let request_id = if busy { self.active.take() } else { None };
                tracing::warn!(
                    event = "worker.error",
                    session_id = %self.session_id,
                    error_message = %message,
                    "worker.error"
                );
                Outcome::Failed {
                    request_id,
                    message: message.clone(),
                }
            }
            WorkerEvent::Unknown => Outcome::Ignored {
                reason: "unknown_status",
            },
        };

        let transition = self.session.on_event(&event);
        if let Some(t) = transition {
            tracing::info!(
                event = "session.transition",
                session_id = %self.session_id,
                from = %t.from,
                to = %t.to,
                cause = event.kind(),
                "session.transition"
            );
        }
        if let Outcome::Ignored { reason } = &outcome {
            tracing::debug!(
                event = "worker.event_ignored",
                session_id = %self.session_id,
                kind = event.kind(),
                reason = *reason,
                "worker.event_ignored"
            );
        }

        CoordinatorUpdate {
            outcome,
            transition,
        }
    }

    /// Waits for the next worker event and dispatches it, establishing the
    /// channel first if needed. `Ok(None)` means the worker has gone away.
    pub async fn next_update(&mut self) -> Result<Option<CoordinatorUpdate>> {
        self.channel.establish()?;
        match self.channel.recv().await {
            Some(event) => Ok(Some(self.on_event(event))),
            None => {
                tracing::warn!(
                    event = "worker.gone",
                    session_id = %self.session_id,
                    state = %self.state(),
                    "worker.gone"
                );
                Ok(None)
            }
        }
    }

    /// Tears the worker down. Also happens on drop.
    pub fn close(&mut self) {
        self.channel.close();
        self.registry.clear();
    }
}
