use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EventSender, Worker, WorkerFactory};
use crate::protocol::{self, TranslationRequest};
use crate::{Error, Result};

pub const DEFAULT_WORKER_BIN: &str = "stream-translate-worker";

#[derive(Debug, Clone)]
pub struct ProcessWorkerConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ProcessWorkerConfig {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }
}

/// Runs the worker as a child process speaking newline-delimited JSON on
/// stdin/stdout. The child's stderr is inherited.
#[derive(Debug, Clone)]
pub struct ProcessWorkerFactory {
    config: ProcessWorkerConfig,
}

impl ProcessWorkerFactory {
    pub fn new(config: ProcessWorkerConfig) -> Self {
        Self { config }
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn kind(&self) -> &str {
        "process"
    }

    fn spawn(&self, events: EventSender) -> Result<Box<dyn Worker>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::WorkerSpawn {
            message: format!("no tokio runtime: {e}"),
        })?;

        let path = &self.config.command;
        let mut child = Command::new(path)
            .args(&self.config.args)
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerSpawn {
                message: format!("{e} (path={})", path.display()),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::WorkerSpawn {
            message: "worker missing stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::WorkerSpawn {
            message: "worker missing stdout".to_string(),
        })?;

        tracing::info!(
            event = "worker.spawned",
            pid = child.id(),
            path = %path.display(),
            "worker.spawned"
        );

        let (lines_tx, lines_rx) = mpsc::unbounded_channel::<String>();
        let writer = runtime.spawn(write_requests(stdin, lines_rx));
        let reader = runtime.spawn(read_events(stdout, events));

        Ok(Box::new(ProcessWorker {
            child,
            lines: Some(lines_tx),
            writer: Some(writer),
            reader: Some(reader),
        }))
    }
}

struct ProcessWorker {
    child: Child,
    lines: Option<mpsc::UnboundedSender<String>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Worker for ProcessWorker {
    fn kind(&self) -> &str {
        "process"
    }

    fn post(&mut self, request: &TranslationRequest) -> Result<()> {
        let line = protocol::encode_request(request)?;
        let lines = self.lines.as_ref().ok_or(Error::ChannelClosed)?;
        lines.send(line).map_err(|_| Error::ChannelClosed)
    }

    fn terminate(&mut self) {
        self.lines = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        // Already-exited children report an error here; nothing left to release.
        let _ = self.child.start_kill();
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn write_requests(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        let res = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = res {
            tracing::warn!(event = "worker.write_failed", error = %e, "worker.write_failed");
            return;
        }
    }
}

async fn read_events(stdout: ChildStdout, events: EventSender) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(event = "worker.stdout_closed", "worker.stdout_closed");
                return;
            }
            Err(e) => {
                tracing::warn!(event = "worker.read_failed", error = %e, "worker.read_failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match protocol::decode_event(&line) {
            Ok(ev) => {
                if events.send(ev).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(
                    event = "worker.event_invalid",
                    error = %e,
                    line = %line,
                    "worker.event_invalid"
                );
            }
        }
    }
}

/// Worker binary next to the running executable, else the bare name for a
/// PATH lookup.
pub fn default_worker_command() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| sibling_worker(&exe))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKER_BIN))
}

fn sibling_worker(exe: &Path) -> Option<PathBuf> {
    let name = format!("{DEFAULT_WORKER_BIN}{}", std::env::consts::EXE_SUFFIX);
    let sibling = exe.with_file_name(name);
    if sibling.exists() { Some(sibling) } else { None }
}
