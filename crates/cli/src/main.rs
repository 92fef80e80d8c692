use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use stream_translate_core::config::{Settings, load_settings, to_toml};
use stream_translate_core::logging::{LOG_ENV, init_logging_with_default};
use stream_translate_core::{
    APP_NAME, Coordinator, CoordinatorUpdate, Outcome, ProcessWorkerConfig, ProcessWorkerFactory,
    SessionState, TranslationRequest,
};
use tokio::io::AsyncReadExt;
use tokio::time::{Duration, timeout};

#[derive(Parser)]
#[command(name = "stream-translate")]
#[command(about = "Streamed machine translation through a worker process", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    Translate {
        /// Text to translate; read from stdin when omitted.
        text: Option<String>,
        #[arg(long)]
        src: Option<String>,
        #[arg(long)]
        tgt: Option<String>,
    },
    /// Start the worker and wait until its model is loaded.
    Warmup,
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Get,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging_with_default("warn");
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| {
            std::env::var("STREAM_TRANSLATE_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        })
        .unwrap_or_else(default_config_dir);
    tracing::debug!(
        event = "config.resolved",
        config_dir = %config_dir.display(),
        "config.resolved"
    );

    let view = View {
        json: cli.json,
        events: cli.events,
    };

    match cli.cmd {
        Command::Translate { text, src, tgt } => {
            translate_run(&config_dir, text, src, tgt, view).await
        }
        Command::Warmup => warmup_run(&config_dir, view).await,
        Command::Settings { cmd } => match cmd {
            SettingsCmd::Get => settings_get(&config_dir, cli.json),
        },
    }
}

fn settings_get(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let settings = load_settings(config_dir).map_err(map_core_err)?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "configPath": stream_translate_core::config::config_path(config_dir),
                "settings": settings,
            })
        );
    } else {
        print!("{}", to_toml(&settings).map_err(map_core_err)?);
    }
    Ok(())
}

async fn warmup_run(config_dir: &Path, view: View) -> Result<(), CliError> {
    let settings = load_settings(config_dir).map_err(map_core_err)?;
    let mut coord = new_coordinator(&settings);
    wait_ready(&mut coord, &settings, view).await?;

    if view.json {
        println!(
            "{}",
            serde_json::json!({ "sessionId": coord.session_id(), "state": coord.state() })
        );
    } else if !view.events {
        println!("ready");
    }
    coord.close();
    Ok(())
}

async fn translate_run(
    config_dir: &Path,
    text: Option<String>,
    src: Option<String>,
    tgt: Option<String>,
    view: View,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir).map_err(map_core_err)?;

    let text = match text {
        Some(t) => t,
        None => read_stdin().await?,
    };
    let request = TranslationRequest::new(
        text,
        src.unwrap_or_else(|| settings.languages.source.clone()),
        tgt.unwrap_or_else(|| settings.languages.target.clone()),
    );
    let (src_lang, tgt_lang) = (
        request.source_language.clone(),
        request.target_language.clone(),
    );

    let mut coord = new_coordinator(&settings);
    wait_ready(&mut coord, &settings, view).await?;

    let request_id = coord.translate(request).map_err(map_core_err)?;

    let output = loop {
        let update = coord
            .next_update()
            .await
            .map_err(map_core_err)?
            .ok_or_else(|| worker_exited(&coord))?;
        view.render(&coord, &update);

        match update.outcome {
            Outcome::Completed { output, .. } => break output,
            Outcome::Failed { message, .. } => {
                return Err(CliError::retryable("worker.failed", message));
            }
            _ => {}
        }
    };
    coord.close();

    if view.json {
        println!(
            "{}",
            serde_json::json!({
                "requestId": request_id,
                "srcLang": src_lang,
                "tgtLang": tgt_lang,
                "output": output,
            })
        );
    } else if !view.events {
        println!();
    }
    Ok(())
}

fn new_coordinator(settings: &Settings) -> Coordinator {
    let log_env_set =
        std::env::var_os(LOG_ENV).is_some() || std::env::var_os("RUST_LOG").is_some();
    let config = worker_process_config(settings, log_env_set);
    Coordinator::new(Box::new(ProcessWorkerFactory::new(config)))
}

/// Quiets the worker's stderr logs to `warn` unless the user chose a level.
fn worker_process_config(settings: &Settings, log_env_set: bool) -> ProcessWorkerConfig {
    let mut config = settings.worker.process_config();
    if !log_env_set {
        config.env.push((LOG_ENV.to_string(), "warn".to_string()));
    }
    config
}

async fn wait_ready(
    coord: &mut Coordinator,
    settings: &Settings,
    view: View,
) -> Result<(), CliError> {
    coord.establish().map_err(map_core_err)?;

    let limit = Duration::from_secs(settings.worker.ready_timeout_secs);
    let res = timeout(limit, async {
        while coord.state() != SessionState::Ready {
            let update = coord
                .next_update()
                .await
                .map_err(map_core_err)?
                .ok_or_else(|| worker_exited(coord))?;
            view.render(coord, &update);

            if let Outcome::Failed { message, .. } = update.outcome {
                return Err(CliError::new("worker.load_failed", message));
            }
        }
        Ok::<(), CliError>(())
    })
    .await;

    match res {
        Ok(r) => r,
        Err(_) => Err(CliError::retryable(
            "worker.timeout",
            format!(
                "worker not ready after {}s",
                settings.worker.ready_timeout_secs
            ),
        )),
    }
}

fn worker_exited(coord: &Coordinator) -> CliError {
    CliError::retryable(
        "worker.exited",
        format!("worker exited while session was {}", coord.state()),
    )
}

async fn read_stdin() -> Result<String, CliError> {
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .map_err(|e| CliError::new("input.read_failed", e.to_string()))?;
    Ok(buf.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Debug, Clone, Copy)]
struct View {
    json: bool,
    events: bool,
}

impl View {
    fn render(&self, coord: &Coordinator, update: &CoordinatorUpdate) {
        if self.events {
            for line in event_lines(coord, update) {
                println!("{line}");
            }
            return;
        }
        if self.json {
            return;
        }

        match &update.outcome {
            Outcome::Progress => {
                let mut err = std::io::stderr();
                match coord.registry().overall_progress() {
                    Some(p) => {
                        let _ = write!(
                            err,
                            "\rLoading models... {p:5.1}% ({} files)",
                            coord.progress().len()
                        );
                    }
                    None => {
                        let _ = writeln!(err, "\rLoading models... done{:14}", "");
                    }
                }
                let _ = err.flush();
            }
            Outcome::Fragment { text } => {
                let mut out = std::io::stdout();
                let _ = write!(out, "{text}");
                let _ = out.flush();
            }
            Outcome::Ready
            | Outcome::Completed { .. }
            | Outcome::Failed { .. }
            | Outcome::Ignored { .. } => {}
        }
    }
}

fn event_lines(coord: &Coordinator, update: &CoordinatorUpdate) -> Vec<serde_json::Value> {
    let session_id = coord.session_id();
    let mut lines = Vec::new();

    if let Some(t) = update.transition {
        lines.push(serde_json::json!({
            "type": "session.state",
            "sessionId": session_id,
            "from": t.from,
            "to": t.to,
        }));
    }

    match &update.outcome {
        Outcome::Progress => lines.push(serde_json::json!({
            "type": "model.progress",
            "sessionId": session_id,
            "files": coord.progress(),
            "overall": coord.registry().overall_progress(),
        })),
        Outcome::Ready => {}
        Outcome::Fragment { text } => lines.push(serde_json::json!({
            "type": "translate.update",
            "sessionId": session_id,
            "requestId": coord.active_request(),
            "output": text,
        })),
        Outcome::Completed { request_id, output } => lines.push(serde_json::json!({
            "type": "translate.complete",
            "sessionId": session_id,
            "requestId": request_id,
            "output": output,
        })),
        Outcome::Failed {
            request_id,
            message,
        } => lines.push(serde_json::json!({
            "type": "translate.error",
            "sessionId": session_id,
            "requestId": request_id,
            "message": message,
        })),
        Outcome::Ignored { .. } => {}
    }
    lines
}

fn default_config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join(APP_NAME);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn map_core_err(e: stream_translate_core::Error) -> CliError {
    use stream_translate_core::Error;

    match e {
        Error::InvalidConfig { message } => CliError::new("config.invalid", message),
        Error::WorkerSpawn { message } => CliError::new("worker.spawn_failed", message),
        Error::ChannelNotEstablished | Error::ChannelClosed => {
            CliError::retryable("worker.unavailable", e.to_string())
        }
        Error::Rejected { state } => CliError::retryable(
            "session.busy",
            format!("translate rejected while session is {state}"),
        ),
        Error::Protocol { message } => CliError::new("protocol.invalid", message),
        other => CliError::new("unknown", other.to_string()),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| {
        r#"{"code":"unknown","message":"json encode failed","details":{},"retryable":false}"#
            .to_string()
    });
    let _ = writeln!(std::io::stderr(), "{json}");
}
