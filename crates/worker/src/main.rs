//! Reference translation worker.
//!
//! Speaks the coordinator protocol on stdin/stdout: on startup it reads every
//! file under `--model-dir`, reporting `initiate` / `progress` / `done` for
//! each, then emits `ready`. Each request is answered by streaming the input
//! back word by word as `update` events followed by `complete`. There is no
//! model behind it; it exists to exercise coordinators end to end.

use std::path::{Path, PathBuf};

use clap::Parser;
use stream_translate_core::logging::init_logging;
use stream_translate_core::protocol::{self, RequestId, TranslationRequest, WorkerEvent};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{Duration, sleep};
use walkdir::WalkDir;

const DEFAULT_MODEL_NAME: &str = "nllb-200-distilled-600M";
const READ_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "stream-translate-worker")]
#[command(about = "Reference worker for the stream-translate protocol", long_about = None)]
struct Args {
    /// Directory whose files are loaded (with progress) before `ready`.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    model_name: String,

    /// Pause between streamed fragments.
    #[arg(long, default_value_t = 0)]
    fragment_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    init_logging();
    let args = Args::parse();

    let mut out = tokio::io::stdout();

    if let Err(e) = load_model(&mut out, &args).await {
        tracing::error!(event = "model.load_failed", error = %e, "model.load_failed");
        let _ = write_event(
            &mut out,
            &WorkerEvent::Error {
                message: format!("model load failed: {e}"),
                request_id: None,
            },
        )
        .await;
        return;
    }
    if write_event(&mut out, &WorkerEvent::Ready).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(event = "stdin.read_failed", error = %e, "stdin.read_failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req = match protocol::decode_request(&line) {
            Ok(req) => req,
            Err(e) => {
                let ev = WorkerEvent::Error {
                    message: e.to_string(),
                    request_id: None,
                };
                if write_event(&mut out, &ev).await.is_err() {
                    return;
                }
                continue;
            }
        };

        if translate(&mut out, &req, args.fragment_delay_ms).await.is_err() {
            return;
        }
    }
}

async fn load_model<W: AsyncWrite + Unpin>(out: &mut W, args: &Args) -> std::io::Result<()> {
    let Some(dir) = &args.model_dir else {
        return Ok(());
    };

    for path in model_files(dir).await? {
        let file = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        load_file(out, &args.model_name, &file, &path).await?;
    }
    Ok(())
}

async fn load_file<W: AsyncWrite + Unpin>(
    out: &mut W,
    model_name: &str,
    file: &str,
    path: &Path,
) -> std::io::Result<()> {
    write_event(
        out,
        &WorkerEvent::Initiate {
            file: file.to_string(),
            name: Some(model_name.to_string()),
        },
    )
    .await?;

    let mut f = tokio::fs::File::open(path).await?;
    let total = f.metadata().await?.len();
    let mut loaded = 0u64;
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = f.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        loaded += n as u64;
        write_event(
            out,
            &WorkerEvent::Progress {
                file: file.to_string(),
                progress: percent(loaded, total),
                loaded: Some(loaded),
                total: Some(total),
            },
        )
        .await?;
    }

    tracing::debug!(event = "model.file_loaded", file, bytes = loaded, "model.file_loaded");
    write_event(
        out,
        &WorkerEvent::Done {
            file: file.to_string(),
        },
    )
    .await
}

/// Regular files under `dir`, recursively, in a stable order. Symlinked
/// files count as files.
async fn model_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || walk_model_files(&dir))
        .await
        .map_err(std::io::Error::other)?
}

fn walk_model_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn percent(loaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (loaded as f64 / total as f64 * 100.0).min(100.0)
}

async fn translate<W: AsyncWrite + Unpin>(
    out: &mut W,
    req: &TranslationRequest,
    fragment_delay_ms: u64,
) -> std::io::Result<()> {
    let request_id: Option<RequestId> = req.request_id;
    tracing::info!(
        event = "translate.start",
        request_id = ?request_id,
        src_lang = %req.source_language,
        tgt_lang = %req.target_language,
        "translate.start"
    );

    for fragment in fragments(&req.text) {
        if fragment_delay_ms > 0 {
            sleep(Duration::from_millis(fragment_delay_ms)).await;
        }
        write_event(
            out,
            &WorkerEvent::Update {
                output: fragment.to_string(),
                request_id,
            },
        )
        .await?;
    }

    write_event(
        out,
        &WorkerEvent::Complete {
            output: None,
            request_id,
        },
    )
    .await
}

/// Splits after each whitespace run so that concatenating the pieces gives
/// back the input exactly.
fn fragments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_space = true;
        } else if in_space {
            out.push(&text[start..i]);
            start = i;
            in_space = false;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

async fn write_event<W: AsyncWrite + Unpin>(
    out: &mut W,
    event: &WorkerEvent,
) -> std::io::Result<()> {
    let line = protocol::encode_event(event)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_concatenate_to_input() {
        for text in ["I love walking my dog.", "  lead", "trail  ", "", "one", "a\tb\nc"] {
            assert_eq!(fragments(text).concat(), text, "{text:?}");
        }
        assert_eq!(fragments("I love  dogs"), ["I ", "love  ", "dogs"]);
        assert!(fragments("").is_empty());
    }

    #[test]
    fn percent_handles_empty_files() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(5, 10), 50.0);
        assert_eq!(percent(10, 10), 100.0);
    }

    #[tokio::test]
    async fn load_model_reports_each_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("onnx")).unwrap();
        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();
        std::fs::write(
            dir.path().join("onnx").join("encoder.onnx"),
            vec![7u8; 3 * READ_CHUNK_BYTES / 2],
        )
        .unwrap();

        let args = Args {
            model_dir: Some(dir.path().to_path_buf()),
            model_name: "test-model".to_string(),
            fragment_delay_ms: 0,
        };
        let mut out = Vec::new();
        load_model(&mut out, &args).await.unwrap();

        let events: Vec<WorkerEvent> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| protocol::decode_event(l).unwrap())
            .collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            ["initiate", "progress", "done", "initiate", "progress", "progress", "done"]
        );
        assert_eq!(
            events[0],
            WorkerEvent::Initiate {
                file: "config.json".to_string(),
                name: Some("test-model".to_string()),
            }
        );
        match &events[5] {
            WorkerEvent::Progress { file, progress, .. } => {
                assert_eq!(file, "onnx/encoder.onnx");
                assert_eq!(*progress, 100.0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_model_files_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = dir.path().join("blobs");
        let snap = dir.path().join("snapshots").join("main");
        std::fs::create_dir_all(&blobs).unwrap();
        std::fs::create_dir_all(&snap).unwrap();
        std::fs::write(blobs.join("abc"), b"weights").unwrap();
        std::fs::write(snap.join("config.json"), b"{}").unwrap();
        std::os::unix::fs::symlink(blobs.join("abc"), snap.join("encoder.onnx")).unwrap();

        let files = walk_model_files(&snap).unwrap();
        assert_eq!(
            files,
            [snap.join("config.json"), snap.join("encoder.onnx")]
        );
    }

    #[tokio::test]
    async fn translate_streams_tagged_fragments() {
        let mut req = TranslationRequest::new("hello big world", "eng_Latn", "fra_Latn");
        req.request_id = Some(RequestId(4));

        let mut out = Vec::new();
        translate(&mut out, &req, 0).await.unwrap();

        let events: Vec<WorkerEvent> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| protocol::decode_event(l).unwrap())
            .collect();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.request_id() == Some(RequestId(4))));
        assert_eq!(events[3].kind(), "complete");
    }
}
