use std::path::PathBuf;

use stream_translate_core::{
    Coordinator, Outcome, ProcessWorkerConfig, ProcessWorkerFactory, SessionState,
    TranslationRequest,
};
use tokio::time::{Duration, timeout};

fn worker_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_stream-translate-worker"))
}

fn coordinator(args: &[&str]) -> Coordinator {
    let mut config = ProcessWorkerConfig::new(worker_bin());
    config.args = args.iter().map(|s| s.to_string()).collect();
    config
        .env
        .push(("STREAM_TRANSLATE_LOG".to_string(), "off".to_string()));
    Coordinator::new(Box::new(ProcessWorkerFactory::new(config)))
}

async fn wait_ready(coord: &mut Coordinator) -> Vec<Outcome> {
    let mut seen = Vec::new();
    while coord.state() != SessionState::Ready {
        let u = timeout(Duration::from_secs(10), coord.next_update())
            .await
            .expect("worker became ready in time")
            .unwrap()
            .expect("worker still running");
        seen.push(u.outcome);
    }
    seen
}

async fn wait_completed(coord: &mut Coordinator) -> (Vec<String>, String) {
    let mut fragments = Vec::new();
    loop {
        let u = timeout(Duration::from_secs(10), coord.next_update())
            .await
            .expect("request finished in time")
            .unwrap()
            .expect("worker still running");
        match u.outcome {
            Outcome::Fragment { text } => fragments.push(text),
            Outcome::Completed { output, .. } => return (fragments, output),
            Outcome::Failed { message, .. } => panic!("worker failed: {message}"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn streams_a_translation_from_the_worker_process() {
    let mut coord = coordinator(&[]);
    coord.establish().unwrap();

    let seen = wait_ready(&mut coord).await;
    assert_eq!(seen, [Outcome::Ready]);

    coord
        .translate(TranslationRequest::new(
            "I love walking my dog.",
            "eng_Latn",
            "fra_Latn",
        ))
        .unwrap();
    assert_eq!(coord.state(), SessionState::Busy);

    let (fragments, output) = wait_completed(&mut coord).await;
    assert_eq!(fragments, ["I ", "love ", "walking ", "my ", "dog."]);
    assert_eq!(output, "I love walking my dog.");
    assert_eq!(coord.output(), output);
    assert_eq!(coord.state(), SessionState::Ready);

    coord
        .translate(TranslationRequest::new("again", "eng_Latn", "deu_Latn"))
        .unwrap();
    let (_, output) = wait_completed(&mut coord).await;
    assert_eq!(output, "again");
}

#[tokio::test]
async fn reports_model_download_progress_before_ready() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.json"), b"{\"model_type\":\"m2m_100\"}").unwrap();
    std::fs::write(dir.path().join("tokenizer.json"), vec![b'x'; 200_000]).unwrap();

    let model_dir = dir.path().display().to_string();
    let mut coord = coordinator(&["--model-dir", &model_dir]);
    coord.establish().unwrap();

    let first = timeout(Duration::from_secs(10), coord.next_update())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.outcome, Outcome::Progress);
    assert_eq!(first.transition.unwrap().to, SessionState::Loading);
    assert_eq!(coord.progress()[0].file, "config.json");

    let seen = wait_ready(&mut coord).await;
    assert_eq!(seen.last(), Some(&Outcome::Ready));
    assert!(coord.progress().is_empty());
}

#[tokio::test]
async fn close_stops_the_worker() {
    let mut coord = coordinator(&[]);
    coord.establish().unwrap();
    wait_ready(&mut coord).await;

    coord.close();
    assert!(coord.next_update().await.is_err());
    assert!(
        coord
            .translate(TranslationRequest::new("x", "eng_Latn", "fra_Latn"))
            .is_err()
    );
}
