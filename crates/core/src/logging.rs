use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub const LOG_ENV: &str = "STREAM_TRANSLATE_LOG";

fn build_env_filter_from(
    app_log: Option<&str>,
    rust_log: Option<&str>,
    default_level: &str,
) -> EnvFilter {
    let default = || EnvFilter::new(default_level);

    if let Some(v) = app_log {
        return EnvFilter::try_new(v).unwrap_or_else(|_| default());
    }
    if let Some(v) = rust_log {
        return EnvFilter::try_new(v).unwrap_or_else(|_| default());
    }
    default()
}

fn build_env_filter(default_level: &str) -> EnvFilter {
    build_env_filter_from(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
        default_level,
    )
}

/// Installs the global JSON subscriber on stderr. Stdout stays free for
/// translated text and NDJSON events. Safe to call more than once.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with `default_level` used when neither
/// `STREAM_TRANSLATE_LOG` nor `RUST_LOG` is set.
pub fn init_logging_with_default(default_level: &str) {
    TRACING_INIT.get_or_init(|| {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry()
            .with(build_env_filter(default_level))
            .with(layer);
        let _ = subscriber.try_init();
    });
}
