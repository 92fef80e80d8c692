use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::channel::{ProcessWorkerConfig, default_worker_command};
use crate::{Error, Result};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub languages: LanguageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_worker_command")]
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSettings {
    pub source: String,
    pub target: String,
}

fn schema_version() -> u32 {
    SETTINGS_SCHEMA_VERSION
}

fn default_ready_timeout_secs() -> u64 {
    600
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: Vec::new(),
            model_dir: None,
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            source: "eng_Latn".to_string(),
            target: "fra_Latn".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            worker: WorkerSettings::default(),
            languages: LanguageSettings::default(),
        }
    }
}

impl WorkerSettings {
    /// Command line for the worker process. `model_dir` is passed as
    /// `--model-dir` after any configured args.
    pub fn process_config(&self) -> ProcessWorkerConfig {
        let mut config = ProcessWorkerConfig::new(&self.command);
        config.args = self.args.clone();
        if let Some(dir) = &self.model_dir {
            config.args.push("--model-dir".to_string());
            config.args.push(dir.display().to_string());
        }
        config
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    let settings = parse_settings(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn parse_settings(text: &str) -> std::result::Result<Settings, toml::de::Error> {
    let raw: toml::Value = toml::from_str(text)?;
    let version = raw
        .get("version")
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok());

    match version {
        Some(SETTINGS_SCHEMA_VERSION) | None => {
            let mut s: Settings = toml::from_str(text)?;
            normalize_settings(&mut s);
            Ok(s)
        }
        Some(other) => Err(toml::de::Error::custom(format!(
            "unsupported settings schema version: {other} (expected {SETTINGS_SCHEMA_VERSION})"
        ))),
    }
}

fn normalize_settings(settings: &mut Settings) {
    settings.languages.source = settings.languages.source.trim().to_string();
    settings.languages.target = settings.languages.target.trim().to_string();
}

pub fn to_toml(settings: &Settings) -> Result<String> {
    validate_settings(settings)?;
    toml::to_string(settings).map_err(|e| Error::InvalidConfig {
        message: format!("config encode failed: {e}"),
    })
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.version != SETTINGS_SCHEMA_VERSION {
        return Err(Error::InvalidConfig {
            message: format!(
                "settings.version must be {SETTINGS_SCHEMA_VERSION} (got {})",
                settings.version
            ),
        });
    }

    if settings.worker.command.as_os_str().is_empty() {
        return Err(Error::InvalidConfig {
            message: "worker.command must not be empty".to_string(),
        });
    }

    if settings.worker.ready_timeout_secs == 0 {
        return Err(Error::InvalidConfig {
            message: "worker.ready_timeout_secs must be >= 1".to_string(),
        });
    }

    if settings.languages.source.is_empty() || settings.languages.target.is_empty() {
        return Err(Error::InvalidConfig {
            message: "languages.source and languages.target must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings(dir.path()).unwrap();
        assert_eq!(s.version, SETTINGS_SCHEMA_VERSION);
        assert_eq!(s.languages.source, "eng_Latn");
        assert_eq!(s.languages.target, "fra_Latn");
        assert_eq!(s.worker.ready_timeout_secs, 600);
        assert!(s.worker.model_dir.is_none());
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
version = 1

[worker]
command = "/opt/translate/worker"
args = ["--quiet"]
model_dir = "/var/cache/nllb"
ready_timeout_secs = 30

[languages]
source = " deu_Latn "
target = "spa_Latn"
"#;
        let s = parse_settings(text).unwrap();
        assert_eq!(s.worker.command, PathBuf::from("/opt/translate/worker"));
        assert_eq!(s.worker.ready_timeout_secs, 30);
        assert_eq!(s.languages.source, "deu_Latn");

        let pc = s.worker.process_config();
        assert_eq!(pc.args, ["--quiet", "--model-dir", "/var/cache/nllb"]);
    }

    #[test]
    fn unversioned_file_is_read_as_current_schema() {
        let s = parse_settings("[languages]\nsource = \"eng_Latn\"\ntarget = \"jpn_Jpan\"\n")
            .unwrap();
        assert_eq!(s.version, SETTINGS_SCHEMA_VERSION);
        assert_eq!(s.languages.target, "jpn_Jpan");
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_settings("version = 9\n").unwrap_err();
        assert!(err.to_string().contains("unsupported settings schema version"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut s = Settings::default();
        s.worker.ready_timeout_secs = 0;
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.languages.target = String::new();
        assert!(validate_settings(&s).is_err());

        let mut s = Settings::default();
        s.worker.command = PathBuf::new();
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn toml_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Settings::default();
        s.languages.target = "ita_Latn".to_string();
        s.worker.model_dir = Some(dir.path().join("models"));

        std::fs::write(config_path(dir.path()), to_toml(&s).unwrap()).unwrap();
        let got = load_settings(dir.path()).unwrap();
        assert_eq!(got.languages.target, "ita_Latn");
        assert_eq!(got.worker.model_dir, s.worker.model_dir);
    }
}
