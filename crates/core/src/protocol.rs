//! Wire contract between the coordinator and a translation worker.
//!
//! Both directions are newline-delimited JSON. Requests flow to the worker,
//! status events flow back, one object per line, discriminated by `status`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifier the coordinator attaches to each accepted request so that
/// events from an abandoned request can be told apart from the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    #[serde(rename = "src_lang", alias = "sourceLanguage")]
    pub source_language: String,
    #[serde(rename = "tgt_lang", alias = "targetLanguage")]
    pub target_language: String,
    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<RequestId>,
}

impl TranslationRequest {
    pub fn new(
        text: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            request_id: None,
        }
    }
}

/// Status event emitted by the worker.
///
/// Unrecognized `status` values decode to [`WorkerEvent::Unknown`] so newer
/// workers can add event kinds without breaking older coordinators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A model asset started downloading.
    Initiate {
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Download progress (percent) for a previously initiated file.
    Progress {
        file: String,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loaded: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    /// A model asset finished downloading.
    Done { file: String },
    /// The inference pipeline is constructed and accepts requests.
    Ready,
    /// One fragment of translated text.
    Update {
        output: String,
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    /// Generation for the current request finished.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    /// Generation for the current request failed.
    Error {
        message: String,
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    #[serde(other)]
    Unknown,
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "initiate",
            Self::Progress { .. } => "progress",
            Self::Done { .. } => "done",
            Self::Ready => "ready",
            Self::Update { .. } => "update",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Request the event belongs to, for request-scoped events that carry one.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Update { request_id, .. }
            | Self::Complete { request_id, .. }
            | Self::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

pub fn encode_request(request: &TranslationRequest) -> Result<String> {
    serde_json::to_string(request).map_err(|e| Error::Protocol {
        message: format!("request json failed: {e}"),
    })
}

pub fn decode_request(line: &str) -> Result<TranslationRequest> {
    serde_json::from_str(line.trim_end()).map_err(|e| Error::Protocol {
        message: format!("invalid request json: {e}"),
    })
}

pub fn encode_event(event: &WorkerEvent) -> Result<String> {
    serde_json::to_string(event).map_err(|e| Error::Protocol {
        message: format!("event json failed: {e}"),
    })
}

pub fn decode_event(line: &str) -> Result<WorkerEvent> {
    serde_json::from_str(line.trim_end()).map_err(|e| Error::Protocol {
        message: format!("invalid event json: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_worker_field_names() {
        let mut req = TranslationRequest::new("hi", "eng_Latn", "fra_Latn");
        req.request_id = Some(RequestId(7));

        let v: serde_json::Value = serde_json::from_str(&encode_request(&req).unwrap()).unwrap();
        assert_eq!(v["text"], "hi");
        assert_eq!(v["src_lang"], "eng_Latn");
        assert_eq!(v["tgt_lang"], "fra_Latn");
        assert_eq!(v["requestId"], 7);
    }

    #[test]
    fn request_accepts_camel_case_language_fields() {
        let req = decode_request(
            r#"{"text":"","sourceLanguage":"deu_Latn","targetLanguage":"spa_Latn"}"#,
        )
        .unwrap();
        assert_eq!(req.text, "");
        assert_eq!(req.source_language, "deu_Latn");
        assert_eq!(req.target_language, "spa_Latn");
        assert!(req.request_id.is_none());
    }

    #[test]
    fn decodes_every_status() {
        let cases = [
            (r#"{"status":"initiate","file":"a.bin","name":"m"}"#, "initiate"),
            (r#"{"status":"progress","file":"a.bin","progress":12.5}"#, "progress"),
            (r#"{"status":"done","file":"a.bin"}"#, "done"),
            (r#"{"status":"ready"}"#, "ready"),
            (r#"{"status":"update","output":"Bon"}"#, "update"),
            (r#"{"status":"complete"}"#, "complete"),
            (r#"{"status":"error","message":"boom"}"#, "error"),
        ];
        for (line, kind) in cases {
            assert_eq!(decode_event(line).unwrap().kind(), kind, "{line}");
        }
    }

    #[test]
    fn progress_keeps_optional_byte_counts() {
        let ev = decode_event(
            r#"{"status":"progress","name":"nllb","file":"onnx/encoder.onnx","progress":50,"loaded":5,"total":10}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            WorkerEvent::Progress {
                file: "onnx/encoder.onnx".to_string(),
                progress: 50.0,
                loaded: Some(5),
                total: Some(10),
            }
        );
    }

    #[test]
    fn unknown_status_is_not_an_error() {
        let ev = decode_event(r#"{"status":"warming_up","eta":3}"#).unwrap();
        assert_eq!(ev, WorkerEvent::Unknown);
    }

    #[test]
    fn missing_status_is_a_protocol_error() {
        assert!(matches!(
            decode_event(r#"{"output":"x"}"#),
            Err(Error::Protocol { .. })
        ));
        assert!(decode_event("not json").is_err());
    }

    #[test]
    fn request_id_is_read_from_scoped_events() {
        let ev = decode_event(r#"{"status":"update","output":"x","requestId":3}"#).unwrap();
        assert_eq!(ev.request_id(), Some(RequestId(3)));
        assert_eq!(WorkerEvent::Ready.request_id(), None);
    }
}
