//! Response bodies.
//!
//! Every endpoint answers with JSON, including failures. Input problems are
//! reported with 400 and no traceback; everything else with 500 and the full
//! error chain.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lora_store::{AdapterSummary, NameError, TrainingMethod};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::translate::TranslateError;
use crate::inference::AudioFormat;
use crate::training::TrainInputError;

/// `GET /loras`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorasResponse {
    pub loras: Vec<AdapterSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Succeeded,
    Completed,
    Failed,
}

/// Successful `POST /generate`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerateResponse {
    pub status: Status,
    /// Base64-encoded audio, one entry per generated clip.
    pub outputs: Vec<String>,
    pub format: AudioFormat,
    pub count: usize,
}

impl GenerateResponse {
    pub fn succeeded(outputs: Vec<String>, format: AudioFormat) -> Self {
        Self {
            status: Status::Succeeded,
            count: outputs.len(),
            outputs,
            format,
        }
    }
}

/// Successful `POST /train`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: Status,
    pub lora_name: String,
    pub message: String,
    pub training_method: TrainingMethod,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub lm_available: bool,
    pub trainer: TrainingMethod,
    pub active_lora: Option<String>,
}

/// Failure body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FailureBody {
    pub status: Status,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// A failed request, ready to be rendered.
#[derive(Debug)]
pub struct Failure {
    pub code: StatusCode,
    pub body: FailureBody,
}

impl Failure {
    /// The caller sent something unusable.
    pub fn input(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            body: FailureBody {
                status: Status::Failed,
                error: message.into(),
                traceback: None,
            },
        }
    }

    /// The model ran but reported failure.
    pub fn generation(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            body: FailureBody {
                status: Status::Failed,
                error: message.into(),
                traceback: None,
            },
        }
    }

    /// The request was refused before it reached a handler, e.g. a body over
    /// the size cap.
    pub fn rejected(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            body: FailureBody {
                status: Status::Failed,
                error: message.into(),
                traceback: None,
            },
        }
    }

    /// Classify an arbitrary pipeline error.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if is_input_error(err) {
            return Self::input(err.to_string());
        }

        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            body: FailureBody {
                status: Status::Failed,
                error: format!("{:#}", err),
                traceback: Some(format!("{:?}", err)),
            },
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Self::from_error(&err)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.code, Json(self.body)).into_response()
    }
}

/// Whether anything in the chain is a caller mistake.
pub fn is_input_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<TranslateError>() || cause.is::<NameError>() || cause.is::<TrainInputError>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_input_failure_has_no_traceback() {
        let err = anyhow::Error::from(NameError::Empty);
        let failure = Failure::from_error(&err);
        assert_eq!(failure.code, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::to_value(&failure.body).unwrap(),
            serde_json::json!({"status": "failed", "error": "lora_name is required"})
        );
    }

    #[test]
    fn test_internal_failure_carries_chain() {
        let err = std::fs::read("/definitely/not/here")
            .context("failed to read staged audio")
            .unwrap_err();
        let failure = Failure::from_error(&err);
        assert_eq!(failure.code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failure.body.error.starts_with("failed to read staged audio: "));
        assert!(failure.body.traceback.unwrap().contains("Caused by"));
    }

    #[test]
    fn test_wrapped_input_error_is_still_input() {
        let err = anyhow::Error::from(TranslateError::UnknownAudioFormat("ogg".into()))
            .context("while translating");
        assert!(is_input_error(&err));
    }

    #[test]
    fn test_rejected_keeps_status() {
        let failure = Failure::rejected(StatusCode::PAYLOAD_TOO_LARGE, "body too large");
        assert_eq!(failure.code, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            serde_json::to_value(&failure.body).unwrap(),
            serde_json::json!({"status": "failed", "error": "body too large"})
        );
    }

    #[test]
    fn test_generate_response_counts() {
        let resp = GenerateResponse::succeeded(vec!["a".into(), "b".into()], AudioFormat::Wav);
        let value = serde_json::to_value(resp).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["count"], 2);
        assert_eq!(value["format"], "wav");
    }
}
