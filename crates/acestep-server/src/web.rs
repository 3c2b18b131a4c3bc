//! HTTP endpoints.
//!
//! - `GET  /loras`    adapters on the volume
//! - `POST /generate` text/lyrics (+ optional audio) to base64 audio
//! - `POST /train`    stage audio and train a LoRA adapter
//! - `GET  /health`   readiness and what got loaded
//! - `GET  /schema`   JSON Schemas of the request bodies
//!
//! Bodies are parsed by hand so malformed JSON and oversized uploads get the
//! same failure shape as every other error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lora_store::AdapterRegistry;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::api::{
    translate, Failure, GenerateRequest, GenerateResponse, HealthResponse, LorasResponse, Status,
    TrainRequest, TrainResponse,
};
use crate::inference::InferenceFacade;
use crate::scratch::ScratchDir;
use crate::telemetry;
use crate::training::TrainingOrchestrator;

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn AdapterRegistry>,
    pub facade: Arc<InferenceFacade>,
    pub training: Arc<TrainingOrchestrator>,
    pub scratch_root: PathBuf,
    /// Request body cap; base64 audio makes bodies large.
    pub max_body_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/loras", get(list_loras))
        .route("/generate", post(generate))
        .route("/train", post(train))
        .route("/health", get(health))
        .route("/schema", get(schema))
        .layer(body_limit)
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

/// Open a request span, continuing the caller's trace when it sent a
/// `traceparent` header.
async fn trace_request(request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "http.request",
        http.method = %request.method(),
        http.path = %request.uri().path(),
    );

    let traceparent = request
        .headers()
        .get("traceparent")
        .and_then(|v| v.to_str().ok());
    if let Some(parent) = telemetry::parse_traceparent(traceparent) {
        span.set_parent(parent);
    }

    next.run(request).instrument(span).await
}

fn parse_body<T: DeserializeOwned>(body: Result<Bytes, BytesRejection>) -> Result<T, Failure> {
    let body = body.map_err(|rejection| {
        tracing::warn!(status = %rejection.status(), "request body rejected");
        Failure::rejected(rejection.status(), rejection.body_text())
    })?;
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &body
    };
    serde_json::from_slice(body).map_err(|e| Failure::input(format!("invalid JSON body: {}", e)))
}

#[tracing::instrument(skip_all)]
async fn list_loras(State(state): State<AppState>) -> Result<Json<LorasResponse>, Failure> {
    let registry = state.registry.clone();
    let loras = crate::blocking(move || registry.list()).await.map_err(|e| {
        tracing::error!(error = ?e, "listing adapters failed");
        Failure::from_error(&e)
    })?;
    tracing::debug!(count = loras.len(), "listed adapters");
    Ok(Json(LorasResponse { loras }))
}

#[tracing::instrument(skip_all, fields(job.kind = "generate"))]
async fn generate(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<GenerateResponse>, Failure> {
    let request: GenerateRequest = parse_body(body)?;

    // Everything decoded or produced for this request is deleted when
    // `scratch` drops, whichever way this function returns.
    let mut scratch = ScratchDir::new_in(&state.scratch_root)?;

    run_generate(&state, request, &mut scratch).await.map_err(|e| {
        tracing::error!(error = ?e, "generation request failed");
        Failure::from_error(&e)
    })?
}

async fn run_generate(
    state: &AppState,
    request: GenerateRequest,
    scratch: &mut ScratchDir,
) -> anyhow::Result<Result<Json<GenerateResponse>, Failure>> {
    let translation = translate(request, scratch)?;

    let adapter = match translation.lora_name.as_deref() {
        Some(name) => match resolve_adapter(&state.registry, name).await {
            Ok(Some(path)) => Some(path),
            Ok(None) => {
                tracing::warn!(lora.name = %name, "LoRA not found or has no weights, using base model");
                None
            }
            Err(e) => {
                tracing::warn!(lora.name = %name, error = %format!("{:#}", e), "LoRA lookup failed, using base model");
                None
            }
        },
        None => None,
    };

    let result = state
        .facade
        .generate_with_adapter(
            adapter.as_deref(),
            &translation.params,
            &translation.config,
            scratch.path(),
        )
        .await?;

    for path in &result.audios {
        scratch.adopt(path.clone());
    }

    if !result.success {
        return Ok(Err(Failure::generation(result.failure_message())));
    }

    let mut outputs = Vec::with_capacity(result.audios.len());
    for path in &result.audios {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "generated audio missing, skipping");
            continue;
        }
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read generated audio {}", path.display()))?;
        outputs.push(BASE64.encode(bytes));
    }

    tracing::info!(output.count = outputs.len(), format = %translation.config.audio_format, "generation succeeded");
    Ok(Ok(Json(GenerateResponse::succeeded(
        outputs,
        translation.config.audio_format,
    ))))
}

async fn resolve_adapter(
    registry: &Arc<dyn AdapterRegistry>,
    name: &str,
) -> anyhow::Result<Option<PathBuf>> {
    let registry = registry.clone();
    let name = name.to_string();
    crate::blocking(move || registry.resolve(&name)).await
}

#[tracing::instrument(skip_all, fields(job.kind = "train"))]
async fn train(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TrainResponse>, Failure> {
    let request: TrainRequest = parse_body(body)?;

    let outcome = state.training.train(request).await.map_err(|e| {
        tracing::error!(error = ?e, "training request failed");
        Failure::from_error(&e)
    })?;

    Ok(Json(TrainResponse {
        status: Status::Completed,
        lora_name: outcome.lora_name,
        message: outcome.message,
        training_method: outcome.training_method,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_lora = state.facade.active_adapter().await.and_then(|weights| {
        weights
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    });

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        lm_available: state.facade.lm_available(),
        trainer: state.training.trainer_method(),
        active_lora,
    })
}

/// Helper to generate JSON schema for a type
fn schema_for<T: JsonSchema>() -> Value {
    let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_default()
}

async fn schema() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "generate": schema_for::<GenerateRequest>(),
            "train": schema_for::<TrainRequest>(),
        })),
    )
}
