//! HTTP client for the resident ACE-Step worker process.
//!
//! The worker owns the GPU and the Python model library. Every call is a
//! JSON POST (or GET for capabilities) and carries a W3C `traceparent`
//! header from the current span.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::facade::{DitHandler, DitSettings, LmHandler, LmSettings};
use super::params::{GenerationConfig, GenerationParams, GenerationResult};
use crate::training::TrainingJob;

/// Generic acknowledgement for initialize/load/train calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerAck {
    pub ok: bool,
    #[serde(default)]
    pub status: String,
}

impl WorkerAck {
    fn into_result(self, what: &str) -> Result<String> {
        if self.ok {
            Ok(self.status)
        } else {
            anyhow::bail!("{} failed: {}", what, self.status)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerAudio {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerGenerateResponse {
    pub success: bool,
    #[serde(default)]
    pub audios: Vec<WorkerAudio>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl From<WorkerGenerateResponse> for GenerationResult {
    fn from(resp: WorkerGenerateResponse) -> Self {
        Self {
            success: resp.success,
            audios: resp
                .audios
                .into_iter()
                .filter(|a| !a.path.is_empty())
                .map(|a| PathBuf::from(a.path))
                .collect(),
            error: resp.error,
            status_message: resp.status_message,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    #[serde(default)]
    pub training: bool,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    params: &'a GenerationParams,
    config: &'a GenerationConfig,
    save_dir: &'a Path,
    use_lm: bool,
}

#[derive(Serialize)]
struct LoraBody<'a> {
    path: &'a Path,
}

pub struct WorkerClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl WorkerClient {
    /// `timeout` applies to every call except training, which runs unbounded
    /// on the worker side.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // Helper to inject traceparent header for distributed tracing
    fn inject_trace_context(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        use opentelemetry::trace::TraceContextExt;
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::Span::current();
        let context = span.context();
        let ctx_span = context.span();
        let span_context = ctx_span.span_context();

        if span_context.is_valid() {
            let flags = if span_context.is_sampled() { "01" } else { "00" };
            let traceparent = format!(
                "00-{}-{}-{}",
                span_context.trace_id(),
                span_context.span_id(),
                flags
            );
            builder.header("traceparent", traceparent)
        } else {
            builder
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<T> {
        let resp = self
            .inject_trace_context(builder)
            .send()
            .await
            .with_context(|| format!("failed to call worker {}", endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            tracing::warn!(endpoint, status = %status, error_body = ?error_body, "worker call failed");
            anyhow::bail!("worker {} returned {}: {}", endpoint, status, error_body);
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to decode worker {} response", endpoint))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.send(builder, endpoint).await
    }

    /// What the worker can do beyond inference.
    pub async fn capabilities(&self) -> Result<WorkerCapabilities> {
        let builder = self
            .client
            .get(format!("{}/capabilities", self.base_url))
            .timeout(self.timeout);
        self.send(builder, "/capabilities").await
    }

    /// Run a training job in-process on the worker.
    #[tracing::instrument(skip_all, fields(lora.name = %job.lora_name))]
    pub async fn train(&self, job: &TrainingJob) -> Result<String> {
        let ack: WorkerAck = self.post("/train", job, None).await?;
        ack.into_result("native training")
    }
}

#[async_trait]
impl DitHandler for WorkerClient {
    async fn initialize(&self, settings: &DitSettings) -> Result<String> {
        let ack: WorkerAck = self
            .post("/dit/initialize", settings, Some(self.timeout))
            .await?;
        ack.into_result("DiT initialize")
    }

    async fn load_lora(&self, path: &Path) -> Result<()> {
        let ack: WorkerAck = self
            .post("/lora/load", &LoraBody { path }, Some(self.timeout))
            .await?;
        ack.into_result("LoRA load").map(|_| ())
    }

    async fn generate(
        &self,
        params: &GenerationParams,
        config: &GenerationConfig,
        save_dir: &Path,
        use_lm: bool,
    ) -> Result<GenerationResult> {
        let body = GenerateBody {
            params,
            config,
            save_dir,
            use_lm,
        };
        let resp: WorkerGenerateResponse = self.post("/generate", &body, Some(self.timeout)).await?;
        Ok(resp.into())
    }
}

#[async_trait]
impl LmHandler for WorkerClient {
    async fn initialize(&self, settings: &LmSettings) -> Result<String> {
        let ack: WorkerAck = self
            .post("/lm/initialize", settings, Some(self.timeout))
            .await?;
        ack.into_result("LM initialize")
    }
}
