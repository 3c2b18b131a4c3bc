//! Tracing and OpenTelemetry setup.
//!
//! Logs always go to stdout through `tracing-subscriber`. When an OTLP
//! endpoint is configured, spans and log records are also exported over gRPC.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_NAME: &str = "acestep-server";

/// Exporter handles that must be flushed before the process exits.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

/// Install the global subscriber.
///
/// `otlp_endpoint` is `host:port` of an OTLP gRPC collector; `None` keeps
/// everything local. `RUST_LOG`, when set, overrides `log_level`. Hand the
/// returned guard to [`shutdown`] on exit.
pub fn init(otlp_endpoint: Option<&str>, log_level: &str) -> Result<TelemetryGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let Some(otlp_endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(TelemetryGuard::default());
    };

    let resource = Resource::builder_empty()
        .with_service_name(SERVICE_NAME)
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = if otlp_endpoint.contains("://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{}", otlp_endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build())
        .with_resource(resource)
        .build();

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(endpoint = %otlp_endpoint, "OpenTelemetry export enabled");
    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        logger_provider: Some(logger_provider),
    })
}

/// Flush and stop the exporters. Errors are logged, never returned.
pub fn shutdown(guard: TelemetryGuard) {
    tracing::info!("Shutting down telemetry");
    if let Some(provider) = guard.tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!("Span exporter shutdown failed: {}", e);
        }
    }
    if let Some(provider) = guard.logger_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!("Log exporter shutdown failed: {}", e);
        }
    }
}

/// Parse a W3C traceparent header into a remote parent context.
///
/// Format: `{version}-{trace_id}-{span_id}-{trace_flags}`
pub fn parse_traceparent(traceparent: Option<&str>) -> Option<opentelemetry::Context> {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    let tp = traceparent?;
    let parts: Vec<&str> = tp.split('-').collect();
    if parts.len() != 4 || parts[0] != "00" {
        tracing::debug!("Ignoring traceparent: {}", tp);
        return None;
    }

    let trace_id = TraceId::from_bytes(hex_to_bytes::<16>(parts[1])?);
    let span_id = SpanId::from_bytes(hex_to_bytes::<8>(parts[2])?);
    let flags = u8::from_str_radix(parts[3], 16).unwrap_or(0);

    let span_context = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    );

    Some(opentelemetry::Context::current().with_remote_span_context(span_context))
}

/// Helper to convert hex string to fixed-size byte array
fn hex_to_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 {
        return None;
    }

    let mut bytes = [0u8; N];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_bytes() {
        let result: Option<[u8; 4]> = hex_to_bytes("deadbeef");
        assert_eq!(result, Some([0xde, 0xad, 0xbe, 0xef]));

        let result: Option<[u8; 4]> = hex_to_bytes("short");
        assert_eq!(result, None);

        let result: Option<[u8; 4]> = hex_to_bytes("not_hex!");
        assert_eq!(result, None);
    }

    #[test]
    fn test_local_guard_shuts_down_cleanly() {
        let guard = TelemetryGuard::default();
        assert!(guard.tracer_provider.is_none());
        assert!(guard.logger_provider.is_none());
        shutdown(guard);
    }

    #[test]
    fn test_guard_flushes_providers() {
        let guard = TelemetryGuard {
            tracer_provider: Some(SdkTracerProvider::builder().build()),
            logger_provider: Some(SdkLoggerProvider::builder().build()),
        };
        let tracer = guard.tracer_provider.clone().unwrap();
        shutdown(guard);
        // The shared handle is already stopped.
        assert!(tracer.shutdown().is_err());
    }

    #[test]
    fn test_parse_traceparent() {
        let tp = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        assert!(parse_traceparent(Some(tp)).is_some());
        assert!(parse_traceparent(None).is_none());
        assert!(parse_traceparent(Some("not-a-valid-traceparent")).is_none());

        let wrong_version = "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        assert!(parse_traceparent(Some(wrong_version)).is_none());
    }
}
