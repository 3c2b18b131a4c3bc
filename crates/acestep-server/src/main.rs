use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aceconf::AceConfig;
use acestep_server::inference::{DitSettings, InferenceFacade, LmHandler, LmSettings, WorkerClient};
use acestep_server::training::{select_trainer, TrainingOrchestrator};
use acestep_server::{router, telemetry, AppState};
use anyhow::{Context, Result};
use clap::Parser;
use lora_store::{CommandVolume, LocalVolume, LoraStore, LoraStoreConfig, Volume};
use tokio_util::sync::CancellationToken;

/// ACE-Step generation and LoRA training server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file used in place of ./acestep.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides bind.http_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = AceConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.infra.bind.http_port = port;
    }
    if let Some(endpoint) = cli.otlp_endpoint {
        config.infra.telemetry.otlp_endpoint = endpoint;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry_config = &config.infra.telemetry;
    let otlp_endpoint = telemetry_config
        .otlp_enabled()
        .then_some(telemetry_config.otlp_endpoint.as_str());
    let telemetry_guard = telemetry::init(otlp_endpoint, &telemetry_config.log_level)
        .context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!("Loaded config: {}", file.display());
    }
    for var in &sources.env_overrides {
        tracing::info!("Env override: {}", var);
    }

    // --- Inference worker ---
    let worker = Arc::new(WorkerClient::new(
        config.model.worker_url.clone(),
        Duration::from_secs(config.model.request_timeout_secs),
    ));
    tracing::info!("Inference worker at {}", worker.base_url());

    let lm = LmSettings::from_config(&config)
        .map(|settings| (worker.clone() as Arc<dyn LmHandler>, settings));
    let facade = InferenceFacade::initialize(worker.clone(), &DitSettings::from_config(&config), lm)
        .await
        .context("Model initialization failed")?;

    // --- Adapter volume ---
    let volume_config = &config.infra.volume;
    let adapter_root = config.infra.paths.adapter_root.clone();
    let volume: Arc<dyn Volume> =
        if volume_config.reload_command.is_some() || volume_config.commit_command.is_some() {
            Arc::new(CommandVolume::new(
                volume_config.reload_command.clone(),
                volume_config.commit_command.clone(),
            ))
        } else {
            Arc::new(LocalVolume::new(adapter_root.clone()))
        };
    let store_config = LoraStoreConfig {
        root: adapter_root.clone(),
        ..LoraStoreConfig::from_env()
    };
    let store =
        Arc::new(LoraStore::new(store_config, volume).context("Failed to open adapter store")?);
    tracing::info!("Adapters at {}", adapter_root.display());

    // --- Training ---
    let trainer = select_trainer(&config.training, worker.clone()).await;
    tracing::info!("Trainer: {}", trainer.method());
    let scratch_root = config.infra.paths.scratch_dir.clone();
    let training = TrainingOrchestrator::new(
        store.clone(),
        trainer,
        &scratch_root,
        config.infra.paths.checkpoint_dir(),
    );

    let state = AppState {
        registry: store,
        facade: Arc::new(facade),
        training: Arc::new(training),
        scratch_root,
        max_body_bytes: config.infra.bind.max_body_bytes(),
    };
    let app = router(state);

    let addr = config.infra.bind.addr();
    let bind_addr: std::net::SocketAddr = addr.parse().context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("ACE-Step server listening on http://{}", bind_addr);
    tracing::info!("   Adapters: GET http://{}/loras", bind_addr);
    tracing::info!("   Generate: POST http://{}/generate", bind_addr);
    tracing::info!("   Train: POST http://{}/train", bind_addr);
    tracing::info!("   Health: GET http://{}/health", bind_addr);

    let shutdown_token = CancellationToken::new();
    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (container stop, systemd)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if tokio::time::timeout(Duration::from_secs(30), server_handle).await.is_err() {
        tracing::warn!("In-flight requests did not finish within 30s, exiting anyway");
    }

    telemetry::shutdown(telemetry_guard);
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
