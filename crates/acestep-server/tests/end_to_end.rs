//! Full request path against a fake inference worker.
//!
//! The worker speaks the same JSON protocol as the real one and writes
//! placeholder audio into whatever `save_dir` it is handed, so these tests
//! cover the HTTP layer, the facade, the adapter store and the trainer
//! selection together.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aceconf::{AceConfig, TrainingConfig};
use acestep_server::inference::{DitSettings, InferenceFacade, LmHandler, LmSettings, WorkerClient};
use acestep_server::training::{select_trainer, TrainingOrchestrator};
use acestep_server::{router, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lora_store::LoraStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

async fn spawn_worker(can_train: bool) -> (String, Calls) {
    let calls: Calls = Arc::default();

    let ack = |path: &'static str, calls: Calls| {
        move |Json(body): Json<Value>| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push((path.to_string(), body));
                Json(json!({"ok": true, "status": "ok"}))
            }
        }
    };

    let gen_calls = calls.clone();
    let app = Router::new()
        .route("/dit/initialize", post(ack("/dit/initialize", calls.clone())))
        .route("/lm/initialize", post(ack("/lm/initialize", calls.clone())))
        .route("/lora/load", post(ack("/lora/load", calls.clone())))
        .route("/train", post(ack("/train", calls.clone())))
        .route(
            "/capabilities",
            get(move || async move { Json(json!({"training": can_train})) }),
        )
        .route(
            "/generate",
            post(move |Json(body): Json<Value>| {
                let calls = gen_calls.clone();
                async move {
                    let save_dir = PathBuf::from(body["save_dir"].as_str().unwrap_or_default());
                    let count = body["config"]["batch_size"].as_u64().unwrap_or(1);
                    let format = body["config"]["audio_format"].as_str().unwrap_or("mp3").to_string();
                    calls.lock().unwrap().push(("/generate".to_string(), body));

                    let audios: Vec<Value> = (0..count)
                        .map(|i| {
                            let path = save_dir.join(format!("clip_{}.{}", i, format));
                            std::fs::write(&path, format!("clip-{}", i)).unwrap();
                            json!({"path": path})
                        })
                        .collect();
                    Json(json!({"success": true, "audios": audios, "status_message": "done"}))
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), calls)
}

struct Server {
    _root: TempDir,
    adapters: PathBuf,
    scratch: PathBuf,
    app: Router,
    calls: Calls,
}

async fn start(can_train: bool) -> Server {
    let (url, calls) = spawn_worker(can_train).await;
    let root = TempDir::new().unwrap();
    let adapters = root.path().join("loras");
    let scratch = root.path().join("scratch");

    let mut config = AceConfig::default();
    config.model.worker_url = url.clone();

    let worker = Arc::new(WorkerClient::new(url, Duration::from_secs(5)));
    let lm = LmSettings::from_config(&config)
        .map(|settings| (worker.clone() as Arc<dyn LmHandler>, settings));
    let facade = InferenceFacade::initialize(worker.clone(), &DitSettings::from_config(&config), lm)
        .await
        .unwrap();

    let store = Arc::new(LoraStore::at_path(&adapters).unwrap());
    let trainer = select_trainer(&TrainingConfig::default(), worker).await;
    let training = TrainingOrchestrator::new(store.clone(), trainer, &scratch, "/checkpoints");

    let app = router(AppState {
        registry: store,
        facade: Arc::new(facade),
        training: Arc::new(training),
        scratch_root: scratch.clone(),
        max_body_bytes: config.infra.bind.max_body_bytes(),
    });

    Server {
        _root: root,
        adapters,
        scratch,
        app,
        calls,
    }
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header(
                    "traceparent",
                    "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn calls_to(server: &Server, path: &str) -> Vec<Value> {
    server
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(p, _)| p == path)
        .map(|(_, body)| body.clone())
        .collect()
}

#[tokio::test]
async fn generate_with_adapter_over_the_wire() {
    let server = start(false).await;
    let weights = server.adapters.join("jazz").join("adapter_model.safetensors");
    std::fs::create_dir_all(weights.parent().unwrap()).unwrap();
    std::fs::write(&weights, b"w").unwrap();

    let (status, body) = post_json(
        &server.app,
        "/generate",
        json!({
            "prompt": "smoky club",
            "lyrics": "[verse]\nla la",
            "bpm": 92,
            "audio_duration": 0,
            "batch_size": 2,
            "audio_format": "flac",
            "lora_name": "jazz",
            "src_audio_base64": BASE64.encode(b"RIFFsource")
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["format"], "flac");
    assert_eq!(body["count"], 2);
    assert_eq!(body["outputs"][1], BASE64.encode(b"clip-1"));

    let loads = calls_to(&server, "/lora/load");
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0]["path"], json!(weights));

    let generated = calls_to(&server, "/generate");
    let params = &generated[0]["params"];
    assert_eq!(params["caption"], "smoky club");
    assert_eq!(params["instrumental"], false);
    assert_eq!(params["bpm"], 92);
    assert_eq!(params["duration"], -1.0);
    assert!(params["src_audio"].is_string());

    // Decoded source audio and generated clips are gone.
    assert_eq!(std::fs::read_dir(&server.scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn native_training_when_worker_can_train() {
    let server = start(true).await;

    let (status, body) = post_json(
        &server.app,
        "/train",
        json!({
            "lora_name": "lofi",
            "audio_files": [
                {"name": "a.wav", "data": BASE64.encode(b"a")},
                {"name": "a.wav", "data": BASE64.encode(b"b")}
            ],
            "lora_rank": 4
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["training_method"], "native");

    let jobs = calls_to(&server, "/train");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["lora_name"], "lofi");
    assert_eq!(jobs[0]["rank"], 4);

    let backup = server.adapters.join("lofi").join("training_data");
    assert_eq!(std::fs::read_dir(&backup).unwrap().count(), 2);
}

#[tokio::test]
async fn invalid_training_audio_touches_nothing() {
    let server = start(true).await;

    let (status, body) = post_json(
        &server.app,
        "/train",
        json!({
            "lora_name": "lofi",
            "audio_files": [{"name": "a.wav", "data": "!!!"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert!(calls_to(&server, "/train").is_empty());
    assert!(!server.adapters.join("lofi").exists());
}
