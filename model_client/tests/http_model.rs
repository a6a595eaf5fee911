//! Drives HttpMusicModel against an in-process fake inference service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use model_client::{HttpMusicModel, Pcm};
use music_core::{AudioBuffer, MusicModel};

const SR: u32 = 100;

#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

fn audio(secs: u64) -> Value {
    let buffer = AudioBuffer::mono(vec![0.5; (secs * SR as u64) as usize], SR);
    serde_json::to_value(Pcm::from_buffer(&buffer)).unwrap()
}

async fn spawn_service(seen: Seen) -> String {
    async fn info(Path(model): Path<String>) -> Result<Json<Value>, StatusCode> {
        if model == "missing" {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(Json(json!({ "sample_rate": SR })))
    }

    async fn record(seen: &Seen, route: &str, body: Value) -> Json<Value> {
        let secs = body["duration"].as_u64().unwrap_or(0);
        seen.requests.lock().unwrap().push((route.to_string(), body));
        Json(json!({ "audio": audio(secs) }))
    }

    let app = Router::new()
        .route("/models/{model}", get(info))
        .route(
            "/generate",
            post(|State(s): State<Seen>, Json(b): Json<Value>| async move {
                record(&s, "generate", b).await
            }),
        )
        .route(
            "/continue",
            post(|State(s): State<Seen>, Json(b): Json<Value>| async move {
                record(&s, "continue", b).await
            }),
        )
        .route(
            "/generate-melody",
            post(|State(s): State<Seen>, Json(b): Json<Value>| async move {
                record(&s, "generate-melody", b).await
            }),
        )
        .with_state(seen);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn test_connect_reads_sample_rate() {
    let base = spawn_service(Seen::default()).await;
    let model = HttpMusicModel::connect(&base, "large", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(model.sample_rate(), SR);
    assert_eq!(model.model(), "large");

    let missing = HttpMusicModel::connect(&base, "missing", Duration::from_secs(5)).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_capabilities_hit_their_routes() {
    let seen = Seen::default();
    let base = spawn_service(seen.clone()).await;
    let model = HttpMusicModel::connect(&base, "melody", Duration::from_secs(5))
        .await
        .unwrap();

    let seed = model.generate("drum and bass", 30).await.unwrap();
    assert_eq!(seed.len(), 30 * SR as usize);

    let context = seed.tail_secs(10);
    let next = model
        .generate_continuation(&context, "drum and bass", 25)
        .await
        .unwrap();
    assert_eq!(next.len(), 25 * SR as usize);

    let melody = AudioBuffer::mono(vec![0.1; 200], SR);
    model
        .generate_with_melody("drum and bass", &melody, 12)
        .await
        .unwrap();

    let requests = seen.requests.lock().unwrap().clone();
    let routes: Vec<&str> = requests.iter().map(|(r, _)| r.as_str()).collect();
    assert_eq!(routes, vec!["generate", "continue", "generate-melody"]);

    assert_eq!(requests[0].1["model"], "melody");
    assert_eq!(requests[0].1["prompt"], "drum and bass");
    assert_eq!(requests[1].1["duration"], 25);
    assert_eq!(requests[1].1["context"]["sample_rate"], SR);
    assert_eq!(requests[2].1["melody"]["channels"], 1);
}
