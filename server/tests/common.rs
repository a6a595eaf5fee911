//! Common utilities for integration tests
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, Method, Request, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use ed25519_dalek::{Signer, SigningKey};
use music_core::{AudioBuffer, ModelContext, MusicModel};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use server::config::ServerConfig;
use server::dispatcher::WorkerPool;
use server::verify::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use server::{app, build_state, AppState};

pub const SAMPLE_RATE: u32 = 1000;
pub const TIMESTAMP: &str = "1700000000";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Generate { secs: u32 },
    Continue { secs: u32, context_len: usize },
    Melody { secs: u32, melody_len: usize },
}

/// Records every call and returns silence of the requested length.
pub struct MockModel {
    calls: Mutex<Vec<Call>>,
    fail_on_call: Option<usize>,
    sample_rate: u32,
}

impl MockModel {
    pub fn new() -> Arc<Self> {
        Self::at_rate(SAMPLE_RATE)
    }

    pub fn at_rate(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
            sample_rate,
        })
    }

    /// Fail the `n`th call (1-based).
    pub fn failing_on(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_on_call: Some(n),
            sample_rate: SAMPLE_RATE,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn produce(&self, call: Call, secs: u32) -> anyhow::Result<AudioBuffer> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        if Some(calls.len()) == self.fail_on_call {
            anyhow::bail!("model crashed on call {}", calls.len());
        }
        Ok(AudioBuffer::mono(
            vec![0.0; (secs * self.sample_rate) as usize],
            self.sample_rate,
        ))
    }
}

#[async_trait]
impl MusicModel for MockModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn generate(&self, _prompt: &str, duration_secs: u32) -> anyhow::Result<AudioBuffer> {
        self.produce(Call::Generate { secs: duration_secs }, duration_secs)
    }

    async fn generate_continuation(
        &self,
        context: &AudioBuffer,
        _prompt: &str,
        duration_secs: u32,
    ) -> anyhow::Result<AudioBuffer> {
        self.produce(
            Call::Continue {
                secs: duration_secs,
                context_len: context.len(),
            },
            duration_secs,
        )
    }

    async fn generate_with_melody(
        &self,
        _prompt: &str,
        melody: &AudioBuffer,
        duration_secs: u32,
    ) -> anyhow::Result<AudioBuffer> {
        self.produce(
            Call::Melody {
                secs: duration_secs,
                melody_len: melody.len(),
            },
            duration_secs,
        )
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn public_key_hex() -> String {
    hex::encode(signing_key().verifying_key().to_bytes())
}

pub fn sign(timestamp: &str, body: &str) -> String {
    let message = format!("{timestamp}{body}");
    hex::encode(signing_key().sign(message.as_bytes()).to_bytes())
}

pub fn signed_request(uri: &str, payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, TIMESTAMP)
        .header(SIGNATURE_HEADER, sign(TIMESTAMP, &body))
        .body(Body::from(body))
        .unwrap()
}

pub fn ping() -> Value {
    json!({ "type": 1, "id": "1", "application_id": "app" })
}

/// An application command with the given options.
pub fn command(options: Value) -> Value {
    json!({
        "type": 2,
        "id": "900",
        "application_id": "app",
        "token": "tok",
        "member": { "user": { "id": "42", "username": "tester" } },
        "data": { "id": "1", "name": "generate", "options": options }
    })
}

pub fn command_with_melody(prompt: &str, duration: i64, url: &str) -> Value {
    let mut payload = command(json!([
        { "name": "prompt", "type": 3, "value": prompt },
        { "name": "duration", "type": 4, "value": duration },
        { "name": "melody", "type": 11, "value": "555" }
    ]));
    payload["data"]["resolved"] = json!({
        "attachments": { "555": { "id": "555", "url": url, "filename": "melody" } }
    });
    payload
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub fn test_config(api_base: &str) -> ServerConfig {
    ServerConfig {
        discord_public_key: Some(public_key_hex()),
        discord_api_base: api_base.to_string(),
        melody_fetch_timeout_secs: 5,
        delivery_timeout_secs: 5,
        ..Default::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub workers: WorkerPool,
}

impl TestApp {
    /// Close the queue and wait for every accepted job to finish.
    pub async fn drain(self) -> AppState {
        self.state.dispatcher.close();
        self.workers.join().await;
        self.state
    }
}

pub fn create_test_app(config: &ServerConfig, model: Arc<MockModel>) -> TestApp {
    let model: Arc<dyn MusicModel> = model;
    create_test_app_with(config, ModelContext::single(model))
}

pub fn create_test_app_with(config: &ServerConfig, models: ModelContext) -> TestApp {
    let (state, workers) = build_state(config, Arc::new(models)).unwrap();
    TestApp {
        router: app(state.clone()),
        state,
        workers,
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

// ---------------------------------------------------------------------------
// Fake webhook target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// The `payload_json` part of a multipart body.
    pub fn payload_json(&self) -> Value {
        let text = self.body_text();
        let start = text.find('{').expect("no JSON part");
        let mut depth = 0;
        for (i, c) in text[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return serde_json::from_str(&text[start..=start + i]).unwrap();
                    }
                }
                _ => {}
            }
        }
        panic!("unterminated payload_json");
    }

    /// Decode the first WAV file found in the body.
    pub fn first_wav(&self) -> hound::WavReader<Cursor<Vec<u8>>> {
        let at = self
            .body
            .windows(4)
            .position(|w| w == b"RIFF")
            .expect("no WAV in body");
        hound::WavReader::new(Cursor::new(self.body[at..].to_vec())).unwrap()
    }
}

type Captures = Arc<Mutex<Vec<Captured>>>;

pub struct FakeDiscord {
    pub api_base: String,
    captured: Captures,
}

impl FakeDiscord {
    pub async fn start() -> Self {
        let captured: Captures = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .fallback(capture)
            .with_state(captured.clone());
        let addr = spawn_server(app).await;
        Self {
            api_base: format!("http://{addr}/api/v10"),
            captured,
        }
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }

    /// Wait until at least `n` requests arrived.
    pub async fn wait_for(&self, n: usize) -> Vec<Captured> {
        for _ in 0..500 {
            let captured = self.captured();
            if captured.len() >= n {
                return captured;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {n} webhook calls, got {}", self.captured().len());
    }
}

async fn capture(
    State(captured): State<Captures>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    captured.lock().unwrap().push(Captured {
        method,
        path: uri.path().to_string(),
        content_type,
        body: body.to_vec(),
    });
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Melody host
// ---------------------------------------------------------------------------

pub struct MelodyHost {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl MelodyHost {
    /// Serve `file` at `/files/{name}` for every name; `/missing/...` is 404.
    pub async fn start(file: Vec<u8>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .with_state((Arc::new(file), hits.clone()));
        let addr = spawn_server(app).await;
        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve_file(
    State((file, hits)): State<(Arc<Vec<u8>>, Arc<AtomicUsize>)>,
    Path(_name): Path<String>,
) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    file.as_ref().clone()
}

/// Mono 16-bit WAV of a quiet ramp.
pub fn wav_bytes(secs: u32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..secs * sample_rate {
            writer.write_sample((i % 32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

async fn spawn_server(app: Router) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
