//! HTTP client for a music model inference service.
//!
//! Implements [`MusicModel`] by forwarding each capability to the service:
//! `POST /generate`, `POST /continue` and `POST /generate-melody`. Audio
//! crosses the wire as base64-encoded little-endian `f32` samples.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use music_core::{AudioBuffer, MusicModel};

/// Audio payload as exchanged with the inference service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Pcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples_b64: String,
}

impl Pcm {
    pub fn from_buffer(buffer: &AudioBuffer) -> Self {
        let mut bytes = Vec::with_capacity(buffer.samples.len() * 4);
        for s in &buffer.samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            sample_rate: buffer.sample_rate,
            channels: buffer.channels,
            samples_b64: general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn into_buffer(self) -> Result<AudioBuffer> {
        let bytes = general_purpose::STANDARD
            .decode(self.samples_b64.as_bytes())
            .context("samples_b64 is not valid base64")?;
        ensure!(
            bytes.len() % 4 == 0,
            "sample payload length {} is not a multiple of 4",
            bytes.len()
        );
        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(AudioBuffer::from_interleaved(
            &samples,
            self.sample_rate,
            self.channels,
        ))
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    duration: u32,
}

#[derive(Serialize)]
struct ContinueRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    duration: u32,
    context: Pcm,
}

#[derive(Serialize)]
struct MelodyRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    duration: u32,
    melody: Pcm,
}

#[derive(Deserialize)]
struct GenerateResponse {
    audio: Pcm,
}

#[derive(Deserialize)]
struct InfoResponse {
    sample_rate: u32,
}

/// One named model hosted by the inference service.
pub struct HttpMusicModel {
    client: Client,
    base_url: String,
    model: String,
    sample_rate: u32,
}

impl HttpMusicModel {
    /// Connect to `model` on the service at `base_url`, asking the service
    /// for the model's output sample rate.
    pub async fn connect(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let info: InfoResponse = client
            .get(format!("{base_url}/models/{model}"))
            .send()
            .await
            .with_context(|| format!("model service unreachable at {base_url}"))?
            .error_for_status()?
            .json()
            .await
            .context("invalid model info response")?;

        Ok(Self::with_client(client, &base_url, model, info.sample_rate))
    }

    /// Build without contacting the service.
    pub fn with_client(client: Client, base_url: &str, model: &str, sample_rate: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            sample_rate,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<AudioBuffer> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(model = %self.model, %url, "model request");

        let response: GenerateResponse = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid response from {url}"))?;

        response.audio.into_buffer()
    }
}

#[async_trait]
impl MusicModel for HttpMusicModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn generate(&self, prompt: &str, duration_secs: u32) -> Result<AudioBuffer> {
        self.call(
            "generate",
            &GenerateRequest {
                model: &self.model,
                prompt,
                duration: duration_secs,
            },
        )
        .await
    }

    async fn generate_continuation(
        &self,
        context: &AudioBuffer,
        prompt: &str,
        duration_secs: u32,
    ) -> Result<AudioBuffer> {
        self.call(
            "continue",
            &ContinueRequest {
                model: &self.model,
                prompt,
                duration: duration_secs,
                context: Pcm::from_buffer(context),
            },
        )
        .await
    }

    async fn generate_with_melody(
        &self,
        prompt: &str,
        melody: &AudioBuffer,
        duration_secs: u32,
    ) -> Result<AudioBuffer> {
        self.call(
            "generate-melody",
            &MelodyRequest {
                model: &self.model,
                prompt,
                duration: duration_secs,
                melody: Pcm::from_buffer(melody),
            },
        )
        .await
    }
}
