//! One generation job: load the melody, synthesize, render, deliver.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use music_core::{
    AudioFormat, Conditioning, ModelContext, NormalizationStrategy, SegmentSynthesizer,
};
use tracing::{error, info, warn};

use crate::delivery::WebhookDelivery;
use crate::error::JobError;
use crate::interaction::{GenerationRequest, RequestMode};
use crate::melody::MelodyLoader;
use crate::metrics::JobMetrics;

/// Lifecycle of an interaction, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Verified,
    Deferred,
    Processing,
    Delivered,
    Failed,
    Rejected,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Received => "received",
            JobState::Verified => "verified",
            JobState::Deferred => "deferred",
            JobState::Processing => "processing",
            JobState::Delivered => "delivered",
            JobState::Failed => "failed",
            JobState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Encoded output of a successful job.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub primary_clip: Vec<u8>,
    /// The conditioning melody, re-encoded, when one was used.
    pub melody_clip: Option<Vec<u8>>,
    pub format: AudioFormat,
}

/// Turns a prompt and mode into encoded clips. Shared by the server and the CLI.
#[derive(Clone)]
pub struct Generator {
    models: Arc<ModelContext>,
    synthesizer: Arc<SegmentSynthesizer>,
    melody: MelodyLoader,
    strategy: NormalizationStrategy,
}

impl Generator {
    pub fn new(
        models: Arc<ModelContext>,
        synthesizer: SegmentSynthesizer,
        melody: MelodyLoader,
    ) -> Self {
        Self {
            models,
            synthesizer: Arc::new(synthesizer),
            melody,
            strategy: NormalizationStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: NormalizationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub async fn generate(
        &self,
        prompt: &str,
        duration_secs: u32,
        format: AudioFormat,
        mode: &RequestMode,
    ) -> Result<GenerationResult, JobError> {
        let conditioning = match mode {
            RequestMode::TextOnly => Conditioning::TextOnly,
            RequestMode::MelodyConditioned { url } => {
                Conditioning::Melody(self.melody.load(url).await?)
            }
        };

        let clip = self
            .synthesizer
            .synthesize(&self.models, prompt, duration_secs, &conditioning)
            .await?;

        let strategy = self.strategy;
        let melody = conditioning.melody().cloned();
        let (primary_clip, melody_clip) = tokio::task::spawn_blocking(move || {
            let primary = music_core::render(clip, format, strategy)?;
            let melody = melody
                .map(|m| music_core::render(m, format, strategy))
                .transpose()?;
            anyhow::Ok((primary, melody))
        })
        .await
        .context("encoding task panicked")??;

        Ok(GenerationResult {
            primary_clip,
            melody_clip,
            format,
        })
    }
}

/// Runs queued requests to completion and reports the outcome to the user.
pub struct JobRunner {
    generator: Generator,
    delivery: WebhookDelivery,
    metrics: Arc<JobMetrics>,
}

impl JobRunner {
    pub fn new(generator: Generator, delivery: WebhookDelivery, metrics: Arc<JobMetrics>) -> Self {
        Self {
            generator,
            delivery,
            metrics,
        }
    }

    pub async fn run(&self, request: GenerationRequest) {
        let started = Instant::now();
        self.metrics.record_started();
        info!(
            job = %request.id,
            state = %JobState::Processing,
            duration = request.duration_secs,
            melody = matches!(request.mode, RequestMode::MelodyConditioned { .. }),
            "Job started"
        );

        let result = self
            .generator
            .generate(
                &request.prompt,
                request.duration_secs,
                request.format,
                &request.mode,
            )
            .await;

        let (outcome, success, validation) = match result {
            Ok(result) => {
                let outcome = self
                    .delivery
                    .send_clip(&request.context, &request.prompt, &result)
                    .await;
                (outcome, true, false)
            }
            Err(err) => {
                if err.is_validation() {
                    warn!(job = %request.id, "Melody rejected: {}", err);
                } else {
                    error!(job = %request.id, "Generation failed: {}", err);
                }
                let outcome = self
                    .delivery
                    .send_error(&request.context, err.user_message())
                    .await;
                (outcome, false, err.is_validation())
            }
        };

        outcome.log(request.id);
        if !outcome.is_delivered() {
            self.metrics.record_delivery_failure();
        }

        let elapsed = started.elapsed();
        self.metrics
            .record_finished(success, validation, elapsed.as_millis() as u64);

        let state = if success {
            JobState::Delivered
        } else {
            JobState::Failed
        };
        info!(
            job = %request.id,
            state = %state,
            "Job finished in {:.2}s",
            elapsed.as_secs_f64()
        );
    }
}
