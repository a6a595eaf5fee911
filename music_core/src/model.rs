//! Model capability boundary and the process-wide model context.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::AudioBuffer;

/// The generative model as seen by the synthesizer.
///
/// Every call returns one bounded-length mono segment of roughly
/// `duration_secs` seconds at [`MusicModel::sample_rate`].
#[async_trait]
pub trait MusicModel: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Unconditioned text-to-audio sample.
    async fn generate(&self, prompt: &str, duration_secs: u32) -> anyhow::Result<AudioBuffer>;

    /// Extend `context`. The returned segment starts with a regenerated copy
    /// of the context window followed by new audio.
    async fn generate_continuation(
        &self,
        context: &AudioBuffer,
        prompt: &str,
        duration_secs: u32,
    ) -> anyhow::Result<AudioBuffer>;

    /// Text-to-audio sample conditioned on a reference melody.
    async fn generate_with_melody(
        &self,
        prompt: &str,
        melody: &AudioBuffer,
        duration_secs: u32,
    ) -> anyhow::Result<AudioBuffer>;
}

/// What a job conditions generation on. Decided once per request.
#[derive(Debug, Clone)]
pub enum Conditioning {
    TextOnly,
    Melody(AudioBuffer),
}

impl Conditioning {
    pub fn kind(&self) -> ModelKind {
        match self {
            Conditioning::TextOnly => ModelKind::Text,
            Conditioning::Melody(_) => ModelKind::Melody,
        }
    }

    pub fn melody(&self) -> Option<&AudioBuffer> {
        match self {
            Conditioning::TextOnly => None,
            Conditioning::Melody(m) => Some(m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Text,
    Melody,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Text => f.write_str("text"),
            ModelKind::Melody => f.write_str("melody"),
        }
    }
}

/// Loaded models, shared read-only across all jobs.
///
/// Inference backends are not assumed to handle concurrent forward passes,
/// so each model sits behind its own lock and a job holds it for its whole
/// synthesis run.
pub struct ModelContext {
    text: Arc<Mutex<Arc<dyn MusicModel>>>,
    melody: Arc<Mutex<Arc<dyn MusicModel>>>,
}

impl ModelContext {
    pub fn new(text: Arc<dyn MusicModel>, melody: Arc<dyn MusicModel>) -> Self {
        Self {
            text: Arc::new(Mutex::new(text)),
            melody: Arc::new(Mutex::new(melody)),
        }
    }

    /// Serve both request kinds from one model instance behind one lock.
    pub fn single(model: Arc<dyn MusicModel>) -> Self {
        let slot = Arc::new(Mutex::new(model));
        Self {
            text: slot.clone(),
            melody: slot,
        }
    }

    /// Wait for exclusive use of the model serving `kind`.
    pub async fn acquire(&self, kind: ModelKind) -> MutexGuard<'_, Arc<dyn MusicModel>> {
        match kind {
            ModelKind::Text => self.text.lock().await,
            ModelKind::Melody => self.melody.lock().await,
        }
    }
}

impl std::fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("text", &"<MusicModel>")
            .field("melody", &"<MusicModel>")
            .finish()
    }
}
