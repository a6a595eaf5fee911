//! Long-form synthesis by overlap-conditioned continuation.
//!
//! The model can only produce windows of up to `max_segment_secs`. Longer
//! clips are built by repeatedly feeding the last `overlap_secs` of the
//! running output back in as context and splicing the returned segment over
//! that tail, so every seam is re-synthesized instead of hard-cut.

use anyhow::{ensure, Context};
use tracing::debug;

use crate::model::{Conditioning, ModelContext, MusicModel};
use crate::AudioBuffer;

/// Segment sizing. `0 < overlap_secs < max_segment_secs` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisConfig {
    max_segment_secs: u32,
    overlap_secs: u32,
}

impl SynthesisConfig {
    pub const DEFAULT_MAX_SEGMENT_SECS: u32 = 30;
    pub const DEFAULT_OVERLAP_SECS: u32 = 10;

    pub fn new(max_segment_secs: u32, overlap_secs: u32) -> anyhow::Result<Self> {
        ensure!(max_segment_secs > 0, "max segment duration must be positive");
        ensure!(overlap_secs > 0, "overlap must be positive");
        ensure!(
            overlap_secs < max_segment_secs,
            "overlap ({overlap_secs}s) must be shorter than the max segment duration ({max_segment_secs}s)"
        );
        Ok(Self {
            max_segment_secs,
            overlap_secs,
        })
    }

    pub fn max_segment_secs(&self) -> u32 {
        self.max_segment_secs
    }

    pub fn overlap_secs(&self) -> u32 {
        self.overlap_secs
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_segment_secs: Self::DEFAULT_MAX_SEGMENT_SECS,
            overlap_secs: Self::DEFAULT_OVERLAP_SECS,
        }
    }
}

/// Lengths of every model call needed for one clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub seed_secs: u32,
    /// Requested length of each continuation, overlap window included.
    pub continuations: Vec<u32>,
}

impl SegmentPlan {
    pub fn model_calls(&self) -> usize {
        1 + self.continuations.len()
    }

    /// Duration of the stitched result.
    pub fn output_secs(&self, overlap_secs: u32) -> u32 {
        self.continuations
            .iter()
            .fold(self.seed_secs, |acc, seg| acc + seg - overlap_secs)
    }
}

/// Work out the seed and continuation lengths for `duration_secs`.
///
/// Produces `ceil((duration - max) / (max - overlap))` continuations, so the
/// plan grows linearly with the duration. Bound the duration before calling.
pub fn plan_segments(duration_secs: u32, config: &SynthesisConfig) -> SegmentPlan {
    let max = config.max_segment_secs;
    let overlap = config.overlap_secs;

    let seed_secs = duration_secs.min(max);
    let mut remaining = duration_secs - seed_secs;
    let mut continuations = Vec::new();

    while remaining > 0 {
        // remaining > 0 and max > overlap, so segment > overlap
        let segment = remaining.saturating_add(overlap).min(max);
        continuations.push(segment);
        remaining = remaining.saturating_sub(segment - overlap);
    }

    SegmentPlan {
        seed_secs,
        continuations,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentSynthesizer {
    config: SynthesisConfig,
}

impl SegmentSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Synthesize a clip, holding the matching model for the whole run.
    pub async fn synthesize(
        &self,
        models: &ModelContext,
        prompt: &str,
        duration_secs: u32,
        conditioning: &Conditioning,
    ) -> anyhow::Result<AudioBuffer> {
        let model = models.acquire(conditioning.kind()).await;
        self.synthesize_with(&**model, prompt, duration_secs, conditioning)
            .await
    }

    /// Run the seed + extension loop against one model.
    pub async fn synthesize_with(
        &self,
        model: &dyn MusicModel,
        prompt: &str,
        duration_secs: u32,
        conditioning: &Conditioning,
    ) -> anyhow::Result<AudioBuffer> {
        ensure!(duration_secs > 0, "requested duration must be positive");

        let overlap = self.config.overlap_secs;
        let plan = plan_segments(duration_secs, &self.config);
        debug!(
            duration_secs,
            seed_secs = plan.seed_secs,
            continuations = plan.continuations.len(),
            model = %conditioning.kind(),
            "planned segments"
        );

        let mut output = match conditioning {
            Conditioning::TextOnly => model.generate(prompt, plan.seed_secs).await,
            Conditioning::Melody(melody) => {
                model
                    .generate_with_melody(prompt, melody, plan.seed_secs)
                    .await
            }
        }
        .context("seed segment generation failed")?;
        check_segment(&output, None).context("seed segment rejected")?;
        fit_segment(&mut output, plan.seed_secs).context("seed segment rejected")?;

        for (i, &segment_secs) in plan.continuations.iter().enumerate() {
            let overlap_len = output.samples_for(overlap);
            ensure!(
                output.len() >= overlap_len,
                "output ({} samples) is shorter than the {overlap}s overlap window",
                output.len()
            );
            let context = output.tail_secs(overlap);

            let mut next = model
                .generate_continuation(&context, prompt, segment_secs)
                .await
                .with_context(|| format!("continuation {} failed", i + 1))?;
            check_segment(&next, Some(output.sample_rate))
                .with_context(|| format!("continuation {} rejected", i + 1))?;
            fit_segment(&mut next, segment_secs)
                .with_context(|| format!("continuation {} rejected", i + 1))?;

            splice(&mut output, next, overlap_len);
            debug!(
                step = i + 1,
                segment_secs,
                total_secs = output.duration_secs(),
                "spliced continuation"
            );
        }

        let expected = output.samples_for(duration_secs);
        ensure!(
            output.len() == expected,
            "stitched clip has {} samples, expected {expected}",
            output.len()
        );
        Ok(output)
    }
}

fn check_segment(segment: &AudioBuffer, expected_rate: Option<u32>) -> anyhow::Result<()> {
    segment.validate()?;
    ensure!(!segment.is_empty(), "model returned an empty segment");
    if let Some(rate) = expected_rate {
        ensure!(
            segment.sample_rate == rate,
            "sample rate changed mid-clip ({} -> {})",
            rate,
            segment.sample_rate
        );
    }
    Ok(())
}

/// Require at least `secs` seconds of audio and drop anything past that.
fn fit_segment(segment: &mut AudioBuffer, secs: u32) -> anyhow::Result<()> {
    let wanted = segment.samples_for(secs);
    ensure!(
        segment.len() >= wanted,
        "model returned {} samples for a {secs}s segment, expected {wanted}",
        segment.len()
    );
    segment.samples.truncate(wanted);
    Ok(())
}

/// Replace the last `overlap_len` samples of `output` with all of `segment`.
fn splice(output: &mut AudioBuffer, segment: AudioBuffer, overlap_len: usize) {
    let keep = output.samples.len().saturating_sub(overlap_len);
    output.samples.truncate(keep);
    output.samples.extend(segment.samples);
}
