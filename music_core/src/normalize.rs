//! Post-processing: gain normalization and fixed-point conversion.
//!
//! Loudness is measured per ITU-R BS.1770 (K-weighting, 400 ms blocks with
//! 75% overlap, absolute gate at -70 LUFS, relative gate 10 LU below the
//! ungated mean).

use tracing::{debug, warn};

use crate::AudioBuffer;

const PEAK_CLIP_HEADROOM_DB: f32 = 1.0;
const RMS_HEADROOM_DB: f32 = 18.0;
const LOUDNESS_HEADROOM_DB: f32 = 14.0;
/// Below this RMS the clip is treated as silence and left alone.
const ENERGY_FLOOR: f32 = 2e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationStrategy {
    /// Scale so the peak sits `PEAK_CLIP_HEADROOM_DB` below full scale.
    Peak,
    /// Hard clip at the peak headroom.
    Clip,
    /// Scale so the RMS sits `RMS_HEADROOM_DB` below full scale.
    Rms,
    /// Scale to `-LOUDNESS_HEADROOM_DB` LUFS.
    #[default]
    Loudness,
    None,
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Apply `strategy` in place.
pub fn normalize(buffer: &mut AudioBuffer, strategy: NormalizationStrategy) {
    match strategy {
        NormalizationStrategy::Peak => {
            let p = peak(&buffer.samples);
            if p > 0.0 {
                scale(&mut buffer.samples, db_to_gain(-PEAK_CLIP_HEADROOM_DB) / p);
            }
        }
        NormalizationStrategy::Clip => {
            let limit = db_to_gain(-PEAK_CLIP_HEADROOM_DB);
            for s in buffer.samples.iter_mut() {
                *s = s.clamp(-limit, limit);
            }
        }
        NormalizationStrategy::Rms => {
            let r = rms(&buffer.samples);
            if r > 0.0 {
                scale(&mut buffer.samples, db_to_gain(-RMS_HEADROOM_DB) / r);
            }
            clip(&mut buffer.samples);
        }
        NormalizationStrategy::Loudness => {
            normalize_loudness(buffer, LOUDNESS_HEADROOM_DB);
            clip(&mut buffer.samples);
        }
        NormalizationStrategy::None => {}
    }
}

fn scale(samples: &mut [f32], gain: f32) {
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

fn clip(samples: &mut [f32]) {
    let p = peak(samples);
    if p > 1.0 {
        warn!(peak = p, "clipping normalized audio");
    }
    for s in samples.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
}

fn normalize_loudness(buffer: &mut AudioBuffer, headroom_db: f32) {
    let energy = rms(&buffer.samples);
    if energy < ENERGY_FLOOR {
        debug!(energy, "skipping loudness normalization for near-silent clip");
        return;
    }
    let Some(input_lufs) = integrated_loudness(&buffer.samples, buffer.sample_rate) else {
        return;
    };
    let delta = -headroom_db as f64 - input_lufs;
    let gain = 10f64.powf(delta / 20.0) as f32;
    debug!(input_lufs, gain, "loudness normalization");
    scale(&mut buffer.samples, gain);
}

/// Direct form I biquad.
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
}

impl Biquad {
    /// RBJ high shelf.
    fn high_shelf(sample_rate: f64, freq: f64, q: f64, gain_db: f64) -> Self {
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let sqrt_a = a.sqrt();

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos + 2.0 * sqrt_a * alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos - 2.0 * sqrt_a * alpha);
        let a0 = (a + 1.0) - (a - 1.0) * cos + 2.0 * sqrt_a * alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos);
        let a2 = (a + 1.0) - (a - 1.0) * cos - 2.0 * sqrt_a * alpha;
        Self {
            b: [b0 / a0, b1 / a0, b2 / a0],
            a: [a1 / a0, a2 / a0],
        }
    }

    /// RBJ high pass.
    fn high_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b: [(1.0 + cos) / 2.0 / a0, -(1.0 + cos) / a0, (1.0 + cos) / 2.0 / a0],
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
        }
    }

    fn process(&self, input: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + self.b[1] * x1 + self.b[2] * x2
                    - self.a[0] * y1
                    - self.a[1] * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

fn block_loudness(mean_square: f64) -> f64 {
    -0.691 + 10.0 * mean_square.log10()
}

/// Gated integrated loudness of a mono signal in LUFS, or `None` when every
/// block falls under the absolute gate.
pub fn integrated_loudness(samples: &[f32], sample_rate: u32) -> Option<f64> {
    if samples.is_empty() || sample_rate == 0 {
        return None;
    }
    let sr = sample_rate as f64;
    let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let shelved = Biquad::high_shelf(sr, 1500.0, std::f64::consts::FRAC_1_SQRT_2, 4.0).process(&input);
    let weighted = Biquad::high_pass(sr, 38.0, 0.5).process(&shelved);

    let block = ((0.4 * sr) as usize).max(1);
    let step = ((0.1 * sr) as usize).max(1);

    let mut powers: Vec<f64> = Vec::new();
    if weighted.len() < block {
        powers.push(weighted.iter().map(|y| y * y).sum::<f64>() / weighted.len() as f64);
    } else {
        let mut start = 0;
        while start + block <= weighted.len() {
            let window = &weighted[start..start + block];
            powers.push(window.iter().map(|y| y * y).sum::<f64>() / block as f64);
            start += step;
        }
    }

    let above_absolute: Vec<f64> = powers
        .into_iter()
        .filter(|&z| z > 0.0 && block_loudness(z) > -70.0)
        .collect();
    if above_absolute.is_empty() {
        return None;
    }

    let ungated = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let relative_gate = block_loudness(ungated) - 10.0;
    let gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&z| block_loudness(z) > relative_gate)
        .collect();
    if gated.is_empty() {
        return None;
    }

    Some(block_loudness(gated.iter().sum::<f64>() / gated.len() as f64))
}

/// Clamp to `[-1, 1 - 2^-15]` and scale to 16-bit, truncating toward zero.
pub fn to_i16_pcm(samples: &[f32]) -> Vec<i16> {
    const SCALE: f32 = 32768.0;
    const UPPER: f32 = 1.0 - 1.0 / SCALE;
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, UPPER) * SCALE) as i16)
        .collect()
}

/// Full post-processing chain: mono, normalize, 16-bit PCM.
pub fn render_pcm(mut buffer: AudioBuffer, strategy: NormalizationStrategy) -> (Vec<i16>, u32) {
    if buffer.channels > 1 {
        buffer = AudioBuffer::from_interleaved(&buffer.samples, buffer.sample_rate, buffer.channels);
    }
    normalize(&mut buffer, strategy);
    (to_i16_pcm(&buffer.samples), buffer.sample_rate)
}
