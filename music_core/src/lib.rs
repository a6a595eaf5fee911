//! Long-form music synthesis core.
//!
//! Holds the audio types shared by the server and the model client, the
//! [`MusicModel`] capability boundary, the overlap-stitching
//! [`SegmentSynthesizer`], and the post-processing / codec steps that turn a
//! finished waveform into deliverable bytes. Nothing in here talks HTTP.

pub mod decode;
pub mod model;
pub mod mp3;
pub mod normalize;
pub mod segment;
pub mod wav;

mod format;

use anyhow::ensure;

pub use format::{AudioFormat, UnsupportedFormat};
pub use model::{Conditioning, ModelContext, ModelKind, MusicModel};
pub use normalize::NormalizationStrategy;
pub use segment::{plan_segments, SegmentPlan, SegmentSynthesizer, SynthesisConfig};

/// Encode finished 16-bit PCM into `format`.
pub fn encode(format: AudioFormat, pcm: &[i16], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    match format {
        AudioFormat::Wav => wav::encode_wav(pcm, sample_rate),
        AudioFormat::Mp3 => mp3::encode_mp3(pcm, sample_rate),
    }
}

/// Normalize, convert and encode a clip in one go.
pub fn render(
    buffer: AudioBuffer,
    format: AudioFormat,
    strategy: NormalizationStrategy,
) -> anyhow::Result<Vec<u8>> {
    let (pcm, sample_rate) = normalize::render_pcm(buffer, strategy);
    encode(format, &pcm, sample_rate)
}

/// Channel-major sample buffer. Everything in the pipeline is mono.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Build a mono buffer from interleaved frames by averaging channels.
    pub fn from_interleaved(interleaved: &[f32], sample_rate: u32, channels: u16) -> Self {
        if channels <= 1 {
            return Self::mono(interleaved.to_vec(), sample_rate);
        }
        let n = channels as usize;
        let samples = interleaved
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect();
        Self::mono(samples, sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples covering `secs` seconds at this buffer's rate.
    pub fn samples_for(&self, secs: u32) -> usize {
        secs as usize * self.sample_rate as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Keep at most `secs` seconds from the start.
    pub fn truncate_secs(&mut self, secs: u32) {
        let max = self.samples_for(secs);
        self.samples.truncate(max);
    }

    /// Last `secs` seconds of audio as a new buffer.
    pub fn tail_secs(&self, secs: u32) -> AudioBuffer {
        let n = self.samples_for(secs).min(self.samples.len());
        AudioBuffer {
            samples: self.samples[self.samples.len() - n..].to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.samples.iter().all(|s| s.is_finite())
    }

    /// Check the pipeline invariants: mono, non-zero rate, finite samples.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.channels == 1, "expected mono audio, got {} channels", self.channels);
        ensure!(self.sample_rate > 0, "sample rate must be positive");
        ensure!(self.is_finite(), "audio contains non-finite samples");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved_averages_channels() {
        let buf = AudioBuffer::from_interleaved(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 8, 2);
        assert_eq!(buf.channels, 1);
        assert_eq!(buf.samples, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_tail_and_truncate() {
        let mut buf = AudioBuffer::mono((0..10).map(|i| i as f32).collect(), 2);
        let tail = buf.tail_secs(2);
        assert_eq!(tail.samples, vec![6.0, 7.0, 8.0, 9.0]);

        buf.truncate_secs(3);
        assert_eq!(buf.len(), 6);
        assert!((buf.duration_secs() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let buf = AudioBuffer::mono(vec![0.0, f32::NAN], 100);
        assert!(buf.validate().is_err());
        let stereo = AudioBuffer {
            samples: vec![0.0; 4],
            sample_rate: 100,
            channels: 2,
        };
        assert!(stereo.validate().is_err());
    }
}
