//! Decode compressed or PCM audio bytes (MP3, WAV) into a mono buffer.

use std::io::Cursor;

use anyhow::{anyhow, Context};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::AudioBuffer;

/// Decode an in-memory file. Multi-channel input is averaged down to mono.
///
/// `extension` is only a probing hint; the container is sniffed from the
/// bytes.
pub fn decode_audio(bytes: Vec<u8>, extension: Option<&str>) -> anyhow::Result<AudioBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("failed to probe audio format: {e}"))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no audio track found"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("sample rate not found")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("failed to create decoder: {e}"))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels: u16 = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                warn!("error reading packet: {e}");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(anyhow!("decode error: {e}")),
        }
    }

    if interleaved.is_empty() || channels == 0 {
        return Err(anyhow!("audio contained no decodable samples"));
    }

    let buffer = AudioBuffer::from_interleaved(&interleaved, sample_rate, channels);
    debug!(
        sample_rate,
        channels,
        secs = buffer.duration_secs(),
        "decoded audio"
    );
    buffer.validate()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: &[Vec<i16>]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in frames {
                for &s in frame {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_wav() {
        let frames: Vec<Vec<i16>> = (0..800).map(|i| vec![(i % 100) as i16 * 100]).collect();
        let buf = decode_audio(wav_bytes(1, 8_000, &frames), Some("wav")).unwrap();
        assert_eq!(buf.sample_rate, 8_000);
        assert_eq!(buf.channels, 1);
        assert_eq!(buf.len(), 800);
        assert!((buf.samples[1] - 100.0 / 32768.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        let frames: Vec<Vec<i16>> = (0..400).map(|_| vec![16384, -16384]).collect();
        let buf = decode_audio(wav_bytes(2, 16_000, &frames), None).unwrap();
        assert_eq!(buf.channels, 1);
        assert_eq!(buf.len(), 400);
        assert!(buf.samples.iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_audio(b"definitely not audio".to_vec(), Some("mp3"));
        assert!(err.is_err());
    }
}
