use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output container formats the encoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported audio format: {0}")]
pub struct UnsupportedFormat(pub String);

impl AudioFormat {
    pub const ALL: &'static [AudioFormat] = &[AudioFormat::Wav, AudioFormat::Mp3];

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            other => Err(UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("wav".parse::<AudioFormat>(), Ok(AudioFormat::Wav));
        assert_eq!(" WAV ".parse::<AudioFormat>(), Ok(AudioFormat::Wav));
        assert_eq!("mp3".parse::<AudioFormat>(), Ok(AudioFormat::Mp3));
        assert_eq!(AudioFormat::Mp3.mime_type(), "audio/mpeg");
        assert_eq!(
            "ogg".parse::<AudioFormat>(),
            Err(UnsupportedFormat("ogg".to_string()))
        );
    }
}
