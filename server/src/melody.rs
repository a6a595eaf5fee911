//! Fetch and decode a user's reference melody.

use std::time::Duration;

use music_core::{decode::decode_audio, AudioBuffer};
use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::error::MelodyError;

/// Container formats accepted for melody uploads.
pub const MELODY_EXTENSIONS: &[&str] = &["mp3", "wav"];

#[derive(Clone, Debug)]
pub struct MelodyLoader {
    client: Client,
    max_secs: u32,
}

impl MelodyLoader {
    pub fn new(timeout: Duration, max_secs: u32) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, max_secs))
    }

    pub fn with_client(client: Client, max_secs: u32) -> Self {
        Self { client, max_secs }
    }

    pub fn max_secs(&self) -> u32 {
        self.max_secs
    }

    /// Download, decode and cap a melody at `max_secs`.
    ///
    /// The extension is checked before any network access.
    pub async fn load(&self, url: &str) -> Result<AudioBuffer, MelodyError> {
        let (url, extension) = melody_extension(url)?;

        debug!("Fetching melody from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MelodyError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| MelodyError::Fetch(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MelodyError::Fetch(e.to_string()))?;

        let mut melody = tokio::task::spawn_blocking(move || {
            decode_audio(bytes.to_vec(), Some(extension.as_str()))
        })
        .await
        .map_err(|e| MelodyError::Decode(e.to_string()))?
        .map_err(|e| MelodyError::Decode(format!("{e:#}")))?;

        if melody.duration_secs() > f64::from(self.max_secs) {
            info!(
                "Truncating {:.1}s melody to {}s",
                melody.duration_secs(),
                self.max_secs
            );
            melody.truncate_secs(self.max_secs);
        }

        Ok(melody)
    }
}

/// Parse `url` and return it with its lowercased, supported file extension.
///
/// Only the path is inspected, so CDN query strings are ignored.
pub fn melody_extension(url: &str) -> Result<(Url, String), MelodyError> {
    let parsed = Url::parse(url).map_err(|e| MelodyError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(MelodyError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let extension = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if MELODY_EXTENSIONS.contains(&extension.as_str()) {
        Ok((parsed, extension))
    } else {
        Err(MelodyError::UnsupportedFormat(extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        let (_, ext) = melody_extension("https://cdn.example.com/a/b/tune.mp3").unwrap();
        assert_eq!(ext, "mp3");
        let (_, ext) = melody_extension("https://cdn.example.com/TUNE.WAV?ex=1&is=2").unwrap();
        assert_eq!(ext, "wav");
    }

    #[test]
    fn test_unsupported_extensions() {
        assert!(matches!(
            melody_extension("https://cdn.example.com/tune.ogg"),
            Err(MelodyError::UnsupportedFormat(ext)) if ext == "ogg"
        ));
        assert!(matches!(
            melody_extension("https://cdn.example.com/tune"),
            Err(MelodyError::UnsupportedFormat(_))
        ));
        // extension-looking query strings do not count
        assert!(matches!(
            melody_extension("https://cdn.example.com/tune.ogg?name=x.mp3"),
            Err(MelodyError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            melody_extension("not a url"),
            Err(MelodyError::InvalidUrl(_))
        ));
        assert!(matches!(
            melody_extension("file:///etc/tune.wav"),
            Err(MelodyError::InvalidUrl(_))
        ));
    }
}
