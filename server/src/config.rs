// Configuration for the server, read from the environment

use std::time::Duration;

use music_core::SynthesisConfig;

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Hex-encoded Ed25519 application key. `None` rejects every request.
    pub discord_public_key: Option<String>,
    pub discord_api_base: String,
    pub model_url: String,
    pub text_model: String,
    pub melody_model: String,
    pub max_segment_secs: u32,
    pub overlap_secs: u32,
    pub melody_max_secs: u32,
    pub max_duration_secs: u32,
    pub worker_count: usize,
    pub job_queue_capacity: usize,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub melody_fetch_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
    pub model_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            discord_public_key: None,
            discord_api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            model_url: "http://localhost:8000".to_string(),
            text_model: "large".to_string(),
            melody_model: "melody".to_string(),
            max_segment_secs: SynthesisConfig::DEFAULT_MAX_SEGMENT_SECS,
            overlap_secs: SynthesisConfig::DEFAULT_OVERLAP_SECS,
            melody_max_secs: 30,
            max_duration_secs: 300,
            worker_count: 1,
            job_queue_capacity: 16,
            rate_limit_per_minute: 60,
            request_timeout_secs: 10,
            melody_fetch_timeout_secs: 30,
            delivery_timeout_secs: 60,
            model_timeout_secs: 600,
            cors_allowed_origins: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_or("PORT", defaults.port),
            discord_public_key: env_string("DISCORD_PUBLIC_KEY"),
            discord_api_base: env_string("DISCORD_API_BASE").unwrap_or(defaults.discord_api_base),
            model_url: env_string("MODEL_URL").unwrap_or(defaults.model_url),
            text_model: env_string("TEXT_MODEL").unwrap_or(defaults.text_model),
            melody_model: env_string("MELODY_MODEL").unwrap_or(defaults.melody_model),
            max_segment_secs: env_or("MAX_SEGMENT_SECS", defaults.max_segment_secs),
            overlap_secs: env_or("OVERLAP_SECS", defaults.overlap_secs),
            melody_max_secs: env_or("MELODY_MAX_SECS", defaults.melody_max_secs),
            max_duration_secs: env_or("MAX_DURATION_SECS", defaults.max_duration_secs),
            worker_count: env_or("WORKER_COUNT", defaults.worker_count).max(1),
            job_queue_capacity: env_or("JOB_QUEUE_CAPACITY", defaults.job_queue_capacity).max(1),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            melody_fetch_timeout_secs: env_or(
                "MELODY_FETCH_TIMEOUT_SECS",
                defaults.melody_fetch_timeout_secs,
            ),
            delivery_timeout_secs: env_or("DELIVERY_TIMEOUT_SECS", defaults.delivery_timeout_secs),
            model_timeout_secs: env_or("MODEL_TIMEOUT_SECS", defaults.model_timeout_secs),
            cors_allowed_origins,
        }
    }

    /// Segment sizing, rejecting an overlap that does not fit in a segment.
    pub fn synthesis(&self) -> anyhow::Result<SynthesisConfig> {
        SynthesisConfig::new(self.max_segment_secs, self.overlap_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn melody_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.melody_fetch_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}
