use thiserror::Error;
use uuid::Uuid;

use music_core::AudioFormat;

use crate::interaction::{CommandInvocation, GenerationRequest, RequestMode};

/// Maximum prompt length in characters
pub const MAX_PROMPT_LENGTH: usize = 1000;

/// A command that parsed but cannot be run. Display is shown to the user.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Your prompt is empty. Describe the music you want to hear.")]
    EmptyPrompt,

    #[error("Your prompt is too long (max {max} characters).")]
    PromptTooLong { max: usize },

    #[error("Duration must be between 1 and {max} seconds.")]
    DurationOutOfRange { max: u32 },

    #[error("Unsupported output format '{0}'. Supported formats: {}.", supported_formats())]
    UnsupportedFormat(String),
}

fn supported_formats() -> String {
    AudioFormat::ALL
        .iter()
        .map(|f| f.extension())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Copy, Debug)]
pub struct ValidationLimits {
    pub max_duration_secs: u32,
}

/// Validate a parsed command and turn it into a generation request
pub fn validate_command(
    command: CommandInvocation,
    limits: ValidationLimits,
) -> Result<GenerationRequest, ValidationError> {
    let prompt = command.prompt.trim();
    if prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    if prompt.chars().count() > MAX_PROMPT_LENGTH {
        return Err(ValidationError::PromptTooLong {
            max: MAX_PROMPT_LENGTH,
        });
    }

    let duration_secs = u32::try_from(command.duration)
        .ok()
        .filter(|d| (1..=limits.max_duration_secs).contains(d))
        .ok_or(ValidationError::DurationOutOfRange {
            max: limits.max_duration_secs,
        })?;

    let format: AudioFormat = command
        .format
        .parse()
        .map_err(|_| ValidationError::UnsupportedFormat(command.format.clone()))?;

    let mode = match command.melody_url {
        Some(url) => RequestMode::MelodyConditioned { url },
        None => RequestMode::TextOnly,
    };

    Ok(GenerationRequest {
        id: Uuid::new_v4(),
        prompt: prompt.to_string(),
        duration_secs,
        format,
        mode,
        context: command.context,
    })
}
