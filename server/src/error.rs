use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors answered directly on the interaction endpoint. No job exists yet.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request signature")]
    SignatureInvalid,

    #[error("Malformed interaction: {0}")]
    MalformedInteraction(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::SignatureInvalid => {
                (StatusCode::UNAUTHORIZED, "Invalid request signature".to_string())
            }
            ApiError::MalformedInteraction(msg) => {
                tracing::warn!("Malformed interaction: {}", msg);
                (StatusCode::BAD_REQUEST, "Bad request".to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Problems with the user's reference melody.
#[derive(Debug, Error)]
pub enum MelodyError {
    #[error("invalid melody URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported melody format '{0}', only .mp3 and .wav are supported")]
    UnsupportedFormat(String),

    #[error("melody download failed: {0}")]
    Fetch(String),

    #[error("melody could not be decoded: {0}")]
    Decode(String),
}

pub const MELODY_FORMAT_MESSAGE: &str = "*Sorry, an error occurred while generating your audio. Please check the format of your melody file.*";
pub const MELODY_FETCH_MESSAGE: &str = "*Sorry, I couldn't download your melody file. Please try uploading it again.*";
pub const BUSY_MESSAGE: &str = "*I'm busy generating other songs right now. Please try again in a few minutes.*";
pub const SHUTTING_DOWN_MESSAGE: &str = "*I'm restarting right now. Please try again in a minute.*";
pub const GENERIC_FAILURE_MESSAGE: &str = "*Sorry, an error occurred while generating your audio. Please try again in a bit.*";

/// Why a background job ended without a clip.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] MelodyError),

    #[error("generation failed: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    /// The message shown to the requester in place of the clip.
    pub fn user_message(&self) -> &'static str {
        match self {
            JobError::Validation(MelodyError::UnsupportedFormat(_))
            | JobError::Validation(MelodyError::Decode(_)) => MELODY_FORMAT_MESSAGE,
            JobError::Validation(MelodyError::InvalidUrl(_))
            | JobError::Validation(MelodyError::Fetch(_)) => MELODY_FETCH_MESSAGE,
            JobError::Internal(_) => GENERIC_FAILURE_MESSAGE,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let format = JobError::from(MelodyError::UnsupportedFormat("ogg".into()));
        assert_eq!(format.user_message(), MELODY_FORMAT_MESSAGE);
        assert!(format.is_validation());

        let fetch = JobError::from(MelodyError::Fetch("404 Not Found".into()));
        assert_eq!(fetch.user_message(), MELODY_FETCH_MESSAGE);

        let internal = JobError::from(anyhow::anyhow!("CUDA out of memory"));
        assert_eq!(internal.user_message(), GENERIC_FAILURE_MESSAGE);
        assert!(!internal.is_validation());
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::SignatureInvalid.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::MalformedInteraction("no type".into())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("queue lock poisoned".into())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
