pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod interaction;
pub mod job;
pub mod melody;
pub mod metrics;
pub mod validation;
pub mod verify;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use music_core::{ModelContext, SegmentSynthesizer};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::delivery::WebhookDelivery;
use crate::dispatcher::{JobDispatcher, SubmitError, WorkerPool};
use crate::error::{ApiError, BUSY_MESSAGE, SHUTTING_DOWN_MESSAGE};
use crate::interaction::{parse_interaction, Interaction, InteractionResponse};
use crate::job::{Generator, JobRunner, JobState};
use crate::melody::MelodyLoader;
use crate::metrics::{AppMetrics, MetricsResponse};
use crate::validation::{validate_command, ValidationLimits};
use crate::verify::{RequestVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<RequestVerifier>,
    pub dispatcher: JobDispatcher,
    pub metrics: Arc<AppMetrics>,
    pub limits: ValidationLimits,
}

/// Wire the job pipeline from configuration and start its workers.
pub fn build_state(
    config: &ServerConfig,
    models: Arc<ModelContext>,
) -> anyhow::Result<(AppState, WorkerPool)> {
    let verifier = RequestVerifier::from_hex(config.discord_public_key.as_deref());
    let synthesizer = SegmentSynthesizer::new(config.synthesis()?);
    let melody = MelodyLoader::new(config.melody_fetch_timeout(), config.melody_max_secs)?;
    let delivery = WebhookDelivery::new(&config.discord_api_base, config.delivery_timeout())?;
    let metrics = Arc::new(AppMetrics::new());

    let generator = Generator::new(models, synthesizer, melody);
    let runner = JobRunner::new(generator, delivery, metrics.jobs.clone());
    let (dispatcher, workers) =
        dispatcher::start(runner, config.worker_count, config.job_queue_capacity);

    let state = AppState {
        verifier: Arc::new(verifier),
        dispatcher,
        metrics,
        limits: ValidationLimits {
            max_duration_secs: config.max_duration_secs,
        },
    };
    Ok((state, workers))
}

/// Routes, served both at the root and under `/api`.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/", post(interaction_endpoint))
        .route("/generate", post(interaction_endpoint))
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = value.clone() {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot())
}

/// Interaction webhook. The body is verified as raw bytes before parsing.
pub async fn interaction_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let result = handle_interaction(&state, &headers, &body);
    state
        .metrics
        .interactions
        .record_request(started.elapsed().as_millis() as u64);

    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            state.metrics.interactions.record_error();
            e.into_response()
        }
    }
}

fn handle_interaction(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<InteractionResponse, ApiError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    debug!(state = %JobState::Received, bytes = body.len(), "Interaction received");
    if let Err(e) = state
        .verifier
        .verify(header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER), body)
    {
        warn!(state = %JobState::Rejected, "Interaction signature rejected");
        return Err(e);
    }
    debug!(state = %JobState::Verified, "Interaction signature verified");

    let command = match parse_interaction(body)? {
        Interaction::Ping => return Ok(InteractionResponse::pong()),
        Interaction::Command(command) => command,
    };

    let request = match validate_command(command, state.limits) {
        Ok(request) => request,
        Err(e) => {
            info!("Command rejected: {e}");
            return Ok(InteractionResponse::ephemeral(e.to_string()));
        }
    };

    let job_id = request.id;
    match state.dispatcher.submit(request) {
        Ok(()) => {
            state.metrics.jobs.record_accepted();
            info!(job = %job_id, state = %JobState::Deferred, "Job queued");
            Ok(InteractionResponse::deferred())
        }
        Err(SubmitError::QueueFull(_)) => {
            state.metrics.jobs.record_busy();
            warn!(job = %job_id, "Job queue full, turning request away");
            Ok(InteractionResponse::ephemeral(BUSY_MESSAGE))
        }
        Err(SubmitError::Closed(_)) => {
            warn!(job = %job_id, "Job queue closed, turning request away");
            Ok(InteractionResponse::ephemeral(SHUTTING_DOWN_MESSAGE))
        }
    }
}
