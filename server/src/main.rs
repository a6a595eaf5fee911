use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use model_client::HttpMusicModel;
use music_core::{ModelContext, MusicModel};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{app, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn connect_models(config: &ServerConfig) -> anyhow::Result<ModelContext> {
    info!(
        "Connecting to model service at {} (text={}, melody={})",
        config.model_url, config.text_model, config.melody_model
    );
    let text: Arc<dyn MusicModel> = Arc::new(
        HttpMusicModel::connect(&config.model_url, &config.text_model, config.model_timeout())
            .await
            .with_context(|| format!("loading text model '{}'", config.text_model))?,
    );

    if config.melody_model == config.text_model {
        return Ok(ModelContext::single(text));
    }

    let melody: Arc<dyn MusicModel> = Arc::new(
        HttpMusicModel::connect(&config.model_url, &config.melody_model, config.model_timeout())
            .await
            .with_context(|| format!("loading melody model '{}'", config.melody_model))?,
    );
    Ok(ModelContext::new(text, melody))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, no longer accepting interactions");
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting music generation server...");

    let config = ServerConfig::from_env();
    let models = Arc::new(connect_models(&config).await?);

    let (state, workers) = build_state(&config, models.clone())?;
    let dispatcher = state.dispatcher.clone();
    info!(
        "Server configuration loaded: port={}, workers={}, queue={}, segment={}s, overlap={}s, max_duration={}s, rate_limit={}/min",
        config.port,
        workers.size(),
        config.job_queue_capacity,
        config.max_segment_secs,
        config.overlap_secs,
        config.max_duration_secs,
        config.rate_limit_per_minute
    );
    if !state.verifier.is_configured() {
        warn!("Running without a usable DISCORD_PUBLIC_KEY, every interaction will get 401");
    }

    // Rate limiting is global: interactions all arrive from the platform's own IPs
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / u64::from(per_minute)).max(1))
            .burst_size(per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("invalid rate limit configuration")?,
    );

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let app = app(state).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.close();
    info!("Draining job queue...");
    workers.join().await;
    drop(models);
    info!("Shutdown complete");
    Ok(())
}
