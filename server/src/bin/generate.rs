//! Generate a clip locally against the model service and write it to disk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use model_client::HttpMusicModel;
use music_core::{AudioFormat, ModelContext, MusicModel, SegmentSynthesizer};
use tracing::info;

use server::config::ServerConfig;
use server::interaction::RequestMode;
use server::job::Generator;
use server::melody::MelodyLoader;

#[derive(Parser, Debug)]
#[command(name = "generate", about = "Generate music from a text prompt")]
struct Args {
    /// Text description of the music
    #[arg(long)]
    prompt: String,

    /// Clip length in seconds
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    duration: u32,

    /// Output container format
    #[arg(long, default_value = "wav")]
    format: AudioFormat,

    /// URL of an .mp3 or .wav melody to condition on
    #[arg(long)]
    melody: Option<String>,

    #[arg(long, default_value = "/tmp/audiocraft")]
    out_dir: PathBuf,

    #[arg(long, env = "MODEL_URL", default_value = "http://localhost:8000")]
    model_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();
    let args = Args::parse();
    let config = ServerConfig::from_env();

    let (model_name, mode) = match args.melody.clone() {
        Some(url) => (&config.melody_model, RequestMode::MelodyConditioned { url }),
        None => (&config.text_model, RequestMode::TextOnly),
    };
    info!("Loading model '{}' from {}", model_name, args.model_url);
    let model: Arc<dyn MusicModel> = Arc::new(
        HttpMusicModel::connect(&args.model_url, model_name, config.model_timeout()).await?,
    );

    let generator = Generator::new(
        Arc::new(ModelContext::single(model)),
        SegmentSynthesizer::new(config.synthesis()?),
        MelodyLoader::new(config.melody_fetch_timeout(), config.melody_max_secs)?,
    );

    let result = generator
        .generate(&args.prompt, args.duration, args.format, &mode)
        .await?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let ext = result.format.extension();
    if let Some(melody) = &result.melody_clip {
        let path = args.out_dir.join(format!("melody_clip.{ext}"));
        info!("Saving to {}", path.display());
        tokio::fs::write(&path, melody).await?;
    }

    let path = args.out_dir.join(format!("output.{ext}"));
    info!("Saving to {}", path.display());
    tokio::fs::write(&path, &result.primary_clip).await?;

    Ok(())
}
