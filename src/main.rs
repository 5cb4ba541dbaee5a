use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use waav_avatar::auth::sign_url;
use waav_avatar::config::AvatarConfig;
use waav_avatar::core::session::{
    AvatarSession, CompletionSignal, Ctrl, Envelope, StreamOutcome,
};

/// WaaV Avatar - open an interactive avatar session and drive it with text
#[derive(Parser, Debug)]
#[command(name = "waav-avatar")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Text for the avatar to speak once the stream is ready
    #[arg(short = 't', long = "text", default_value = "Hello, how can I help you today?")]
    text: String,

    /// Optional question for an interactive text turn
    #[arg(short = 'i', long = "interact")]
    interact: Option<String>,

    /// `interactive_mode` sent with the text_driver request (0 or 1)
    #[arg(
        long = "interactive-mode",
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=1)
    )]
    interactive_mode: u8,

    /// How long to wait for the stream URL
    #[arg(long = "wait-seconds", default_value_t = 30)]
    wait_seconds: u64,

    /// How long to keep the session open after the last request
    #[arg(long = "linger-seconds", default_value_t = 10)]
    linger_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must happen before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            AvatarConfig::from_file(path)?
        }
        None => AvatarConfig::from_env()?,
    };

    let request_url = sign_url(&config.endpoint_url, &config.credentials(), "GET")
        .context("Failed to sign interaction url")?;

    let session = AvatarSession::new(request_url, config.session_options());
    session.connect().await?;

    let ready = CompletionSignal::new();
    session
        .start(&start_request(&config), Some(&ready))
        .await
        .context("Failed to send start request")?;

    match tokio::time::timeout(Duration::from_secs(cli.wait_seconds), ready.wait()).await {
        Ok(StreamOutcome::Ready { stream_url }) => {
            println!("Avatar stream: {stream_url}");
        }
        Ok(StreamOutcome::Failed(failure)) => {
            error!("Avatar session failed: {failure}");
            session.close().await?;
            return Err(failure.into());
        }
        Err(_) => {
            warn!(
                "No stream url after {}s; continuing without it",
                cli.wait_seconds
            );
        }
    }

    if !session.send(&text_driver_request(&config, &cli.text, cli.interactive_mode))? {
        warn!("text_driver request was not sent: session not ready");
    }

    if let Some(question) = &cli.interact {
        if !session.send(&text_interact_request(&config, question))? {
            warn!("text_interact request was not sent: session not ready");
        }
    }

    tokio::time::sleep(Duration::from_secs(cli.linger_seconds)).await;
    session.close().await?;

    Ok(())
}

fn start_request(config: &AvatarConfig) -> Envelope {
    let mut envelope = Envelope::new(config.app_id.as_str(), Ctrl::Start).with_parameter(json!({
        "avatar": {
            "avatar_id": config.avatar_id,
            "stream": { "protocol": "rtmp", "fps": 25, "bitrate": 5000, "alpha": 0 },
            "width": 900,
            "height": 1280
        },
        "subtitle": { "subtitle": 1, "font_color": "#FFFFFF" }
    }));
    if !config.scene_id.is_empty() {
        envelope = envelope.with_header_field("scene_id", config.scene_id.as_str());
    }
    envelope
}

fn tts_parameter(config: &AvatarConfig, volume: u32) -> Value {
    json!({ "vcn": config.vcn, "speed": 50, "pitch": 50, "volume": volume })
}

fn text_driver_request(config: &AvatarConfig, text: &str, interactive_mode: u8) -> Envelope {
    Envelope::new(config.app_id.as_str(), Ctrl::TextDriver)
        .with_parameter(json!({
            "avatar_dispatch": { "interactive_mode": interactive_mode },
            "tts": tts_parameter(config, 50)
        }))
        .with_payload(json!({ "text": { "content": text } }))
}

fn text_interact_request(config: &AvatarConfig, text: &str) -> Envelope {
    Envelope::new(config.app_id.as_str(), Ctrl::TextInteract)
        .with_parameter(json!({ "tts": tts_parameter(config, 100) }))
        .with_payload(json!({ "text": { "content": text } }))
}
