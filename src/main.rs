use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use voicememo::{
    format_elapsed, CaptureBackend, CaptureBackendFactory, CaptureSource, Config, EncodingChoice,
    MessageStore, RecorderConfig, RecorderController,
};

#[derive(Parser)]
#[command(name = "voicememo", version, about = "Record voice messages with live level metering")]
struct Cli {
    /// Config file to load (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a voice message from the microphone
    Record {
        /// Stop automatically after this many seconds (Ctrl-C always works)
        #[arg(long)]
        seconds: Option<u64>,
        /// Input device name; overrides the config
        #[arg(long)]
        device: Option<String>,
        /// Title for the stored message
        #[arg(long, default_value = "Voice message")]
        title: String,
        /// Message store file; overrides the config
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// List stored messages, newest first
    List {
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Write a stored message's audio to a file
    Export {
        #[arg(long)]
        id: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Record {
            seconds,
            device,
            title,
            store,
        } => record(config, seconds, device, title, store).await,
        Command::List { store } => list(config, store),
        Command::Export { id, out, store } => export(config, &id, &out, store),
    }
}

async fn record(
    config: Config,
    seconds: Option<u64>,
    device: Option<String>,
    title: String,
    store_path: Option<PathBuf>,
) -> Result<()> {
    let device = device.unwrap_or(config.audio.device);
    let backend: Arc<dyn CaptureBackend> =
        Arc::from(CaptureBackendFactory::create(CaptureSource::Microphone { device }));

    let controller = RecorderController::new(
        backend,
        RecorderConfig {
            fragment_interval: Duration::from_millis(config.audio.fragment_interval_ms),
            max_artifact_bytes: config.audio.max_artifact_bytes,
            encoding: config.audio.encoding.as_deref().map(EncodingChoice::from),
            ..RecorderConfig::default()
        },
    );

    if !controller.is_supported() {
        anyhow::bail!("audio capture is not supported on this host");
    }

    controller.start().await?;
    info!("recording, press Ctrl-C to stop");

    let progress = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.tick().await;
            loop {
                tick.tick().await;
                if !controller.state().is_active() {
                    break;
                }
                info!(
                    "{} level={:.2}",
                    controller.formatted_elapsed(),
                    controller.current_level()
                );
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("stop requested"),
        _ = async {
            match seconds {
                Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
                None => std::future::pending().await,
            }
        } => info!("time limit reached"),
    }

    progress.abort();
    controller.stop().await?;

    let artifact = controller
        .artifact()
        .await
        .ok_or_else(|| anyhow!("recording produced no artifact"))?;

    let path = store_path.unwrap_or_else(|| PathBuf::from(&config.store.messages_path));
    let mut store = MessageStore::load(&path)?;
    let message = store.add_recording(title, &artifact);
    info!(
        "saved message '{}' ({}, {})",
        message.title,
        message.id,
        format_elapsed(artifact.duration_seconds)
    );
    store.save(&path)?;

    controller.shutdown().await;
    Ok(())
}

fn list(config: Config, store_path: Option<PathBuf>) -> Result<()> {
    let path = store_path.unwrap_or_else(|| PathBuf::from(&config.store.messages_path));
    let store = MessageStore::load(&path)?;

    if store.is_empty() {
        println!("no messages in {}", path.display());
        return Ok(());
    }

    for message in store.messages() {
        let duration = message
            .duration_seconds
            .map(format_elapsed)
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {:>5}  {}", message.id, duration, message.title);
    }
    Ok(())
}

fn export(config: Config, id: &str, out: &PathBuf, store_path: Option<PathBuf>) -> Result<()> {
    let path = store_path.unwrap_or_else(|| PathBuf::from(&config.store.messages_path));
    let store = MessageStore::load(&path)?;

    let message = store
        .get(id)
        .ok_or_else(|| anyhow!("no message with id {id}"))?;
    let artifact = message.decode_artifact()?;

    std::fs::write(out, &artifact.bytes)
        .with_context(|| format!("failed to write {}", out.display()))?;
    info!(
        "exported {} ({} bytes, {})",
        out.display(),
        artifact.bytes.len(),
        artifact.encoding
    );
    Ok(())
}
