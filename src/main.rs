//! livecast CLI
//!
//! Runs an unattended YouTube live broadcast of a generated overlay.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use livecast_lib::core::logging::init_logging;
use livecast_lib::core::settings::load_settings;
use livecast_lib::overlay::OverlayRenderer;
use livecast_lib::remote::x::notifier_from_settings;
use livecast_lib::remote::youtube::{TokenStore, YoutubeClient};
use livecast_lib::shared::paths::{get_log_dir, get_settings_path, get_token_path};
use livecast_lib::stream::encoder::{check_ffmpeg, FfmpegLauncher};
use livecast_lib::stream::lifecycle::BroadcastLifecycle;
use livecast_lib::stream::types::StreamConfig;
use livecast_lib::stream::{ConfigSource, SessionDeps, SessionPhase, StreamCoordinator, StreamError};

#[derive(Parser)]
#[command(name = "livecast")]
#[command(author, version, about = "Unattended live broadcast driver", long_about = None)]
struct Cli {
    /// Settings file (default: <data dir>/livecast/settings.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// OAuth token file for YouTube (default: <data dir>/livecast/token.json)
    #[arg(long, global = true, value_name = "PATH")]
    token: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Go live and stream until Ctrl-C or until the encoder stops
    Stream {
        /// Stop automatically after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },

    /// Check ffmpeg and whether the YouTube account can go live
    Check,

    /// Render one overlay frame to a PNG file
    Preview {
        /// Output image path
        #[arg(long, default_value = "preview.png")]
        out: PathBuf,

        /// Elapsed time to render the status strip for
        #[arg(long, default_value = "0", value_name = "SECS")]
        elapsed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _logging = init_logging(&get_log_dir()).context("Failed to initialize logging")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let settings_path = cli.config.unwrap_or_else(get_settings_path);
    let token_path = cli.token.unwrap_or_else(get_token_path);

    match cli.command {
        Commands::Stream { duration } => {
            stream(settings_path, token_path, duration.map(Duration::from_secs)).await
        }
        Commands::Check => check(settings_path, token_path).await,
        Commands::Preview { out, elapsed } => {
            preview(settings_path, out, Duration::from_secs(elapsed))
        }
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

async fn stream(settings_path: PathBuf, token_path: PathBuf, duration: Option<Duration>) -> Result<()> {
    let settings = load_settings(&settings_path);
    StreamConfig::from_settings(&settings).context("Invalid settings")?;
    check_ffmpeg(&settings.encoder.program)?;

    let tokens = TokenStore::open(&token_path)?;
    let youtube = YoutubeClient::new(tokens)?;
    let lifecycle = BroadcastLifecycle::new(Arc::new(youtube), notifier_from_settings(&settings.announce));

    let deps = SessionDeps {
        renderer: Arc::new(OverlayRenderer::new(&settings_path, settings.overlay.clone())),
        lifecycle,
        launcher: Arc::new(FfmpegLauncher),
    };

    let (coordinator, handle) = StreamCoordinator::new(deps, ConfigSource::File(settings_path));
    let coordinator_task = tokio::spawn(coordinator.run());

    handle.start().await.context("Failed to go live")?;

    let status = handle.status();
    println!("Live: {}", status.watch_url.as_deref().unwrap_or("?"));
    println!("Press Ctrl-C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "system", "Interrupted, stopping stream");
        }
        _ = sleep_or_forever(duration) => {
            tracing::info!(target: "system", "Duration reached, stopping stream");
        }
        ended = handle.wait_for_phase(SessionPhase::Idle) => {
            ended?;
            tracing::warn!(target: "system", "Stream ended on its own");
        }
    }

    match handle.stop().await {
        Ok(()) | Err(StreamError::NotRunning) => {}
        Err(e) => return Err(e.into()),
    }

    let status = handle.status();
    drop(handle);
    coordinator_task.await.context("Coordinator task failed")?;

    println!("Stopped ({:?}).", status.phase);
    Ok(())
}

async fn check(settings_path: PathBuf, token_path: PathBuf) -> Result<()> {
    let settings = load_settings(&settings_path);

    match check_ffmpeg(&settings.encoder.program) {
        Ok(()) => println!("ffmpeg: ok ({})", settings.encoder.program),
        Err(e) => println!("ffmpeg: {}", e),
    }

    let youtube = YoutubeClient::new(TokenStore::open(&token_path)?)?;
    if youtube.check_live_streaming_enabled().await? {
        println!("youtube: live streaming enabled");
    } else {
        println!("youtube: live streaming is NOT enabled (https://www.youtube.com/features)");
    }

    Ok(())
}

fn preview(settings_path: PathBuf, out: PathBuf, elapsed: Duration) -> Result<()> {
    let settings = load_settings(&settings_path);
    let config = StreamConfig::from_settings(&settings).context("Invalid settings")?;

    let renderer = OverlayRenderer::fixed(settings.overlay);
    let canvas = renderer.render_image(config.resolution.width, config.resolution.height, elapsed)?;
    canvas
        .save(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Wrote {} ({})", out.display(), config.resolution);
    Ok(())
}
