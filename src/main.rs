//! Command-line front end for the slidelapse controller.
//!
//! Talks GRBL over a serial port (feature `serial`, on by default). The
//! device address and motion limits come from the config file and
//! `SLIDELAPSE_*` environment variables; most subcommands also accept
//! overrides.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use log::info;
use slidelapse::error::{AppResult, SliderError};
use slidelapse::grbl::GrblEvent;
use slidelapse::scenes::{SceneEvent, SceneTemplate, CATALOG};
use slidelapse::session::{SliderSession, TransportFactory};
use slidelapse::settings::{Settings, SettingsStore};
use slidelapse::timelapse::{FrameCapture, SceneMotionHook, TimelapseController};
use slidelapse::transport::Transport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "slidelapse", about = "GRBL camera slider timelapse controller")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial device overriding the configured address.
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the built-in scene presets.
    ListPresets,
    /// Query the controller state once.
    Status,
    /// Issue a single relative jog.
    Jog {
        /// Axis letter (X, Y or Z).
        #[arg(long, default_value = "X")]
        axis: String,
        /// Distance in mm.
        #[arg(long)]
        distance: f64,
        /// Feed rate in mm/min.
        #[arg(long, default_value_t = 300)]
        feed: u32,
    },
    /// Run a motion-only preset to completion.
    Run {
        /// Preset id, see `list-presets`.
        preset: String,
    },
    /// Run a preset as a full capture loop.
    Timelapse {
        /// Preset id, see `list-presets`.
        preset: String,
        /// Stop after this many frames instead of the preset duration.
        #[arg(long)]
        shots: Option<u32>,
    },
}

/// Capture sink that only announces frames. Stand-in until a camera trigger
/// backend lands.
struct LogCapture;

#[async_trait]
impl FrameCapture for LogCapture {
    async fn capture(&self, frame_name: &str) -> AppResult<()> {
        info!("Shutter: {}", frame_name);
        Ok(())
    }
}

#[cfg(feature = "serial")]
fn transport_factory() -> TransportFactory {
    use slidelapse::transport::SerialTransport;
    Arc::new(|| Box::new(SerialTransport::default()) as Box<dyn Transport>)
}

fn lookup_preset(id: &str) -> anyhow::Result<&'static SceneTemplate> {
    SceneTemplate::by_id(id).with_context(|| {
        format!(
            "unknown preset '{}', try `slidelapse list-presets`",
            id
        )
    })
}

async fn connected_session(cli: &Cli) -> anyhow::Result<SliderSession> {
    let settings = Settings::load(cli.config.as_deref())?;
    let store = SettingsStore::new(settings);
    if let Some(device) = &cli.device {
        store.save_device("cli-override", device);
    }
    #[cfg(feature = "serial")]
    {
        Ok(SliderSession::new(store, transport_factory()))
    }
    #[cfg(not(feature = "serial"))]
    {
        let _ = store;
        Err(SliderError::FeatureNotEnabled("serial".into()).into())
    }
}

async fn cmd_status(cli: &Cli) -> anyhow::Result<()> {
    let session = connected_session(cli).await?;
    let client = session
        .ensure_connected()
        .await?
        .ok_or(SliderError::NotConnected)?;
    let mut events = client.subscribe();
    client.query_status();
    let frame = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match events.recv().await {
                Ok(GrblEvent::Status(status)) => break Some(status),
                Ok(_) => continue,
                Err(_) => break None,
            }
        }
    })
    .await
    .ok()
    .flatten()
    .context("no status frame received")?;
    println!("state: {}", frame.state);
    if let Some(mpos) = frame.mpos {
        println!("mpos:  {}", mpos);
    }
    if let Some(pins) = frame.pins {
        println!("pins:  {}", pins);
    }
    session.disconnect();
    Ok(())
}

async fn cmd_jog(cli: &Cli, axis: &str, distance: f64, feed: u32) -> anyhow::Result<()> {
    let session = connected_session(cli).await?;
    let client = session
        .ensure_connected()
        .await?
        .ok_or(SliderError::NotConnected)?;
    let axis = axis
        .trim()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .context("empty axis")?;
    if client.send_jog(axis, distance, feed).await {
        println!("jog acknowledged");
    } else {
        anyhow::bail!("jog rejected by controller");
    }
    session.disconnect();
    Ok(())
}

async fn cmd_run(cli: &Cli, preset: &str) -> anyhow::Result<()> {
    let template = lookup_preset(preset)?;
    let session = connected_session(cli).await?;
    session
        .ensure_connected()
        .await?
        .ok_or(SliderError::NotConnected)?;
    let runner = session.runner();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run_preset(template, tx).await })
    };
    while let Some(event) = rx.recv().await {
        match event {
            SceneEvent::Progress(p) => println!("shot {}/{}", p.index, p.total),
            SceneEvent::Failed(e) => anyhow::bail!("run failed: {}", e),
            SceneEvent::Finished => println!("finished"),
        }
    }
    run.await?;
    session.disconnect();
    Ok(())
}

async fn cmd_timelapse(cli: &Cli, preset: &str, shots: Option<u32>) -> anyhow::Result<()> {
    let template = lookup_preset(preset)?;
    let session = connected_session(cli).await?;
    session
        .ensure_connected()
        .await?
        .ok_or(SliderError::NotConnected)?;
    let hook = Arc::new(SceneMotionHook::new(session.runner(), *template));
    let controller = TimelapseController::new(Arc::new(LogCapture), hook, template.id);
    let total = shots.or_else(|| {
        Some((template.duration_mins * 60 / template.interval_secs.max(1)).max(1))
    });
    controller
        .start(Duration::from_secs(u64::from(template.interval_secs)), total)
        .await;
    tokio::select! {
        () = controller.join() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("stopping...");
            controller.stop().await;
        }
    }
    session.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Command::ListPresets => {
            for preset in CATALOG {
                println!(
                    "{:14} {:22} every {:>4}s for {:>4} min, {:>6.2} mm/shot  {}",
                    preset.id,
                    preset.title,
                    preset.interval_secs,
                    preset.duration_mins,
                    preset.step_mm_per_shot,
                    preset.description
                );
            }
            Ok(())
        }
        Command::Status => cmd_status(&cli).await,
        Command::Jog {
            axis,
            distance,
            feed,
        } => cmd_jog(&cli, axis, *distance, *feed).await,
        Command::Run { preset } => cmd_run(&cli, preset).await,
        Command::Timelapse { preset, shots } => cmd_timelapse(&cli, preset, *shots).await,
    }
}
