//! scenelink - Main entry point
//!
//! Loads a scene file, connects to a render server and streams the scene
//! frame by frame, sending only what changed between frames.

mod config;
mod driver;
mod exporter;
mod scene;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use scenelink_core::PluginCache;
use scenelink_wire::Transport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{parse_frame_range, FrameRange};
use crate::driver::{DriveOutcome, DriverSettings, FrameDriver};
use crate::exporter::PluginExporter;
use crate::scene::SceneFile;
use crate::session::RendererState;

#[derive(Parser, Debug)]
#[command(name = "scenelink")]
#[command(about = "Stream scene changes to a remote renderer")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scenelink.toml")]
    config: PathBuf,

    /// Scene file to export (overrides [scene] path)
    #[arg(short, long)]
    scene: Option<PathBuf>,

    /// Render server host
    #[arg(short, long)]
    address: Option<String>,

    /// Render server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Frame range as start:end[:step]
    #[arg(short, long, value_parser = parse_frame_range)]
    frames: Option<FrameRange>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("scenelink v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(address) = args.address {
        config.renderer.address = address;
    }
    if let Some(port) = args.port {
        config.renderer.port = port;
    }
    if let Some(scene) = args.scene {
        config.scene.path = Some(scene);
    }
    if let Some(frames) = args.frames {
        config.apply_frames(frames);
    }

    info!(
        renderer = %config.renderer.endpoint(),
        mode = ?config.animation.mode,
        start = config.animation.frame_start,
        end = config.animation.frame_end,
        "Configuration loaded"
    );

    let scene_path = config
        .scene
        .path
        .clone()
        .context("No scene file given (use --scene or [scene] path)")?;
    let scene = SceneFile::load(&scene_path)?;

    // Ctrl-C stops the export after the current poll
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt requested");
            flag.store(true, Ordering::Release);
        }
    });

    let renderer = Arc::new(RendererState::new(
        config.renderer.width,
        config.renderer.height,
    ));

    let mut transport = Transport::with_inbound_queue(config.renderer.inbound_queue);
    if let Err(e) = transport
        .connect(&config.renderer.endpoint(), renderer.clone())
        .await
    {
        warn!(error = %e, "Renderer unavailable");
    }

    let cache = if config.sync.retain_data {
        PluginCache::retaining()
    } else {
        PluginCache::new()
    };
    let exporter = PluginExporter::new(transport, cache);

    let mut driver = FrameDriver::new(
        exporter,
        scene,
        renderer.clone(),
        interrupt,
        DriverSettings::from_config(&config),
    );
    let report = driver.drive(config.animation.sequence()).await;

    for frame in &report.frames {
        info!(
            frame = frame.render_frame,
            sync_ms = frame.sync.as_millis() as u64,
            render_ms = frame.render.as_millis() as u64,
            "Frame done"
        );
    }
    info!(
        session = %report.session,
        started = %report.started.to_rfc3339(),
        outcome = ?report.outcome,
        passes = report.export_passes,
        created = report.stats.created,
        attrs = report.stats.attr_updates,
        removed = report.stats.removed,
        unchanged = report.stats.unchanged,
        rejected = report.stats.rejected,
        rendered = renderer.frames_rendered(),
        finished = renderer.is_finished(),
        state = ?driver.state(),
        "Session summary"
    );

    match renderer.latest_image() {
        Some(image) => info!(
            width = image.width(),
            height = image.height(),
            "Last image received"
        ),
        None => info!("No image received"),
    }

    if report.outcome != DriveOutcome::Done {
        warn!(outcome = ?report.outcome, "Export did not complete");
    }

    Ok(())
}
