//! Configuration loading and validation

use anyhow::Result;
use scenelink_core::{AnimationMode, FrameSequence};
use scenelink_wire::{CommitMode, DEFAULT_INBOUND_QUEUE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Render server host
    #[serde(default = "default_address")]
    pub address: String,
    /// Render server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Output image width in pixels
    #[serde(default = "default_width")]
    pub width: u32,
    /// Output image height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
    /// Capacity of the inbound message queue
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            width: default_width(),
            height: default_height(),
            inbound_queue: default_inbound_queue(),
        }
    }
}

impl RendererConfig {
    /// `host:port` to connect to
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    20207
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_inbound_queue() -> usize {
    DEFAULT_INBOUND_QUEUE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationConfig {
    #[serde(default)]
    pub mode: AnimationMode,
    #[serde(default = "default_frame")]
    pub frame_start: i32,
    #[serde(default = "default_frame")]
    pub frame_end: i32,
    #[serde(default = "default_one")]
    pub frame_step: i32,
    /// Export passes per rendered frame (motion blur sampling)
    #[serde(default = "default_subframes")]
    pub subframes: u32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            mode: AnimationMode::default(),
            frame_start: default_frame(),
            frame_end: default_frame(),
            frame_step: default_one(),
            subframes: default_subframes(),
        }
    }
}

impl AnimationConfig {
    pub fn sequence(&self) -> FrameSequence {
        FrameSequence::new(
            self.mode,
            self.frame_start,
            self.frame_end,
            self.frame_step,
            self.subframes,
        )
    }
}

fn default_frame() -> i32 {
    1
}

fn default_one() -> i32 {
    1
}

fn default_subframes() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Keep full plugin descriptions in the cache, not just digests
    #[serde(default)]
    pub retain_data: bool,
    /// Render wait loop poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Minimum time between "still waiting" log lines
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Give up on a frame after this long (0 waits forever)
    #[serde(default)]
    pub render_timeout_secs: u64,
    #[serde(default)]
    pub commit: CommitMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retain_data: false,
            poll_interval_ms: default_poll_interval(),
            heartbeat_secs: default_heartbeat(),
            render_timeout_secs: 0,
            commit: CommitMode::default(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        (self.render_timeout_secs > 0).then(|| Duration::from_secs(self.render_timeout_secs))
    }
}

fn default_poll_interval() -> u64 {
    1
}

fn default_heartbeat() -> u64 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Scene file to export
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Frame range given on the command line as `start:end[:step]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: i32,
    pub end: i32,
    pub step: i32,
}

impl Config {
    /// Apply a command line frame range; a range longer than one frame turns
    /// a single-frame config into a full animation
    pub fn apply_frames(&mut self, range: FrameRange) {
        self.animation.frame_start = range.start;
        self.animation.frame_end = range.end;
        self.animation.frame_step = range.step;
        if range.end != range.start && !self.animation.mode.is_animation() {
            self.animation.mode = AnimationMode::Full;
        }
    }
}

/// Parse `start:end[:step]`
pub fn parse_frame_range(s: &str) -> Result<FrameRange, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("expected start:end[:step], got '{}'", s));
    }
    let num = |p: &str| {
        p.trim()
            .parse::<i32>()
            .map_err(|e| format!("invalid frame '{}': {}", p, e))
    };
    let start = num(parts[0])?;
    let end = num(parts[1])?;
    let step = match parts.get(2) {
        Some(p) => num(p)?,
        None => 1,
    };
    if step < 1 {
        return Err(format!("frame step must be positive, got {}", step));
    }
    Ok(FrameRange { start, end, step })
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
