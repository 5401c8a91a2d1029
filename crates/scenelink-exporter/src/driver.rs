//! Frame driver: paces sync passes against render completion
//!
//! For every render frame the driver runs one sync pass per export frame
//! (producer -> cache -> sink), asks the renderer to render, then polls the
//! renderer state until the frame is reported done. Interruption is
//! cooperative: the flag is checked before every sync pass and on every
//! poll. Teardown runs exactly once per [`FrameDriver::drive`].

use chrono::{DateTime, Utc};
use scenelink_core::{AnimationMode, FrameSequence, PluginDesc};
use scenelink_wire::{CommitMode, MessageSink, RendererAction};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::exporter::{ExportStats, PluginExporter};
use crate::scene::SceneProducer;
use crate::session::RendererState;

/// Plugin kind that receives the default material
const NODE_KIND: &str = "Node";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Syncing,
    WaitingForRender,
    Done,
    Interrupted,
    Aborted,
}

/// How a drive ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Every frame rendered
    Done,
    /// The interrupt flag was raised
    Interrupted,
    /// The renderer aborted or went away
    Aborted,
    /// A frame took longer than the render timeout
    TimedOut,
}

impl DriveOutcome {
    fn final_state(self) -> DriverState {
        match self {
            Self::Done => DriverState::Done,
            Self::Interrupted => DriverState::Interrupted,
            Self::Aborted | Self::TimedOut => DriverState::Aborted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub width: u32,
    pub height: u32,
    pub commit: CommitMode,
    pub poll_interval: Duration,
    pub heartbeat: Duration,
    pub render_timeout: Option<Duration>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.renderer.width,
            height: config.renderer.height,
            commit: config.sync.commit,
            poll_interval: config.sync.poll_interval(),
            heartbeat: config.sync.heartbeat(),
            render_timeout: config.sync.render_timeout(),
        }
    }
}

/// Timing of one rendered frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub render_frame: f32,
    /// Time spent in sync passes for this frame
    pub sync: Duration,
    /// Time spent waiting for the renderer
    pub render: Duration,
}

#[derive(Debug, Clone)]
pub struct DriveReport {
    pub session: Uuid,
    pub started: DateTime<Utc>,
    pub outcome: DriveOutcome,
    /// Frames the renderer completed
    pub frames: Vec<FrameTiming>,
    /// Sync passes run (one per export frame)
    pub export_passes: usize,
    pub total_sync: Duration,
    pub stats: ExportStats,
}

enum Wait {
    Rendered,
    Stop(DriveOutcome),
}

pub struct FrameDriver<S, P> {
    exporter: PluginExporter<S>,
    producer: P,
    renderer: Arc<RendererState>,
    interrupt: Arc<AtomicBool>,
    settings: DriverSettings,
    state: DriverState,
    torn_down: bool,
}

impl<S: MessageSink, P: SceneProducer> FrameDriver<S, P> {
    pub fn new(
        exporter: PluginExporter<S>,
        producer: P,
        renderer: Arc<RendererState>,
        interrupt: Arc<AtomicBool>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            exporter,
            producer,
            renderer,
            interrupt,
            settings,
            state: DriverState::Idle,
            torn_down: false,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    /// Run the whole frame sequence
    pub async fn drive(&mut self, mut frames: FrameSequence) -> DriveReport {
        let started = Utc::now();
        self.torn_down = false;
        self.renderer.reset();
        self.exporter.reset();

        info!(
            session = %self.renderer.id(),
            mode = ?frames.mode(),
            frames = frames.render_frame_count(),
            subframes = frames.subframes(),
            "Starting export"
        );

        let mut report = DriveReport {
            session: self.renderer.id(),
            started,
            outcome: DriveOutcome::Done,
            frames: Vec::new(),
            export_passes: 0,
            total_sync: Duration::ZERO,
            stats: ExportStats::default(),
        };

        let outcome = self.run(&mut frames, &mut report).await;
        report.outcome = outcome;
        self.state = report.outcome.final_state();
        self.teardown().await;
        report.stats = self.exporter.stats();

        info!(
            outcome = ?report.outcome,
            frames = report.frames.len(),
            sync_ms = report.total_sync.as_millis() as u64,
            attrs = report.stats.attr_updates,
            "Export finished"
        );
        report
    }

    async fn run(&mut self, frames: &mut FrameSequence, report: &mut DriveReport) -> DriveOutcome {
        self.exporter.control(RendererAction::Init);
        self.renderer.resize(self.settings.width, self.settings.height);
        self.exporter.control(RendererAction::Resize {
            width: self.settings.width,
            height: self.settings.height,
        });
        self.exporter
            .control(RendererAction::SetCommitMode(self.settings.commit));

        let mode = frames.mode();
        let mut first = true;
        let mut frame_sync = Duration::ZERO;

        while let Some(pair) = frames.next() {
            if self.interrupted() {
                info!(frame = pair.render_frame, "Export interrupted");
                return DriveOutcome::Interrupted;
            }

            self.state = DriverState::Syncing;
            let sync_started = Instant::now();
            self.sync_pass(pair.export_frame, mode, first);
            let elapsed = sync_started.elapsed();
            frame_sync += elapsed;
            report.total_sync += elapsed;
            report.export_passes += 1;
            first = false;

            if !frames.at_render_boundary() {
                continue;
            }

            let frame = pair.render_frame;
            debug!(frame, sync_ms = frame_sync.as_millis() as u64, "Frame synced");
            self.exporter.control(RendererAction::SetCurrentFrame(frame));
            if self.settings.commit == CommitMode::Manual {
                self.exporter.control(RendererAction::Commit);
            }
            self.exporter.control(RendererAction::Start);

            self.state = DriverState::WaitingForRender;
            let render_started = Instant::now();
            match self.wait_for_render(frame).await {
                Wait::Rendered => {}
                Wait::Stop(outcome) => return outcome,
            }
            report.frames.push(FrameTiming {
                render_frame: frame,
                sync: frame_sync,
                render: render_started.elapsed(),
            });
            frame_sync = Duration::ZERO;
        }

        DriveOutcome::Done
    }

    /// Whether `desc` is exported on passes after the first
    fn included_after_first(mode: AnimationMode, desc: &PluginDesc) -> bool {
        match mode {
            AnimationMode::FullNoGeometry => !desc.is_geometry(),
            AnimationMode::FullCamera => desc.is_view(),
            AnimationMode::Single | AnimationMode::Full => true,
        }
    }

    /// Export every entity at `time`, then drop plugins the producer no
    /// longer knows about
    fn sync_pass(&mut self, time: f32, mode: AnimationMode, first: bool) {
        self.exporter.set_current_time(time);
        let default_material = self.producer.default_material();

        let mut seen = HashSet::new();
        for name in self.producer.entities() {
            let Some(mut desc) = self.producer.describe(&name, time) else {
                continue;
            };
            seen.insert(name);

            if !first && !Self::included_after_first(mode, &desc) {
                continue;
            }
            if desc.kind == NODE_KIND && !desc.contains("material") {
                if let Some(material) = &default_material {
                    desc.add("material", material.clone());
                }
            }
            self.exporter.export_plugin(&desc);
        }

        let mut stale: Vec<String> = self
            .exporter
            .cache()
            .names()
            .into_iter()
            .filter(|name| !seen.contains(name))
            .collect();
        stale.sort();
        for name in stale {
            self.exporter.remove_plugin(&name);
        }
    }

    async fn wait_for_render(&self, frame: f32) -> Wait {
        let started = Instant::now();
        let mut last_heartbeat = started;

        loop {
            if self.renderer.is_frame_rendered(frame) {
                debug!(frame, "Frame rendered");
                return Wait::Rendered;
            }
            if self.interrupted() {
                info!(frame, "Export interrupted while rendering");
                return Wait::Stop(DriveOutcome::Interrupted);
            }
            if self.renderer.is_aborted() {
                warn!(frame, "Renderer aborted the frame");
                return Wait::Stop(DriveOutcome::Aborted);
            }
            if self.renderer.is_disconnected() || !self.exporter.sink().is_connected() {
                warn!(frame, "Renderer connection lost");
                return Wait::Stop(DriveOutcome::Aborted);
            }
            if let Some(limit) = self.settings.render_timeout {
                if started.elapsed() >= limit {
                    warn!(frame, timeout_secs = limit.as_secs_f32(), "Render timed out");
                    return Wait::Stop(DriveOutcome::TimedOut);
                }
            }
            if last_heartbeat.elapsed() >= self.settings.heartbeat {
                info!(
                    frame,
                    progress = self.renderer.progress(),
                    elapsed_secs = started.elapsed().as_secs(),
                    "Waiting for frame"
                );
                last_heartbeat = Instant::now();
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.exporter.control(RendererAction::Stop);
        self.exporter.control(RendererAction::Free);
        self.exporter.release().await;
        debug!(state = ?self.state, "Driver torn down");
    }
}
