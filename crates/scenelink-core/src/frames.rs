//! Export/render frame sequencing for animation runs

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How much of the scene is re-synchronized on frames after the first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationMode {
    /// Render a single frame (the start frame)
    #[default]
    Single,
    /// Re-synchronize everything on every frame
    Full,
    /// Geometry is only exported on the first frame
    FullNoGeometry,
    /// Only view/camera plugins are exported after the first frame
    FullCamera,
}

impl AnimationMode {
    pub fn is_animation(self) -> bool {
        self != Self::Single
    }
}

/// One step of the sequence: the frame to sample scene values at, and the
/// renderer frame those values belong to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePair {
    pub export_frame: f32,
    pub render_frame: f32,
}

/// Lazily produced sequence of export/render frame pairs
///
/// Each render frame is preceded by `subframes` export frames spaced evenly
/// over the frame before it, the last one landing on the render frame itself.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    mode: AnimationMode,
    start: i32,
    step: i32,
    render_frames: usize,
    subframes: u32,
    render_index: usize,
    subframe: u32,
}

impl FrameSequence {
    pub fn new(mode: AnimationMode, start: i32, end: i32, step: i32, subframes: u32) -> Self {
        let step = if step < 1 {
            warn!(step, "Invalid frame step, using 1");
            1
        } else {
            step
        };
        let subframes = subframes.max(1);

        let render_frames = match mode {
            AnimationMode::Single => 1,
            _ if end < start => 0,
            _ => {
                let span = (i64::from(end) - i64::from(start)) / i64::from(step);
                usize::try_from(span).map_or(usize::MAX, |n| n.saturating_add(1))
            }
        };

        Self {
            mode,
            start,
            step,
            render_frames,
            subframes,
            render_index: 0,
            subframe: 0,
        }
    }

    /// Sequence that renders only `frame`
    pub fn single(frame: i32) -> Self {
        Self::new(AnimationMode::Single, frame, frame, 1, 1)
    }

    pub fn mode(&self) -> AnimationMode {
        self.mode
    }

    /// Number of render frames in the whole sequence
    pub fn render_frame_count(&self) -> usize {
        self.render_frames
    }

    /// Number of export frames per render frame
    pub fn subframes(&self) -> u32 {
        self.subframes
    }

    /// Next pair without consuming it
    pub fn peek(&self) -> Option<FramePair> {
        if self.render_index >= self.render_frames {
            return None;
        }
        // index * step alone can leave the i32 range
        let offset = self.render_index as i64 * i64::from(self.step);
        let render_frame = (i64::from(self.start) + offset) as f32;
        let behind = (self.subframes - 1 - self.subframe) as f32 / self.subframes as f32;
        Some(FramePair {
            export_frame: render_frame - behind,
            render_frame,
        })
    }

    /// Whether the pair most recently returned was the last export frame of
    /// its render frame
    pub fn at_render_boundary(&self) -> bool {
        self.subframe == 0
    }

    /// Rewind to the first pair
    pub fn reset(&mut self) {
        self.render_index = 0;
        self.subframe = 0;
    }
}

impl Iterator for FrameSequence {
    type Item = FramePair;

    fn next(&mut self) -> Option<FramePair> {
        let pair = self.peek()?;
        self.subframe += 1;
        if self.subframe == self.subframes {
            self.subframe = 0;
            self.render_index += 1;
        }
        Some(pair)
    }
}
