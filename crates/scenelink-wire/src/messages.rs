//! Protocol messages exchanged with the render server

use scenelink_core::AttrValue;
use serde::{Deserialize, Serialize};

/// Protocol version carried in every frame header
pub const PROTOCOL_VERSION: u8 = 1;

/// Logical channel a message travels on (header byte 0, low 3 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Control = 0,
    Plugin = 1,
    Image = 2,
    Status = 3,
}

impl Channel {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Control),
            1 => Some(Self::Plugin),
            2 => Some(Self::Image),
            3 => Some(Self::Status),
            _ => None,
        }
    }
}

/// When the renderer applies incoming plugin changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Changes apply as they arrive
    #[default]
    Auto,
    /// Changes apply on an explicit `Commit`
    Manual,
}

/// Renderer lifecycle commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RendererAction {
    Init,
    Free,
    Start,
    Stop,
    Resize { width: u32, height: u32 },
    SetCurrentTime(f32),
    /// Ask the renderer to render this frame
    SetCurrentFrame(f32),
    SetCommitMode(CommitMode),
    Commit,
}

/// Exporter -> renderer messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Control(RendererAction),
    /// Declare (or select) a plugin before updating its attributes
    CreatePlugin { name: String, kind: String },
    UpdateAttr {
        plugin: String,
        attr: String,
        value: AttrValue,
    },
    RemovePlugin { name: String },
}

impl ClientMessage {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Control(_) => Channel::Control,
            _ => Channel::Plugin,
        }
    }

    /// Whether this is an attribute update (used when counting sends)
    pub fn is_attr_update(&self) -> bool {
        matches!(self, Self::UpdateAttr { .. })
    }
}

impl From<RendererAction> for ClientMessage {
    fn from(action: RendererAction) -> Self {
        Self::Control(action)
    }
}

/// Pixel payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    /// Baseline JPEG, decoded to 8-bit RGBA
    Jpeg,
    /// Little-endian f32 RGBA, `width * height * 16` bytes
    RgbaReal,
}

/// A rendered image or bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
    /// Placement of a bucket inside the frame; ignored for full frames
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    /// Partial region of the frame rather than the whole frame
    #[serde(default)]
    pub bucket: bool,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl ImageMessage {
    /// Full frame of raw float pixels
    pub fn rgba_real(width: u32, height: u32, pixels: &[f32]) -> Self {
        Self {
            encoding: ImageEncoding::RgbaReal,
            width,
            height,
            x: 0,
            y: 0,
            bucket: false,
            data: pixels.iter().flat_map(|p| p.to_le_bytes()).collect(),
        }
    }

    /// Bucket of raw float pixels placed at `(x, y)`
    pub fn rgba_bucket(x: u32, y: u32, width: u32, height: u32, pixels: &[f32]) -> Self {
        Self {
            x,
            y,
            bucket: true,
            ..Self::rgba_real(width, height, pixels)
        }
    }

    /// Full frame of JPEG data
    pub fn jpeg(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            encoding: ImageEncoding::Jpeg,
            width,
            height,
            x: 0,
            y: 0,
            bucket: false,
            data,
        }
    }
}

/// Renderer -> exporter messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Image(ImageMessage),
    /// The renderer finished this frame
    FrameRendered(f32),
    /// Progress of the current frame in `0.0..=1.0`
    Progress(f32),
    /// The whole render job finished
    RenderFinished,
    /// The renderer stopped on its own (crash, user abort on the server)
    Aborted,
}

impl ServerMessage {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Image(_) => Channel::Image,
            _ => Channel::Status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        assert_eq!(ClientMessage::Control(RendererAction::Start).channel(), Channel::Control);
        assert_eq!(
            ClientMessage::RemovePlugin { name: "Box".into() }.channel(),
            Channel::Plugin
        );
        assert_eq!(ServerMessage::FrameRendered(1.0).channel(), Channel::Status);
        for bits in 0..4 {
            assert_eq!(Channel::from_bits(bits).map(|c| c as u8), Some(bits));
        }
        assert!(Channel::from_bits(7).is_none());
    }

    #[test]
    fn test_raw_image_bytes() {
        let msg = ImageMessage::rgba_real(1, 1, &[0.0, 0.5, 1.0, 1.0]);
        assert_eq!(msg.data.len(), 16);
        assert_eq!(&msg.data[4..8], &0.5f32.to_le_bytes());

        let bucket = ImageMessage::rgba_bucket(2, 3, 1, 1, &[0.0; 4]);
        assert!(bucket.bucket);
        assert_eq!((bucket.x, bucket.y), (2, 3));
    }

    #[test]
    fn test_attr_update_flag() {
        let update = ClientMessage::UpdateAttr {
            plugin: "Box".into(),
            attr: "material".into(),
            value: AttrValue::from("Mtl1"),
        };
        assert!(update.is_attr_update());
        assert!(!ClientMessage::from(RendererAction::Init).is_attr_update());
    }
}
