//! scenelink Wire - Render server protocol and transport
//!
//! This crate provides:
//! - The control, plugin and status messages exchanged with the renderer
//! - A length-prefixed CBOR frame codec
//! - A TCP transport with an ordered outbound queue and a bounded inbound queue
//! - Decoding of rendered images into float RGBA buffers

pub mod codec;
pub mod imaging;
pub mod messages;
pub mod transport;

pub use codec::{CodecError, Encoder, FrameHeader, HEADER_LEN, MAX_BODY_LEN};
pub use imaging::{ImageError, ImagePipeline, RenderImage};
pub use messages::{
    Channel, ClientMessage, CommitMode, ImageEncoding, ImageMessage, RendererAction,
    ServerMessage, PROTOCOL_VERSION,
};
pub use transport::{
    InboundHandler, MessageSink, Transport, TransportError, DEFAULT_INBOUND_QUEUE,
};
