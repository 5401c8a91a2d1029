//! Frame codec: 8-byte header followed by a CBOR body
//!
//! Header layout:
//! - Byte 0: Version(5) | Channel(3)
//! - Byte 1: Flags (reserved)
//! - Bytes 2-5: Body length (big-endian)
//! - Bytes 6-7: Sequence (big-endian)

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::messages::{Channel, ClientMessage, ServerMessage, PROTOCOL_VERSION};

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Largest body accepted from the wire (a 4K float frame is ~130 MiB)
pub const MAX_BODY_LEN: u32 = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Header too short: {0} bytes")]
    TooShort(usize),
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("Unknown channel {0}")]
    UnknownChannel(u8),
    #[error("Frame body of {0} bytes exceeds limit")]
    TooLarge(u32),
    #[error("Body truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub channel: Channel,
    pub flags: u8,
    pub body_len: u32,
    pub seq: u16,
}

impl FrameHeader {
    pub fn new(channel: Channel, body_len: u32, seq: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            channel,
            flags: 0,
            body_len,
            seq,
        }
    }

    /// Encode header bytes
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = (self.version << 3) | (self.channel as u8 & 0x07);
        header[1] = self.flags;
        header[2..6].copy_from_slice(&self.body_len.to_be_bytes());
        header[6..8].copy_from_slice(&self.seq.to_be_bytes());
        header
    }

    /// Decode and validate header bytes
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::TooShort(data.len()));
        }
        let version = data[0] >> 3;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let channel_bits = data[0] & 0x07;
        let channel =
            Channel::from_bits(channel_bits).ok_or(CodecError::UnknownChannel(channel_bits))?;
        let body_len = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
        if body_len > MAX_BODY_LEN {
            return Err(CodecError::TooLarge(body_len));
        }
        let seq = u16::from_be_bytes([data[6], data[7]]);

        Ok(Self {
            version,
            channel,
            flags: data[1],
            body_len,
            seq,
        })
    }
}

/// Stateful encoder that stamps outgoing frames with a sequence number
#[derive(Debug, Default)]
pub struct Encoder {
    seq: u16,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Encode any serializable body into a complete frame
    pub fn encode<T: Serialize>(&mut self, channel: Channel, body: &T) -> Result<Vec<u8>, CodecError> {
        let body = serde_cbor::to_vec(body)?;
        let len = body.len() as u32;
        if len > MAX_BODY_LEN {
            return Err(CodecError::TooLarge(len));
        }
        let header = FrameHeader::new(channel, len, self.next_seq());

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    pub fn encode_client(&mut self, msg: &ClientMessage) -> Result<Vec<u8>, CodecError> {
        self.encode(msg.channel(), msg)
    }

    pub fn encode_server(&mut self, msg: &ServerMessage) -> Result<Vec<u8>, CodecError> {
        self.encode(msg.channel(), msg)
    }
}

/// Decode a CBOR body
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    Ok(serde_cbor::from_slice(body)?)
}

/// Decode one frame from the start of `data`
///
/// Returns the header, the decoded body and the bytes consumed, or `None` if
/// `data` doesn't hold a complete frame yet.
pub fn decode_frame<T: DeserializeOwned>(
    data: &[u8],
) -> Result<Option<(FrameHeader, T, usize)>, CodecError> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }
    let header = FrameHeader::decode(data)?;
    let end = HEADER_LEN + header.body_len as usize;
    if data.len() < end {
        return Ok(None);
    }
    let body = decode_body(&data[HEADER_LEN..end])?;
    Ok(Some((header, body, end)))
}

/// Read one frame from a stream
///
/// Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(FrameHeader, Vec<u8>)>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CodecError::TooShort(filled));
        }
        filled += n;
    }

    let header = FrameHeader::decode(&header)?;
    let expected = header.body_len as usize;
    let mut body = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(CodecError::Truncated {
                expected,
                actual: filled,
            });
        }
        filled += n;
    }

    Ok(Some((header, body)))
}

/// Write an already encoded frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RendererAction;
    use scenelink_core::AttrValue;

    #[test]
    fn test_header_encoding() {
        let header = FrameHeader::new(Channel::Plugin, 10, 5);
        let bytes = header.encode();
        // version=1, channel=1: (1 << 3) | 1 = 9
        assert_eq!(bytes[0], 9);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[2..6], &[0, 0, 0, 10]);
        assert_eq!(&bytes[6..8], &[0, 5]);

        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_input() {
        assert!(matches!(FrameHeader::decode(&[0; 4]), Err(CodecError::TooShort(4))));

        let mut bytes = FrameHeader::new(Channel::Control, 0, 0).encode();
        bytes[0] = 2 << 3;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(CodecError::UnsupportedVersion(2))
        ));

        bytes[0] = (PROTOCOL_VERSION << 3) | 6;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(CodecError::UnknownChannel(6))
        ));

        let mut bytes = FrameHeader::new(Channel::Image, 0, 0).encode();
        bytes[2..6].copy_from_slice(&(MAX_BODY_LEN + 1).to_be_bytes());
        assert!(matches!(FrameHeader::decode(&bytes), Err(CodecError::TooLarge(_))));
    }

    #[test]
    fn test_sequence_increments() {
        let mut encoder = Encoder::new();
        let msg = ClientMessage::Control(RendererAction::Start);
        let first = encoder.encode_client(&msg).unwrap();
        let second = encoder.encode_client(&msg).unwrap();
        assert_eq!(FrameHeader::decode(&first).unwrap().seq, 0);
        assert_eq!(FrameHeader::decode(&second).unwrap().seq, 1);
    }

    #[test]
    fn test_decode_frame_waits_for_complete_data() {
        let mut encoder = Encoder::new();
        let msg = ClientMessage::UpdateAttr {
            plugin: "Box".into(),
            attr: "material".into(),
            value: AttrValue::from("Mtl1"),
        };
        let frame = encoder.encode_client(&msg).unwrap();

        assert!(decode_frame::<ClientMessage>(&frame[..HEADER_LEN - 1]).unwrap().is_none());
        assert!(decode_frame::<ClientMessage>(&frame[..frame.len() - 1]).unwrap().is_none());

        let (header, decoded, used) = decode_frame::<ClientMessage>(&frame).unwrap().unwrap();
        assert_eq!(header.channel, Channel::Plugin);
        assert_eq!(decoded, msg);
        assert_eq!(used, frame.len());
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let mut encoder = Encoder::new();
        let mut stream = encoder
            .encode_server(&ServerMessage::FrameRendered(3.0))
            .unwrap();
        stream.extend(encoder.encode_server(&ServerMessage::Aborted).unwrap());

        let mut reader = stream.as_slice();
        let (header, body) = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(header.channel, Channel::Status);
        let msg: ServerMessage = decode_body(&body).unwrap();
        assert_eq!(msg, ServerMessage::FrameRendered(3.0));

        let (_, body) = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decode_body::<ServerMessage>(&body).unwrap(), ServerMessage::Aborted);

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body() {
        let mut encoder = Encoder::new();
        let frame = encoder.encode_server(&ServerMessage::Progress(0.5)).unwrap();
        let mut reader = &frame[..frame.len() - 2];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(CodecError::Truncated { .. })
        ));
    }
}
