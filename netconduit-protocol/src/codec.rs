//! Codec for encoding and decoding protocol frames
//!
//! Uses thread-local buffers for payload serialization.

use crate::constants::{DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN, MAGIC, PROTOCOL_VERSION};
use crate::error::ProtocolError;
use crate::frame::{Frame, MessageType, Payload};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cell::RefCell;
use tokio_util::codec::{Decoder, Encoder};

thread_local! {
    static ENCODE_BUFFER: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

const INITIAL_ENCODE_BUFFER_CAPACITY: usize = 8192;

/// Parsed fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub correlation_id: u64,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Parse and validate a header from the first [`HEADER_LEN`] bytes
    pub fn parse(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated frame header",
            )));
        }

        let mut magic = [0u8; 4];
        bytes.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let version = bytes.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let message_type = MessageType::try_from(bytes.get_u8())?;
        let correlation_id = bytes.get_u64();
        let payload_len = bytes.get_u32();

        Ok(Self {
            message_type,
            correlation_id,
            payload_len,
        })
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_slice(&MAGIC);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.message_type.as_u8());
        dst.put_u64(self.correlation_id);
        dst.put_u32(self.payload_len);
    }
}

/// Conduit protocol codec
///
/// Frame format (all integers big-endian):
/// ```text
/// ┌──────────┬─────────┬──────┬────────────────┬─────────────┬──────────┐
/// │ MAGIC    │ VERSION │ TYPE │ CORRELATION_ID │ PAYLOAD_LEN │ PAYLOAD  │
/// │ 4 bytes  │ 1 byte  │ 1    │ 8 bytes        │ 4 bytes     │ N bytes  │
/// └──────────┴─────────┴──────┴────────────────┴─────────────┴──────────┘
/// ```
/// The payload is a MessagePack map.
#[derive(Debug, Clone, Copy)]
pub struct ConduitCodec {
    max_message_size: usize,
}

impl Default for ConduitCodec {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConduitCodec {
    /// Create a new codec instance with default max message size
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new codec instance with a custom max message size
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Get the configured max message size
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encode a frame into a standalone buffer, e.g. to write it to many connections
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::new();
        self.encode_into(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_into(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        ENCODE_BUFFER.with(|buf| {
            let mut buf = buf.borrow_mut();

            if buf.capacity() == 0 {
                buf.reserve(INITIAL_ENCODE_BUFFER_CAPACITY);
            }
            buf.clear();

            rmp_serde::encode::write_named(&mut *buf, &frame.payload)?;

            let payload_len = buf.len();
            if payload_len > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: payload_len,
                    max: self.max_message_size,
                });
            }
            let wire_len = u32::try_from(payload_len).map_err(|_| {
                ProtocolError::MessageTooLarge {
                    size: payload_len,
                    max: u32::MAX as usize,
                }
            })?;

            dst.reserve(HEADER_LEN + payload_len);
            FrameHeader {
                message_type: frame.message_type,
                correlation_id: frame.correlation_id,
                payload_len: wire_len,
            }
            .write(dst);
            dst.put_slice(&buf);

            Ok(())
        })
    }
}

fn decode_payload(bytes: &[u8]) -> Result<Payload, ProtocolError> {
    if bytes.is_empty() {
        return Ok(Payload::new());
    }
    Ok(rmp_serde::from_slice(bytes)?)
}

impl Decoder for ConduitCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Validate header (don't consume yet)
        let header = FrameHeader::parse(&src[..HEADER_LEN])?;
        let payload_len = header.payload_len as usize;

        // Reject before reserving anything for the claimed length
        if payload_len > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_len,
                max: self.max_message_size,
            });
        }

        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload_bytes = src.split_to(payload_len).freeze();
        let payload = decode_payload(&payload_bytes)?;

        Ok(Some(Frame {
            message_type: header.message_type,
            correlation_id: header.correlation_id,
            payload,
        }))
    }
}

impl Encoder<Frame> for ConduitCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_into(&frame, dst)
    }
}

impl Encoder<&Frame> for ConduitCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_into(frame, dst)
    }
}

/// Reassembly buffer for byte streams that arrive in arbitrary chunks.
///
/// Bytes are appended with [`feed`](Self::feed); complete frames are pulled
/// out with [`decode_one`](Self::decode_one) or [`decode_all`](Self::decode_all).
/// After the first decode error the buffer is poisoned and keeps failing.
#[derive(Debug)]
pub struct FrameBuffer {
    codec: ConduitCodec,
    buf: BytesMut,
    poisoned: Option<String>,
}

impl FrameBuffer {
    pub fn new(codec: ConduitCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::new(),
            poisoned: None,
        }
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self::new(ConduitCodec::with_max_message_size(max_message_size))
    }

    /// Append raw transport bytes
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.poisoned.is_none() {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Decode one frame if a complete one is buffered
    pub fn decode_one(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if let Some(reason) = &self.poisoned {
            return Err(ProtocolError::Poisoned(reason.clone()));
        }
        match self.codec.decode(&mut self.buf) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.poisoned = Some(e.to_string());
                self.buf.clear();
                Err(e)
            }
        }
    }

    /// Drain every complete frame currently buffered
    pub fn decode_all(&mut self) -> Result<Vec<Frame>, ProtocolError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.decode_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(ConduitCodec::default())
    }
}
