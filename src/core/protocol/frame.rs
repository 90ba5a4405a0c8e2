// src/core/protocol/frame.rs

//! Implements the post-handshake wire framing and the corresponding
//! `Encoder` and `Decoder` for network communication.
//!
//! Every frame is an 8-byte token, a 4-byte little-endian payload
//! length, and a JSON payload. The token travels big-endian when
//! encoded from the driver's counter and is echoed verbatim by the
//! server; these byte orders are asymmetric and fixed by the protocol.

use crate::core::OpalDBError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frame header: token (8) + payload length (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

// Protocol-level limit to prevent runaway allocation from malformed or
// hostile length fields.
const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024; // 64MB max payload size.

/// An outbound query frame. The payload may be assembled from several
/// parts; the encoder sums their lengths into the length field, which
/// lets callers splice pre-encoded JSON without re-parsing it.
#[derive(Debug, Clone)]
pub struct QueryFrame {
    pub token: u64,
    pub parts: Vec<Bytes>,
}

impl QueryFrame {
    /// Creates a single-part frame.
    pub fn new(token: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            token,
            parts: vec![payload.into()],
        }
    }

    /// Creates a multi-part frame.
    pub fn from_parts(token: u64, parts: Vec<Bytes>) -> Self {
        Self { token, parts }
    }

    /// Total payload length across all parts.
    pub fn payload_len(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }
}

/// A completed inbound frame as delivered to the multiplexer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub token: u64,
    pub payload: Bytes,
}

/// Decoder state: `Header` is the idle state awaiting a fresh 12-byte
/// header; `Payload` accumulates until the declared length is buffered.
#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    Payload { token: u64, declared_len: usize },
}

/// A `tokio_util::codec` implementation for the query wire protocol.
#[derive(Debug)]
pub struct QueryFrameCodec {
    state: DecodeState,
    max_payload: usize,
}

impl QueryFrameCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Overrides the payload sanity bound. Used by tests.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_payload,
        }
    }
}

impl Default for QueryFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<QueryFrame> for QueryFrameCodec {
    type Error = OpalDBError;

    /// Encodes a frame: big-endian token, little-endian summed length,
    /// then each payload part in order.
    fn encode(&mut self, item: QueryFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.payload_len();
        if total > self.max_payload {
            return Err(OpalDBError::FrameTooLarge {
                size: total,
                max: self.max_payload,
            });
        }
        dst.reserve(HEADER_SIZE + total);
        dst.put_u64(item.token);
        dst.put_u32_le(total as u32);
        for part in &item.parts {
            dst.extend_from_slice(part);
        }
        Ok(())
    }
}

impl Decoder for QueryFrameCodec {
    type Item = ResponseFrame;
    type Error = OpalDBError;

    /// Decodes a `ResponseFrame` from the buffer.
    ///
    /// Returns `Ok(None)` while the buffer does not contain the next
    /// state transition, letting the `Framed` stream wait for more
    /// data. `Framed` calls `decode` repeatedly, so a chunk carrying
    /// several frames is consumed greedily without recursion.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let token = src.get_u64();
                    let declared_len = src.get_u32_le() as usize;
                    if declared_len > self.max_payload {
                        return Err(OpalDBError::FrameTooLarge {
                            size: declared_len,
                            max: self.max_payload,
                        });
                    }
                    src.reserve(declared_len);
                    self.state = DecodeState::Payload {
                        token,
                        declared_len,
                    };
                }
                DecodeState::Payload {
                    token,
                    declared_len,
                } => {
                    if src.len() < declared_len {
                        return Ok(None);
                    }
                    let payload = src.split_to(declared_len).freeze();
                    self.state = DecodeState::Header;
                    return Ok(Some(ResponseFrame { token, payload }));
                }
            }
        }
    }
}
