//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Only a subset is exchanged by this crate: single-frame `Text` messages and a bare `Close`.
//! Fragmentation, extensions and reserved bits are never produced and are rejected on input.
use bytes::BytesMut;

use crate::FrameError;

/// WebSocket operation code (OpCode) that determines the semantic meaning of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    /// Reserved opcodes (0x3-0x7 and 0xB-0xF) yield `FrameError::InvalidOpCode`.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// The side of the connection an endpoint plays.
///
/// Clients mask every frame they send and servers never do. Decoders enforce the
/// opposite direction: a server only accepts masked frames, a client only unmasked ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Whether frames written in this role carry a masking key.
    #[inline]
    pub fn masks_outgoing(self) -> bool {
        self == Role::Client
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// A single WebSocket frame.
///
/// Decoded frames hold their payload already unmasked; `mask` keeps the key that was on the
/// wire so callers can still tell which direction the frame came from. Frames handed to the
/// encoder never need a key: the encoder draws one when its role requires masking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message. Always `true` for frames this
    /// crate accepts, and always written as `true` by the encoder.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key the frame was received with, if any.
    mask: Option<[u8; 4]>,
    /// The unmasked payload.
    pub payload: BytesMut,
}

/// Largest possible header: 2 fixed bytes, 8 bytes of extended length, 4 bytes of mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

impl Frame {
    /// Creates a new frame. `mask` records the key the payload was masked with on the wire.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// A final text frame.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Text, None, BytesMut::from(payload.as_ref()))
    }

    /// A close frame with an empty body.
    pub fn close() -> Self {
        Self::new(true, OpCode::Close, None, BytesMut::new())
    }

    /// Whether the frame arrived with a masking key.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// The masking key the frame arrived with.
    #[inline]
    pub fn masking_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// The logical length of the payload in bytes.
    #[inline]
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Interprets the payload as text, replacing invalid UTF-8 sequences.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Formats the frame header into `head` and returns the number of bytes written.
    ///
    /// `mask` is the key the payload is about to be masked with, or `None` for an unmasked
    /// frame. The length field uses the shortest of the three encodings: 7 bits up to 125,
    /// marker 126 plus 16 bits up to 65535, marker 127 plus 64 bits beyond.
    ///
    /// FIN is always set: fragmented messages are never produced, whatever `fin` holds.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, mask: Option<[u8; 4]>, head: &mut [u8]) -> usize {
        head[0] = 0b1000_0000 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len <= 125 {
            head[1] = len as u8;
            2
        } else if len <= 0xFFFF {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}
