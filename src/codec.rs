//! # Codec
//!
//! Encoding and decoding of WebSocket frames.
//!
//! [`Encoder`] and [`Decoder`] work on plain byte buffers, so they can be driven by hand, and they
//! also implement the `tokio_util::codec` traits so a [`Codec`] can sit inside a
//! [`Framed`](tokio_util::codec::Framed) over any async byte stream.
//!
//! The decoder bounds every declared payload length by its configured maximum before waiting for
//! (or reserving room for) the payload, so a peer cannot make it buffer more than that.
use bytes::{Buf, BytesMut};
use rand::{rngs::StdRng, SeedableRng};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, Role, MAX_HEAD_SIZE},
    mask, FrameError,
};

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// The 2 fixed bytes are consumed; waiting for extended length and mask.
    Header(Header),
    /// Waiting for the payload.
    Payload(HeaderAndMask),
}

/// Fields taken from the 2 fixed header bytes.
struct Header {
    opcode: OpCode,
    masked: bool,
    /// Size of the extended length field (0, 2 or 8).
    extra: usize,
    /// The 7-bit length code.
    length_code: u8,
    /// Remaining header bytes: extended length plus masking key.
    header_size: usize,
}

/// Header data after the bytes in front of the payload are decoded.
struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// A combined codec that provides both encoding and decoding of WebSocket frames for one role.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates the codec of an endpoint playing `role`, accepting payloads up to
    /// `max_payload_read` bytes.
    pub fn new(role: Role, max_payload_read: usize) -> Self {
        Self::from((
            Decoder::new(role, max_payload_read),
            Encoder::new(role),
        ))
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    #[inline]
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_eof(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// A decoder for WebSocket frames, handling state transitions.
///
/// The decoder keeps its position between calls, so bytes may be fed in arbitrary pieces.
/// Received payloads are unmasked before the frame is returned.
pub struct Decoder {
    /// Role of the local endpoint; decides which masking direction is legal.
    role: Role,
    /// Current reading state (header or payload).
    state: Option<ReadState>,
    /// Maximum allowed size for the frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` for an endpoint playing `role`.
    ///
    /// # Parameters
    /// - `role`: The local role. A server decoder requires masked frames, a client decoder
    ///   requires unmasked ones.
    /// - `max_payload_size`: The maximum allowed payload size, in bytes.
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            role,
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = FrameError;

    /// Decodes one frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: A complete, unmasked frame.
    /// - `Ok(None)`: More data is needed.
    /// - `Err(FrameError)`: The header violates the supported subset of the protocol, or declares
    ///   a payload above the configured maximum.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let fin = src[0] & 0b1000_0000 != 0;
                    if src[0] & 0b0111_0000 != 0 {
                        return Err(FrameError::ReservedBitsNotZero);
                    }

                    let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
                    if !fin {
                        return Err(FrameError::Fragmented);
                    }

                    let masked = src[1] & 0b1000_0000 != 0;
                    if masked != (self.role == Role::Server) {
                        return Err(FrameError::UnexpectedMask { masked });
                    }

                    let length_code = src[1] & 0x7F;
                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        opcode,
                        masked,
                        extra,
                        length_code,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let length: u64 = match header.extra {
                        0 => u64::from(header.length_code),
                        2 => u64::from(src.get_u16()),
                        _ => src.get_u64(),
                    };

                    // checked before anything is reserved for the payload
                    let payload_len = match usize::try_from(length) {
                        Ok(len) if len <= self.max_payload_size => len,
                        _ => {
                            return Err(FrameError::LengthOverflow {
                                length,
                                max: self.max_payload_size,
                            })
                        }
                    };

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    src.reserve(payload_len.saturating_sub(src.remaining()));

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.remaining() < header_and_mask.payload_len {
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    } = header_and_mask;

                    let mut payload = src.split_to(payload_len);
                    if let Some(key) = mask {
                        mask::apply_mask(&mut payload, key);
                    }

                    break Ok(Some(Frame::new(true, header.opcode, mask, payload)));
                }
            }
        }
    }

    /// Called once the stream has ended.
    ///
    /// An empty buffer at a frame boundary is a clean end of stream (`Ok(None)`). Leftover bytes
    /// inside the 2-byte header are a [`FrameError::ShortRead`]; anything cut off later is
    /// [`FrameError::Truncated`]. Partial data is discarded in both cases.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        let result = match self.state {
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ShortRead),
            Some(_) => Err(FrameError::Truncated),
        };
        self.state = None;
        src.clear();
        result
    }
}

/// WebSocket frame encoder.
///
/// A client encoder masks every frame with a fresh key drawn from its own generator; a server
/// encoder never masks. The `mask` recorded in a [`Frame`] is ignored on output.
pub struct Encoder {
    role: Role,
    rng: StdRng,
}

impl Encoder {
    /// Creates an encoder for `role` with a generator seeded from system entropy.
    pub fn new(role: Role) -> Self {
        Self::with_rng(role, StdRng::from_entropy())
    }

    /// Creates an encoder drawing masking keys from `rng`.
    pub fn with_rng(role: Role, rng: StdRng) -> Self {
        Self { role, rng }
    }

    /// Encodes `payload` as a single final frame with the given opcode.
    pub fn encode_payload(&mut self, payload: &[u8], opcode: OpCode) -> BytesMut {
        let mut dst = BytesMut::new();
        self.write_frame(&Frame::new(true, opcode, None, payload), &mut dst);
        dst
    }

    fn write_frame(&mut self, frame: &Frame, dst: &mut BytesMut) {
        let mask = self
            .role
            .masks_outgoing()
            .then(|| mask::new_key(&mut self.rng));

        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(mask, &mut head);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);

        let start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(key) = mask {
            mask::apply_mask(&mut dst[start..], key);
        }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_frame(&frame, dst);
        Ok(())
    }
}
