//! # wslite
//! A minimal implementation of the WebSocket protocol (RFC 6455) for single-frame text exchange
//! over any reliable async byte stream, plain TCP or TLS alike.
//!
//! The crate only covers the protocol engine:
//!
//! - [`handshake`]: the HTTP-style upgrade exchange and the SHA-1/Base64 accept-key derivation,
//!   in both the client and the server role.
//! - [`codec`]: encoding and decoding of data frames, including the 7/16/64-bit length
//!   encoding and client-side payload masking.
//! - [`Session`]: runs the handshake once per connection, then exchanges frames until a close
//!   condition is reached.
//!
//! Sockets, TLS session setup and command dispatch belong to the caller. The engine accepts any
//! stream implementing [`tokio::io::AsyncRead`] and [`tokio::io::AsyncWrite`].
//!
//! # Features
//!
//! - `logging`: Enables debug logging for handshake negotiation, state transitions and frame
//!   processing using the `log` crate.
//!
//! # Server Example
//! ```rust,no_run
//! use tokio::net::TcpListener;
//! use wslite::{Options, Session};
//!
//! async fn serve() -> wslite::Result<()> {
//!     let listener = TcpListener::bind("0.0.0.0:9090").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         tokio::spawn(async move {
//!             let mut session = Session::new(stream, Options::default());
//!             if session.accept().await.is_ok() {
//!                 let reason = session
//!                     .run(|text: &str| Some(format!("echo: {text}")))
//!                     .await;
//!                 println!("session ended: {reason}");
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Client Example
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use wslite::{Options, Session};
//!
//! async fn ping() -> wslite::Result<()> {
//!     let stream = TcpStream::connect("127.0.0.1:9090").await?;
//!     let mut session = Session::new(stream, Options::default());
//!     session.connect("127.0.0.1", 9090).await?;
//!
//!     session.send_text("ping").await?;
//!     if let Some(reply) = session.recv().await {
//!         println!("server: {reply}");
//!     }
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Memory Safety
//! - Declared frame lengths are checked against a configurable maximum before any payload
//!   buffer is allocated (default 1 MiB).
//! - Handshake header blocks are capped (default 8192 bytes).

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;
mod options;
mod session;

use std::io;

use thiserror::Error;

pub use frame::{Frame, OpCode, Role};
pub use handshake::derive_accept_key;
pub use options::{HandshakeMode, Options};
pub use session::{CloseReason, ConnectionState, Handler, Session};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Failures of the opening handshake.
///
/// A handshake error always ends the connection before any frame is exchanged. Nothing is
/// retried automatically; reconnecting is up to the caller.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The peer closed the stream, or the client ran out of read attempts, before a complete
    /// header block (terminated by `\r\n\r\n`) arrived.
    #[error("Incomplete handshake")]
    Incomplete,

    /// The header block grew past the configured cap without a terminator.
    #[error("Handshake exceeds {max} bytes")]
    TooLarge { max: usize },

    /// The request carried no `Upgrade: websocket` header. A plain `200 OK` HTML page was sent
    /// back and the connection should be handled (or dropped) as ordinary HTTP.
    #[error("Not a WebSocket upgrade request")]
    NotWebSocket,

    /// Occurs when the required "Sec-WebSocket-Key" header is missing from the client request.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingKey,

    /// The server answered with something other than `101 Switching Protocols`.
    #[error("Handshake rejected: {0}")]
    Rejected(String),

    /// The `Sec-WebSocket-Accept` value does not match the one derived from the request key.
    #[error("Sec-WebSocket-Accept mismatch (expected {expected}, received {received})")]
    AcceptMismatch { expected: String, received: String },

    /// The request key differs from the pre-agreed key of the fixed-key mode.
    #[error("Unexpected Sec-WebSocket-Key: {0}")]
    UnexpectedKey(String),

    /// The handshake was attempted on a session that already left the `Pending` state.
    #[error("Handshake already performed")]
    AlreadyNegotiated,

    /// Writing the request or the response failed.
    #[error("Handshake write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Reading from the stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures while reading or writing frames.
///
/// None of these are recoverable mid-stream: after a malformed or partial read the position of
/// the next frame header is unknown, so the session always ends.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The stream ended inside the 2-byte frame header.
    #[error("Short read in frame header")]
    ShortRead,

    /// The declared payload length is above the configured maximum.
    #[error("Frame length {length} exceeds maximum of {max} bytes")]
    LengthOverflow { length: u64, max: usize },

    /// The stream ended inside the extended length, masking key or payload.
    #[error("Frame truncated")]
    Truncated,

    /// Writing a frame to the stream failed.
    #[error("Frame write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Indicates receipt of a frame with an opcode outside the values defined by RFC 6455.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Indicates that reserved bits in the frame header are set. No extension is ever
    /// negotiated, so they must be 0.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A frame arrived with FIN clear. Fragmented messages are not supported.
    #[error("Fragmented frames are not supported")]
    Fragmented,

    /// Client frames must be masked and server frames must not be.
    #[error("Unexpected masking (masked={masked})")]
    UnexpectedMask { masked: bool },

    /// Returned when sending on a session that is not `Open`.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Reading from the stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the error means the peer is gone, so writing a close frame is pointless.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ShortRead | Self::Truncated | Self::WriteFailed(_) | Self::Io(_)
        )
    }
}

/// Umbrella error for callers that drive both the handshake and the frame exchange.
#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Wraps standard I/O errors from the transport, such as connect or bind failures.
    #[error(transparent)]
    IoError(#[from] io::Error),
}
