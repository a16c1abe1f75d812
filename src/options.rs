/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames declaring a larger payload are rejected before any buffer is allocated for them.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// Cap on the bytes buffered while waiting for the end of a handshake header block.
pub const MAX_HANDSHAKE_SIZE: usize = 8192;

/// Reads a client attempts while waiting for the server's handshake response.
pub const MAX_HANDSHAKE_READS: usize = 16;

/// Literal key sent by the fixed-key demo handshake.
const DEMO_CLIENT_KEY: &str = "hello, world";
/// Literal accept value answered by the fixed-key demo handshake.
const DEMO_ACCEPT_KEY: &str = "hello, kitty";

/// How the `Sec-WebSocket-Key` / `Sec-WebSocket-Accept` pair is negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMode {
    /// RFC 6455 derivation: `accept = Base64(SHA1(key + GUID))`.
    ///
    /// With `verify_accept` the client checks the server's `Sec-WebSocket-Accept` against its
    /// own derivation. Without it, any `101` response is taken.
    Derived { verify_accept: bool },

    /// Diagnostic mode with pre-agreed literal strings, bypassing the derivation.
    ///
    /// The client sends `key` and requires `accept` back; the server requires `key` and answers
    /// `accept`. Both ends must be configured with the same pair. Never use it against a
    /// standard peer.
    FixedKey { key: String, accept: String },
}

impl HandshakeMode {
    /// The fixed-key pair used by the demo client and server.
    pub fn demo() -> Self {
        Self::FixedKey {
            key: DEMO_CLIENT_KEY.to_owned(),
            accept: DEMO_ACCEPT_KEY.to_owned(),
        }
    }
}

impl Default for HandshakeMode {
    fn default() -> Self {
        Self::Derived {
            verify_accept: true,
        }
    }
}

/// Configuration for a [`Session`](crate::Session).
///
/// # Example
/// ```rust
/// use wslite::{HandshakeMode, Options};
///
/// let options = Options::default()
///     .with_max_payload_read(64 * 1024)
///     .with_handshake_mode(HandshakeMode::Derived { verify_accept: false });
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) max_payload_read: usize,
    pub(crate) max_handshake_size: usize,
    pub(crate) max_handshake_reads: usize,
    pub(crate) mode: HandshakeMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: MAX_PAYLOAD_READ,
            max_handshake_size: MAX_HANDSHAKE_SIZE,
            max_handshake_reads: MAX_HANDSHAKE_READS,
            mode: HandshakeMode::default(),
        }
    }
}

impl Options {
    /// Sets the maximum payload size accepted by the decoder.
    ///
    /// A frame whose declared length is larger fails with
    /// [`FrameError::LengthOverflow`](crate::FrameError::LengthOverflow) and ends the session.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: size,
            ..self
        }
    }

    /// Sets the cap on buffered handshake bytes.
    pub fn with_max_handshake_size(self, size: usize) -> Self {
        Self {
            max_handshake_size: size,
            ..self
        }
    }

    /// Sets how many reads a client attempts before giving up on the server's response.
    pub fn with_max_handshake_reads(self, reads: usize) -> Self {
        Self {
            max_handshake_reads: reads,
            ..self
        }
    }

    /// Selects the negotiation mode.
    pub fn with_handshake_mode(self, mode: HandshakeMode) -> Self {
        Self { mode, ..self }
    }

    pub fn max_payload_read(&self) -> usize {
        self.max_payload_read
    }

    pub fn handshake_mode(&self) -> &HandshakeMode {
        &self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.max_payload_read, MAX_PAYLOAD_READ);
        assert_eq!(options.max_handshake_size, 8192);
        assert_eq!(
            options.mode,
            HandshakeMode::Derived {
                verify_accept: true
            }
        );
    }

    #[test]
    fn test_builder_overrides() {
        let options = Options::default()
            .with_max_payload_read(10)
            .with_max_handshake_size(100)
            .with_max_handshake_reads(2)
            .with_handshake_mode(HandshakeMode::demo());

        assert_eq!(options.max_payload_read(), 10);
        assert_eq!(options.max_handshake_size, 100);
        assert_eq!(options.max_handshake_reads, 2);
        assert_eq!(
            options.handshake_mode(),
            &HandshakeMode::FixedKey {
                key: "hello, world".into(),
                accept: "hello, kitty".into(),
            }
        );
    }
}
