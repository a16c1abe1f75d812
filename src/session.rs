use std::{fmt, io, mem};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    codec::Codec,
    frame::{Frame, OpCode, Role},
    handshake::{self, Negotiated},
    FrameError, HandshakeError, Options,
};

/// Lifecycle of a connection.
///
/// ```text
/// Pending --handshake ok--> Open --close frame / decode error / close()--> Closing --> Closed
///    \---------------------------handshake failed--------------------------------------^
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream attached, no handshake yet.
    Pending,
    /// Handshake succeeded; frames may flow.
    Open,
    /// A close condition was reached; the close frame is being written.
    Closing,
    /// The stream has been shut down and released.
    Closed,
}

/// How a session left the `Open` state.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer sent a close frame.
    PeerClose,
    /// [`Session::close`] was called.
    LocalClose,
    /// The stream ended exactly at a frame boundary without a close frame.
    Disconnected,
    /// A protocol violation or transport fault.
    Failed(FrameError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClose => write!(f, "closed by peer"),
            Self::LocalClose => write!(f, "closed locally"),
            Self::Disconnected => write!(f, "peer disconnected"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Application callback invoked once per received text message.
///
/// Returning `Some` sends the string back as a text frame; `None` sends nothing.
pub trait Handler {
    fn handle(&mut self, text: &str) -> Option<String>;

    /// Whether the session should be closed once the reply to `text` has been written.
    ///
    /// Closures never close the session.
    fn closes_after(&self, _text: &str) -> bool {
        false
    }
}

impl<F> Handler for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn handle(&mut self, text: &str) -> Option<String> {
        self(text)
    }
}

enum Transport<S> {
    Pending(S),
    Open(Framed<S, Codec>),
    Released,
}

/// One WebSocket connection over a byte stream.
///
/// The session owns its stream for its whole life and is driven by a single task: frames are
/// read and written strictly in stream order. The role is fixed by the handshake that opens
/// it, [`accept`](Session::accept) for servers and [`connect`](Session::connect) for clients.
///
/// There are no timeouts or keep-alives; closing the stream from either side is the only way to
/// cancel a session.
pub struct Session<S> {
    options: Options,
    role: Option<Role>,
    state: ConnectionState,
    transport: Transport<S>,
    accept_key: Option<String>,
    close_sent: bool,
    reason: Option<CloseReason>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream. The session starts out `Pending`.
    pub fn new(stream: S, options: Options) -> Self {
        Self {
            options,
            role: None,
            state: ConnectionState::Pending,
            transport: Transport::Pending(stream),
            accept_key: None,
            close_sent: false,
            reason: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The role taken by the handshake, `None` while `Pending`.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The `Sec-WebSocket-Accept` value of the handshake.
    pub fn accept_key(&self) -> Option<&str> {
        self.accept_key.as_deref()
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.reason.as_ref()
    }

    /// Runs the server side of the handshake.
    ///
    /// On failure the stream is shut down and the session is `Closed`.
    pub async fn accept(&mut self) -> Result<(), HandshakeError> {
        self.negotiate(Role::Server, None).await
    }

    /// Runs the client side of the handshake against `host:port`.
    ///
    /// On failure the stream is shut down and the session is `Closed`.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), HandshakeError> {
        self.negotiate(Role::Client, Some((host, port))).await
    }

    async fn negotiate(
        &mut self,
        role: Role,
        target: Option<(&str, u16)>,
    ) -> Result<(), HandshakeError> {
        let mut stream = match mem::replace(&mut self.transport, Transport::Released) {
            Transport::Pending(stream) => stream,
            other => {
                self.transport = other;
                return Err(HandshakeError::AlreadyNegotiated);
            }
        };

        let result = match target {
            Some((host, port)) => handshake::initiate(&mut stream, host, port, &self.options).await,
            None => handshake::accept(&mut stream, &self.options).await,
        };

        match result {
            Ok(negotiated) => {
                self.open(stream, role, negotiated);
                Ok(())
            }
            Err(err) => {
                #[cfg(feature = "logging")]
                log::debug!("{role} handshake failed: {err}");

                if let Err(_err) = stream.shutdown().await {
                    #[cfg(feature = "logging")]
                    log::debug!("shutdown after failed handshake: {_err}");
                }
                self.state = ConnectionState::Closed;
                Err(err)
            }
        }
    }

    fn open(&mut self, stream: S, role: Role, negotiated: Negotiated) {
        self.accept_key = Some(negotiated.accept_key().to_owned());

        // bytes pipelined behind the handshake are the start of the first frame
        let mut parts =
            FramedParts::new::<Frame>(stream, Codec::new(role, self.options.max_payload_read));
        parts.read_buf = negotiated.read_buf;

        self.transport = Transport::Open(Framed::from_parts(parts));
        self.role = Some(role);
        self.state = ConnectionState::Open;

        #[cfg(feature = "logging")]
        log::debug!("{role} session open");
    }

    /// Waits for the next text message.
    ///
    /// Returns `None` once the session is closed: the peer sent a close frame, the stream
    /// ended, or a frame could not be decoded. The cause is available from
    /// [`close_reason`](Session::close_reason). Binary and ping/pong frames are skipped.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            let Transport::Open(framed) = &mut self.transport else {
                return None;
            };

            let frame = match framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    self.finish_logged(CloseReason::Failed(err)).await;
                    return None;
                }
                None => {
                    self.finish_logged(CloseReason::Disconnected).await;
                    return None;
                }
            };

            match frame.opcode {
                OpCode::Text => return Some(frame.to_text()),
                OpCode::Close => {
                    self.finish_logged(CloseReason::PeerClose).await;
                    return None;
                }
                _opcode => {
                    #[cfg(feature = "logging")]
                    log::debug!("ignoring {_opcode:?} frame");
                }
            }
        }
    }

    /// Sends a text message as a single frame, masked when the session is a client.
    ///
    /// A failed write closes the session.
    pub async fn send_text(&mut self, text: &str) -> Result<(), FrameError> {
        let Transport::Open(framed) = &mut self.transport else {
            return Err(FrameError::ConnectionClosed);
        };

        let err = match framed.send(Frame::text(text)).await {
            Ok(()) => return Ok(()),
            Err(FrameError::Io(err) | FrameError::WriteFailed(err)) => err,
            Err(other) => {
                self.finish_logged(CloseReason::Failed(other)).await;
                return Err(FrameError::ConnectionClosed);
            }
        };

        // the original error is kept as the close reason
        let reported = io::Error::new(err.kind(), err.to_string());
        self.finish_logged(CloseReason::Failed(FrameError::WriteFailed(err)))
            .await;
        Err(FrameError::WriteFailed(reported))
    }

    /// Closes the session: sends a bare close frame if none was sent yet, then shuts the
    /// stream down. A `Pending` stream is shut down without a handshake. Closing twice is a
    /// no-op.
    ///
    /// A session left `Closing` by a cancelled [`recv`](Session::recv) has already dropped its
    /// stream; closing it only settles the state.
    pub async fn close(&mut self) -> Result<(), FrameError> {
        match self.state {
            ConnectionState::Open => self.finish(CloseReason::LocalClose).await,
            ConnectionState::Closing => {
                self.state = ConnectionState::Closed;
                Ok(())
            }
            ConnectionState::Pending => {
                self.state = ConnectionState::Closed;
                self.reason = Some(CloseReason::LocalClose);
                match mem::replace(&mut self.transport, Transport::Released) {
                    Transport::Pending(mut stream) => stream.shutdown().await.map_err(FrameError::Io),
                    _ => Ok(()),
                }
            }
            ConnectionState::Closed => Ok(()),
        }
    }

    /// Serves the session until it closes, passing every text message to `handler` and
    /// sending back whatever it returns. The session is closed locally after a reply when
    /// [`Handler::closes_after`] asks for it.
    pub async fn run<H: Handler>(mut self, mut handler: H) -> CloseReason {
        while let Some(text) = self.recv().await {
            if let Some(reply) = handler.handle(&text) {
                if self.send_text(&reply).await.is_err() {
                    break;
                }
            }

            if handler.closes_after(&text) {
                if let Err(_err) = self.close().await {
                    #[cfg(feature = "logging")]
                    log::debug!("close after handler request: {_err}");
                }
                break;
            }
        }

        // every way out of the loop goes through `finish`
        self.reason.take().unwrap_or(CloseReason::LocalClose)
    }

    async fn finish_logged(&mut self, reason: CloseReason) {
        if let Err(_err) = self.finish(reason).await {
            #[cfg(feature = "logging")]
            log::debug!("closing handshake incomplete: {_err}");
        }
    }

    /// Open -> Closing -> Closed. A close frame goes out unless one was already sent or the
    /// peer is known to be gone.
    ///
    /// State and reason are recorded before the first await, so a cancelled close still leaves
    /// them behind and drops the stream.
    async fn finish(&mut self, reason: CloseReason) -> Result<(), FrameError> {
        self.state = ConnectionState::Closing;

        #[cfg(feature = "logging")]
        log::debug!("session closing: {reason}");

        let send_close = match &reason {
            CloseReason::PeerClose | CloseReason::LocalClose => true,
            CloseReason::Disconnected => false,
            CloseReason::Failed(err) => !err.is_disconnect(),
        };
        self.reason = Some(reason);

        let mut result = Ok(());
        if let Transport::Open(mut framed) = mem::replace(&mut self.transport, Transport::Released) {
            if send_close && !self.close_sent {
                self.close_sent = true;
                if let Err(err) = framed.send(Frame::close()).await {
                    result = Err(match err {
                        FrameError::Io(err) => FrameError::WriteFailed(err),
                        other => other,
                    });
                }
            }

            if let Err(err) = framed.get_mut().shutdown().await {
                if result.is_ok() {
                    result = Err(FrameError::Io(err));
                }
            }
        }

        self.state = ConnectionState::Closed;
        result
    }
}
