//! # Handshake
//!
//! The opening handshake of [RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4):
//! a single HTTP/1.1 upgrade request answered by a `101 Switching Protocols` response.
//!
//! ```text
//! GET / HTTP/1.1                                HTTP/1.1 101 Switching Protocols
//! Host: example.com:9090                        Upgrade: websocket
//! Upgrade: websocket                  ---->     Connection: Upgrade
//! Connection: Upgrade                 <----     Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! Both roles read the peer's header block with the same tolerant line parser
//! ([`HttpHead`]). Bytes that arrive after the blank line are kept in [`Negotiated`] and handed
//! to the frame decoder, since a peer may send its first frame right behind the handshake.
use base64::prelude::*;
use bytes::BytesMut;
use http::{
    header::{self, HeaderName},
    HeaderMap, HeaderValue,
};
use nom::{
    bytes::complete::{tag, take_while1, take_while_m_n},
    character::complete::{char, not_line_ending, space0, space1},
    combinator::map_res,
    sequence::{preceded, separated_pair},
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{HandshakeError, HandshakeMode, Options};

/// Fixed GUID appended to the client key before hashing (RFC 6455).
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Page served to plain HTTP requests that hit the WebSocket endpoint.
const FALLBACK_HTML: &str = "<html><body><h1>Not a WebSocket request</h1></body></html>";

/// Derives the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
///
/// ```rust
/// assert_eq!(
///     wslite::derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn derive_accept_key(client_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key.as_bytes());
    sha1.update(WS_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Generates a request key: 16 random bytes, Base64-encoded.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct Negotiated {
    accept_key: String,
    /// Bytes received after the header block.
    pub(crate) read_buf: BytesMut,
}

impl Negotiated {
    /// The `Sec-WebSocket-Accept` value exchanged during the handshake.
    pub fn accept_key(&self) -> &str {
        &self.accept_key
    }

    /// Bytes that followed the header block on the wire.
    pub fn leftover(&self) -> &[u8] {
        &self.read_buf
    }
}

/// The start line and headers of an HTTP/1.1 message head.
///
/// Parsing is tolerant: lines may end in CRLF or bare LF, header names are case-insensitive,
/// and lines that are not `name: value` pairs are skipped.
#[derive(Debug, Default)]
pub struct HttpHead {
    pub start_line: String,
    pub headers: HeaderMap,
}

impl HttpHead {
    /// Parses a header block. A missing start line yields an empty `start_line`.
    pub fn parse(block: &str) -> Self {
        let mut lines = block.lines();
        let start_line = lines.next().unwrap_or_default().trim().to_owned();

        let mut headers = HeaderMap::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let Ok((_, (name, value))) = header_field(line) else {
                #[cfg(feature = "logging")]
                log::debug!("skipping malformed header line: {line:?}");
                continue;
            };

            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => {
                    #[cfg(feature = "logging")]
                    log::debug!("skipping invalid header: {name:?}");
                }
            }
        }

        Self {
            start_line,
            headers,
        }
    }

    /// Returns the trimmed value of the first header named `name`.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    }

    /// Whether an `Upgrade` header lists the `websocket` token.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.headers
            .get_all(header::UPGRADE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
    }

    /// The status code of a response start line, e.g. `101` for
    /// `HTTP/1.1 101 Switching Protocols`.
    pub fn status_code(&self) -> Option<u16> {
        status_code(&self.start_line).ok().map(|(_, code)| code)
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// `Name: value`
fn header_field(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_while1(is_token_char), (char(':'), space0), not_line_ending).parse(input)
}

/// `HTTP/1.1 101 ...`
fn status_code(input: &str) -> IResult<&str, u16> {
    preceded(
        (
            tag("HTTP/"),
            take_while1(|c: char| c.is_ascii_digit() || c == '.'),
            space1,
        ),
        map_res(take_while_m_n(3, 3, |c: char| c.is_ascii_digit()), |code: &str| {
            code.parse::<u16>()
        }),
    )
    .parse(input)
}

/// Reads into `buf` until it holds a complete header block and returns the block's length,
/// terminator included.
///
/// Fails with `TooLarge` once more than `max_size` bytes are buffered without a terminator,
/// or if the block itself is longer than that. `max_reads` bounds the number of reads.
async fn read_head<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_size: usize,
    max_reads: Option<usize>,
) -> Result<usize, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut reads = 0;
    loop {
        if let Some(pos) = buf
            .windows(HEAD_TERMINATOR.len())
            .position(|window| window == HEAD_TERMINATOR)
        {
            let end = pos + HEAD_TERMINATOR.len();
            if end > max_size {
                return Err(HandshakeError::TooLarge { max: max_size });
            }
            return Ok(end);
        }

        if buf.len() > max_size {
            return Err(HandshakeError::TooLarge { max: max_size });
        }
        if max_reads.is_some_and(|max| reads >= max) {
            return Err(HandshakeError::Incomplete);
        }

        buf.reserve(1024);
        let n = stream.read_buf(buf).await?;
        reads += 1;
        if n == 0 {
            return Err(HandshakeError::Incomplete);
        }
    }
}

async fn write_block<S>(stream: &mut S, block: &[u8]) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(block)
        .await
        .map_err(HandshakeError::WriteFailed)?;
    stream.flush().await.map_err(HandshakeError::WriteFailed)
}

/// Reads a header block from `stream`, returning the parsed head and whatever followed it.
async fn receive_head<S>(
    stream: &mut S,
    options: &Options,
    max_reads: Option<usize>,
) -> Result<(HttpHead, BytesMut), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    let end = read_head(stream, &mut buf, options.max_handshake_size, max_reads).await?;
    let block = buf.split_to(end);
    Ok((HttpHead::parse(&String::from_utf8_lossy(&block)), buf))
}

/// Performs the client side of the handshake.
///
/// Sends the upgrade request for `host:port`, then waits (for at most the configured number of
/// reads) for the `101` response. In `Derived { verify_accept: true }` and `FixedKey` mode the
/// response's `Sec-WebSocket-Accept` must match the expected value.
pub async fn initiate<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    options: &Options,
) -> Result<Negotiated, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = match &options.mode {
        HandshakeMode::Derived { .. } => generate_key(),
        HandshakeMode::FixedKey { key, .. } => key.clone(),
    };

    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    write_block(stream, request.as_bytes()).await?;

    let (head, read_buf) =
        receive_head(stream, options, Some(options.max_handshake_reads)).await?;

    if head.status_code() != Some(101) {
        return Err(HandshakeError::Rejected(head.start_line));
    }

    let received = head
        .header(&header::SEC_WEBSOCKET_ACCEPT)
        .unwrap_or_default()
        .to_owned();

    let expected = match &options.mode {
        HandshakeMode::Derived {
            verify_accept: true,
        } => Some(derive_accept_key(&key)),
        HandshakeMode::Derived {
            verify_accept: false,
        } => None,
        HandshakeMode::FixedKey { accept, .. } => Some(accept.clone()),
    };

    if let Some(expected) = expected {
        if expected != received {
            return Err(HandshakeError::AcceptMismatch { expected, received });
        }
    }

    #[cfg(feature = "logging")]
    log::debug!("handshake with {host}:{port} accepted");

    Ok(Negotiated {
        accept_key: received,
        read_buf,
    })
}

/// Performs the server side of the handshake.
///
/// Requests without `Upgrade: websocket` get a plain `200 OK` HTML page and fail with
/// [`HandshakeError::NotWebSocket`]. Requests without a key fail with
/// [`HandshakeError::MissingKey`] and nothing is written back.
pub async fn accept<S>(stream: &mut S, options: &Options) -> Result<Negotiated, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, read_buf) = receive_head(stream, options, None).await?;

    if !head.is_websocket_upgrade() {
        #[cfg(feature = "logging")]
        log::debug!("not a websocket request: {}", head.start_line);

        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/html\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n\
             {FALLBACK_HTML}",
            FALLBACK_HTML.len()
        );
        write_block(stream, response.as_bytes()).await?;
        return Err(HandshakeError::NotWebSocket);
    }

    let key = head
        .header(&header::SEC_WEBSOCKET_KEY)
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    let accept_key = match &options.mode {
        HandshakeMode::Derived { .. } => derive_accept_key(key),
        HandshakeMode::FixedKey {
            key: expected,
            accept,
        } => {
            if key != expected.as_str() {
                return Err(HandshakeError::UnexpectedKey(key.to_owned()));
            }
            accept.clone()
        }
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
    );
    write_block(stream, response.as_bytes()).await?;

    #[cfg(feature = "logging")]
    log::debug!("handshake accepted, accept key {accept_key}");

    Ok(Negotiated {
        accept_key,
        read_buf,
    })
}
