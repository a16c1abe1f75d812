use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use clap::Args;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    runtime,
    task::JoinSet,
};
use tokio_rustls::TlsAcceptor;
use wslite::{HandshakeError, HandshakeMode, Options, Session};

use crate::{commands::CommandHandler, tls};

/// Command to run a WebSocket command server.
///
/// Every accepted connection is served on its own task. Plain HTTP requests get a short HTML
/// page, WebSocket clients can send `ping`, `time`, `echo <text>` and `close`.
#[derive(Args)]
#[command(alias = "s")]
pub struct Cmd {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 9090)]
    port: u16,

    /// PEM certificate chain; serves wss:// together with `--key`.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key matching `--cert`.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Use the fixed demo handshake keys instead of deriving the accept key.
    #[arg(long)]
    fixed_key: bool,

    /// Largest frame payload accepted from a client, in bytes.
    #[arg(long, default_value_t = 1 << 20)]
    max_payload: usize,
}

impl Cmd {
    fn options(&self) -> Options {
        let options = Options::default().with_max_payload_read(self.max_payload);
        if self.fixed_key {
            options.with_handshake_mode(HandshakeMode::demo())
        } else {
            options
        }
    }
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(serve(cmd))
}

async fn serve(cmd: Cmd) -> anyhow::Result<()> {
    let acceptor = match (&cmd.cert, &cmd.key) {
        (Some(cert), Some(key)) => Some(tls::acceptor(cert, key)?),
        _ => None,
    };
    let options = cmd.options();

    let listener = TcpListener::bind(("0.0.0.0", cmd.port))
        .await
        .with_context(|| format!("binding port {}", cmd.port))?;
    log::info!(
        "listening on {} ({})",
        listener.local_addr()?,
        if acceptor.is_some() { "wss" } else { "ws" }
    );

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::warn!("accept failed: {err}");
                        continue;
                    }
                };
                log::debug!("tcp connection from {addr}");
                tasks.spawn(handle_connection(stream, addr, acceptor.clone(), options.clone()));
            }
            Some(done) = tasks.join_next() => {
                if let Err(err) = done {
                    log::error!("connection task failed: {err}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down, dropping {} connection(s)", tasks.len());
                break;
            }
        }
    }

    tasks.shutdown().await;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    options: Options,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_session(stream, addr, options).await,
            Err(err) => log::warn!("tls handshake with {addr} failed: {err}"),
        },
        None => serve_session(stream, addr, options).await,
    }
}

async fn serve_session<S>(stream: S, addr: SocketAddr, options: Options)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(stream, options);
    match session.accept().await {
        Ok(()) => log::info!("client {addr} connected via WebSocket"),
        Err(HandshakeError::NotWebSocket) => {
            log::info!("served plain HTTP page to {addr}");
            return;
        }
        Err(err) => {
            log::warn!("handshake with {addr} failed: {err}");
            return;
        }
    }

    let reason = session.run(CommandHandler::new(addr)).await;
    log::info!("client {addr} disconnected: {reason}");
}
