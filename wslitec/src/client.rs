use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context};
use clap::Args;
use rustyline::ExternalPrinter;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    runtime,
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
    time::timeout,
};
use tokio_rustls::rustls::pki_types::ServerName;
use url::Url;
use wslite::{ConnectionState, HandshakeMode, Options, Session};

use crate::tls;

/// Command to connect and interact with a WebSocket server.
///
/// Every line typed at the prompt is sent as a text message and every text message received is
/// printed. Both ws:// and wss:// URLs are supported. Typing `close` sends it to the server,
/// waits for the reply and then closes the connection.
#[derive(Args)]
#[command(alias = "c")]
pub struct Cmd {
    /// Maximum duration to wait when establishing the connection.
    /// Accepts human-readable formats like "5s", "1m", "500ms".
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "5s")]
    timeout: Duration,

    /// Extra PEM CA certificate to trust for wss:// connections.
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Use the fixed demo handshake keys instead of a random key.
    #[arg(long)]
    fixed_key: bool,

    /// The WebSocket URL to connect to (ws:// or wss://)
    url: Url,
}

struct Target {
    host: String,
    port: u16,
    secure: bool,
}

impl Target {
    fn from_url(url: &Url) -> anyhow::Result<Self> {
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => bail!("unsupported scheme {other:?}, expected ws or wss"),
        };
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("{url} has no host"))?
            .to_owned();
        let port = url
            .port()
            .unwrap_or(if secure { 443 } else { 80 });

        Ok(Self { host, port, secure })
    }
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let target = Target::from_url(&cmd.url)?;

    let history_path = home::home_dir()
        .ok_or(anyhow!("unable to determine home path"))?
        .join(".wslite_history");

    let mut rl = rustyline::DefaultEditor::with_config(
        rustyline::Config::builder()
            .auto_add_history(true)
            .completion_type(rustyline::CompletionType::List)
            .max_history_size(1000)?
            .build(),
    )?;
    // a missing history file is fine
    let _ = rl.load_history(&history_path);
    let printer = rl.create_external_printer()?;

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let _guard = runtime.enter();

    let mut options = Options::default();
    if cmd.fixed_key {
        options = options.with_handshake_mode(HandshakeMode::demo());
    }

    let stream = runtime.block_on(timeout(cmd.timeout, connect_tcp(&target)))??;

    let (tx, rx) = unbounded_channel();
    let reader = move || loop {
        match rl.readline("> ") {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(_) => {
                if let Err(err) = rl.save_history(&history_path) {
                    log::warn!("unable to save history: {err}");
                }
                break;
            }
        }
    };

    if target.secure {
        let connector = tls::connector(cmd.ca.as_deref())?;
        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|_| anyhow!("invalid server name {}", target.host))?;
        let stream = runtime.block_on(timeout(
            cmd.timeout,
            connector.connect(server_name, stream),
        ))??;
        let session = runtime.block_on(handshake(stream, &target, options, cmd.timeout))?;
        println!("> Connected to {}", cmd.url);
        runtime.spawn_blocking(reader);
        runtime.block_on(interact(session, rx, printer));
    } else {
        let session = runtime.block_on(handshake(stream, &target, options, cmd.timeout))?;
        println!("> Connected to {}", cmd.url);
        runtime.spawn_blocking(reader);
        runtime.block_on(interact(session, rx, printer));
    }

    runtime.shutdown_background();

    Ok(())
}

async fn connect_tcp(target: &Target) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .with_context(|| format!("connecting to {}:{}", target.host, target.port))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn handshake<S>(
    stream: S,
    target: &Target,
    options: Options,
    limit: Duration,
) -> anyhow::Result<Session<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(stream, options);
    timeout(limit, session.connect(&target.host, target.port))
        .await
        .context("handshake timed out")?
        .context("websocket handshake failed")?;
    Ok(session)
}

async fn interact<S>(
    mut session: Session<S>,
    mut rx: UnboundedReceiver<String>,
    mut printer: impl ExternalPrinter,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                if line.is_empty() {
                    continue;
                }
                // a cancelled receive may have started closing the session
                if session.state() != ConnectionState::Open {
                    print_disconnected(&session, &mut printer);
                    break;
                }

                if let Err(err) = session.send_text(&line).await {
                    let _ = printer.print(format!("unable to write: {err}"));
                    break;
                }
                if line == "close" {
                    if let Some(reply) = session.recv().await {
                        let _ = printer.print(reply);
                    }
                    break;
                }
            }
            msg = session.recv() => {
                match msg {
                    Some(text) => {
                        let _ = printer.print(text);
                    }
                    None => {
                        print_disconnected(&session, &mut printer);
                        break;
                    }
                }
            }
        }
    }

    if let Err(err) = session.close().await {
        log::debug!("close: {err}");
    }
}

fn print_disconnected<S>(session: &Session<S>, printer: &mut impl ExternalPrinter)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = session
        .close_reason()
        .map(ToString::to_string)
        .unwrap_or_default();
    let _ = printer.print(format!("<Disconnected> {reason}"));
}
