use clap::{Parser, Subcommand};

mod client;
mod commands;
mod server;
mod tls;

/// WebSocket client/server CLI tool over plain TCP or TLS
///
/// The server answers a small command set (ping, time, echo <text>, close).
/// The client sends every line typed at the prompt as a text message.
///
/// Examples:
///   wslitec server --port 9090 --cert server_cert.pem --key server_key.pem
///   wslitec client wss://localhost:9090 --ca server_cert.pem
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    /// Log handshake and frame details.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Client(client::Cmd),
    Server(server::Cmd),
}

fn main() {
    let args = Cli::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(err) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("unable to install logger: {err}");
    }

    let res = match args.command {
        Commands::Client(cmd) => client::run(cmd),
        Commands::Server(cmd) => server::run(cmd),
    };
    if let Err(err) = res {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
