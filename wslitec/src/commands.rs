use std::net::SocketAddr;

use wslite::Handler;

/// Answers the text commands of the demo server.
pub struct CommandHandler {
    peer: SocketAddr,
}

impl CommandHandler {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }
}

impl Handler for CommandHandler {
    fn handle(&mut self, text: &str) -> Option<String> {
        log::info!("[client {}] {}", self.peer, text);
        Some(reply(text))
    }

    fn closes_after(&self, text: &str) -> bool {
        let close = text == "close";
        if close {
            log::info!("client {} asked to disconnect", self.peer);
        }
        close
    }
}

/// `ping`, `time`, `close`, `echo <text>`; anything else is reported back as unknown.
pub fn reply(command: &str) -> String {
    match command {
        "ping" => "pong".to_owned(),
        "time" => chrono::Local::now()
            .format("%a %b %-d %H:%M:%S %Y")
            .to_string(),
        "close" => "bye".to_owned(),
        other => match other.strip_prefix("echo ") {
            Some(text) => text.to_owned(),
            None => format!("Unknown command: {other}"),
        },
    }
}
