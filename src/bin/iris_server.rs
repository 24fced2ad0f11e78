//! Iris Demo Server
//!
//! Server sederhana di atas `iris::Server`:
//! - Semua client diterima dan diberi `ServerAccept`
//! - `ServerPing` dipantulkan balik ke pengirim (untuk ukur round-trip)
//! - `MessageAll` diteruskan ke semua client lain sebagai `ServerMessage`
//!   berisi ID pengirim
//!
//! Usage:
//!   cargo run --release --bin iris_server -- [OPTIONS]

use std::sync::Arc;

use iris::{Connection, Message, MessageKind, Server, ServerConfig, ServerHandler};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tipe pesan demo (harus sama dengan iris_client)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemoKind {
    ServerAccept = 0,
    ServerDeny = 1,
    ServerPing = 2,
    MessageAll = 3,
    ServerMessage = 4,
}

impl MessageKind for DemoKind {
    fn to_raw(self) -> u32 {
        self as u32
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::ServerAccept),
            1 => Some(Self::ServerDeny),
            2 => Some(Self::ServerPing),
            3 => Some(Self::MessageAll),
            4 => Some(Self::ServerMessage),
            _ => None,
        }
    }
}

struct DemoServer {
    verbose: bool,
}

impl ServerHandler<DemoKind> for DemoServer {
    fn on_client_connect(&self, client: &Arc<Connection<DemoKind>>) -> bool {
        client.send(Message::new(DemoKind::ServerAccept));
        true
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<DemoKind>>) {
        info!(id = client.id(), "removing client");
    }

    fn on_message(
        &self,
        server: &Server<DemoKind, Self>,
        client: Option<&Arc<Connection<DemoKind>>>,
        message: Message<DemoKind>,
    ) {
        // Pengirim sudah putus, tidak ada yang perlu dibalas
        let Some(client) = client else {
            return;
        };
        if self.verbose {
            info!(id = client.id(), %message, "message");
        }

        match message.kind() {
            DemoKind::ServerPing => {
                // Body berisi timestamp client, kirim balik apa adanya
                server.send_to(client, message);
            }
            DemoKind::MessageAll => {
                let mut relay = Message::new(DemoKind::ServerMessage);
                relay.push(&client.id());
                server.broadcast(&relay, Some(client));
            }
            _ => {}
        }
    }
}

struct ServerOptions {
    port: u16,
    verbose: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: iris::config::DEFAULT_PORT,
            verbose: false,
        }
    }
}

fn parse_args() -> ServerOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ServerOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    options.port = args[i + 1].parse().unwrap_or(options.port);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                options.verbose = true;
            }
            "--help" | "-h" => {
                println!("Iris Demo Server\n");
                println!("Usage: iris_server [OPTIONS]\n");
                println!("Options:");
                println!("  -p, --port <PORT>  Listen port (default: 60000)");
                println!("  -v, --verbose      Log every message");
                println!("  -h, --help         Show this help");
                println!("\nLog level via RUST_LOG (default: info)");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    options
}

fn main() {
    let options = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let handler = DemoServer {
        verbose: options.verbose,
    };
    let mut server = Server::new(ServerConfig::with_port(options.port), handler);

    if let Err(e) = server.start() {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }

    loop {
        server.drain_wait(usize::MAX);
    }
}
