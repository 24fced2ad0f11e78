//! Iris Demo Client
//!
//! Connect ke iris_server, kirim ping berkala dan satu `MessageAll`,
//! lalu cetak semua yang diterima.
//!
//! Usage:
//!   cargo run --release --bin iris_client -- --host 127.0.0.1 --port 60000 --duration 10

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use iris::{Client, ConnectionState, Message, MessageKind};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Tipe pesan demo (harus sama dengan iris_server)
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

/// Timestamp dalam nanoseconds (epoch)
fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

struct ClientOptions {
    host: String,
    port: u16,
    duration_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: iris::config::DEFAULT_PORT,
            duration_secs: 10,
        }
    }
}

fn run_client(options: ClientOptions) -> iris::Result<()> {
    let mut client: Client<DemoKind> = Client::new();
    client.connect(&options.host, options.port)?;

    let deadline = Instant::now() + Duration::from_secs(options.duration_secs);
    let mut last_ping: Option<Instant> = None;
    let mut sent_message_all = false;

    while Instant::now() < deadline {
        if client.state() == ConnectionState::Disconnected {
            println!("Server down");
            break;
        }

        if client.is_connected() {
            if last_ping.map_or(true, |t| t.elapsed() >= Duration::from_secs(1)) {
                let mut ping = Message::new(DemoKind::ServerPing);
                ping.push(&now_ns());
                client.send(ping);
                last_ping = Some(Instant::now());
            }
            if !sent_message_all {
                client.send(Message::new(DemoKind::MessageAll));
                sent_message_all = true;
            }
        }

        if !client.incoming().wait_timeout(Duration::from_millis(100)) {
            continue;
        }
        while let Some(owned) = client.incoming().pop_front() {
            let mut message = owned.message;
            match message.kind() {
                DemoKind::ServerAccept => println!("Server accepted connection"),
                DemoKind::ServerDeny => println!("Server denied connection"),
                DemoKind::ServerPing => match message.pop::<u64>() {
                    Some(sent) => {
                        let rtt_us = now_ns().saturating_sub(sent) as f64 / 1000.0;
                        println!("Ping: {:.1} μs", rtt_us);
                    }
                    None => warn!(%message, "malformed ping"),
                },
                DemoKind::ServerMessage => match message.pop::<u32>() {
                    Some(id) => println!("Hello from [{}]", id),
                    None => warn!(%message, "malformed server message"),
                },
                DemoKind::MessageAll => {}
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn parse_args() -> ClientOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ClientOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    options.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    options.port = args[i + 1].parse().unwrap_or(options.port);
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    options.duration_secs = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Iris Demo Client\n");
                println!("Usage: iris_client [OPTIONS]\n");
                println!("Options:");
                println!("      --host <HOST>     Server host (default: 127.0.0.1)");
                println!("  -p, --port <PORT>     Server port (default: 60000)");
                println!("  -d, --duration <SEC>  Run time (default: 10)");
                println!("  -h, --help            Show this help");
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
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run_client(options) {
        eprintln!("Client error: {}", e);
        eprintln!("\nMake sure iris_server is running:");
        eprintln!("   cargo run --release --bin iris_server");
        std::process::exit(1);
    }
}
