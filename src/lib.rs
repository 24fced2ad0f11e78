//! Iris - Typed Message Transport over TCP
//!
//! Mengubah byte-stream mentah menjadi channel pesan bertipe, ber-antrean,
//! dan asinkron.
//!
//! Arsitektur:
//! - Framing: header fixed (kind + size) diikuti body, tanpa delimiter
//! - Queue: `TsQueue` lock-protected sebagai satu-satunya titik hand-off
//!   antara execution thread dan application thread
//! - Connection: read/write pipeline non-blocking di atas mio
//! - Server: accept loop, registry, broadcast, dan `drain()` sinkron
//!
//! ```no_run
//! use std::sync::Arc;
//! use iris::{Connection, Message, Server, ServerConfig, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler<u32> for Echo {
//!     fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(&self, server: &Server<u32, Self>, client: Option<&Arc<Connection<u32>>>, msg: Message<u32>) {
//!         if let Some(client) = client {
//!             server.send_to(client, msg);
//!         }
//!     }
//! }
//!
//! let mut server = Server::new(ServerConfig::with_port(60000), Echo);
//! server.start().expect("port available");
//! loop {
//!     server.drain_wait(usize::MAX);
//! }
//! ```

pub mod config;
pub mod core;
mod error;
pub mod network;
pub mod protocol;

pub use config::{ServerConfig, SocketOptions};
pub use error::{Error, Result};
pub use network::{
    Client, Connection, ConnectionState, OwnedMessage, Role, Server, ServerHandler, ServerState,
};
pub use protocol::{Message, MessageKind};
