//! Network Layer: Async I/O di atas mio
//!
//! Setiap endpoint (server atau client) punya satu execution thread yang
//! menjalankan poll loop. Application thread tidak pernah menyentuh socket;
//! ia hanya mengantrekan pesan dan menguras inbound queue.
//!
//! Fitur:
//! - Non-blocking I/O dengan epoll/kqueue/IOCP
//! - Read/write pipeline per connection sebagai state machine eksplisit
//! - Registry connection dengan ID monotonic per server

mod client;
mod connection;
mod context;
mod server;
mod socket;

pub use client::Client;
pub use connection::{Connection, ConnectionState, OwnedMessage, Role};
pub use server::{Server, ServerHandler, ServerState, ServerStats, FIRST_CLIENT_ID};
