//! Client: satu connection ke server, dengan inbound queue private
//!
//! Sama seperti server, socket I/O terjadi di execution thread milik client.
//! Aplikasi membaca pesan masuk dari `incoming()`.

use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use tracing::{debug, error};

use super::connection::{Connection, ConnectionState, OwnedMessage};
use super::context::Context;
use crate::config::SocketOptions;
use crate::core::TsQueue;
use crate::error::{Error, Result};
use crate::protocol::{Message, MessageKind};

pub struct Client<T: MessageKind> {
    options: SocketOptions,
    context: Option<Context<T>>,
    connection: Option<Arc<Connection<T>>>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
}

impl<T: MessageKind> Default for Client<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> Client<T> {
    pub fn new() -> Self {
        Self::with_options(SocketOptions::default())
    }

    pub fn with_options(options: SocketOptions) -> Self {
        Self {
            options,
            context: None,
            connection: None,
            incoming: Arc::new(TsQueue::new()),
        }
    }

    /// Resolve `host:port` lalu mulai connect (non-blocking).
    ///
    /// `Ok` berarti socket sudah dibuka dan diserahkan ke execution thread;
    /// hasil connect terlihat lewat `is_connected()` / `state()`.
    /// Connection sebelumnya (jika ada) ditutup dulu.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();

        let resolve_err = |source| Error::Resolve {
            host: host.to_string(),
            source,
        };
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(resolve_err)?
            .next()
            .ok_or_else(|| {
                resolve_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no address for host",
                ))
            })?;

        let context = Context::spawn("iris-client", &self.options, None).map_err(|err| {
            error!(error = %err, "client failed to start");
            err
        })?;
        let connection = Arc::new(Connection::new_client(
            context.handle().next_token(),
            addr,
            Arc::clone(&self.incoming),
            context.handle().clone(),
        ));

        if let Err(source) = connection.connect_as_client() {
            error!(addr = %addr, error = %source, "connect failed");
            return Err(Error::Connect { addr, source });
        }

        debug!(addr = %addr, "connecting");
        self.connection = Some(connection);
        self.context = Some(context);
        Ok(())
    }

    /// Tutup connection dan hentikan execution thread. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
        if let Some(mut context) = self.context.take() {
            context.stop();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |connection| connection.is_connected())
    }

    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, |connection| connection.state())
    }

    /// Antrekan pesan ke server. Boleh dipanggil selagi masih Connecting;
    /// pesan ditulis begitu connect selesai.
    pub fn send(&self, message: Message<T>) {
        if let Some(connection) = &self.connection {
            connection.send(message);
        }
    }

    /// Pesan dari server
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.incoming
    }

    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }
}

impl<T: MessageKind> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconnected_client() {
        let mut client: Client<u32> = Client::new();
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.send(Message::new(1));
        client.disconnect();
        assert!(client.incoming().is_empty());
    }

    #[test]
    fn test_resolve_failure() {
        let mut client: Client<u32> = Client::new();
        let result = client.connect("host.invalid", 60000);
        assert!(matches!(result, Err(Error::Resolve { .. })));
        assert!(client.connection().is_none());
    }
}
