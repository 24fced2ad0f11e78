//! Server: accept loop, registry, dan dispatch
//!
//! Socket I/O berjalan di execution thread. Aplikasi memanggil `drain()`
//! di thread-nya sendiri untuk memproses pesan masuk secara sinkron.
//!
//! Perilaku aplikasi disuntikkan lewat `ServerHandler`:
//! - `on_client_connect`: veto connection baru (default: tolak)
//! - `on_client_disconnect`: connection ketahuan sudah putus
//! - `on_message`: satu pesan masuk, dipanggil dari `drain()`

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use mio::net::TcpListener as MioTcpListener;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use super::connection::{Connection, OwnedMessage};
use super::context::{Acceptor, Context};
use crate::config::ServerConfig;
use crate::core::TsQueue;
use crate::error::{Error, Result};
use crate::protocol::{Message, MessageKind};

/// ID pertama yang diberikan ke client
pub const FIRST_CLIENT_ID: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Hook aplikasi untuk server
///
/// Semua method punya default (deny / no-op). `on_client_connect` dipanggil
/// dari execution thread, sisanya dari thread yang memanggil `send_to`,
/// `broadcast`, atau `drain`, karena itu handler harus `Sync`.
pub trait ServerHandler<T: MessageKind>: Send + Sync + 'static {
    /// Return `false` untuk menolak connection. Connection yang ditolak
    /// tidak mendapat ID.
    fn on_client_connect(&self, client: &Arc<Connection<T>>) -> bool {
        let _ = client;
        false
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<T>>) {
        let _ = client;
    }

    /// Satu pesan masuk. `client` bernilai `None` jika pengirimnya sudah
    /// dilepas (putus dan dibuang dari registry) sebelum `drain()`; pesannya
    /// tetap di-dispatch.
    fn on_message(
        &self,
        server: &Server<T, Self>,
        client: Option<&Arc<Connection<T>>>,
        message: Message<T>,
    ) where
        Self: Sized,
    {
        let _ = (server, client, message);
    }
}

/// Counter server, semua Relaxed
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    denied: AtomicU64,
    dispatched: AtomicU64,
    pruned: AtomicU64,
}

impl ServerStats {
    /// Connection yang lolos `on_client_connect`
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    /// Pesan yang sudah diserahkan ke `on_message`
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Connection putus yang dibuang dari registry
    pub fn pruned(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }
}

/// State yang dipakai bersama execution thread dan application thread
struct Shared<T: MessageKind, H> {
    handler: H,
    /// Registry, urut sesuai waktu accept
    connections: Mutex<Vec<Arc<Connection<T>>>>,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    next_id: AtomicU32,
    stats: ServerStats,
}

impl<T: MessageKind, H: ServerHandler<T>> Shared<T, H> {
    /// Dipanggil execution thread untuk setiap stream baru
    fn admit(&self, client: &Arc<Connection<T>>) -> bool {
        if !self.handler.on_client_connect(client) {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
            info!(peer = %client.peer_addr(), "connection denied");
            return false;
        }

        // ID dan posisi registry di-assign di bawah lock yang sama
        let mut connections = self.connections.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !client.connect_as_server(id) {
            return false;
        }
        connections.push(Arc::clone(client));
        drop(connections);

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        info!(id, peer = %client.peer_addr(), "connection approved");
        true
    }

    /// Buang `client` dari registry; hook hanya untuk yang benar-benar terbuang
    fn prune(&self, client: &Arc<Connection<T>>) {
        let removed = {
            let mut connections = self.connections.lock();
            let before = connections.len();
            connections.retain(|c| !Arc::ptr_eq(c, client));
            before != connections.len()
        };
        if removed {
            self.stats.pruned.fetch_add(1, Ordering::Relaxed);
            debug!(id = client.id(), "client removed");
            self.handler.on_client_disconnect(client);
        }
    }
}

/// Message server generic atas tipe pesan `T` dan hook `H`
pub struct Server<T: MessageKind, H: ServerHandler<T>> {
    config: ServerConfig,
    shared: Arc<Shared<T, H>>,
    context: Option<Context<T>>,
    state: ServerState,
    local_addr: Option<SocketAddr>,
}

impl<T: MessageKind, H: ServerHandler<T>> Server<T, H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                handler,
                connections: Mutex::new(Vec::new()),
                inbound: Arc::new(TsQueue::new()),
                next_id: AtomicU32::new(FIRST_CLIENT_ID),
                stats: ServerStats::default(),
            }),
            context: None,
            state: ServerState::Stopped,
            local_addr: None,
        }
    }

    /// Server di semua interface pada `port`
    pub fn with_port(port: u16, handler: H) -> Self {
        Self::new(ServerConfig::with_port(port), handler)
    }

    /// Bind, arm accept, lalu jalankan execution thread.
    ///
    /// Gagal setup (port terpakai, dll) dilaporkan sebagai error tanpa
    /// meninggalkan thread.
    pub fn start(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.state = ServerState::Starting;
        match self.launch() {
            Ok((context, addr)) => {
                self.context = Some(context);
                self.local_addr = Some(addr);
                self.state = ServerState::Running;
                info!(addr = %addr, "server started");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "server failed to start");
                self.state = ServerState::Stopped;
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<(Context<T>, SocketAddr)> {
        let addr = self.config.bind_addr;
        let bind_err = |source| Error::Bind { addr, source };

        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let shared = Arc::clone(&self.shared);
        let acceptor = Acceptor {
            listener: MioTcpListener::from_std(listener),
            inbound: Arc::clone(&self.shared.inbound),
            on_accept: Box::new(move |client: &Arc<Connection<T>>| shared.admit(client)),
        };

        let context = Context::spawn("iris-server", &self.config.socket, Some(acceptor))?;
        Ok((context, local_addr))
    }

    /// Hentikan execution context dan join thread-nya. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut context) = self.context.take() {
            self.state = ServerState::Stopping;
            context.stop();
            info!("server stopped");
        }
        self.state = ServerState::Stopped;
    }

    /// Kirim ke satu client. Client yang sudah putus dibuang dari registry
    /// dan `on_client_disconnect` dipanggil.
    pub fn send_to(&self, client: &Arc<Connection<T>>, message: Message<T>) {
        if client.is_connected() {
            client.send(message);
        } else {
            self.shared.prune(client);
        }
    }

    /// Kirim ke semua client yang terhubung kecuali `except`.
    ///
    /// Client yang ketahuan putus selama sweep dikeluarkan dari registry
    /// dalam pass yang sama, lalu hook disconnect dipanggil sekali per client.
    pub fn broadcast(&self, message: &Message<T>, except: Option<&Arc<Connection<T>>>) {
        let mut dead = Vec::new();
        {
            let mut connections = self.shared.connections.lock();
            connections.retain(|client| {
                if !client.is_connected() {
                    dead.push(Arc::clone(client));
                    return false;
                }
                if except.map_or(true, |skip| !Arc::ptr_eq(skip, client)) {
                    client.send(message.clone());
                }
                true
            });
        }

        for client in &dead {
            self.shared.stats.pruned.fetch_add(1, Ordering::Relaxed);
            debug!(id = client.id(), "client removed during broadcast");
            self.shared.handler.on_client_disconnect(client);
        }
    }

    /// Proses maksimal `max_messages` pesan dari inbound queue di thread
    /// pemanggil. Returns jumlah pesan yang di-dispatch ke `on_message`.
    pub fn drain(&self, max_messages: usize) -> usize {
        let mut dispatched = 0;
        while dispatched < max_messages {
            let Some(owned) = self.shared.inbound.pop_front() else {
                break;
            };
            let client = owned.remote();
            if client.is_none() {
                trace!(message = %owned.message, "sender already released");
            }
            self.shared
                .handler
                .on_message(self, client.as_ref(), owned.message);
            dispatched += 1;
        }

        self.shared
            .stats
            .dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        dispatched
    }

    /// Seperti `drain()`, tapi tidur dulu sampai ada pesan
    pub fn drain_wait(&self, max_messages: usize) -> usize {
        self.shared.inbound.wait();
        self.drain(max_messages)
    }

    /// Inbound queue bersama (untuk wait dengan timeout, dll)
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.shared.inbound
    }

    /// Snapshot registry, urut sesuai waktu accept
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.shared.connections.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    pub fn stats(&self) -> &ServerStats {
        &self.shared.stats
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Alamat listener yang sebenarnya (berguna saat bind ke port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl<T: MessageKind, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;
    impl ServerHandler<u32> for DenyAll {}

    #[test]
    fn test_new_server_is_stopped() {
        let server = Server::new(ServerConfig::localhost(0), DenyAll);
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.connection_count(), 0);
        assert!(server.local_addr().is_none());
        assert_eq!(server.drain(usize::MAX), 0);
    }

    #[test]
    fn test_start_stop_without_clients() {
        let mut server = Server::new(ServerConfig::localhost(0), DenyAll);
        server.start().unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(matches!(server.start(), Err(Error::AlreadyRunning)));

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_start_fails_on_taken_port() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut server = Server::new(ServerConfig::localhost(port), DenyAll);
        assert!(matches!(server.start(), Err(Error::Bind { .. })));
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
