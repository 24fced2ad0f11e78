//! Connection: identitas dan queue untuk satu byte-stream
//!
//! Objek ini di-share (`Arc`) antara registry server, execution context,
//! dan kode aplikasi. Socket-nya sendiri dipegang execution context;
//! di sini hanya ada state, ID, dan dua queue:
//!
//! - outbound: private, dikuras oleh write pipeline
//! - inbound: private (client) atau shared di seluruh server (server)
//!
//! Lifecycle: Disconnected -> Connecting -> Connected -> Disconnected (final)

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use mio::net::TcpStream;
use mio::Token;
use tracing::{debug, trace, warn};

use super::context::{Command, ContextHandle};
use crate::core::TsQueue;
use crate::protocol::{Message, MessageKind};

/// Siapa pemilik connection ini
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Pesan beserta connection asalnya
///
/// Back-reference-nya `Weak`: pesan yang masih antre tidak menahan
/// connection yang sudah dilepas semua pemiliknya.
#[derive(Debug, Clone)]
pub struct OwnedMessage<T: MessageKind> {
    pub remote: Weak<Connection<T>>,
    pub message: Message<T>,
}

impl<T: MessageKind> OwnedMessage<T> {
    /// Connection asal, jika masih hidup
    pub fn remote(&self) -> Option<Arc<Connection<T>>> {
        self.remote.upgrade()
    }
}

pub struct Connection<T: MessageKind> {
    role: Role,
    token: Token,
    peer: SocketAddr,
    id: AtomicU32,
    state: AtomicU8,
    /// Sekali true tidak pernah kembali; connection tidak bisa dipakai ulang
    terminated: AtomicBool,
    /// True selama write pipeline aktif (atau sudah di-prime)
    writing: AtomicBool,
    outbound: TsQueue<Message<T>>,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    context: ContextHandle<T>,
}

impl<T: MessageKind> Connection<T> {
    fn new(
        role: Role,
        token: Token,
        peer: SocketAddr,
        inbound: Arc<TsQueue<OwnedMessage<T>>>,
        context: ContextHandle<T>,
    ) -> Self {
        Self {
            role,
            token,
            peer,
            id: AtomicU32::new(0),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            terminated: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            outbound: TsQueue::new(),
            inbound,
            context,
        }
    }

    /// Connection hasil accept, inbound-nya queue bersama milik server
    pub(crate) fn new_server(
        token: Token,
        peer: SocketAddr,
        inbound: Arc<TsQueue<OwnedMessage<T>>>,
        context: ContextHandle<T>,
    ) -> Self {
        Self::new(Role::Server, token, peer, inbound, context)
    }

    /// Connection milik client, inbound-nya queue private
    pub(crate) fn new_client(
        token: Token,
        peer: SocketAddr,
        inbound: Arc<TsQueue<OwnedMessage<T>>>,
        context: ContextHandle<T>,
    ) -> Self {
        Self::new(Role::Client, token, peer, inbound, context)
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// ID dari server. Selalu 0 untuk connection milik client.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    /// Alamat peer (remote endpoint)
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True jika socket terbuka dan belum ada error terminal
    pub fn is_connected(&self) -> bool {
        !self.is_terminated() && self.state() == ConnectionState::Connected
    }

    /// Server-side: assign ID dan pindah ke Connected.
    ///
    /// Read pipeline di-arm oleh execution context begitu stream-nya
    /// di-attach, tepat setelah ini.
    pub(crate) fn connect_as_server(&self, id: u32) -> bool {
        if self.role != Role::Server || self.is_terminated() {
            warn!(role = ?self.role, "connect_as_server on invalid connection");
            return false;
        }
        self.id.store(id, Ordering::Release);
        self.state
            .store(ConnectionState::Connected as u8, Ordering::Release);
        true
    }

    /// Client-side: buka socket non-blocking dan serahkan ke execution context.
    ///
    /// Hasil connect datang belakangan; cek `is_connected()` / `state()`.
    pub(crate) fn connect_as_client(self: &Arc<Self>) -> io::Result<()> {
        if self.role != Role::Client {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "connect_as_client on server-owned connection",
            ));
        }
        if self
            .state
            .compare_exchange(
                ConnectionState::Disconnected as u8,
                ConnectionState::Connecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
            || self.is_terminated()
        {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "connection already used",
            ));
        }

        let stream = match TcpStream::connect(self.peer) {
            Ok(stream) => stream,
            Err(err) => {
                self.mark_disconnected();
                return Err(err);
            }
        };
        self.context.post(Command::Attach {
            connection: Arc::clone(self),
            stream,
        });
        Ok(())
    }

    /// Tutup connection. Operasi yang sedang berjalan dibatalkan
    /// dan tidak ada write lagi setelah ini. Idempotent.
    pub fn disconnect(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
        self.outbound.clear();
        debug!(id = self.id(), peer = %self.peer, "disconnect requested");
        self.context.post(Command::Close(self.token));
    }

    /// Antrekan pesan. Jika write pipeline sedang idle, prime lagi.
    ///
    /// Urutan pengiriman per connection = urutan panggilan `send`.
    /// Pesan untuk connection yang sudah tertutup dibuang.
    pub fn send(&self, message: Message<T>) {
        if self.is_terminated() {
            trace!(id = self.id(), "send on closed connection dropped");
            return;
        }
        self.outbound.push_back(message);
        if !self.writing.swap(true, Ordering::SeqCst) {
            self.context.post(Command::Flush(self.token));
        }
    }

    /// Jumlah pesan yang belum ditulis ke socket
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    #[inline]
    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Read pipeline: satu frame lengkap masuk inbound queue
    pub(crate) fn deliver(self: &Arc<Self>, message: Message<T>) {
        self.inbound.push_back(OwnedMessage {
            remote: Arc::downgrade(self),
            message,
        });
    }

    pub(crate) fn next_outbound(&self) -> Option<Message<T>> {
        self.outbound.pop_front()
    }

    /// Write pipeline kehabisan pesan. Returns `true` jika boleh idle;
    /// `false` jika ada `send` yang masuk di antara pop terakhir dan sekarang.
    pub(crate) fn release_writer(&self) -> bool {
        self.writing.store(false, Ordering::SeqCst);
        if self.outbound.is_empty() {
            return true;
        }
        self.writing.store(true, Ordering::SeqCst);
        false
    }

    /// Connect non-blocking berhasil
    pub(crate) fn mark_connected(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Connected as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Teardown dari execution context (error transport atau close)
    pub(crate) fn mark_disconnected(&self) {
        self.terminated.store(true, Ordering::Release);
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
        self.outbound.clear();
        self.writing.store(false, Ordering::SeqCst);
    }
}

impl<T: MessageKind> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("id", &self.id())
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}
