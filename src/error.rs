//! Error types untuk setup failures
//!
//! Transport errors tidak pernah keluar sebagai `Error`: connection langsung
//! di-teardown dan aplikasi melihatnya sebagai disconnection.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Setup failure dari `start` / `connect`
#[derive(Debug, Error)]
pub enum Error {
    /// Listener tidak bisa bind (port dipakai, permission, dll)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Poll / Waker gagal dibuat atau listener gagal diregister
    #[error("failed to set up event loop: {0}")]
    Poll(#[source] io::Error),

    /// Host tidak bisa di-resolve ke alamat
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Socket client gagal dibuka
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Thread execution context gagal di-spawn
    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("server is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
