//! Configuration untuk server dan client
//!
//! Semua field punya default yang masuk akal, override seperlunya.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Port default untuk server
pub const DEFAULT_PORT: u16 = 60000;

/// Batas body per frame. Header yang mengklaim lebih besar dianggap desync.
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// Kapasitas buffer event mio per iterasi poll
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Socket tuning yang diterapkan ke setiap connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// TCP_NODELAY (Nagle off) untuk latency rendah
    pub nodelay: bool,
    /// SO_SNDBUF dalam bytes, `None` = default OS
    pub send_buffer: Option<usize>,
    /// SO_RCVBUF dalam bytes, `None` = default OS
    pub recv_buffer: Option<usize>,
    /// Body terbesar yang diterima dari peer
    pub max_body_size: usize,
    pub events_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            send_buffer: None,
            recv_buffer: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub socket: SocketOptions,
}

impl ServerConfig {
    /// Listen di semua interface IPv4 pada `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }

    /// Listen di loopback saja, berguna untuk test (port 0 = ephemeral)
    pub fn localhost(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            socket: SocketOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.socket.nodelay);
        assert_eq!(config.socket.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }

    #[test]
    fn test_with_port() {
        let config = ServerConfig::with_port(9999);
        assert_eq!(config.bind_addr.port(), 9999);
        assert!(config.bind_addr.ip().is_unspecified());

        let local = ServerConfig::localhost(0);
        assert!(local.bind_addr.ip().is_loopback());
    }
}
