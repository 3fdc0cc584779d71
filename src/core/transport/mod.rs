//! Outbound transports
//!
//! The relay dials node consoles over TCP and speaks Telnet (RFC 854) on top.

pub mod telnet;

pub use telnet::TelnetSession;

use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Peer actively refused the connection
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// Connection timeout
    #[error("Connection to {addr} timed out after {millis} ms")]
    Timeout {
        /// Target address
        addr: String,
        /// Timeout that elapsed
        millis: u64,
    },

    /// Connection failed
    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        /// Target address
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TransportError {
    /// Whether the target is known not to accept connections
    pub fn is_refused(&self) -> bool {
        matches!(self, TransportError::ConnectionRefused(_))
    }
}

/// Format a host/port pair, bracketing IPv6 literals
pub fn socket_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Dial a TCP endpoint with a connect timeout
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let addr = socket_address(host, port);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| TransportError::Timeout {
            addr: addr.clone(),
            millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
        .map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(addr.clone()),
            _ => TransportError::ConnectionFailed {
                addr: addr.clone(),
                source: e,
            },
        })?;

    // Set TCP_NODELAY for lower latency
    stream.set_nodelay(true)?;

    Ok(stream)
}
