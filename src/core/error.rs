//! Daemon-level errors

use super::bus::BusError;
use std::io;
use thiserror::Error;

/// Errors that stop a daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Listening socket could not be set up
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Listen address is not a socket address
    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    /// Bus subscription failed
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Whether the error happened while setting up the listener
    pub fn is_bind(&self) -> bool {
        matches!(self, DaemonError::Bind { .. } | DaemonError::InvalidAddress(_))
    }
}
