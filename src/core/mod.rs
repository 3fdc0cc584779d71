//! Core of the lab multiplexer
//!
//! This module provides:
//! - Peer wire protocol (section framing, directives)
//! - State collector daemon (inbound node connections)
//! - Telnet relay daemon (outbound console sessions)
//! - Event bus bridge and the in-process bus
//! - Node directory and state store interfaces with in-process implementations
//! - Read multiplexing and outbound queues shared by both daemons

pub mod bus;
pub mod collector;
pub mod directory;
pub mod error;
pub mod mux;
pub mod outbox;
pub mod protocol;
pub mod relay;
pub mod services;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
