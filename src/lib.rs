//! # Labmux Core Library
//!
//! The two long-running daemons behind the lab exercise platform:
//! - **State collector**: exercise nodes connect over TCP and report their
//!   state in a sectioned text protocol; reports are stored and republished
//!   on the event bus, and registry queries from the bus are forwarded to the
//!   nodes.
//! - **Telnet relay**: terminal input from the bus is written to node consoles
//!   over Telnet, console output is published back as base64.
//!
//! Both run as a single event loop over all their connections. The node
//! directory, state store and event bus are traits; in-process
//! implementations are included, plus a Redis bus for running the daemons as
//! separate processes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use labmux_core::{Collector, CollectorConfig, LocalBus, MemoryStateStore, Services, StaticDirectory};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let services = Services::new(
//!         Arc::new(StaticDirectory::new(&[])),
//!         Arc::new(MemoryStateStore::new()),
//!         Arc::new(LocalBus::default()),
//!     );
//!
//!     Collector::new(CollectorConfig::default(), services).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{ConfigError, LabConfig};
pub use crate::core::bus::{BusMessage, EventBus, LocalBus, RedisBus};
pub use crate::core::collector::{Collector, CollectorConfig};
pub use crate::core::directory::{NodeDirectory, NodeKind, NodeRecord, StaticDirectory};
pub use crate::core::error::DaemonError;
pub use crate::core::relay::{Relay, RelayConfig};
pub use crate::core::services::Services;
pub use crate::core::store::{MemoryStateStore, StateStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
