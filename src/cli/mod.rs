//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Argument parsing for the daemons
//! - Exit codes for the process supervisor

pub mod commands;
pub mod exit_codes;

pub use commands::{execute, load_config};
pub use exit_codes::{exit_code_description, CliResult, ExitCodes};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lab multiplexer CLI
#[derive(Parser, Debug)]
#[command(
    name = "labmux",
    version,
    about = "State collector and telnet relay for lab exercises",
    long_about = None
)]
pub struct Cli {
    /// Config file
    #[arg(short, long, env = "LABMUX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level or filter directives, overridden by RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Redis URL of the event bus shared with the web application
    #[arg(long, env = "LABMUX_BUS_URL", global = true)]
    pub bus_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Listen overrides for the collector
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ListenArgs {
    /// Listen address
    #[arg(long)]
    pub address: Option<String>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Subcommands
#[allow(missing_docs)]
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the state collector against the configured bus
    Collect {
        #[command(flatten)]
        listen: ListenArgs,
    },

    /// Run the telnet relay against the configured bus
    Relay,

    /// Run collector and relay in one process; without a bus URL they share an
    /// in-process bus
    Run {
        #[command(flatten)]
        listen: ListenArgs,
    },

    /// Load and validate the configuration, then print a summary
    CheckConfig,
}
