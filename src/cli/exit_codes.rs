//! CLI Exit Codes
//!
//! Exit codes reported to the process supervisor.

use crate::config::ConfigError;
use crate::core::error::DaemonError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Listening socket could not be opened
    pub const BIND_FAILED: u8 = 3;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for the user
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            _ => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<anyhow::Error> for CliResult {
    fn from(err: anyhow::Error) -> Self {
        let code = if err.downcast_ref::<ConfigError>().is_some() {
            ExitCodes::CONFIG_ERROR
        } else if err
            .downcast_ref::<DaemonError>()
            .is_some_and(DaemonError::is_bind)
        {
            ExitCodes::BIND_FAILED
        } else {
            ExitCodes::INTERNAL_ERROR
        };

        Self::Error(code, format!("{:#}", err))
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Cannot listen on the configured address",
        8 => "Configuration error",
        127 => "Internal error",
        _ => "Unknown error",
    }
}
