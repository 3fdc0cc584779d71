//! Labmux - state collector and telnet relay

use clap::Parser;
use labmux_core::cli::{self, Cli, CliResult, ExitCodes};
use labmux_core::utils::logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(ExitCodes::INVALID_ARGS)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match cli::load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("labmux: {}", e);
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    // Initialize logging
    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("labmux: {}", e);
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    tracing::info!("Starting labmux v{}", labmux_core::VERSION);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::from(ExitCodes::INTERNAL_ERROR);
        }
    };

    let result = match runtime.block_on(cli::execute(cli.command, config)) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("{:#}", e);
            CliResult::from(e)
        }
    };

    match (&result, result.message()) {
        (CliResult::Success(_), Some(message)) => println!("{}", message),
        (CliResult::Error(..), Some(message)) => eprintln!("labmux: {}", message),
        _ => {}
    }

    result.to_exit_code()
}
