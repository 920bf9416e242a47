//! # Protolens CLI Entry Point
//!
//! The main executable for the Protolens tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Installs the `tracing` subscriber and parses command-line arguments using [`cli::Cli`].
//! 2. **Session**: Builds a `ReflectionSession` from the global options.
//! 3. **Execution**: Delegates the command to [`app::run`].
//! 4. **Presentation**: Formats and prints the resulting data or error to standard output/error.
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `warn`).
mod app;
mod cli;
mod formatter;

use clap::Parser;
use cli::Cli;
use formatter::FormattedString;
use protolens_core::session::TcpConnector;
use protolens_core::{ReflectionSession, SessionConfig};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let config = SessionConfig::default()
        .with_reflection_timeout(args.reflection_timeout())
        .with_max_closure_rounds(args.max_closure_rounds)
        .with_max_message_bytes(args.max_message_bytes);
    let session = ReflectionSession::with_connector(TcpConnector, config);

    match app::run(&session, &args.url, args.command).await {
        Ok(output) => println!("{}", FormattedString::from(output)),
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}
