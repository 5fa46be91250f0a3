//! monoci CLI: monorepo CI pipeline compiler.

use clap::Parser;
use monoci::cli::Cli;
use tracing_subscriber::{fmt, EnvFilter};

/// Exit code for configuration errors.
const EXIT_CONFIG: i32 = 3;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_filter());

    if let Err(e) = monoci::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(if e.is_config() { EXIT_CONFIG } else { 1 });
    }
}

/// Log to stderr. `RUST_LOG` overrides the verbosity flags.
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
