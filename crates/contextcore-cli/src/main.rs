//! contextcore CLI
//!
//! # Usage
//!
//! ```bash
//! # Show the concurrency groups of a pipeline
//! contextcore plan --pipeline etl.yaml
//!
//! # Dry-run it with one failing stage, printing the trace as YAML
//! contextcore simulate --pipeline etl.yaml --fail transform --format yaml
//!
//! # See what a handoff attribute becomes in otel mode
//! contextcore translate --kind handoff --mode otel --set handoff.capability_id=investigate_error
//! ```

use clap::Parser;
use contextcore_cli::{run_cli, ContextCli};

fn main() {
    let cli = ContextCli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let exit_code = run_cli(cli);
    std::process::exit(exit_code.into());
}
