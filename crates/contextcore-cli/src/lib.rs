//! contextcore command-line tools
//!
//! - `plan`: print the concurrency groups of a pipeline definition
//! - `simulate`: dry-run a pipeline as a trace, optionally exporting it
//! - `translate`: show which physical keys a logical attribute set becomes
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Simulated run failed
//! - 2: Pipeline has a dependency cycle
//! - 3: Invalid input or arguments
//! - 4: File not found or inaccessible
//! - 10: Internal error

pub mod commands;
pub mod error;
pub mod output;

pub use commands::{Commands, ContextCli};
pub use error::CliError;
pub use output::OutputFormat;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// A stage closed with error
    RunFailed = 1,
    CycleDetected = 2,
    InvalidInput = 3,
    FileError = 4,
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Run the CLI with the given arguments and return the exit code
pub fn run(cli: ContextCli) -> Result<ExitCode, CliError> {
    match cli.command {
        Commands::Plan { pipeline, format } => commands::execute_plan(pipeline, format),
        Commands::Simulate {
            pipeline,
            guidance,
            fail,
            mode,
            export,
            format,
        } => commands::execute_simulate(pipeline, guidance, fail, mode, export, format),
        Commands::Translate {
            kind,
            mode,
            set,
            format,
        } => commands::execute_translate(kind, mode, set, format),
    }
}

/// Run the CLI, reporting errors on stderr
pub fn run_cli(cli: ContextCli) -> ExitCode {
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            match e {
                CliError::FileError(_) => ExitCode::FileError,
                e if e.is_user_error() => ExitCode::InvalidInput,
                _ => ExitCode::InternalError,
            }
        }
    }
}
