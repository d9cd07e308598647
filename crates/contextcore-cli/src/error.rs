//! Error types for the contextcore CLI

use contextcore_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Errors surfaced by CLI commands
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File access or I/O error
    #[error("File error: {0}")]
    FileError(String),

    /// Input file could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// Rejected by the core
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CliError {
    /// Errors caused by the user's input rather than by the tool.
    pub fn is_user_error(&self) -> bool {
        match self {
            CliError::InvalidInput(_) | CliError::FileError(_) | CliError::ParseError(_) => true,
            CliError::Core(e) => matches!(
                e.kind(),
                ErrorKind::Validation | ErrorKind::CycleDetected | ErrorKind::UnknownStage
            ),
            CliError::SerializationError(_) | CliError::InternalError(_) => false,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::FileError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_user_error() {
        assert!(CliError::ParseError("bad".into()).is_user_error());
        assert!(CliError::Core(CoreError::CycleDetected { members: vec!["a".into()] }).is_user_error());
        assert!(!CliError::SerializationError("x".into()).is_user_error());
        assert!(!CliError::Core(CoreError::LockPoisoned("x".into())).is_user_error());
    }
}
