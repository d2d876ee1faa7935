//! Exit codes for the console.
//!
//! Stable codes so field scripts can tell a bad experiment name from a
//! missing capture worker.

use crate::config::ConfigError;
use crate::experiment::ExperimentError;
use crate::session::SessionError;

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments
    InvalidArguments = 2,
    /// Configuration file unreadable or out of range
    ConfigError = 3,
    /// An experiment with that name already exists
    ExperimentExists = 4,
    /// The experiment does not exist or is missing a directory
    ExperimentInvalid = 5,
    /// The capture worker could not be started
    WorkerFailedToStart = 6,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::ConfigError => write!(f, "configuration error"),
            ExitCode::ExperimentExists => write!(f, "experiment exists"),
            ExitCode::ExperimentInvalid => write!(f, "invalid experiment"),
            ExitCode::WorkerFailedToStart => write!(f, "capture worker failed to start"),
        }
    }
}

impl From<&ExperimentError> for ExitCode {
    fn from(e: &ExperimentError) -> Self {
        match e {
            ExperimentError::AlreadyExists(_) => ExitCode::ExperimentExists,
            ExperimentError::InvalidName(_)
            | ExperimentError::NotFound(_)
            | ExperimentError::MissingDirectory { .. }
            | ExperimentError::Metadata(_) => ExitCode::ExperimentInvalid,
            ExperimentError::Io(_) => ExitCode::GeneralError,
        }
    }
}

impl From<&ConfigError> for ExitCode {
    fn from(_: &ConfigError) -> Self {
        ExitCode::ConfigError
    }
}

impl From<&SessionError> for ExitCode {
    fn from(_: &SessionError) -> Self {
        ExitCode::WorkerFailedToStart
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::InvalidArguments.as_i32(), 2);
        assert_eq!(ExitCode::WorkerFailedToStart.as_i32(), 6);
    }

    #[test]
    fn test_experiment_errors_map() {
        let exists = ExperimentError::AlreadyExists(PathBuf::from("/e/field"));
        assert_eq!(ExitCode::from(&exists), ExitCode::ExperimentExists);

        let missing = ExperimentError::NotFound(PathBuf::from("/e/field"));
        assert_eq!(ExitCode::from(&missing), ExitCode::ExperimentInvalid);
    }
}
