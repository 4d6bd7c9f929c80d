//! CLI error types with exit code handling

use convoy_core::CoreError;
use convoy_kube::DeployError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Manifests, options or cluster configs are invalid
    #[error("Validation failed: {message}")]
    #[diagnostic(code(convoy::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// One or more clusters failed
    #[error("Deploy failed: {message}")]
    #[diagnostic(
        code(convoy::cli::deploy),
        help("Every other cluster ran to completion, check the log above for each failure")
    )]
    Deploy { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(convoy::cli::io))]
    Io { message: String },

    #[error("{message}")]
    #[diagnostic(code(convoy::cli::usage))]
    Usage { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Deploy { .. } => exit_codes::DEPLOY_FAILED,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => e.into(),
            other => CliError::validation(other.to_string()),
        }
    }
}

impl From<DeployError> for CliError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Validation(e) => e.into(),
            DeployError::InvalidConfig(message) => CliError::validation(message),
            DeployError::Io(e) => e.into(),
            other => CliError::Deploy {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let invalid: CliError = CoreError::InvalidStrategy("blue-green".to_string()).into();
        assert_eq!(invalid.exit_code(), exit_codes::VALIDATION_ERROR);

        let missing: CliError =
            DeployError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).into();
        assert_eq!(missing.exit_code(), exit_codes::IO_ERROR);

        let failed: CliError = DeployError::Aggregate(vec![DeployError::timeout(
            "Deployment:web",
            std::time::Duration::from_secs(600),
        )])
        .into();
        assert_eq!(failed.exit_code(), exit_codes::DEPLOY_FAILED);
        assert!(failed.to_string().contains("Timeout waiting for Deployment:web"));
    }
}
