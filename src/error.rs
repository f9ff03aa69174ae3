//! Error types for wallet investigations

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, InvestigationError>;

/// Investigation failures
///
/// An investigation that matches no wallet is not an error; every stage
/// propagates empty sets instead.
#[derive(Error, Debug)]
pub enum InvestigationError {
    /// Input ledger does not exist
    #[error("file_not_found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Required column missing or of the wrong type
    #[error("schema_mismatch: {0}")]
    SchemaMismatch(String),

    /// Criteria or environment configuration rejected
    #[error("invalid_config: {0}")]
    InvalidConfig(String),

    /// Polars failed while evaluating a stage
    #[error("eval_error: {0}")]
    EvalError(String),

    /// Any other read or write failure
    #[error("io_error: {0}")]
    Io(#[from] std::io::Error),
}

impl InvestigationError {
    /// Stable machine-readable code, used in logs and JSON error output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => "file_not_found",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::InvalidConfig(_) => "invalid_config",
            Self::EvalError(_) => "eval_error",
            Self::Io(_) => "io_error",
        }
    }

    pub(crate) fn eval(context: &str, err: impl std::fmt::Display) -> Self {
        Self::EvalError(format!("{context}: {err}"))
    }
}

impl From<serde_json::Error> for InvestigationError {
    fn from(err: serde_json::Error) -> Self {
        InvestigationError::EvalError(format!("failed to serialize report: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_display_prefix() {
        let errors = [
            InvestigationError::FileNotFound(PathBuf::from("/nope.parquet")),
            InvestigationError::SchemaMismatch("x".to_string()),
            InvestigationError::InvalidConfig("x".to_string()),
            InvestigationError::EvalError("x".to_string()),
            InvestigationError::Io(std::io::Error::other("x")),
        ];
        for err in errors {
            assert!(
                err.to_string().starts_with(err.code()),
                "'{}' should start with '{}'",
                err,
                err.code()
            );
        }
    }
}
