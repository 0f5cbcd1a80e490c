//! Error types for ticket engine operations
//!
//! Expected problems in ticket and log content are never errors: the parser
//! and validator turn them into `Issue`s. Only tooling-class failures
//! (filesystem, malformed plan files, unresolved repair decisions) surface
//! here.

use std::path::PathBuf;
use thiserror::Error;

/// Ticket engine result type alias
pub type Result<T> = std::result::Result<T, TicketsError>;

/// Error category for structured logging and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Filesystem unreadable or unwritable
    Io,
    /// Report/plan/log (de)serialisation problems
    Format,
    /// An enabled repair cannot be applied without a human decision
    RepairPrecondition,
    /// Caller asked for something that does not exist or is malformed
    InvalidRequest,
    /// Engine configuration is unusable
    Config,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "IO_FAILURE",
            Self::Format => "FORMAT_FAILURE",
            Self::RepairPrecondition => "REPAIR_PRECONDITION_FAILURE",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Config => "CONFIG_ERROR",
        }
    }
}

/// Ticket engine error taxonomy
#[derive(Debug, Error)]
pub enum TicketsError {
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize JSON: {source}")]
    JsonSerialize { source: serde_json::Error },

    #[error("Failed to serialize YAML: {source}")]
    YamlSerialize { source: serde_yaml::Error },

    #[error("Repair plan is invalid: {0}")]
    PlanInvalid(String),

    #[error("Repair {repair_id} cannot be applied: parameter '{param}' {reason}")]
    RepairPrecondition {
        repair_id: String,
        param: String,
        reason: String,
    },

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Invalid run id '{0}': only ASCII letters, digits, '_' and '-' are allowed")]
    InvalidRunId(String),

    #[error("run_started conflict for run {run_id} in {path}: expected {expected}, found {found}")]
    RunStartedConflict {
        run_id: String,
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Refusing to append invalid log entry: {0}")]
    InvalidLogEntry(String),

    #[error("Invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TicketsError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FileWrite { .. }
            | Self::FileRead { .. }
            | Self::DirectoryRead { .. }
            | Self::DirectoryCreate { .. } => ErrorCategory::Io,
            Self::JsonSerialize { .. } | Self::YamlSerialize { .. } | Self::PlanInvalid(_) => {
                ErrorCategory::Format
            }
            Self::RepairPrecondition { .. } => ErrorCategory::RepairPrecondition,
            Self::TicketNotFound(_)
            | Self::InvalidRunId(_)
            | Self::RunStartedConflict { .. }
            | Self::InvalidLogEntry(_)
            | Self::InvalidTicket(_) => ErrorCategory::InvalidRequest,
            Self::Config(_) => ErrorCategory::Config,
        }
    }

    /// True when the underlying filesystem reported the path as missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileRead { source, .. } | Self::DirectoryRead { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            Self::TicketNotFound(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TicketsError {
    fn from(source: serde_json::Error) -> Self {
        TicketsError::JsonSerialize { source }
    }
}

impl From<serde_yaml::Error> for TicketsError {
    fn from(source: serde_yaml::Error) -> Self {
        TicketsError::YamlSerialize { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_io_category() {
        let err = TicketsError::FileRead {
            path: "/tmp/x".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/tmp/x"));
    }

    #[test]
    fn precondition_message_names_param() {
        let err = TicketsError::RepairPrecondition {
            repair_id: "R0003".to_string(),
            param: "update_references".to_string(),
            reason: "is unresolved (null)".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::RepairPrecondition);
        assert_eq!(
            err.to_string(),
            "Repair R0003 cannot be applied: parameter 'update_references' is unresolved (null)"
        );
    }

    #[test]
    fn permission_denied_is_not_not_found() {
        let err = TicketsError::FileWrite {
            path: "/tmp/x".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.category().as_str(), "IO_FAILURE");
    }
}
