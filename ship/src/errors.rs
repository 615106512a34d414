//! Error types for ship

use std::time::Duration;

use thiserror::Error;

/// Main error type for ship
#[derive(Error, Debug)]
pub enum ShipError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    /// Malformed identifier or argument, rejected before any I/O
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The target is not in a state the operation can start from
    #[error("Precondition failed: {0}")]
    PreconditionError(String),

    /// Connection or session to the target machine could not be established
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A dispatched command exited unsuccessfully
    #[error("Command `{command}` failed with {}{}", describe_code(.code), describe_stderr(.stderr))]
    RemoteCommandError {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The installer mutex was not acquired within its timeout
    #[error("Timed out after {} waiting for lock {path}", describe_timeout(.timeout))]
    LockTimeoutError { path: String, timeout: Duration },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Required tool not found: {0}")]
    ToolMissingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ShipError {
    fn from(err: anyhow::Error) -> Self {
        ShipError::Internal(err.to_string())
    }
}

impl From<walkdir::Error> for ShipError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.display().to_string());
        match err.into_io_error() {
            Some(io) => ShipError::IoError(io),
            None => ShipError::IoError(std::io::Error::other(format!(
                "filesystem loop detected at {}",
                path.unwrap_or_default()
            ))),
        }
    }
}

impl From<tokio::task::JoinError> for ShipError {
    fn from(err: tokio::task::JoinError) -> Self {
        ShipError::Internal(format!("background task failed: {}", err))
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "termination by signal".to_string(),
    }
}

fn describe_timeout(timeout: &Duration) -> String {
    format!("{}s", timeout.as_secs())
}

fn describe_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_error_carries_command() {
        let err = ShipError::RemoteCommandError {
            command: "ufw --force delete 3".to_string(),
            code: Some(1),
            stderr: "ERROR: Could not delete non-existent rule\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `ufw --force delete 3` failed with exit status 1: ERROR: Could not delete non-existent rule"
        );
    }

    #[test]
    fn test_lock_timeout_message() {
        let err = ShipError::LockTimeoutError {
            path: "/tmp/ship-agent-install-deploy.lock".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 5s waiting for lock /tmp/ship-agent-install-deploy.lock"
        );
    }
}
