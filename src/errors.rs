// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! Cancellation is a distinct variant (`Interrupted`) so callers can tell a
//! user-requested bail-out apart from a real failure without inspecting
//! messages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    /// The owning task (or the whole run) was interrupted.
    #[error("interrupted")]
    Interrupted,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A tool exited with a code outside its success set.
    #[error("{command} failed with {}", exit_code_text(.exit_code))]
    ToolFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    /// True for cancellation, which must never be reported as a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BuildError::Interrupted)
    }
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_message_includes_exit_code() {
        let err = BuildError::ToolFailed {
            command: "make install".to_string(),
            exit_code: Some(2),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "make install failed with exit code 2");
        assert!(!err.is_interrupted());
    }

    #[test]
    fn signal_kill_has_no_exit_code() {
        let err = BuildError::ToolFailed {
            command: "sleep 10".to_string(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("killed by signal"));
        assert!(BuildError::Interrupted.is_interrupted());
    }
}
