//! Pipeline error model.
//!
//! Every failure the runner can report is a `PipetError`. Some kinds abort the
//! whole run the moment they are detected (configuration, serialization,
//! required fields, inline callbacks); the rest are captured per step and the
//! sequence carries on.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipetError {
    #[error("{0}")]
    Config(String),

    #[error("Env \"{key}\" is `null`")]
    Serialize { key: String },

    #[error("Required key \"{key}\" is not set after running script \"{label}\"")]
    MissingEnv { key: String, label: String },

    #[error("Required arg \"{key}\" is not set after running script \"{label}\"")]
    MissingArg { key: String, label: String },

    #[error("failed to spawn \"{label}\": {message}")]
    Spawn { label: String, message: String },

    #[error("script \"{label}\" exited with {status}")]
    Exit { label: String, status: String },

    #[error("reading output of \"{label}\" failed: {message}")]
    Io { label: String, message: String },

    #[error("inline step \"{label}\" failed: {message}")]
    Inline { label: String, message: String },
}

impl PipetError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn inline(label: &str, err: &anyhow::Error) -> Self {
        Self::Inline {
            label: label.to_string(),
            message: format!("{err:#}"),
        }
    }

    /// Whether this error stops the run instead of being recorded for a step.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Spawn { .. } | Self::Exit { .. } | Self::Io { .. }
        )
    }
}

pub type Result<T, E = PipetError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_names_key_and_script() {
        let err = PipetError::MissingEnv {
            key: "TOKEN".to_string(),
            label: "login.js".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Required key \"TOKEN\" is not set after running script \"login.js\""
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn process_failures_are_recordable() {
        let spawn = PipetError::Spawn {
            label: "missing-bin".to_string(),
            message: "No such file or directory".to_string(),
        };
        let exit = PipetError::Exit {
            label: "a.js".to_string(),
            status: "exit code 2".to_string(),
        };
        assert!(!spawn.is_fatal());
        assert!(!exit.is_fatal());
        assert!(PipetError::config("Need at least 1 script to run").is_fatal());
    }

    #[test]
    fn inline_error_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("write marker");
        let wrapped = PipetError::inline("tap", &err);
        assert_eq!(
            wrapped.to_string(),
            "inline step \"tap\" failed: write marker: disk full"
        );
    }
}
