//! Error Handling Module
//!
//! Defines the error type shared by every stage of a training run.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for SSL training operations
#[derive(Error, Debug)]
pub enum SslError {
    /// Invalid hyperparameter or unknown mode string
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reading or splitting a dataset
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Tensor shapes that do not line up
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Error during a training or validation epoch
    #[error("Training error: {0}")]
    Training(String),

    /// Error saving or loading a checkpoint
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for SslError {
    fn from(err: serde_json::Error) -> Self {
        SslError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SslError {
    fn from(err: toml::de::Error) -> Self {
        SslError::Serialization(err.to_string())
    }
}

/// Convenience Result type for SSL training operations
pub type Result<T> = std::result::Result<T, SslError>;

/// Extension trait for turning foreign errors into a [`SslError`] with context
pub trait ResultExt<T> {
    /// Wrap the error as a dataset error prefixed by `msg`
    fn dataset_context(self, msg: &str) -> Result<T>;

    /// Wrap the error as a checkpoint error, building the message lazily
    fn checkpoint_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn dataset_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| SslError::Dataset(format!("{}: {}", msg, e)))
    }

    fn checkpoint_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SslError::Checkpoint(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn dataset_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SslError::Dataset(msg.to_string()))
    }

    fn checkpoint_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| SslError::Checkpoint(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SslError::Config("unknown criterion \"l1\"".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: unknown criterion \"l1\""
        );
    }

    #[test]
    fn test_dataset_context() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let err = result.dataset_context("Failed to read data_batch_1.bin").unwrap_err();
        assert!(matches!(err, SslError::Dataset(_)));
        assert!(err.to_string().contains("data_batch_1.bin"));
    }

    #[test]
    fn test_option_checkpoint_context() {
        let missing: Option<u8> = None;
        let err = missing
            .checkpoint_context(|| "no best checkpoint".to_string())
            .unwrap_err();
        assert!(matches!(err, SslError::Checkpoint(_)));
    }

    #[test]
    fn test_serde_json_conversion() {
        let err: SslError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, SslError::Serialization(_)));
    }
}
