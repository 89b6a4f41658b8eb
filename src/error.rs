//! Application-wide error types.
//!
//! Library modules return [`Result`] with the [`Error`] enum below, while the
//! CLI layer uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error::InvalidInput`]: caller contract violations (empty album, non-positive peak)
//! - [`Error::Measurement`]: the external analyzer failed for one file
//! - [`Error::MalformedContainer`]: structural Ogg/Opus damage found while patching
//! - [`Error::Metadata`]: tag read/write failure reported by lofty
//!
//! A stream that is simply not Ogg/Opus is not an error: the Opus patcher
//! reports it as `Ok(None)`.

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller passed values outside the accepted domain
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External loudness analysis failed for a file
    #[error("Measurement failed for {path}: {message}")]
    Measurement { path: PathBuf, message: String },

    /// Ogg/Opus framing could not be parsed
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Metadata reading/writing error
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// No tag family is known for this file
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a measurement error.
    pub fn measurement(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Measurement {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a malformed container error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedContainer(message.into())
    }

    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error came from the loudness analyzer.
    pub fn is_measurement(&self) -> bool {
        match self {
            Self::Measurement { .. } => true,
            Self::WithContext { source, .. } => source.is_measurement(),
            _ => false,
        }
    }

    /// Whether this error reports a damaged Ogg/Opus container.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::MalformedContainer(_) => true,
            Self::WithContext { source, .. } => source.is_malformed(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_error_display() {
        let err = Error::measurement("/music/a.flac", "ffmpeg exited with status 1");
        let msg = err.to_string();
        assert!(msg.contains("/music/a.flac"));
        assert!(msg.contains("status 1"));
        assert!(err.is_measurement());
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::malformed("bad capture pattern").context("while patching f.opus");
        let msg = err.to_string();
        assert!(msg.contains("while patching f.opus"));
        assert!(!err.is_measurement());
        assert!(err.is_malformed());
    }

    #[test]
    fn test_context_keeps_measurement_kind() {
        let err = Error::measurement("a.mp3", "no summary").context("album scan");
        assert!(err.is_measurement());
    }

    #[test]
    fn test_result_ext_io() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let with_ctx = result.with_context("opening f.opus");
        assert!(with_ctx.unwrap_err().to_string().contains("opening f.opus"));
    }
}
