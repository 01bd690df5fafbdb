/*!
Common error types for the V5 vision bridge components.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// I/O errors (offset files, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Malformed wire frame (bad magic, length, terminator or checksum)
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// Buffer ended before a complete value could be decoded
    #[error("Truncated data: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Offset unit string not one of the accepted spellings
    #[error("Invalid argument: unit '{0}' not accepted")]
    InvalidUnit(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SharedError {
    /// Create a new invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check that `available` bytes cover `needed`
    pub fn ensure_len(needed: usize, available: usize) -> Result<()> {
        if available < needed {
            Err(Self::Truncated { needed, available })
        } else {
            Ok(())
        }
    }
}
