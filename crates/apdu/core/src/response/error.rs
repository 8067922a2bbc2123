//! Error types specific to APDU responses

use thiserror::Error;

/// Error for malformed APDU bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Incomplete response (less than 2 bytes)
    #[error("Incomplete response: {0} byte(s), expected at least a status word")]
    Incomplete(usize),

    /// Invalid command length while parsing a command APDU
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(&'static str),
}

impl ResponseError {
    /// Create a parse error with a message
    pub const fn parse(message: &'static str) -> Self {
        Self::Parse(message)
    }
}
