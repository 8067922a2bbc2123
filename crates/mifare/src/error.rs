//! Error type shared by the engine and its callers

use std::fmt;

use mifare_apdu_core::{ResponseError, StatusWord, TransportError};

/// Result type for MIFARE Classic operations
pub type Result<T> = std::result::Result<T, Error>;

/// Block level operation, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// READ BINARY
    Read,
    /// UPDATE BINARY
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("Read"),
            Self::Write => f.write_str("Write"),
        }
    }
}

/// Error type for MIFARE Classic operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No reader attached
    #[error("No NFC reader detected")]
    NoReader,

    /// Reader attached but no card in the field
    #[error("No card present")]
    NoCard,

    /// Malformed caller input, rejected before any exchange
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The reader refused the key material
    #[error("Load key failed: {status}")]
    KeyLoadFailed {
        /// Status word returned by LOAD KEY
        status: StatusWord,
    },

    /// Every authentication candidate was rejected
    #[error("Authentication failed for sector {sector}: {status}")]
    AuthenticationExhausted {
        /// Sector that could not be authenticated
        sector: u8,
        /// Status word of the last attempt
        status: StatusWord,
    },

    /// Read or write rejected by the card
    #[error("{operation} failed for block {block} with status: {status}")]
    BlockOperationFailed {
        /// Block address
        block: u8,
        /// Operation that failed
        operation: Operation,
        /// Status word returned by the card
        status: StatusWord,
    },

    /// GET DATA for the UID was rejected
    #[error("UID read failed with status: {status}")]
    UidReadFailed {
        /// Status word returned by the reader
        status: StatusWord,
    },

    /// Transport-related errors
    #[error(transparent)]
    Transport(TransportError),

    /// Response-related errors
    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl Error {
    /// Shorthand for [`Error::InvalidInput`]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// The raw status word carried by this error, if any
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::KeyLoadFailed { status }
            | Self::AuthenticationExhausted { status, .. }
            | Self::BlockOperationFailed { status, .. }
            | Self::UidReadFailed { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error means there is no reader or no card to talk to
    pub const fn is_no_device(&self) -> bool {
        matches!(self, Self::NoReader | Self::NoCard)
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NoReader => Self::NoReader,
            TransportError::NoCard => Self::NoCard,
            other => Self::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_is_preserved() {
        let err = Error::AuthenticationExhausted {
            sector: 2,
            status: StatusWord::new(0x63, 0x00),
        };
        assert_eq!(err.status_word(), Some(StatusWord::new(0x63, 0x00)));
        assert_eq!(err.to_string(), "Authentication failed for sector 2: 6300");
        assert_eq!(Error::NoCard.status_word(), None);
    }

    #[test]
    fn test_transport_no_device_is_lifted() {
        assert_eq!(Error::from(TransportError::NoCard), Error::NoCard);
        assert_eq!(Error::from(TransportError::NoReader), Error::NoReader);
        assert!(matches!(
            Error::from(TransportError::Timeout),
            Error::Transport(TransportError::Timeout)
        ));
    }
}
