//! Error types for PC/SC transport

use mifare_apdu_core::TransportError;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// A monitor thread is already watching this context
    #[error("Monitor already running")]
    AlreadyRunning,

    /// The monitor thread could not be started
    #[error("Monitor error: {0}")]
    Monitor(String),
}

impl From<PcscError> for TransportError {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::NoReadersAvailable | PcscError::ReaderNotFound(_) => Self::NoReader,
            PcscError::NoCard(_) => Self::NoCard,
            PcscError::AlreadyRunning => Self::other("Monitor already running"),
            PcscError::Monitor(message) => Self::other(message),
            PcscError::Pcsc(e) => match e {
                pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => Self::NoCard,
                pcsc::Error::NoReadersAvailable
                | pcsc::Error::UnknownReader
                | pcsc::Error::ReaderUnavailable => Self::NoReader,
                pcsc::Error::InsufficientBuffer => Self::BufferTooSmall,
                pcsc::Error::Timeout => Self::Timeout,
                pcsc::Error::CommError | pcsc::Error::UnpoweredCard | pcsc::Error::UnresponsiveCard => {
                    Self::Transmission
                }
                other => Self::other(format!("PC/SC error: {other}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_device_mapping() {
        assert_eq!(
            TransportError::from(PcscError::NoCard("ACR122U".into())),
            TransportError::NoCard
        );
        assert_eq!(
            TransportError::from(PcscError::Pcsc(pcsc::Error::RemovedCard)),
            TransportError::NoCard
        );
        assert_eq!(
            TransportError::from(PcscError::Pcsc(pcsc::Error::ReaderUnavailable)),
            TransportError::NoReader
        );
        assert_eq!(
            TransportError::from(PcscError::Pcsc(pcsc::Error::CommError)),
            TransportError::Transmission
        );
    }
}
