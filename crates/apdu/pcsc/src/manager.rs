//! Device manager for PC/SC operations

use pcsc::{Context, Scope};

use crate::config::PcscConfig;
use crate::error::PcscError;
use crate::monitor::PcscMonitor;
use crate::reader::PcscReader;
use crate::transport::PcscTransport;

/// Manager for PC/SC device operations
#[allow(missing_debug_implementations)]
pub struct PcscDeviceManager {
    /// PC/SC context
    context: Context,
    /// Applied to every reader opened and every monitor created
    config: PcscConfig,
}

impl PcscDeviceManager {
    /// Create a new PC/SC device manager with the default configuration
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(PcscConfig::default())
    }

    /// Create a new PC/SC device manager
    pub fn with_config(config: PcscConfig) -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context, config })
    }

    /// Configuration in use
    pub const fn config(&self) -> &PcscConfig {
        &self.config
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let readers = match self.context.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Err(PcscError::NoReadersAvailable),
            Err(e) => return Err(e.into()),
        };
        if readers.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut result = Vec::with_capacity(readers.len());

        for reader_name in readers {
            let mut reader_states = vec![pcsc::ReaderState::new(
                reader_name.as_c_str(),
                pcsc::State::UNAWARE,
            )];

            match self.context.get_status_change(None, &mut reader_states) {
                Ok(()) => result.push(PcscReader::from_reader_state(&reader_states[0])),
                Err(_) => {
                    // If we can't get status, assume no card
                    result.push(PcscReader::new(
                        reader_name.to_string_lossy().into_owned(),
                        None,
                    ));
                }
            }
        }

        Ok(result)
    }

    /// Open a transport for a specific reader
    ///
    /// The card connection itself is made on first transmit.
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscTransport, PcscError> {
        let known = self.list_readers()?;
        if !known.iter().any(|r| r.name() == reader_name) {
            return Err(PcscError::ReaderNotFound(reader_name.to_string()));
        }

        Ok(PcscTransport::new(self.context.clone(), reader_name, self.config.clone()))
    }

    /// Create a monitor for PC/SC events sharing this manager's context
    pub fn monitor(&self) -> PcscMonitor {
        PcscMonitor::new(self.context.clone()).with_poll_interval(self.config.poll_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_unknown_reader() {
        // Needs a running PC/SC service; skip quietly on machines without one
        let Ok(manager) = PcscDeviceManager::new() else {
            return;
        };

        match manager.open_reader("No Such Reader 99 00") {
            Err(PcscError::ReaderNotFound(name)) => assert_eq!(name, "No Such Reader 99 00"),
            Err(PcscError::NoReadersAvailable | PcscError::Pcsc(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|t| t.reader_name().to_string())),
        }
    }
}
