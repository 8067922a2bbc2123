//! Connection and polling options for PC/SC readers

use std::time::Duration;

use pcsc::{Protocols, ShareMode as PcscShareMode};
use serde::{Deserialize, Serialize};

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// Exclusive access to the card
    Exclusive,
    /// Shared with other PC/SC clients
    #[default]
    Shared,
    /// Direct connection to the reader, no card required
    Direct,
}

impl From<ShareMode> for PcscShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Exclusive => Self::Exclusive,
            ShareMode::Shared => Self::Shared,
            ShareMode::Direct => Self::Direct,
        }
    }
}

/// Transmission protocols offered when connecting to a card
///
/// Contactless readers expose MIFARE cards as T=1; `any` lets the reader pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPreference {
    /// T=0 only
    T0,
    /// T=1 only
    T1,
    /// Whatever the reader negotiates
    #[default]
    Any,
}

impl From<ProtocolPreference> for Protocols {
    fn from(preference: ProtocolPreference) -> Self {
        match preference {
            ProtocolPreference::T0 => Self::T0,
            ProtocolPreference::T1 => Self::T1,
            ProtocolPreference::Any => Self::ANY,
        }
    }
}

/// Configuration options for PC/SC readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcscConfig {
    /// Sharing mode for card connections
    pub share_mode: ShareMode,

    /// Preferred protocols for card communication
    pub protocols: ProtocolPreference,

    /// Reconnect once and retry if the card was reset under us
    pub auto_reconnect: bool,

    /// Interval between two polls of the hot-plug monitor, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            protocols: ProtocolPreference::Any,
            auto_reconnect: true,
            poll_interval_ms: 250,
        }
    }
}

impl PcscConfig {
    /// Hot-plug poll interval
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_suit_contactless_readers() {
        let config = PcscConfig::default();
        assert_eq!(config.share_mode, ShareMode::Shared);
        assert_eq!(Protocols::from(config.protocols), Protocols::ANY);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(Protocols::from(ProtocolPreference::T1), Protocols::T1);
        assert!(matches!(PcscShareMode::from(ShareMode::Direct), PcscShareMode::Direct));
    }
}
