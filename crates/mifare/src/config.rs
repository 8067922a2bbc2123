//! Engine tunables: key slot, default keys and the diagnostic scan

use serde::{Deserialize, Serialize};

use crate::types::KeyMaterial;

/// Well-known keys tried after the caller's key is rejected
pub const DEFAULT_KEYS: [KeyMaterial; 5] = [
    KeyMaterial::FACTORY_DEFAULT,
    KeyMaterial::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]),
    KeyMaterial::new([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]),
    KeyMaterial::new([0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7]),
    KeyMaterial::new([0x00; 6]),
];

/// Tunables of the access engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reader key slot used for every LOAD KEY
    pub key_slot: u8,
    /// Whether to try [`EngineConfig::default_keys`] after the caller's key fails
    pub default_key_fallback: bool,
    /// Keys for the default-key fallback, each one candidate
    pub default_keys: Vec<KeyMaterial>,
    /// Key used by the diagnostic scan
    pub scan_key: KeyMaterial,
    /// Number of sectors the diagnostic scan walks, starting at 0
    pub scan_sectors: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_slot: 0,
            default_key_fallback: true,
            default_keys: DEFAULT_KEYS.to_vec(),
            scan_key: KeyMaterial::FACTORY_DEFAULT,
            scan_sectors: 16,
        }
    }
}

impl EngineConfig {
    /// Default keys for a policy run, empty when the fallback is off
    pub(crate) fn fallback_keys(&self) -> &[KeyMaterial] {
        if self.default_key_fallback { &self.default_keys } else { &[] }
    }
}
