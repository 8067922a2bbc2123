//! Card identification from the ATR and UID helpers

use std::fmt;

use serde::{Serialize, Serializer};

/// Registered application provider id of the PC/SC storage card ATR
const PCSC_RID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x06];

/// Card family as reported by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardKind {
    /// MIFARE Classic 1K
    MifareClassic1K,
    /// MIFARE Classic 4K
    MifareClassic4K,
    /// MIFARE Ultralight
    MifareUltralight,
    /// MIFARE Mini
    MifareMini,
    /// Some other ISO 14443-3 storage card
    Iso14443_3,
    /// ISO 14443-4 (processor) card
    Iso14443_4,
    /// Unrecognized ATR
    Unknown,
}

impl CardKind {
    /// Decode the card kind from an ATR
    ///
    /// Contactless readers synthesize storage card ATRs as
    /// `3B 8F 80 01 80 4F 0C <RID> <standard> <name:2> ...`.
    pub fn from_atr(atr: &[u8]) -> Self {
        if let Some(pos) = atr.windows(PCSC_RID.len()).position(|w| w == PCSC_RID) {
            let name = atr.get(pos + PCSC_RID.len() + 1..pos + PCSC_RID.len() + 3);
            return match name {
                Some([0x00, 0x01]) => Self::MifareClassic1K,
                Some([0x00, 0x02]) => Self::MifareClassic4K,
                Some([0x00, 0x03]) => Self::MifareUltralight,
                Some([0x00, 0x26]) => Self::MifareMini,
                _ => Self::Iso14443_3,
            };
        }

        // Processor cards: 3B 8n 80 01 followed by historical bytes
        match atr {
            [0x3B, t0, 0x80, 0x01, ..] if t0 & 0xF0 == 0x80 => Self::Iso14443_4,
            _ => Self::Unknown,
        }
    }

    /// Number of sectors in the 4-block layout, when known
    pub const fn sectors(self) -> Option<u8> {
        match self {
            Self::MifareClassic1K => Some(16),
            Self::MifareMini => Some(5),
            // 32 small sectors plus 8 large ones; only the small ones are addressable here
            Self::MifareClassic4K => Some(32),
            _ => None,
        }
    }

    /// Human readable name
    pub const fn name(self) -> &'static str {
        match self {
            Self::MifareClassic1K => "MIFARE Classic 1K",
            Self::MifareClassic4K => "MIFARE Classic 4K",
            Self::MifareUltralight => "MIFARE Ultralight",
            Self::MifareMini => "MIFARE Mini",
            Self::Iso14443_3 => "ISO 14443-3",
            Self::Iso14443_4 => "ISO 14443-4",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for CardKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Identity of the card in the field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardInfo {
    /// UID, upper-case hex
    pub uid: String,
    /// ATR, upper-case hex
    pub atr: String,
    /// Decoded card kind
    #[serde(rename = "type")]
    pub kind: CardKind,
}

/// UID in little-endian byte order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UidLe {
    /// Reversed UID, upper-case hex
    pub uid_le: String,
    /// The UID read as a little-endian integer
    ///
    /// Serialized as a number while it fits in a `u64` and as a decimal string above
    /// that, which 10-byte UIDs can reach.
    #[serde(serialize_with = "serialize_decimal")]
    pub decimal: u128,
}

fn serialize_decimal<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    match u64::try_from(*value) {
        Ok(small) => serializer.serialize_u64(small),
        Err(_) => serializer.collect_str(value),
    }
}

/// Reverse a UID and interpret it as a little-endian number
///
/// UIDs are at most 10 bytes, so the value fits in a `u128`.
pub fn uid_le(uid: &[u8]) -> UidLe {
    let reversed: Vec<u8> = uid.iter().rev().copied().collect();
    let decimal = uid
        .iter()
        .take(16)
        .enumerate()
        .fold(0u128, |acc, (i, &b)| acc | (u128::from(b) << (8 * i)));

    UidLe {
        uid_le: hex::encode_upper(reversed),
        decimal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_card_atrs() {
        let classic_1k = hex::decode("3B8F8001804F0CA000000306030001000000006A").unwrap();
        let classic_4k = hex::decode("3B8F8001804F0CA0000003060300020000000069").unwrap();
        let ultralight = hex::decode("3B8F8001804F0CA0000003060300030000000068").unwrap();
        assert_eq!(CardKind::from_atr(&classic_1k), CardKind::MifareClassic1K);
        assert_eq!(CardKind::from_atr(&classic_4k), CardKind::MifareClassic4K);
        assert_eq!(CardKind::from_atr(&ultralight), CardKind::MifareUltralight);
    }

    #[test]
    fn test_other_atrs() {
        let desfire = hex::decode("3B8180018080").unwrap();
        assert_eq!(CardKind::from_atr(&desfire), CardKind::Iso14443_4);
        assert_eq!(CardKind::from_atr(&[0x3B, 0x00]), CardKind::Unknown);
        let other_storage = hex::decode("3B8F8001804F0CA0000003060300F00000000000").unwrap();
        assert_eq!(CardKind::from_atr(&other_storage), CardKind::Iso14443_3);
    }

    #[test]
    fn test_uid_le() {
        let value = uid_le(&[0x04, 0xA1, 0xB2, 0xC3]);
        assert_eq!(value.uid_le, "C3B2A104");
        assert_eq!(value.decimal, 0xC3B2A104);
    }

    #[test]
    fn test_uid_le_long_uids() {
        let seven = uid_le(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(seven.uid_le, "66554433221104");
        assert_eq!(serde_json::to_value(&seven).unwrap()["decimal"], 0x0066_5544_3322_1104u64);

        let ten = uid_le(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99]);
        assert_eq!(ten.uid_le, "99887766554433221104");
        assert_eq!(ten.decimal, 0x9988_7766_5544_3322_1104);
        let json = serde_json::to_value(&ten).unwrap();
        assert_eq!(json["decimal"], "725039432730969758634244");
    }
}
