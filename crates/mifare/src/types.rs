//! Addresses, keys and block payloads for the MIFARE Classic memory layout

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Blocks in every sector of the 4-block layout
pub const BLOCKS_PER_SECTOR: u8 = 4;
/// Highest addressable sector
pub const MAX_SECTOR: u8 = 63;
/// Size of one block in bytes
pub const BLOCK_SIZE: usize = 16;
/// Size of a key in bytes
pub const KEY_SIZE: usize = 6;

/// Which of the two sector keys to authenticate with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Key A
    A,
    /// Key B
    B,
}

impl KeyType {
    /// Byte used in authentication commands
    pub const fn code(self) -> u8 {
        match self {
            Self::A => 0x60,
            Self::B => 0x61,
        }
    }

    /// Parse from an authentication key type byte
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x60 => Some(Self::A),
            0x61 => Some(Self::B),
            _ => None,
        }
    }

    /// The other key type
    pub const fn opposite(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Upper-case letter
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            other => Err(Error::invalid_input(format!(
                "Key type must be A or B, got {other:?}"
            ))),
        }
    }
}

/// Decode exactly `N` bytes from `2 * N` hex characters
fn parse_hex<const N: usize>(s: &str, what: &str) -> Result<[u8; N], Error> {
    if s.len() != N * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_input(format!(
            "{what} must be exactly {} hex characters",
            N * 2
        )));
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|e| Error::invalid_input(format!("{what}: {e}")))?;
    Ok(out)
}

/// 6-byte MIFARE key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    /// Transport key shipped on blank cards
    pub const FACTORY_DEFAULT: Self = Self([0xFF; KEY_SIZE]);

    /// Create from raw bytes
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Default for KeyMaterial {
    fn default() -> Self {
        Self::FACTORY_DEFAULT
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

impl FromStr for KeyMaterial {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, "Key").map(Self)
    }
}

impl TryFrom<String> for KeyMaterial {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyMaterial> for String {
    fn from(key: KeyMaterial) -> Self {
        key.to_string()
    }
}

/// 16 bytes of block content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockData([u8; BLOCK_SIZE]);

impl BlockData {
    /// Create from raw bytes
    pub const fn new(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw block bytes
    pub const fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    /// Whether every byte is zero
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Printable ASCII rendering, `.` for anything else
    pub fn ascii(&self) -> String {
        self.0
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect()
    }
}

impl fmt::Display for BlockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl FromStr for BlockData {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, "Block data").map(Self)
    }
}

impl TryFrom<&[u8]> for BlockData {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        <[u8; BLOCK_SIZE]>::try_from(value)
            .map(Self)
            .map_err(|_| Error::invalid_input(format!("Block data must be {BLOCK_SIZE} bytes, got {}", value.len())))
    }
}

/// Absolute block address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Block(u8);

impl Block {
    /// Validate an absolute block number
    pub fn new(number: u32) -> Result<Self, Error> {
        u8::try_from(number)
            .map(Self)
            .map_err(|_| Error::invalid_input(format!("Block number {number} is out of range")))
    }

    /// Block number
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Sector holding this block
    pub const fn sector(self) -> Sector {
        Sector(self.0 / BLOCKS_PER_SECTOR)
    }

    /// Whether this is the sector trailer
    pub const fn is_trailer(self) -> bool {
        self.0 % BLOCKS_PER_SECTOR == BLOCKS_PER_SECTOR - 1
    }
}

impl From<u8> for Block {
    fn from(number: u8) -> Self {
        Self(number)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sector address in the 4-block layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Sector(u8);

impl Sector {
    /// Validate a sector number
    pub fn new(number: u32) -> Result<Self, Error> {
        match u8::try_from(number) {
            Ok(n) if n <= MAX_SECTOR => Ok(Self(n)),
            _ => Err(Error::invalid_input(format!(
                "Sector number must be between 0 and {MAX_SECTOR}, got {number}"
            ))),
        }
    }

    /// Sector number
    pub const fn number(self) -> u8 {
        self.0
    }

    /// First block of the sector
    pub const fn first_block(self) -> Block {
        Block(self.0 * BLOCKS_PER_SECTOR)
    }

    /// Trailer block holding keys and access bits
    pub const fn trailer(self) -> Block {
        Block(self.0 * BLOCKS_PER_SECTOR + BLOCKS_PER_SECTOR - 1)
    }

    /// The three data blocks in ascending order
    pub const fn data_blocks(self) -> [Block; 3] {
        let first = self.0 * BLOCKS_PER_SECTOR;
        [Block(first), Block(first + 1), Block(first + 2)]
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_layout() {
        let sector = Sector::new(1).unwrap();
        assert_eq!(sector.trailer().number(), 7);
        assert_eq!(sector.data_blocks().map(Block::number), [4, 5, 6]);
        assert_eq!(Sector::new(63).unwrap().trailer().number(), 255);
        assert!(Sector::new(64).is_err());
    }

    #[test]
    fn test_block_sector_and_trailer() {
        let block = Block::new(11).unwrap();
        assert_eq!(block.sector().number(), 2);
        assert!(block.is_trailer());
        assert!(!Block::new(8).unwrap().is_trailer());
        assert!(Block::new(256).is_err());
    }

    #[test]
    fn test_key_type_codes() {
        assert_eq!(KeyType::A.code(), 0x60);
        assert_eq!(KeyType::B.code(), 0x61);
        assert_eq!(KeyType::A.opposite(), KeyType::B);
        assert_eq!("b".parse::<KeyType>().unwrap(), KeyType::B);
        assert!("C".parse::<KeyType>().is_err());
    }

    #[test]
    fn test_key_material_parsing() {
        let key: KeyMaterial = "a0a1a2a3a4a5".parse().unwrap();
        assert_eq!(key.to_string(), "A0A1A2A3A4A5");
        assert!("A0A1A2A3A4".parse::<KeyMaterial>().is_err());
        assert!("A0A1A2A3A4A5A6".parse::<KeyMaterial>().is_err());
        assert!("ZZA1A2A3A4A5".parse::<KeyMaterial>().is_err());
    }

    #[test]
    fn test_block_data_length_is_strict() {
        let valid = "00112233445566778899AABBCCDDEEFF";
        assert!(valid.parse::<BlockData>().is_ok());
        assert!(matches!(
            valid[..31].parse::<BlockData>(),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            format!("{valid}0").parse::<BlockData>(),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_block_data_ascii() {
        let mut bytes = [0u8; BLOCK_SIZE];
        bytes[..5].copy_from_slice(b"Hello");
        let data = BlockData::new(bytes);
        assert_eq!(data.ascii(), "Hello...........");
        assert!(!data.is_empty());
        assert!(BlockData::default().is_empty());
    }
}
