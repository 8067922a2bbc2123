//! APDU encoding and decoding for the PC/SC storage card pseudo-commands
//!
//! Every function here is pure. The [`MifareCommand`] decoder is the inverse of the
//! encoders and is what the simulated card uses to interpret the bytes it receives.

use mifare_apdu_core::prelude::*;

use crate::types::{BLOCK_SIZE, Block, BlockData, KEY_SIZE, KeyMaterial, KeyType};

/// Class byte of all reader pseudo-commands
pub const CLA: u8 = 0xFF;

/// Instruction bytes
pub mod ins {
    /// LOAD KEYS
    pub const LOAD_KEY: u8 = 0x82;
    /// GENERAL AUTHENTICATE
    pub const AUTHENTICATE: u8 = 0x86;
    /// Obsolete AUTHENTICATE with the address in P2
    pub const LEGACY_AUTHENTICATE: u8 = 0x88;
    /// READ BINARY
    pub const READ_BINARY: u8 = 0xB0;
    /// UPDATE BINARY
    pub const UPDATE_BINARY: u8 = 0xD6;
    /// GET DATA
    pub const GET_DATA: u8 = 0xCA;
}

/// Version byte of the GENERAL AUTHENTICATE data object
const AUTH_VERSION: u8 = 0x01;

/// Length of a legacy authenticate command, which has no Lc
const LEGACY_AUTH_LEN: usize = 6;

/// Response buffer large enough for a block read
pub const READ_RESPONSE_LEN: usize = BLOCK_SIZE + 2;

/// Response buffer for commands returning only a status word or a short UID
pub const STATUS_RESPONSE_LEN: usize = 12;

/// `FF 82 00 <slot> 06 <key>`
pub fn encode_load_key(slot: u8, key: &KeyMaterial) -> Bytes {
    Command::new_with_data(CLA, ins::LOAD_KEY, 0x00, slot, key.as_bytes().to_vec()).to_bytes()
}

/// Authenticate `address` with a key type and slot
///
/// The modern form is `FF 86 00 00 05 01 00 <addr> <kt> <slot>`, the legacy form is
/// `FF 88 00 <addr> <kt> <slot>`.
pub fn encode_authenticate(address: Block, key_type: KeyType, slot: u8, legacy: bool) -> Bytes {
    if legacy {
        return Bytes::copy_from_slice(&[
            CLA,
            ins::LEGACY_AUTHENTICATE,
            0x00,
            address.number(),
            key_type.code(),
            slot,
        ]);
    }

    Command::new_with_data(
        CLA,
        ins::AUTHENTICATE,
        0x00,
        0x00,
        vec![AUTH_VERSION, 0x00, address.number(), key_type.code(), slot],
    )
    .to_bytes()
}

/// `FF B0 00 <block> 10`
pub fn encode_read_block(block: Block) -> Bytes {
    Command::new_with_le(CLA, ins::READ_BINARY, 0x00, block.number(), BLOCK_SIZE as u8).to_bytes()
}

/// `FF D6 00 <block> 10 <data>`
pub fn encode_write_block(block: Block, data: &BlockData) -> Bytes {
    Command::new_with_data(CLA, ins::UPDATE_BINARY, 0x00, block.number(), data.as_bytes().to_vec())
        .to_bytes()
}

/// `FF CA 00 00 00`
pub fn encode_get_uid() -> Bytes {
    Command::new_with_le(CLA, ins::GET_DATA, 0x00, 0x00, 0x00).to_bytes()
}

/// Split a response into payload, success flag and status word
///
/// Success is exactly `9000`. Any other status is kept verbatim.
pub fn decode_status(response: &[u8]) -> Result<Response, ResponseError> {
    Response::from_bytes(response)
}

/// Recover the block and data from an encoded write command
pub fn decode_write_block(command: &[u8]) -> Result<(Block, BlockData), ResponseError> {
    match MifareCommand::decode(command)? {
        MifareCommand::Write { block, data } => Ok((block, data)),
        _ => Err(ResponseError::parse("Not an UPDATE BINARY command")),
    }
}

/// A decoded reader pseudo-command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MifareCommand {
    /// Load a key into a reader slot
    LoadKey {
        /// Key slot
        slot: u8,
        /// Key bytes
        key: KeyMaterial,
    },
    /// Authenticate a sector
    Authenticate {
        /// Block the command addresses
        address: Block,
        /// Key type
        key_type: KeyType,
        /// Key slot
        slot: u8,
        /// Whether the obsolete form was used
        legacy: bool,
    },
    /// Read one block
    Read {
        /// Block address
        block: Block,
    },
    /// Write one block
    Write {
        /// Block address
        block: Block,
        /// New content
        data: BlockData,
    },
    /// Fetch the card UID
    GetUid,
}

impl MifareCommand {
    /// Decode raw command bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, ResponseError> {
        if bytes.len() == LEGACY_AUTH_LEN && bytes[0] == CLA && bytes[1] == ins::LEGACY_AUTHENTICATE {
            let key_type = KeyType::from_code(bytes[4]).ok_or(ResponseError::parse("Unknown key type"))?;
            return Ok(Self::Authenticate {
                address: Block::from(bytes[3]),
                key_type,
                slot: bytes[5],
                legacy: true,
            });
        }

        let command = Command::from_bytes(bytes)?;
        if command.cla != CLA {
            return Err(ResponseError::parse("Unexpected class byte"));
        }

        match (command.ins, command.data()) {
            (ins::LOAD_KEY, Some(data)) => {
                let key = <[u8; KEY_SIZE]>::try_from(data)
                    .map_err(|_| ResponseError::parse("Key must be 6 bytes"))?;
                Ok(Self::LoadKey {
                    slot: command.p2,
                    key: KeyMaterial::new(key),
                })
            }
            (ins::AUTHENTICATE, Some(&[AUTH_VERSION, 0x00, address, key_type, slot])) => {
                let key_type =
                    KeyType::from_code(key_type).ok_or(ResponseError::parse("Unknown key type"))?;
                Ok(Self::Authenticate {
                    address: Block::from(address),
                    key_type,
                    slot,
                    legacy: false,
                })
            }
            (ins::READ_BINARY, None) => Ok(Self::Read {
                block: Block::from(command.p2),
            }),
            (ins::UPDATE_BINARY, Some(data)) => {
                let data = <[u8; BLOCK_SIZE]>::try_from(data)
                    .map_err(|_| ResponseError::parse("Block data must be 16 bytes"))?;
                Ok(Self::Write {
                    block: Block::from(command.p2),
                    data: BlockData::new(data),
                })
            }
            (ins::GET_DATA, None) if command.p1 == 0x00 => Ok(Self::GetUid),
            _ => Err(ResponseError::parse("Unsupported command")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block(n: u32) -> Block {
        Block::new(n).unwrap()
    }

    #[test]
    fn test_load_key_encoding() {
        let key: KeyMaterial = "FFFFFFFFFFFF".parse().unwrap();
        assert_eq!(
            hex::encode_upper(encode_load_key(0, &key)),
            "FF82000006FFFFFFFFFFFF"
        );
    }

    #[test]
    fn test_authenticate_encodings() {
        assert_eq!(
            hex::encode_upper(encode_authenticate(block(7), KeyType::A, 0, false)),
            "FF860000050100076000"
        );
        assert_eq!(
            hex::encode_upper(encode_authenticate(block(4), KeyType::B, 0, true)),
            "FF8800046100"
        );
    }

    #[test]
    fn test_read_and_uid_encoding() {
        assert_eq!(hex::encode_upper(encode_read_block(block(0x2A))), "FFB0002A10");
        assert_eq!(hex::encode_upper(encode_get_uid()), "FFCA000000");
    }

    #[test]
    fn test_write_block_boundaries() {
        for (n, hex_data) in [
            (0, "00000000000000000000000000000000"),
            (1, "00112233445566778899AABBCCDDEEFF"),
            (254, "deadbeefdeadbeefdeadbeefdeadbeef"),
            (255, "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"),
        ] {
            let data: BlockData = hex_data.parse().unwrap();
            let (decoded_block, decoded_data) = decode_write_block(&encode_write_block(block(n), &data)).unwrap();
            assert_eq!(decoded_block, block(n));
            assert_eq!(decoded_data.to_string(), hex_data.to_uppercase());
        }
    }

    proptest! {
        #[test]
        fn test_write_block_round_trip(number in any::<u8>(), bytes in any::<[u8; BLOCK_SIZE]>()) {
            let data: BlockData = hex::encode_upper(bytes).parse().unwrap();
            let encoded = encode_write_block(Block::from(number), &data);
            prop_assert_eq!(encoded.len(), 5 + BLOCK_SIZE);

            let (decoded_block, decoded_data) = decode_write_block(&encoded).unwrap();
            prop_assert_eq!(decoded_block, Block::from(number));
            prop_assert_eq!(decoded_data.as_bytes(), &bytes);
            prop_assert_eq!(decoded_data.to_string(), data.to_string());
        }
    }

    #[test]
    fn test_decode_status() {
        let ok = decode_status(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.payload().as_ref(), &[0x01, 0x02]);

        let failed = decode_status(&[0x63, 0x00]).unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.status().to_string(), "6300");
        assert!(failed.payload().is_empty());

        assert!(decode_status(&[0x90]).is_err());
    }

    #[test]
    fn test_decode_legacy_authenticate() {
        let command = MifareCommand::decode(&encode_authenticate(block(5), KeyType::B, 1, true)).unwrap();
        assert_eq!(
            command,
            MifareCommand::Authenticate {
                address: block(5),
                key_type: KeyType::B,
                slot: 1,
                legacy: true,
            }
        );
    }

    #[test]
    fn test_decode_rejects_foreign_commands() {
        // SELECT by AID
        assert!(MifareCommand::decode(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0xA0]).is_err());
        assert!(decode_write_block(&encode_read_block(block(4))).is_err());
    }
}
