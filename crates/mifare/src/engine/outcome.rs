//! Per-block results of sector operations

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::Error;
use crate::policy::AuthMethod;
use crate::types::{Block, BlockData, KeyMaterial};

/// A block that was read or written successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAccess {
    /// Block content (read) or the content written
    pub data: BlockData,
    /// How the sector was authenticated
    pub auth_method: AuthMethod,
    /// Key that the card accepted
    pub key_used: KeyMaterial,
}

/// Result for one block of a sector operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    /// Block address
    pub block: Block,
    /// What happened
    pub result: Result<BlockAccess, Error>,
}

impl BlockOutcome {
    pub(crate) const fn success(block: Block, access: BlockAccess) -> Self {
        Self {
            block,
            result: Ok(access),
        }
    }

    pub(crate) const fn failure(block: Block, error: Error) -> Self {
        Self {
            block,
            result: Err(error),
        }
    }

    /// Whether the block operation succeeded
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl Serialize for BlockOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("blockNumber", &self.block)?;
        map.serialize_entry("blockHex", &format!("{:02X}", self.block.number()))?;

        match &self.result {
            Ok(access) => {
                map.serialize_entry("data", &access.data.to_string())?;
                map.serialize_entry("ascii", &access.data.ascii())?;
                map.serialize_entry("dataType", if access.data.is_empty() { "Empty" } else { "Data" })?;
                map.serialize_entry("authMethod", &access.auth_method)?;
                map.serialize_entry("keyUsed", &access.key_used.to_string())?;
                map.serialize_entry("success", &true)?;
            }
            Err(error) => {
                map.serialize_entry("error", &error.to_string())?;
                if let Some(status) = error.status_word() {
                    map.serialize_entry("status", &status.to_string())?;
                }
                map.serialize_entry("success", &false)?;
            }
        }

        map.end()
    }
}
