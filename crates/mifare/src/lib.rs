//! MIFARE Classic sector and block access over a PC/SC reader
//!
//! The crate is layered the same way the exchange is:
//!
//! - [`TransportAdapter`] wraps one reader's [`CardTransport`], serializes every
//!   exchange and tracks reader and card presence
//! - [`codec`] encodes and decodes the reader pseudo-APDUs (`CLA = FF`)
//! - [`policy`] runs the bounded authentication fallback list
//! - [`Engine`] orchestrates sector and block reads and writes into per-block outcomes
//!
//! ```
//! use std::sync::Arc;
//!
//! use mifare_classic::simulator::SimulatedCard;
//! use mifare_classic::{Engine, EngineConfig, KeyMaterial, KeyType, Sector, TransportAdapter};
//!
//! let card = SimulatedCard::new();
//! let handle = card.handle();
//!
//! let adapter = Arc::new(TransportAdapter::new());
//! adapter.on_reader_attached("Simulated Reader", card);
//! adapter.on_card_inserted(handle.atr());
//!
//! let engine = Engine::new(adapter, EngineConfig::default());
//! let outcomes = engine
//!     .read_sector(Sector::new(1)?, KeyType::A, KeyMaterial::FACTORY_DEFAULT)?;
//! assert_eq!(outcomes.len(), 3);
//! assert!(outcomes.iter().all(|o| o.is_success()));
//! # Ok::<(), mifare_classic::Error>(())
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod adapter;
mod card;
pub mod codec;
mod config;
mod engine;
mod error;
pub mod policy;
mod session;
pub mod simulator;
mod types;

pub use adapter::{CardPresence, Exclusive, ReaderStatus, TransportAdapter};
pub use card::{CardInfo, CardKind, UidLe, uid_le};
pub use config::{DEFAULT_KEYS, EngineConfig};
pub use engine::{BlockAccess, BlockOutcome, CardScan, Engine, SectorScan};
pub use error::{Error, Operation, Result};
pub use policy::AuthMethod;
pub use session::Authenticated;
pub use types::{
    BLOCK_SIZE, BLOCKS_PER_SECTOR, Block, BlockData, KEY_SIZE, KeyMaterial, KeyType, MAX_SECTOR, Sector,
};

pub use mifare_apdu_core::{CardTransport, StatusWord, TransportError};
