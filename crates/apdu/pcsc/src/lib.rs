//! PC/SC transport implementation for APDU exchanges
//!
//! This crate provides an implementation of the `CardTransport` trait from
//! `mifare-apdu-core` using the PC/SC API, together with a polling monitor that
//! reports reader attach/detach and card insert/removal.
//!
//! # Examples
//!
//! ```no_run
//! use mifare_apdu_core::CardTransport;
//! use mifare_apdu_pcsc::PcscDeviceManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = PcscDeviceManager::new()?;
//!
//! let readers = manager.list_readers()?;
//! let Some(reader) = readers.iter().find(|r| r.has_card()) else {
//!     println!("No card found");
//!     return Ok(());
//! };
//!
//! let mut transport = manager.open_reader(reader.name())?;
//! // GET DATA (UID)
//! let response = transport.transmit_raw(&[0xFF, 0xCA, 0x00, 0x00, 0x00], 12)?;
//! println!("Response: {response:02X?}");
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod error;
pub mod event;
mod manager;
mod monitor;
mod reader;
mod transport;

pub use config::{PcscConfig, ProtocolPreference, ShareMode};
pub use error::PcscError;
pub use event::{CardEvent, DeviceEvent, DeviceEventHandler, ReaderEvent};
pub use manager::PcscDeviceManager;
pub use monitor::PcscMonitor;
pub use reader::PcscReader;
pub use transport::PcscTransport;
