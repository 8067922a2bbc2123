//! Transport traits for APDU communication with cards
//!
//! A transport is a byte pipe to exactly one reader. It has no knowledge of
//! command structure or of the card family behind the reader.

pub mod error;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

/// Largest response a short APDU can produce: 256 data bytes plus the status word.
pub const MAX_SHORT_RESPONSE: usize = 258;

/// Trait for basic card transports
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes to the card and return the raw response bytes
    ///
    /// `max_response_len` bounds the receive buffer (payload plus status word).
    fn transmit_raw(&mut self, command: &[u8], max_response_len: usize) -> Result<Bytes, TransportError> {
        trace!(command = %hex::encode_upper(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command, max_response_len.min(MAX_SHORT_RESPONSE));
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode_upper(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    ///
    /// This is the method that concrete implementations should override.
    fn do_transmit_raw(&mut self, command: &[u8], max_response_len: usize) -> Result<Bytes, TransportError>;

    /// Check if the transport currently holds a connection to a physical card
    fn is_connected(&self) -> bool;

    /// Drop the card connection, if any. The next transmit reconnects.
    fn disconnect(&mut self);
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn do_transmit_raw(&mut self, command: &[u8], max_response_len: usize) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command, max_response_len)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}
