//! Core types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the foundational types used to talk to a smart card reader:
//!
//! - Building command APDUs ([`Command`]) and serializing them to raw bytes
//! - Splitting raw response bytes into payload and [`StatusWord`] ([`Response`])
//! - A byte-in/byte-out [`CardTransport`] seam that concrete readers implement
//!
//! Nothing in here knows about a particular card family. Card specific encodings
//! live in the crates layered on top.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod response;
pub mod transport;

pub use command::{Command, ExpectedLength};
pub use response::error::ResponseError;
pub use response::status::StatusWord;
pub use response::Response;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut};

    pub use crate::command::{Command, ExpectedLength};

    pub use crate::response::error::ResponseError;
    pub use crate::response::status::{StatusWord, common as status};
    pub use crate::response::Response;

    pub use crate::transport::{CardTransport, TransportError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0xFF, 0xCA, 0x00, 0x00);
        assert_eq!(cmd.cla, 0xFF);
        assert_eq!(cmd.ins, 0xCA);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let resp = Response::success(data.clone());
        assert!(resp.is_success());
        assert_eq!(resp.payload(), &data);
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
