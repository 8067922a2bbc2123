//! Event types and handling for PC/SC hot-plug monitoring

pub mod channel;
pub use channel::*;

/// Events related to card insertion/removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// Card was inserted into a reader
    Inserted {
        /// Reader name
        reader: String,
        /// ATR of the inserted card
        atr: Vec<u8>,
    },
    /// Card was removed from a reader
    Removed {
        /// Reader name
        reader: String,
    },
}

/// Events related to reader connection/disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Reader was connected to the system
    Added(String),
    /// Reader was disconnected from the system
    Removed(String),
}

/// Any event produced by the monitor, in the order it was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Reader attach/detach
    Reader(ReaderEvent),
    /// Card insert/removal
    Card(CardEvent),
}

impl From<ReaderEvent> for DeviceEvent {
    fn from(event: ReaderEvent) -> Self {
        Self::Reader(event)
    }
}

impl From<CardEvent> for DeviceEvent {
    fn from(event: CardEvent) -> Self {
        Self::Card(event)
    }
}

/// Trait for handling device events
pub trait DeviceEventHandler {
    /// Handle a device event
    fn handle_event(&mut self, event: DeviceEvent);
}

impl<F> DeviceEventHandler for F
where
    F: FnMut(DeviceEvent),
{
    fn handle_event(&mut self, event: DeviceEvent) {
        self(event)
    }
}
