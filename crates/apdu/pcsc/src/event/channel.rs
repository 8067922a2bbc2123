//! Channel-based event handling for PC/SC hot-plug monitoring

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::event::DeviceEvent;

/// Sender for device events
pub type DeviceEventSender = Sender<DeviceEvent>;
/// Receiver for device events
pub type DeviceEventReceiver = Receiver<DeviceEvent>;

/// Create an unbounded channel for device events
pub fn device_event_channel() -> (DeviceEventSender, DeviceEventReceiver) {
    unbounded()
}

/// Create a bounded channel with the specified capacity for device events
pub fn bounded_device_event_channel(capacity: usize) -> (DeviceEventSender, DeviceEventReceiver) {
    bounded(capacity)
}
