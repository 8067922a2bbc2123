//! Monitor implementation for PC/SC reader and card events

use pcsc::{Context, ReaderState, Scope, State};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::PcscConfig;
use crate::error::PcscError;
use crate::event::{CardEvent, DeviceEvent, DeviceEventHandler, DeviceEventSender, ReaderEvent};
use crate::reader::card_present;

/// Reader name mapped to the ATR of the card in it, if any
type Snapshot = BTreeMap<String, Option<Vec<u8>>>;

/// Monitor for PC/SC reader and card events
///
/// A single background thread polls the reader list and card states and reports every
/// transition through a [`DeviceEventHandler`]. Reader events always precede the card
/// events for the same reader.
#[allow(missing_debug_implementations)]
pub struct PcscMonitor {
    /// PC/SC context
    context: Context,
    /// Whether the monitor is running
    running: Arc<AtomicBool>,
    /// Interval between polls
    poll_interval: Duration,
}

impl PcscMonitor {
    /// Create a new monitor
    pub(crate) fn new(context: Context) -> Self {
        Self {
            context,
            running: Arc::new(AtomicBool::new(false)),
            poll_interval: PcscConfig::default().poll_interval(),
        }
    }

    /// Create a new monitor with a dedicated context
    pub fn create() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self::new(context))
    }

    /// Set the poll interval
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether the background thread is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Watch for device events with a callback
    ///
    /// Returns [`PcscError::AlreadyRunning`] if a watch thread is already active.
    pub fn watch<H>(&self, mut handler: H) -> Result<(), PcscError>
    where
        H: DeviceEventHandler + Send + 'static,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PcscError::AlreadyRunning);
        }

        let context = self.context.clone();
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        thread::Builder::new()
            .name("pcsc-monitor".into())
            .spawn(move || {
                let mut known = Snapshot::new();

                while running.load(Ordering::Acquire) {
                    match snapshot(&context) {
                        Ok(current) => {
                            for event in diff_snapshots(&mut known, current) {
                                debug!(?event, "Device event");
                                handler.handle_event(event);
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to poll PC/SC readers"),
                    }

                    thread::sleep(poll_interval);
                }

                debug!("PC/SC monitor stopped");
            })
            .map_err(|e| PcscError::Monitor(e.to_string()))?;

        Ok(())
    }

    /// Watch for device events, forwarding them into a channel
    ///
    /// The monitor stops itself once the receiving side is dropped.
    pub fn watch_channel(&self, sender: DeviceEventSender) -> Result<(), PcscError> {
        let running = Arc::clone(&self.running);
        self.watch(move |event| {
            if sender.send(event).is_err() {
                running.store(false, Ordering::Release);
            }
        })
    }

    /// Stop monitoring
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for PcscMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read the current reader list and card state without blocking
fn snapshot(context: &Context) -> Result<Snapshot, PcscError> {
    let readers = match context.list_readers_owned() {
        Ok(readers) => readers,
        Err(pcsc::Error::NoReadersAvailable) => return Ok(Snapshot::new()),
        Err(e) => return Err(e.into()),
    };

    let mut states: Vec<ReaderState> = readers
        .into_iter()
        .map(|name| ReaderState::new(name, State::UNAWARE))
        .collect();

    if states.is_empty() {
        return Ok(Snapshot::new());
    }

    match context.get_status_change(Some(Duration::ZERO), &mut states) {
        Ok(()) | Err(pcsc::Error::Timeout) => {}
        // A reader vanished between listing and querying; the next poll catches up
        Err(pcsc::Error::UnknownReader) => return Ok(Snapshot::new()),
        Err(e) => return Err(e.into()),
    }

    Ok(states
        .iter()
        .map(|rs| {
            let name = rs.name().to_string_lossy().into_owned();
            let atr = card_present(rs.event_state()).then(|| rs.atr().to_vec());
            trace!(reader = %name, present = atr.is_some(), "Reader state");
            (name, atr)
        })
        .collect())
}

/// Compare the previous snapshot with the current one and emit the transitions
///
/// `known` is updated in place to match `current`. A reader that disappears while
/// holding a card produces a card removal before the reader removal.
fn diff_snapshots(known: &mut Snapshot, current: Snapshot) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    let gone: Vec<String> = known
        .keys()
        .filter(|name| !current.contains_key(*name))
        .cloned()
        .collect();

    for name in gone {
        if let Some(Some(_)) = known.remove(&name) {
            events.push(CardEvent::Removed { reader: name.clone() }.into());
        }
        events.push(ReaderEvent::Removed(name).into());
    }

    for (name, atr) in current {
        let previous = match known.get(&name) {
            Some(previous) => previous.clone(),
            None => {
                events.push(ReaderEvent::Added(name.clone()).into());
                None
            }
        };

        match (&previous, &atr) {
            (None, Some(atr)) => events.push(
                CardEvent::Inserted {
                    reader: name.clone(),
                    atr: atr.clone(),
                }
                .into(),
            ),
            (Some(_), None) => events.push(CardEvent::Removed { reader: name.clone() }.into()),
            (Some(old), Some(new)) if old != new => {
                // Card swapped between two polls
                events.push(CardEvent::Removed { reader: name.clone() }.into());
                events.push(
                    CardEvent::Inserted {
                        reader: name.clone(),
                        atr: new.clone(),
                    }
                    .into(),
                );
            }
            _ => {}
        }

        known.insert(name, atr);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, Option<&[u8]>)]) -> Snapshot {
        entries
            .iter()
            .map(|(name, atr)| (name.to_string(), atr.map(|a| a.to_vec())))
            .collect()
    }

    #[test]
    fn test_reader_attach_with_card_reports_reader_first() {
        let mut known = Snapshot::new();
        let events = diff_snapshots(&mut known, snap(&[("ACR122U", Some(&[0x3B, 0x8F]))]));

        assert_eq!(
            events,
            vec![
                ReaderEvent::Added("ACR122U".into()).into(),
                CardEvent::Inserted {
                    reader: "ACR122U".into(),
                    atr: vec![0x3B, 0x8F],
                }
                .into(),
            ]
        );
    }

    #[test]
    fn test_unchanged_state_is_silent() {
        let mut known = snap(&[("ACR122U", None)]);
        assert!(diff_snapshots(&mut known, snap(&[("ACR122U", None)])).is_empty());
    }

    #[test]
    fn test_card_removed() {
        let mut known = snap(&[("ACR122U", Some(&[0x3B]))]);
        let events = diff_snapshots(&mut known, snap(&[("ACR122U", None)]));
        assert_eq!(
            events,
            vec![CardEvent::Removed { reader: "ACR122U".into() }.into()]
        );
        assert_eq!(known.get("ACR122U"), Some(&None));
    }

    #[test]
    fn test_reader_unplugged_with_card() {
        let mut known = snap(&[("ACR122U", Some(&[0x3B]))]);
        let events = diff_snapshots(&mut known, Snapshot::new());
        assert_eq!(
            events,
            vec![
                CardEvent::Removed { reader: "ACR122U".into() }.into(),
                ReaderEvent::Removed("ACR122U".into()).into(),
            ]
        );
        assert!(known.is_empty());
    }

    #[test]
    fn test_card_swapped_between_polls() {
        let mut known = snap(&[("ACR122U", Some(&[0x01]))]);
        let events = diff_snapshots(&mut known, snap(&[("ACR122U", Some(&[0x02]))]));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DeviceEvent::Card(CardEvent::Removed { .. })));
        assert!(matches!(events[1], DeviceEvent::Card(CardEvent::Inserted { .. })));
    }
}
