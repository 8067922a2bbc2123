//! Maps reader and card hot-plug events onto the transport adapter

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use eyre::WrapErr;
use mifare_apdu_core::CardTransport;
use mifare_apdu_pcsc::{
    CardEvent, DeviceEvent, PcscConfig, PcscDeviceManager, PcscError, PcscMonitor, ReaderEvent,
    event::bounded_device_event_channel,
};
use mifare_classic::Engine;
use mifare_classic::simulator::SimulatedCard;
use tracing::{debug, info, warn};

/// Transport type the bridge drives; either a PC/SC reader or the simulator
pub(crate) type BridgeTransport = Box<dyn CardTransport>;
pub(crate) type BridgeEngine = Engine<BridgeTransport>;

const SIMULATED_READER: &str = "Simulated MIFARE Reader";
const EVENT_QUEUE: usize = 64;

/// Running source of presence transitions
pub(crate) enum Discovery {
    Pcsc {
        monitor: PcscMonitor,
        dispatcher: JoinHandle<()>,
    },
    Simulated,
}

impl Discovery {
    /// Watch PC/SC readers and bind the first one matching `filter`
    pub(crate) fn pcsc(engine: &Arc<BridgeEngine>, filter: Option<String>, config: PcscConfig) -> eyre::Result<Self> {
        let manager = PcscDeviceManager::with_config(config).wrap_err("failed to establish PC/SC context")?;
        let monitor = manager.monitor();
        let (sender, receiver) = bounded_device_event_channel(EVENT_QUEUE);
        monitor.watch_channel(sender)?;

        let mut dispatcher = Dispatcher::new(Arc::clone(engine), filter, move |name: &str| {
            manager
                .open_reader(name)
                .map(|transport| Box::new(transport) as BridgeTransport)
        });
        let dispatcher = thread::Builder::new()
            .name("device-dispatcher".into())
            .spawn(move || {
                for event in receiver {
                    dispatcher.handle(event);
                }
                debug!("Device event channel closed");
            })
            .wrap_err("failed to spawn device dispatcher")?;

        info!("Watching PC/SC readers");
        Ok(Self::Pcsc { monitor, dispatcher })
    }

    /// Attach a simulated reader with a blank card already in the field
    pub(crate) fn simulated(engine: &Arc<BridgeEngine>) -> Self {
        let card = SimulatedCard::new();
        let handle = card.handle();

        let adapter = engine.adapter();
        adapter.on_reader_attached(SIMULATED_READER, Box::new(card) as BridgeTransport);
        adapter.on_card_inserted(handle.atr());
        warn!("Serving a simulated card; no PC/SC reader is used");
        Self::Simulated
    }

    pub(crate) fn stop(self) {
        match self {
            Self::Pcsc { monitor, dispatcher } => {
                monitor.stop();
                // The monitor thread drops its sender on exit, which ends the dispatcher
                drop(monitor);
                if dispatcher.join().is_err() {
                    warn!("Device dispatcher panicked");
                }
            }
            Self::Simulated => {}
        }
    }
}

/// Applies device events to the engine's adapter
///
/// Tracks every reader it has seen so that a detached bound reader can be replaced
/// by another matching one, with its card if it has one.
pub(crate) struct Dispatcher<F> {
    engine: Arc<BridgeEngine>,
    filter: Option<String>,
    open: F,
    /// Reader name to ATR of the card in it
    readers: BTreeMap<String, Option<Vec<u8>>>,
    bound: Option<String>,
}

impl<F> Dispatcher<F>
where
    F: FnMut(&str) -> Result<BridgeTransport, PcscError>,
{
    pub(crate) fn new(engine: Arc<BridgeEngine>, filter: Option<String>, open: F) -> Self {
        Self {
            engine,
            filter,
            open,
            readers: BTreeMap::new(),
            bound: None,
        }
    }

    pub(crate) fn handle(&mut self, event: DeviceEvent) {
        debug!(?event, "Device event");
        match event {
            DeviceEvent::Reader(ReaderEvent::Added(name)) => {
                self.readers.insert(name, None);
                if self.bound.is_none() {
                    self.bind_next();
                }
            }
            DeviceEvent::Reader(ReaderEvent::Removed(name)) => {
                self.readers.remove(&name);
                if self.is_bound(&name) {
                    self.bound = None;
                    self.engine.adapter().on_reader_detached();
                    self.bind_next();
                }
            }
            DeviceEvent::Card(CardEvent::Inserted { reader, atr }) => {
                if let Some(slot) = self.readers.get_mut(&reader) {
                    *slot = Some(atr.clone());
                }
                if self.is_bound(&reader) {
                    self.card_inserted(atr);
                }
            }
            DeviceEvent::Card(CardEvent::Removed { reader }) => {
                if let Some(slot) = self.readers.get_mut(&reader) {
                    *slot = None;
                }
                if self.is_bound(&reader) {
                    self.engine.adapter().on_card_removed();
                }
            }
        }
    }

    fn is_bound(&self, reader: &str) -> bool {
        self.bound.as_deref() == Some(reader)
    }

    fn matches(&self, reader: &str) -> bool {
        self.filter.as_deref().is_none_or(|filter| reader.contains(filter))
    }

    fn bind_next(&mut self) {
        let candidates: Vec<(String, Option<Vec<u8>>)> = self
            .readers
            .iter()
            .filter(|(name, _)| self.matches(name))
            .map(|(name, atr)| (name.clone(), atr.clone()))
            .collect();

        for (name, atr) in candidates {
            match (self.open)(&name) {
                Ok(transport) => {
                    self.engine.adapter().on_reader_attached(name.clone(), transport);
                    self.bound = Some(name);
                    if let Some(atr) = atr {
                        self.card_inserted(atr);
                    }
                    return;
                }
                Err(e) => warn!(reader = %name, error = %e, "Failed to open reader"),
            }
        }

        if !self.readers.is_empty() {
            debug!(filter = ?self.filter, "No usable reader attached");
        }
    }

    fn card_inserted(&self, atr: Vec<u8>) {
        self.engine.adapter().on_card_inserted(atr);
        // Prime the UID cache so status reports carry it
        match self.engine.read_uid() {
            Ok(uid) => info!(uid = %hex::encode_upper(&uid), "Card identified"),
            Err(e) => debug!(error = %e, "UID read after insertion failed"),
        }
    }
}
