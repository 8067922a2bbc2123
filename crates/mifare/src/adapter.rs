//! Transport adapter: one physical channel plus presence state
//!
//! The adapter owns the reader's [`CardTransport`] behind a single lock so that at most
//! one exchange is ever in flight. Presence is tracked separately and updated by the
//! discovery layer through the `on_*` transitions; operations poll it before every call.

use mifare_apdu_core::prelude::*;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use tracing::{Level, debug, info, warn};

use crate::codec;

/// Snapshot of the card currently in the field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPresence {
    /// Answer To Reset reported on insertion
    pub atr: Vec<u8>,
    /// UID, once it has been read for this insertion
    pub uid: Option<Vec<u8>>,
}

/// Presence summary for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderStatus {
    /// A reader is attached
    pub reader_detected: bool,
    /// A card is in the field
    pub card_present: bool,
    /// Name of the attached reader
    pub reader_name: Option<String>,
    /// UID of the card in the field, once known
    #[serde(rename = "cardUID")]
    pub card_uid: Option<String>,
}

#[derive(Debug, Default)]
struct Presence {
    reader: Option<String>,
    card: Option<CardPresence>,
    /// Bumped on every card or reader transition
    generation: u64,
}

/// Serialized access to a single reader
#[derive(Debug)]
pub struct TransportAdapter<T> {
    presence: RwLock<Presence>,
    channel: Mutex<Option<T>>,
}

impl<T> Default for TransportAdapter<T> {
    fn default() -> Self {
        Self {
            presence: RwLock::new(Presence::default()),
            channel: Mutex::new(None),
        }
    }
}

impl<T: CardTransport> TransportAdapter<T> {
    /// Create an adapter with no reader attached
    pub fn new() -> Self {
        Self::default()
    }

    /// A reader has been attached and opened
    pub fn on_reader_attached(&self, name: impl Into<String>, transport: T) {
        let name = name.into();
        info!(reader = %name, "Reader attached");

        let previous = self.channel.lock().replace(transport);
        drop(previous);

        let mut presence = self.presence.write();
        presence.reader = Some(name);
        presence.card = None;
        presence.generation += 1;
    }

    /// The attached reader went away
    pub fn on_reader_detached(&self) {
        {
            let mut presence = self.presence.write();
            if let Some(name) = presence.reader.take() {
                info!(reader = %name, "Reader detached");
            }
            presence.card = None;
            presence.generation += 1;
        }

        self.channel.lock().take();
    }

    /// A card entered the field
    pub fn on_card_inserted(&self, atr: Vec<u8>) {
        info!(atr = %hex::encode_upper(&atr), "Card inserted");
        let mut presence = self.presence.write();
        presence.card = Some(CardPresence { atr, uid: None });
        presence.generation += 1;
    }

    /// The card left the field
    pub fn on_card_removed(&self) {
        {
            let mut presence = self.presence.write();
            if presence.card.take().is_some() {
                info!("Card removed");
            }
            presence.generation += 1;
        }

        if let Some(transport) = self.channel.lock().as_mut() {
            transport.disconnect();
        }
    }

    /// Whether a reader is attached
    pub fn is_reader_present(&self) -> bool {
        self.presence.read().reader.is_some()
    }

    /// Whether a card is in the field
    pub fn is_card_present(&self) -> bool {
        let presence = self.presence.read();
        presence.reader.is_some() && presence.card.is_some()
    }

    /// Name of the attached reader
    pub fn reader_name(&self) -> Option<String> {
        self.presence.read().reader.clone()
    }

    /// The card currently in the field
    pub fn card(&self) -> Option<CardPresence> {
        self.presence.read().card.clone()
    }

    /// Presence summary; never touches the card
    pub fn status(&self) -> ReaderStatus {
        let presence = self.presence.read();
        let card = presence.reader.as_ref().and(presence.card.as_ref());
        ReaderStatus {
            reader_detected: presence.reader.is_some(),
            card_present: card.is_some(),
            reader_name: presence.reader.clone(),
            card_uid: card.and_then(|c| c.uid.as_deref()).map(hex::encode_upper),
        }
    }

    /// Current presence generation
    pub fn generation(&self) -> u64 {
        self.presence.read().generation
    }

    /// Remember the UID of the card that was present at `generation`
    ///
    /// Ignored if the card changed in the meantime.
    pub(crate) fn cache_uid(&self, generation: u64, uid: Vec<u8>) {
        let mut presence = self.presence.write();
        if presence.generation != generation {
            debug!("Card changed while reading UID, not caching");
            return;
        }
        if let Some(card) = presence.card.as_mut() {
            card.uid = Some(uid);
        }
    }

    /// Fail with the matching no-device error if there is nothing to talk to
    pub fn ensure_card(&self) -> Result<(), TransportError> {
        let presence = self.presence.read();
        if presence.reader.is_none() {
            return Err(TransportError::NoReader);
        }
        if presence.card.is_none() {
            return Err(TransportError::NoCard);
        }
        Ok(())
    }

    /// Take the channel for a sequence of exchanges
    ///
    /// Blocks until every other holder has finished.
    pub fn exclusive(&self) -> Exclusive<'_, T> {
        Exclusive {
            adapter: self,
            channel: self.channel.lock(),
        }
    }

    /// Transmit a single command
    pub fn transmit(&self, command: &[u8], max_response_len: usize) -> Result<Bytes, TransportError> {
        self.exclusive().transmit(command, max_response_len)
    }
}

/// Exclusive hold on the adapter's channel
#[derive(Debug)]
pub struct Exclusive<'a, T> {
    adapter: &'a TransportAdapter<T>,
    channel: MutexGuard<'a, Option<T>>,
}

impl<T: CardTransport> Exclusive<'_, T> {
    /// Transmit one command while holding the channel
    pub fn transmit(&mut self, command: &[u8], max_response_len: usize) -> Result<Bytes, TransportError> {
        self.adapter.ensure_card()?;
        let transport = self.channel.as_mut().ok_or(TransportError::NoReader)?;
        transport.transmit_raw(command, max_response_len)
    }

    /// Transmit one command and split off the status word
    pub(crate) fn exchange(&mut self, command: &[u8], max_response_len: usize) -> crate::Result<Response> {
        let raw = self.transmit(command, max_response_len)?;
        let response = codec::decode_status(&raw)?;

        let status = response.status();
        let level = status.tracing_level();
        if level == Level::DEBUG {
            debug!(%status, "{}", status.description());
        } else if level == Level::INFO {
            info!(%status, "{}", status.description());
        } else {
            warn!(%status, "{}", status.description());
        }
        Ok(response)
    }

    /// Presence generation observed under the lock
    pub fn generation(&self) -> u64 {
        self.adapter.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedCard;

    #[test]
    fn test_presence_transitions() {
        let adapter = TransportAdapter::new();
        assert!(!adapter.is_reader_present());
        assert_eq!(adapter.ensure_card(), Err(TransportError::NoReader));

        adapter.on_reader_attached("Sim Reader 0", SimulatedCard::new());
        assert!(adapter.is_reader_present());
        assert!(!adapter.is_card_present());
        assert_eq!(adapter.ensure_card(), Err(TransportError::NoCard));

        adapter.on_card_inserted(vec![0x3B, 0x8F]);
        assert!(adapter.is_card_present());
        assert_eq!(adapter.reader_name().as_deref(), Some("Sim Reader 0"));

        let status = adapter.status();
        assert!(status.reader_detected && status.card_present);
        assert_eq!(status.card_uid, None);

        adapter.on_card_removed();
        assert!(!adapter.is_card_present());
        assert!(adapter.is_reader_present());

        adapter.on_reader_detached();
        assert!(!adapter.is_reader_present());
    }

    #[test]
    fn test_transmit_requires_card() {
        let adapter = TransportAdapter::new();
        let card = SimulatedCard::new();
        let handle = card.handle();
        adapter.on_reader_attached("Sim Reader 0", card);

        let get_uid = crate::codec::encode_get_uid();
        assert_eq!(
            adapter.transmit(&get_uid, 12),
            Err(TransportError::NoCard)
        );
        assert!(handle.trace().is_empty());

        adapter.on_card_inserted(handle.atr());
        let response = adapter.transmit(&get_uid, 12).unwrap();
        assert_eq!(&response[response.len() - 2..], &[0x90, 0x00]);
        assert_eq!(handle.trace().len(), 1);
    }

    #[test]
    fn test_uid_cache_respects_generation() {
        let adapter = TransportAdapter::new();
        adapter.on_reader_attached("Sim Reader 0", SimulatedCard::new());
        adapter.on_card_inserted(vec![0x3B]);

        let stale = adapter.generation();
        adapter.on_card_removed();
        adapter.on_card_inserted(vec![0x3B]);
        adapter.cache_uid(stale, vec![1, 2, 3, 4]);
        assert_eq!(adapter.card().unwrap().uid, None);

        adapter.cache_uid(adapter.generation(), vec![1, 2, 3, 4]);
        assert_eq!(adapter.card().unwrap().uid, Some(vec![1, 2, 3, 4]));
    }
}
