//! In-memory MIFARE Classic 1K behind a [`CardTransport`]
//!
//! The simulated card interprets the reader pseudo-commands the engine emits, keeps a
//! trace of every command it received and flags any exchange that starts while another
//! is still in flight. Behaviour is scripted through a cloneable [`SimulatorHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mifare_apdu_core::prelude::*;
use parking_lot::Mutex;
use tracing::trace;

use crate::codec::MifareCommand;
use crate::types::{BLOCK_SIZE, BLOCKS_PER_SECTOR, Block, BlockData, KeyMaterial, KeyType, Sector};

/// Sectors of a 1K card
const SECTORS: usize = 16;
/// Reader key slots
const KEY_SLOTS: usize = 2;
/// Access bits of a transport configuration trailer
const TRANSPORT_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

/// Single size UID of a fresh simulated card
pub const DEFAULT_UID: [u8; 4] = [0x04, 0xA1, 0xB2, 0xC3];

/// ATR a PC/SC reader synthesizes for a MIFARE Classic 1K
pub const CLASSIC_1K_ATR: [u8; 20] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x6A,
];

/// Which authentication command forms the simulated reader accepts for a key type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedForms {
    /// GENERAL AUTHENTICATE
    pub modern: bool,
    /// Obsolete AUTHENTICATE
    pub legacy: bool,
}

impl AcceptedForms {
    /// Both forms
    pub const ALL: Self = Self {
        modern: true,
        legacy: true,
    };
    /// Neither form
    pub const NONE: Self = Self {
        modern: false,
        legacy: false,
    };
    /// Only the obsolete form
    pub const LEGACY_ONLY: Self = Self {
        modern: false,
        legacy: true,
    };
    /// Only GENERAL AUTHENTICATE
    pub const MODERN_ONLY: Self = Self {
        modern: true,
        legacy: false,
    };
}

#[derive(Debug)]
struct State {
    memory: Vec<[u8; BLOCK_SIZE]>,
    uid: Vec<u8>,
    present: bool,
    accepted: HashMap<KeyType, AcceptedForms>,
    slots: [Option<KeyMaterial>; KEY_SLOTS],
    authenticated: Option<(Sector, KeyType)>,
    /// Status forced for an instruction byte
    overrides: HashMap<u8, StatusWord>,
    /// Status forced for reads of specific blocks, consumed once
    read_failures: HashMap<Block, StatusWord>,
    trace: Vec<Bytes>,
    in_flight: bool,
    overlaps: usize,
    latency: Duration,
}

impl State {
    fn new(uid: Vec<u8>) -> Self {
        let mut memory = vec![[0u8; BLOCK_SIZE]; SECTORS * BLOCKS_PER_SECTOR as usize];

        // Manufacturer block: single size UIDs carry BCC, SAK and ATQA after the UID
        if uid.len() == 4 {
            let bcc = uid.iter().fold(0u8, |acc, b| acc ^ b);
            memory[0][..4].copy_from_slice(&uid);
            memory[0][4] = bcc;
            memory[0][5..8].copy_from_slice(&[0x08, 0x04, 0x00]);
        } else {
            let len = uid.len().min(BLOCK_SIZE);
            memory[0][..len].copy_from_slice(&uid[..len]);
        }

        for sector in 0..SECTORS {
            memory[sector * 4 + 3] = trailer(&KeyMaterial::FACTORY_DEFAULT, &KeyMaterial::FACTORY_DEFAULT);
        }

        Self {
            memory,
            uid,
            present: true,
            accepted: HashMap::from([(KeyType::A, AcceptedForms::ALL), (KeyType::B, AcceptedForms::ALL)]),
            slots: [None; KEY_SLOTS],
            authenticated: None,
            overrides: HashMap::new(),
            read_failures: HashMap::new(),
            trace: Vec::new(),
            in_flight: false,
            overlaps: 0,
            latency: Duration::ZERO,
        }
    }

    fn sector_key(&self, sector: Sector, key_type: KeyType) -> KeyMaterial {
        let trailer = &self.memory[sector.trailer().number() as usize];
        let range = match key_type {
            KeyType::A => 0..6,
            KeyType::B => 10..16,
        };
        let mut key = [0u8; 6];
        key.copy_from_slice(&trailer[range]);
        KeyMaterial::new(key)
    }

    fn block_exists(&self, block: Block) -> bool {
        (block.number() as usize) < self.memory.len()
    }

    fn process(&mut self, command: &[u8]) -> Bytes {
        let Ok(decoded) = MifareCommand::decode(command) else {
            return status_only(status::INVALID_INSTRUCTION);
        };

        if let Some(forced) = self.overrides.get(&command[1]) {
            if matches!(decoded, MifareCommand::Authenticate { .. }) {
                self.authenticated = None;
            }
            return status_only(*forced);
        }

        match decoded {
            MifareCommand::LoadKey { slot, key } => match self.slots.get_mut(slot as usize) {
                Some(entry) => {
                    *entry = Some(key);
                    status_only(status::SUCCESS)
                }
                None => status_only(status::COMMAND_NOT_ALLOWED),
            },
            MifareCommand::Authenticate {
                address,
                key_type,
                slot,
                legacy,
            } => {
                self.authenticated = None;
                let forms = self.accepted.get(&key_type).copied().unwrap_or(AcceptedForms::NONE);
                let form_ok = if legacy { forms.legacy } else { forms.modern };
                let loaded = self.slots.get(slot as usize).copied().flatten();
                if !form_ok || !self.block_exists(address) {
                    return status_only(status::OPERATION_FAILED);
                }

                let sector = address.sector();
                match loaded {
                    Some(key) if key == self.sector_key(sector, key_type) => {
                        self.authenticated = Some((sector, key_type));
                        status_only(status::SUCCESS)
                    }
                    _ => status_only(status::OPERATION_FAILED),
                }
            }
            MifareCommand::Read { block } => {
                if let Some(forced) = self.read_failures.remove(&block) {
                    self.authenticated = None;
                    return status_only(forced);
                }
                if !self.is_authorized(block) {
                    self.authenticated = None;
                    return status_only(status::SECURITY_CONDITION_NOT_SATISFIED);
                }

                let mut data = self.memory[block.number() as usize];
                if block.is_trailer() {
                    // Key A never reads back
                    data[..6].fill(0);
                }
                let mut response = BytesMut::with_capacity(BLOCK_SIZE + 2);
                response.extend_from_slice(&data);
                response.extend_from_slice(&[0x90, 0x00]);
                response.freeze()
            }
            MifareCommand::Write { block, data } => {
                if !self.is_authorized(block) {
                    self.authenticated = None;
                    return status_only(status::SECURITY_CONDITION_NOT_SATISFIED);
                }
                self.memory[block.number() as usize] = *data.as_bytes();
                status_only(status::SUCCESS)
            }
            MifareCommand::GetUid => {
                let mut response = BytesMut::with_capacity(self.uid.len() + 2);
                response.extend_from_slice(&self.uid);
                response.extend_from_slice(&[0x90, 0x00]);
                response.freeze()
            }
        }
    }

    fn is_authorized(&self, block: Block) -> bool {
        self.block_exists(block) && self.authenticated.is_some_and(|(sector, _)| sector == block.sector())
    }
}

fn status_only(status: StatusWord) -> Bytes {
    Bytes::copy_from_slice(&[status.sw1, status.sw2])
}

fn trailer(key_a: &KeyMaterial, key_b: &KeyMaterial) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..6].copy_from_slice(key_a.as_bytes());
    block[6..10].copy_from_slice(&TRANSPORT_ACCESS_BITS);
    block[10..].copy_from_slice(key_b.as_bytes());
    block
}

/// Simulated MIFARE Classic 1K in a contactless reader
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCard {
    /// Blank card with factory default keys; both forms accepted for both key types
    pub fn new() -> Self {
        Self::with_uid(DEFAULT_UID)
    }

    /// Blank card answering GET DATA with `uid` (4, 7 or 10 bytes on real cards)
    pub fn with_uid(uid: impl Into<Vec<u8>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(uid.into()))),
        }
    }

    /// Handle for scripting and inspecting the card
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl CardTransport for SimulatedCard {
    fn do_transmit_raw(&mut self, command: &[u8], max_response_len: usize) -> Result<Bytes, TransportError> {
        let latency = {
            let mut state = self.state.lock();
            if state.in_flight {
                state.overlaps += 1;
            }
            state.in_flight = true;
            state.latency
        };

        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let mut state = self.state.lock();
        state.in_flight = false;
        state.trace.push(Bytes::copy_from_slice(command));

        if !state.present {
            return Err(TransportError::NoCard);
        }

        let response = state.process(command);
        trace!(response = %hex::encode_upper(&response), "Simulated card response");
        if response.len() > max_response_len {
            return Err(TransportError::BufferTooSmall);
        }
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.state.lock().present
    }

    fn disconnect(&mut self) {
        self.state.lock().authenticated = None;
    }
}

/// Scripting and inspection handle shared with a [`SimulatedCard`]
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<State>>,
}

impl SimulatorHandle {
    /// ATR the card presents
    pub fn atr(&self) -> Vec<u8> {
        CLASSIC_1K_ATR.to_vec()
    }

    /// UID the card answers GET DATA with
    pub fn uid(&self) -> Vec<u8> {
        self.state.lock().uid.clone()
    }

    /// Every command received so far, in order
    pub fn trace(&self) -> Vec<Bytes> {
        self.state.lock().trace.clone()
    }

    /// Forget the recorded trace
    pub fn clear_trace(&self) {
        self.state.lock().trace.clear();
    }

    /// Number of exchanges that started while another was in flight
    pub fn overlaps(&self) -> usize {
        self.state.lock().overlaps
    }

    /// Delay every exchange
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Put the card in or take it out of the field
    pub fn set_present(&self, present: bool) {
        let mut state = self.state.lock();
        state.present = present;
        state.authenticated = None;
    }

    /// Restrict the authentication forms accepted for a key type
    pub fn accept(&self, key_type: KeyType, forms: AcceptedForms) {
        self.state.lock().accepted.insert(key_type, forms);
    }

    /// Answer every command with instruction byte `ins` with `status`
    pub fn force_status(&self, ins: u8, status: StatusWord) {
        self.state.lock().overrides.insert(ins, status);
    }

    /// Refuse the next read of `block` with `status`
    pub fn fail_next_read(&self, block: Block, status: StatusWord) {
        self.state.lock().read_failures.insert(block, status);
    }

    /// Replace both keys of a sector, keeping transport access bits
    pub fn set_sector_keys(&self, sector: Sector, key_a: KeyMaterial, key_b: KeyMaterial) {
        self.state.lock().memory[sector.trailer().number() as usize] = trailer(&key_a, &key_b);
    }

    /// Current content of a block
    pub fn block(&self, block: Block) -> BlockData {
        BlockData::new(self.state.lock().memory[block.number() as usize])
    }

    /// Overwrite a block directly
    pub fn set_block(&self, block: Block, data: BlockData) {
        self.state.lock().memory[block.number() as usize] = *data.as_bytes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    fn exchange(card: &mut SimulatedCard, command: &[u8]) -> Response {
        Response::from_bytes(&card.transmit_raw(command, 64).unwrap()).unwrap()
    }

    #[test]
    fn test_read_requires_authentication() {
        let mut card = SimulatedCard::new();
        let block = Block::from(4);

        let denied = exchange(&mut card, &codec::encode_read_block(block));
        assert_eq!(denied.status(), status::SECURITY_CONDITION_NOT_SATISFIED);

        exchange(&mut card, &codec::encode_load_key(0, &KeyMaterial::FACTORY_DEFAULT));
        let auth = exchange(
            &mut card,
            &codec::encode_authenticate(block.sector().trailer(), KeyType::A, 0, false),
        );
        assert!(auth.is_success());

        let read = exchange(&mut card, &codec::encode_read_block(block));
        assert!(read.is_success());
        assert_eq!(read.payload().len(), BLOCK_SIZE);
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let mut card = SimulatedCard::new();
        let handle = card.handle();
        let sector = Sector::new(2).unwrap();
        handle.set_sector_keys(sector, "A0A1A2A3A4A5".parse().unwrap(), KeyMaterial::FACTORY_DEFAULT);

        exchange(&mut card, &codec::encode_load_key(0, &KeyMaterial::FACTORY_DEFAULT));
        let a = exchange(&mut card, &codec::encode_authenticate(sector.trailer(), KeyType::A, 0, false));
        let b = exchange(&mut card, &codec::encode_authenticate(sector.trailer(), KeyType::B, 0, false));
        assert_eq!(a.status(), status::OPERATION_FAILED);
        assert!(b.is_success());
    }

    #[test]
    fn test_trailer_read_hides_key_a() {
        let mut card = SimulatedCard::new();
        let trailer = Sector::new(0).unwrap().trailer();
        exchange(&mut card, &codec::encode_load_key(0, &KeyMaterial::FACTORY_DEFAULT));
        exchange(&mut card, &codec::encode_authenticate(trailer, KeyType::A, 0, false));

        let read = exchange(&mut card, &codec::encode_read_block(trailer));
        assert_eq!(&read.payload()[..6], &[0u8; 6]);
        assert_eq!(&read.payload()[10..], &[0xFF; 6]);
    }

    #[test]
    fn test_double_size_uid() {
        let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mut card = SimulatedCard::with_uid(uid);
        assert_eq!(card.handle().uid(), uid);
        assert_eq!(&card.handle().block(Block::from(0)).as_bytes()[..7], &uid);

        let response = exchange(&mut card, &codec::encode_get_uid());
        assert!(response.is_success());
        assert_eq!(response.payload().as_ref(), &uid);
    }

    #[test]
    fn test_removed_card() {
        let mut card = SimulatedCard::new();
        card.handle().set_present(false);
        assert_eq!(
            card.transmit_raw(&codec::encode_get_uid(), 12),
            Err(TransportError::NoCard)
        );
        assert!(!card.is_connected());
    }
}
