//! Sector and block orchestration on top of the transport adapter
//!
//! Every top-level operation holds the adapter's channel for its whole duration and
//! starts from an empty [`Session`]: the reader's key slot and crypto state are reloaded
//! rather than trusted. Sector operations always yield one outcome per data block, in
//! ascending order. Only key-load refusals on the first policy run, input errors and
//! missing devices abort a call.

mod outcome;
mod scan;

use std::sync::Arc;

use mifare_apdu_core::prelude::*;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, instrument};

pub use outcome::{BlockAccess, BlockOutcome};
pub use scan::{CardScan, SectorScan};

use crate::adapter::{Exclusive, TransportAdapter};
use crate::card::{CardInfo, CardKind};
use crate::codec;
use crate::config::EngineConfig;
use crate::error::{Error, Operation, Result};
use crate::policy::{self, AuthForm, AuthMethod, AuthRequest, AuthTarget};
use crate::session::{Authenticated, Session};
use crate::types::{Block, BlockData, KeyMaterial, KeyType, Sector};

/// MIFARE Classic access engine
#[derive(Debug)]
pub struct Engine<T> {
    adapter: Arc<TransportAdapter<T>>,
    /// Exclusively owned; only locked while the adapter channel is held
    session: Mutex<Session>,
    config: EngineConfig,
}

impl<T: CardTransport> Engine<T> {
    /// Create an engine driving `adapter`
    pub fn new(adapter: Arc<TransportAdapter<T>>, config: EngineConfig) -> Self {
        Self {
            adapter,
            session: Mutex::new(Session::default()),
            config,
        }
    }

    /// The adapter this engine drives
    pub const fn adapter(&self) -> &Arc<TransportAdapter<T>> {
        &self.adapter
    }

    /// Engine configuration
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take the channel, check presence and start from a clean session
    fn begin(&self) -> Result<(Exclusive<'_, T>, MutexGuard<'_, Session>)> {
        let channel = self.adapter.exclusive();
        self.adapter.ensure_card()?;

        let mut session = self.session.lock();
        session.reset(channel.generation());
        Ok((channel, session))
    }

    /// Read the three data blocks of a sector
    ///
    /// The fallback policy runs once up front. A failed read invalidates the session,
    /// reruns the policy and retries that block once.
    #[instrument(skip(self, key))]
    pub fn read_sector(&self, sector: Sector, key_type: KeyType, key: KeyMaterial) -> Result<Vec<BlockOutcome>> {
        let (mut channel, mut session) = self.begin()?;
        let mut run = SectorRun::new(&mut channel, &mut session, &self.config, sector, key_type, key);
        let mut outcomes = Vec::with_capacity(3);

        for block in sector.data_blocks() {
            let auth = match run.ensure_authenticated(block) {
                Ok(auth) => auth,
                Err(e) if run.is_fatal(&e) => return Err(e),
                Err(e) => {
                    outcomes.push(BlockOutcome::failure(block, e));
                    continue;
                }
            };

            let outcome = match read_block(run.channel, block, auth) {
                Ok(access) => BlockOutcome::success(block, access),
                Err(first) => {
                    debug!(%block, error = %first, "Read failed, re-authenticating");
                    run.invalidate();
                    match run
                        .ensure_authenticated(block)
                        .and_then(|auth| read_block(run.channel, block, auth))
                    {
                        Ok(access) => BlockOutcome::success(block, access),
                        Err(e) => {
                            run.invalidate();
                            BlockOutcome::failure(block, e)
                        }
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Write the three data blocks of a sector
    ///
    /// `data_blocks` must hold exactly three 32 character hex strings. The whole call is
    /// rejected before any exchange otherwise.
    #[instrument(skip(self, key, data_blocks))]
    pub fn write_sector<S: AsRef<str>>(
        &self,
        sector: Sector,
        key_type: KeyType,
        key: KeyMaterial,
        data_blocks: &[S],
    ) -> Result<Vec<BlockOutcome>> {
        let data = parse_data_blocks(data_blocks)?;

        let (mut channel, mut session) = self.begin()?;
        let mut run = SectorRun::new(&mut channel, &mut session, &self.config, sector, key_type, key);
        let mut outcomes = Vec::with_capacity(3);

        for (block, data) in sector.data_blocks().into_iter().zip(data) {
            let auth = match run.ensure_authenticated(block) {
                Ok(auth) => auth,
                Err(e) if run.is_fatal(&e) => return Err(e),
                Err(e) => {
                    outcomes.push(BlockOutcome::failure(block, e));
                    continue;
                }
            };

            let outcome = match write_block(run.channel, block, &data, auth) {
                Ok(access) => BlockOutcome::success(block, access),
                Err(e) => {
                    run.invalidate();
                    BlockOutcome::failure(block, e)
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Read one block, authenticating directly against it with the modern form
    ///
    /// Trailer blocks may be read for diagnostics.
    #[instrument(skip(self, key))]
    pub fn read_single_block(&self, block: Block, key_type: KeyType, key: KeyMaterial) -> Result<BlockAccess> {
        let (mut channel, mut session) = self.begin()?;
        let auth = self.authenticate_direct(&mut channel, &mut session, block, key_type, key)?;
        read_block(&mut channel, block, auth)
    }

    /// Write one data block, authenticating directly against it with the modern form
    #[instrument(skip(self, key, data))]
    pub fn write_single_block(
        &self,
        block: Block,
        key_type: KeyType,
        key: KeyMaterial,
        data: &str,
    ) -> Result<BlockAccess> {
        let data: BlockData = data.parse()?;
        if block.is_trailer() {
            return Err(Error::invalid_input(format!(
                "Block {block} is a sector trailer and cannot be written"
            )));
        }

        let (mut channel, mut session) = self.begin()?;
        let auth = self.authenticate_direct(&mut channel, &mut session, block, key_type, key)?;
        write_block(&mut channel, block, &data, auth)
    }

    /// Single attempt: load the key, modern form, addressed at `block`
    fn authenticate_direct(
        &self,
        channel: &mut Exclusive<'_, T>,
        session: &mut Session,
        block: Block,
        key_type: KeyType,
        key: KeyMaterial,
    ) -> Result<Authenticated> {
        let slot = self.config.key_slot;
        if let Err(status) = policy::load_key(channel, session, slot, key)? {
            return Err(Error::KeyLoadFailed { status });
        }

        let sector = block.sector();
        let method = AuthMethod::new(AuthForm::Modern, AuthTarget::Block, key_type);
        let response = channel.exchange(
            &codec::encode_authenticate(block, key_type, slot, false),
            codec::STATUS_RESPONSE_LEN,
        )?;

        if !response.is_success() {
            session.invalidate(sector);
            return Err(Error::AuthenticationExhausted {
                sector: sector.number(),
                status: response.status(),
            });
        }

        let auth = Authenticated {
            sector,
            method,
            key,
        };
        session.authenticated(auth);
        Ok(auth)
    }

    /// UID of the card in the field, cached per insertion
    #[instrument(skip(self))]
    pub fn read_uid(&self) -> Result<Vec<u8>> {
        let mut channel = self.adapter.exclusive();
        self.adapter.ensure_card()?;

        if let Some(uid) = self.adapter.card().and_then(|card| card.uid) {
            return Ok(uid);
        }

        let generation = channel.generation();
        let response = channel.exchange(&codec::encode_get_uid(), codec::STATUS_RESPONSE_LEN)?;
        if !response.is_success() {
            return Err(Error::UidReadFailed {
                status: response.status(),
            });
        }

        let uid = response.payload().to_vec();
        debug!(uid = %hex::encode_upper(&uid), "Read card UID");
        self.adapter.cache_uid(generation, uid.clone());
        Ok(uid)
    }

    /// UID, ATR and decoded kind of the card in the field
    pub fn card_info(&self) -> Result<CardInfo> {
        let uid = self.read_uid()?;
        let card = self.adapter.card().ok_or(Error::NoCard)?;

        Ok(CardInfo {
            uid: hex::encode_upper(uid),
            atr: hex::encode_upper(&card.atr),
            kind: CardKind::from_atr(&card.atr),
        })
    }
}

/// Validate write input: exactly three blocks of 32 hex characters
fn parse_data_blocks<S: AsRef<str>>(data_blocks: &[S]) -> Result<[BlockData; 3]> {
    let [first, second, third] = data_blocks else {
        return Err(Error::invalid_input(format!(
            "Exactly 3 data blocks are required, got {}",
            data_blocks.len()
        )));
    };

    let parse = |index: usize, value: &S| {
        value.as_ref().parse::<BlockData>().map_err(|_| {
            Error::invalid_input(format!(
                "Data block {index} must be exactly 32 hex characters"
            ))
        })
    };

    Ok([parse(0, first)?, parse(1, second)?, parse(2, third)?])
}

fn read_block<T: CardTransport>(
    channel: &mut Exclusive<'_, T>,
    block: Block,
    auth: Authenticated,
) -> Result<BlockAccess> {
    let response = channel.exchange(&codec::encode_read_block(block), codec::READ_RESPONSE_LEN)?;
    if !response.is_success() {
        return Err(Error::BlockOperationFailed {
            block: block.number(),
            operation: Operation::Read,
            status: response.status(),
        });
    }

    let data = BlockData::try_from(response.payload().as_ref())
        .map_err(|_| ResponseError::parse("Block read returned the wrong length"))?;

    Ok(BlockAccess {
        data,
        auth_method: auth.method,
        key_used: auth.key,
    })
}

fn write_block<T: CardTransport>(
    channel: &mut Exclusive<'_, T>,
    block: Block,
    data: &BlockData,
    auth: Authenticated,
) -> Result<BlockAccess> {
    let response = channel.exchange(&codec::encode_write_block(block, data), codec::STATUS_RESPONSE_LEN)?;
    if !response.is_success() {
        return Err(Error::BlockOperationFailed {
            block: block.number(),
            operation: Operation::Write,
            status: response.status(),
        });
    }

    Ok(BlockAccess {
        data: *data,
        auth_method: auth.method,
        key_used: auth.key,
    })
}

/// Per-call state of a sector operation
struct SectorRun<'r, 'a, T> {
    channel: &'r mut Exclusive<'a, T>,
    session: &'r mut Session,
    config: &'r EngineConfig,
    sector: Sector,
    key_type: KeyType,
    key: KeyMaterial,
    /// Policy runs so far
    runs: usize,
    /// Exhaustion is terminal for the sector within one call
    exhausted: Option<Error>,
}

impl<'r, 'a, T: CardTransport> SectorRun<'r, 'a, T> {
    fn new(
        channel: &'r mut Exclusive<'a, T>,
        session: &'r mut Session,
        config: &'r EngineConfig,
        sector: Sector,
        key_type: KeyType,
        key: KeyMaterial,
    ) -> Self {
        Self {
            channel,
            session,
            config,
            sector,
            key_type,
            key,
            runs: 0,
            exhausted: None,
        }
    }

    /// A live authentication for the sector, running the policy when there is none
    fn ensure_authenticated(&mut self, block: Block) -> Result<Authenticated> {
        if let Some(error) = &self.exhausted {
            return Err(error.clone());
        }
        if let Some(auth) = self.session.authenticated_for(self.sector) {
            return Ok(auth);
        }

        self.runs += 1;
        let result = policy::authenticate(
            self.channel,
            self.session,
            AuthRequest {
                block,
                key_type: self.key_type,
                key: self.key,
                slot: self.config.key_slot,
                default_keys: self.config.fallback_keys(),
            },
        );

        if let Err(error @ Error::AuthenticationExhausted { .. }) = &result {
            self.exhausted = Some(error.clone());
        }
        result
    }

    /// Errors of the first policy run abort the call, except exhaustion
    fn is_fatal(&self, error: &Error) -> bool {
        self.runs <= 1 && !matches!(error, Error::AuthenticationExhausted { .. })
    }

    fn invalidate(&mut self) {
        self.session.invalidate(self.sector);
    }
}
