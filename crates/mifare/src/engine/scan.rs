//! Diagnostic walk over the sectors of the card in the field

use mifare_apdu_core::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::{Engine, read_block};
use crate::card::CardKind;
use crate::codec;
use crate::error::{Error, Result};
use crate::policy::{self, AuthForm, AuthMethod, AuthTarget};
use crate::session::Authenticated;
use crate::types::{Block, KeyType, MAX_SECTOR, Sector};

/// What the diagnostic scan learned about one sector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorScan {
    /// Sector number
    pub sector: Sector,
    /// Trailer block address
    pub trailer_block: Block,
    /// Key A authentication succeeded
    pub key_a: bool,
    /// Key B authentication succeeded
    pub key_b: bool,
    /// Data blocks that could be read
    pub readable: Vec<Block>,
}

/// Result of the diagnostic scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardScan {
    /// Whether a card was in the field
    pub card_present: bool,
    /// One entry per scanned sector
    pub sectors: Vec<SectorScan>,
}

impl<T: CardTransport> Engine<T> {
    /// Probe Key A and Key B of the scan key against every trailer
    ///
    /// The key is loaded fresh for every sector and key type. This is a best-effort
    /// capability probe, not a complete card map.
    #[instrument(skip(self))]
    pub fn debug_card(&self) -> Result<CardScan> {
        let (mut channel, mut session) = match self.begin() {
            Ok(held) => held,
            Err(Error::NoCard) => {
                return Ok(CardScan {
                    card_present: false,
                    sectors: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let slot = self.config.key_slot;
        let key = self.config.scan_key;
        let card_sectors = self
            .adapter
            .card()
            .and_then(|card| CardKind::from_atr(&card.atr).sectors())
            .unwrap_or(MAX_SECTOR + 1);
        let limit = self.config.scan_sectors.min(card_sectors).min(MAX_SECTOR + 1);

        let mut sectors = Vec::with_capacity(limit as usize);
        for number in 0..limit {
            let sector = Sector::new(u32::from(number))?;
            let mut scan = SectorScan {
                sector,
                trailer_block: sector.trailer(),
                key_a: false,
                key_b: false,
                readable: Vec::new(),
            };

            for key_type in [KeyType::A, KeyType::B] {
                if let Err(status) = policy::load_key(&mut channel, &mut session, slot, key)? {
                    return Err(Error::KeyLoadFailed { status });
                }

                let response = channel.exchange(
                    &codec::encode_authenticate(sector.trailer(), key_type, slot, false),
                    codec::STATUS_RESPONSE_LEN,
                )?;
                if !response.is_success() {
                    debug!(%sector, %key_type, status = %response.status(), "Scan authentication rejected");
                    session.invalidate(sector);
                    continue;
                }

                match key_type {
                    KeyType::A => scan.key_a = true,
                    KeyType::B => scan.key_b = true,
                }

                let auth = Authenticated {
                    sector,
                    method: AuthMethod::new(AuthForm::Modern, AuthTarget::Trailer, key_type),
                    key,
                };
                session.authenticated(auth);

                for block in sector.data_blocks() {
                    if scan.readable.contains(&block) {
                        continue;
                    }
                    match read_block(&mut channel, block, auth) {
                        Ok(_) => scan.readable.push(block),
                        Err(e) => {
                            debug!(%block, %key_type, error = %e, "Scan read failed");
                            // The card drops its crypto session on a refused read
                            session.invalidate(sector);
                            break;
                        }
                    }
                }
            }

            scan.readable.sort();
            sectors.push(scan);
        }

        info!(sectors = sectors.len(), "Card scan finished");
        Ok(CardScan {
            card_present: true,
            sectors,
        })
    }
}
