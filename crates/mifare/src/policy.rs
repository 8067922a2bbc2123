//! Authentication fallback policy
//!
//! Reader stacks disagree on which command form they accept and on whether the
//! address should be the sector trailer or the target block. One policy run tries a
//! fixed, bounded candidate list in order and stops at the first success:
//!
//! 1. modern form, trailer, requested key type
//! 2. modern form, trailer, opposite key type
//! 3. legacy form, target block, requested key type
//! 4. legacy form, target block, opposite key type
//! 5. optionally each well-known default key, modern form, trailer, requested key type

use std::fmt;

use mifare_apdu_core::prelude::*;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::adapter::Exclusive;
use crate::codec;
use crate::error::{Error, Result};
use crate::session::{Authenticated, Session};
use crate::types::{Block, KeyMaterial, KeyType};

/// Authentication command encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthForm {
    /// GENERAL AUTHENTICATE (`FF 86`)
    Modern,
    /// Obsolete AUTHENTICATE (`FF 88`)
    Legacy,
}

/// Which address an authentication command carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTarget {
    /// The sector trailer
    Trailer,
    /// The block about to be accessed
    Block,
}

/// How a sector was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthMethod {
    /// Command encoding
    pub form: AuthForm,
    /// Address kind
    pub target: AuthTarget,
    /// Key type
    pub key_type: KeyType,
}

impl AuthMethod {
    /// Create a method description
    pub const fn new(form: AuthForm, target: AuthTarget, key_type: KeyType) -> Self {
        Self {
            form,
            target,
            key_type,
        }
    }

    /// Address to put in the command when accessing `block`
    pub const fn address(&self, block: Block) -> Block {
        match self.target {
            AuthTarget::Trailer => block.sector().trailer(),
            AuthTarget::Block => block,
        }
    }

    /// Stable diagnostic tag, e.g. `legacy-block-key-b`
    pub const fn tag(&self) -> &'static str {
        match (self.form, self.target, self.key_type) {
            (AuthForm::Modern, AuthTarget::Trailer, KeyType::A) => "modern-trailer-key-a",
            (AuthForm::Modern, AuthTarget::Trailer, KeyType::B) => "modern-trailer-key-b",
            (AuthForm::Modern, AuthTarget::Block, KeyType::A) => "modern-block-key-a",
            (AuthForm::Modern, AuthTarget::Block, KeyType::B) => "modern-block-key-b",
            (AuthForm::Legacy, AuthTarget::Trailer, KeyType::A) => "legacy-trailer-key-a",
            (AuthForm::Legacy, AuthTarget::Trailer, KeyType::B) => "legacy-trailer-key-b",
            (AuthForm::Legacy, AuthTarget::Block, KeyType::A) => "legacy-block-key-a",
            (AuthForm::Legacy, AuthTarget::Block, KeyType::B) => "legacy-block-key-b",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for AuthMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// One entry of the fallback list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Form, addressing and key type
    pub method: AuthMethod,
    /// Key to load before authenticating
    pub key: KeyMaterial,
}

/// Build the ordered candidate list for one policy run
///
/// Default keys equal to the caller's key are skipped, as are duplicates.
pub fn candidates(key_type: KeyType, key: KeyMaterial, default_keys: &[KeyMaterial]) -> Vec<Candidate> {
    let opposite = key_type.opposite();
    let mut list = vec![
        Candidate {
            method: AuthMethod::new(AuthForm::Modern, AuthTarget::Trailer, key_type),
            key,
        },
        Candidate {
            method: AuthMethod::new(AuthForm::Modern, AuthTarget::Trailer, opposite),
            key,
        },
        Candidate {
            method: AuthMethod::new(AuthForm::Legacy, AuthTarget::Block, key_type),
            key,
        },
        Candidate {
            method: AuthMethod::new(AuthForm::Legacy, AuthTarget::Block, opposite),
            key,
        },
    ];

    let mut seen = vec![key];
    for default in default_keys {
        if seen.contains(default) {
            continue;
        }
        seen.push(*default);
        list.push(Candidate {
            method: AuthMethod::new(AuthForm::Modern, AuthTarget::Trailer, key_type),
            key: *default,
        });
    }

    list
}

/// Parameters of one policy run
#[derive(Debug, Clone, Copy)]
pub(crate) struct AuthRequest<'a> {
    /// Block about to be accessed
    pub(crate) block: Block,
    pub(crate) key_type: KeyType,
    pub(crate) key: KeyMaterial,
    pub(crate) slot: u8,
    /// Empty when default-key fallback is disabled
    pub(crate) default_keys: &'a [KeyMaterial],
}

/// Load `key` into `slot`, returning the status word on refusal
pub(crate) fn load_key<T: CardTransport>(
    channel: &mut Exclusive<'_, T>,
    session: &mut Session,
    slot: u8,
    key: KeyMaterial,
) -> Result<std::result::Result<(), StatusWord>> {
    let response = channel.exchange(&codec::encode_load_key(slot, &key), codec::STATUS_RESPONSE_LEN)?;
    if response.is_success() {
        session.key_loaded(slot, key);
        Ok(Ok(()))
    } else {
        warn!(slot, status = %response.status(), "Load key refused");
        session.key_unknown();
        Ok(Err(response.status()))
    }
}

/// Run the fallback policy for the sector holding `request.block`
///
/// The caller's key is always reloaded first. A refusal of that load ends the run with
/// [`Error::KeyLoadFailed`] before any authentication is attempted.
pub(crate) fn authenticate<T: CardTransport>(
    channel: &mut Exclusive<'_, T>,
    session: &mut Session,
    request: AuthRequest<'_>,
) -> Result<Authenticated> {
    if channel.generation() != session.generation() {
        // The card changed under us; nothing learned so far applies
        return Err(Error::NoCard);
    }

    let sector = request.block.sector();

    if let Err(status) = load_key(channel, session, request.slot, request.key)? {
        return Err(Error::KeyLoadFailed { status });
    }

    let mut last_status = status::OPERATION_FAILED;

    for candidate in candidates(request.key_type, request.key, request.default_keys) {
        if !session.is_loaded(request.slot, &candidate.key) {
            if let Err(status) = load_key(channel, session, request.slot, candidate.key)? {
                last_status = status;
                continue;
            }
        }

        let method = candidate.method;
        let command = codec::encode_authenticate(
            method.address(request.block),
            method.key_type,
            request.slot,
            method.form == AuthForm::Legacy,
        );
        let response = channel.exchange(&command, codec::STATUS_RESPONSE_LEN)?;

        if response.is_success() {
            let auth = Authenticated {
                sector,
                method,
                key: candidate.key,
            };
            info!(%sector, %method, "Sector authenticated");
            session.authenticated(auth);
            return Ok(auth);
        }

        debug!(%sector, %method, status = %response.status(), "Authentication candidate rejected");
        session.invalidate(sector);
        last_status = response.status();
    }

    warn!(%sector, status = %last_status, "All authentication candidates rejected");
    Err(Error::AuthenticationExhausted {
        sector: sector.number(),
        status: last_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> KeyMaterial {
        s.parse().unwrap()
    }

    #[test]
    fn test_candidate_order() {
        let list = candidates(KeyType::A, key("A0A1A2A3A4A5"), &[]);
        let tags: Vec<_> = list.iter().map(|c| c.method.tag()).collect();
        assert_eq!(
            tags,
            [
                "modern-trailer-key-a",
                "modern-trailer-key-b",
                "legacy-block-key-a",
                "legacy-block-key-b",
            ]
        );
    }

    #[test]
    fn test_default_keys_skip_caller_key() {
        let defaults = [
            KeyMaterial::FACTORY_DEFAULT,
            key("A0A1A2A3A4A5"),
            key("A0A1A2A3A4A5"),
            key("D3F7D3F7D3F7"),
        ];
        let list = candidates(KeyType::B, KeyMaterial::FACTORY_DEFAULT, &defaults);
        assert_eq!(list.len(), 6);
        assert_eq!(list[4].key, key("A0A1A2A3A4A5"));
        assert_eq!(list[5].key, key("D3F7D3F7D3F7"));
        assert!(list[4..].iter().all(|c| c.method.tag() == "modern-trailer-key-b"));
    }

    #[test]
    fn test_method_addressing() {
        let block = Block::new(9).unwrap();
        let trailer = AuthMethod::new(AuthForm::Modern, AuthTarget::Trailer, KeyType::A);
        let direct = AuthMethod::new(AuthForm::Legacy, AuthTarget::Block, KeyType::A);
        assert_eq!(trailer.address(block).number(), 11);
        assert_eq!(direct.address(block).number(), 9);
    }
}
