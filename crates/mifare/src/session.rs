//! Authentication session state mirrored from the reader
//!
//! The reader keeps one loaded key per slot and at most one authenticated sector. The
//! session tracks what this process believes that state to be so block operations can
//! skip redundant exchanges. Anything uncertain is dropped rather than guessed.

use crate::policy::AuthMethod;
use crate::types::{KeyMaterial, Sector};

/// A successful sector authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated {
    /// Sector the reader holds a crypto session for
    pub sector: Sector,
    /// Command form and addressing that succeeded
    pub method: AuthMethod,
    /// Key that was accepted
    pub key: KeyMaterial,
}

/// Reader side authentication state as last observed
#[derive(Debug, Default)]
pub(crate) struct Session {
    /// Key believed to sit in the reader slot
    loaded: Option<(u8, KeyMaterial)>,
    /// Sector the reader is authenticated for
    authenticated: Option<Authenticated>,
    /// Presence generation this state belongs to
    generation: u64,
}

impl Session {
    /// Forget everything; called at the start of every top-level operation
    pub(crate) fn reset(&mut self, generation: u64) {
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_loaded(&self, slot: u8, key: &KeyMaterial) -> bool {
        self.loaded.as_ref() == Some(&(slot, *key))
    }

    pub(crate) fn key_loaded(&mut self, slot: u8, key: KeyMaterial) {
        self.loaded = Some((slot, key));
    }

    /// A LOAD KEY failed; the slot content is unknown
    pub(crate) fn key_unknown(&mut self) {
        self.loaded = None;
        self.authenticated = None;
    }

    pub(crate) fn authenticated(&mut self, auth: Authenticated) {
        self.authenticated = Some(auth);
    }

    /// The live authentication for `sector`, if any
    pub(crate) fn authenticated_for(&self, sector: Sector) -> Option<Authenticated> {
        self.authenticated.filter(|auth| auth.sector == sector)
    }

    /// Drop the authentication for `sector` after a failed exchange
    ///
    /// Authentication for a different sector is left alone.
    pub(crate) fn invalidate(&mut self, sector: Sector) {
        if self.authenticated.is_some_and(|auth| auth.sector == sector) {
            self.authenticated = None;
        }
    }
}
