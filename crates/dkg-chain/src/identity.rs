//! Signing identities and their per-identity caches
//!
//! A [`SigningIdentity`] owns two independent async locks:
//! - the nonce state, held for a whole build-sign-submit-confirm sequence
//! - the allowance cache, held for an ensure/increase/decrease operation, or
//!   from a reservation until the spending transaction settles
//!
//! The allowance lock is always taken first when both are needed, so the two
//! never deadlock.

use crate::api::{ChainApi, ChainError};
use crate::types::{Address, KeyMaterial};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Key material plus the mutable state tied to it
#[derive(Debug)]
pub struct SigningIdentity {
    address: Address,
    key: KeyMaterial,
    nonce: Mutex<NonceState>,
    allowance: Mutex<AllowanceCache>,
}

impl SigningIdentity {
    /// Create with a known address
    #[must_use]
    pub fn new(key: KeyMaterial, address: Address) -> Self {
        Self {
            address,
            key,
            nonce: Mutex::new(NonceState::default()),
            allowance: Mutex::new(AllowanceCache::default()),
        }
    }

    /// Create, deriving the address through the chain collaborator
    ///
    /// # Errors
    /// Returns [`ChainError::Signing`] when the key is unusable
    pub fn from_key(key: KeyMaterial, chain: &dyn ChainApi) -> Result<Self, ChainError> {
        let address = chain.address_of(&key)?;
        Ok(Self::new(key, address))
    }

    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[inline]
    pub(crate) fn key(&self) -> &KeyMaterial {
        &self.key
    }

    pub(crate) async fn lock_nonce(&self) -> MutexGuard<'_, NonceState> {
        self.nonce.lock().await
    }

    pub(crate) async fn lock_allowance(&self) -> MutexGuard<'_, AllowanceCache> {
        self.allowance.lock().await
    }

    /// Last nonce the chain accepted from this identity
    pub async fn last_nonce(&self) -> Option<u64> {
        self.nonce.lock().await.last_accepted
    }

    /// Snapshot of the allowance cache
    pub async fn allowance_snapshot(&self) -> AllowanceCache {
        self.allowance.lock().await.clone()
    }

    /// Seed the allowance cache with a chain-observed value
    pub async fn seed_allowance(&self, value: u128) {
        self.allowance.lock().await.observe(value);
    }
}

/// Nonce bookkeeping for one identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NonceState {
    last_accepted: Option<u64>,
}

impl NonceState {
    /// Nonce to use given the chain's pending count
    ///
    /// Never below `last_accepted + 1`, whatever a lagging RPC reports.
    pub(crate) fn next(&self, pending: u64) -> u64 {
        match self.last_accepted {
            Some(last) => pending.max(last + 1),
            None => pending,
        }
    }

    pub(crate) fn accept(&mut self, nonce: u64) {
        self.last_accepted = Some(self.last_accepted.map_or(nonce, |last| last.max(nonce)));
    }
}

/// Whether a cached allowance was observed or is awaiting confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceState {
    /// Read from chain or set by a confirmed transaction
    Observed,
    /// Set optimistically while an approval is in flight
    Pending,
}

#[derive(Debug, Clone, Copy)]
struct CachedAllowance {
    value: u128,
    state: AllowanceState,
    at: Instant,
}

/// Advisory allowance cache; the chain stays authoritative
#[derive(Debug, Clone, Default)]
pub struct AllowanceCache {
    entry: Option<CachedAllowance>,
}

impl AllowanceCache {
    /// Cached value regardless of freshness
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<u128> {
        self.entry.map(|e| e.value)
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> Option<AllowanceState> {
        self.entry.map(|e| e.state)
    }

    /// Value if observed and younger than `ttl` (`None` ttl never expires)
    #[must_use]
    pub fn fresh_value(&self, ttl: Option<Duration>) -> Option<u128> {
        let entry = self.entry?;
        if entry.state != AllowanceState::Observed {
            return None;
        }
        match ttl {
            Some(ttl) if entry.at.elapsed() >= ttl => None,
            _ => Some(entry.value),
        }
    }

    pub(crate) fn observe(&mut self, value: u128) {
        self.entry = Some(CachedAllowance {
            value,
            state: AllowanceState::Observed,
            at: Instant::now(),
        });
    }

    pub(crate) fn mark_pending(&mut self, value: u128) {
        self.entry = Some(CachedAllowance {
            value,
            state: AllowanceState::Pending,
            at: Instant::now(),
        });
    }

    pub(crate) fn confirm(&mut self) {
        if let Some(entry) = self.entry.as_mut() {
            entry.state = AllowanceState::Observed;
            entry.at = Instant::now();
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Drop the cached value by `amount`, keeping its age and state
    pub(crate) fn consume(&mut self, amount: u128) {
        if let Some(entry) = self.entry.as_mut() {
            entry.value = entry.value.saturating_sub(amount);
        }
    }
}
