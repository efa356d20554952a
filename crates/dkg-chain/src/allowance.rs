//! Token allowance management
//!
//! Keeps each identity's spend allowance for the asset contract at or above
//! what a publish needs, touching the chain as little as possible:
//! 1. fresh cached value ≥ required: done, no network call
//! 2. otherwise read the chain and refresh the cache
//! 3. still short: approve through the [`TransactionSubmitter`]
//!
//! The cache lives on the [`SigningIdentity`] and is guarded by its own lock.
//! [`AllowanceManager::reserve`] keeps that lock in an [`AllowanceReservation`]
//! until the spending transaction settles, so concurrent publishes from one
//! identity cannot all count the same allowance.

use crate::api::ChainError;
use crate::identity::{AllowanceCache, SigningIdentity};
use crate::submitter::{SubmitError, TransactionSubmitter};
use crate::types::{amount, TxCall, TxHash};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::MutexGuard;
use tracing::{debug, error, info};

/// Default required allowance: one whole token at 18 decimals
pub const DEFAULT_MINIMUM_ALLOWANCE: u128 = 1_000_000_000_000_000_000;

/// Allowance policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowanceConfig {
    /// Allowance every publish requires up front
    #[serde(with = "amount")]
    pub minimum: u128,
    /// Approve up to this amount when raising, to cover future publishes
    #[serde(with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub approve_target: Option<u128>,
    /// Cache entry lifetime; 0 never expires
    pub cache_ttl_ms: u64,
}

impl Default for AllowanceConfig {
    fn default() -> Self {
        Self {
            minimum: DEFAULT_MINIMUM_ALLOWANCE,
            approve_target: None,
            cache_ttl_ms: 600_000,
        }
    }
}

impl AllowanceConfig {
    #[must_use]
    pub fn with_minimum(mut self, minimum: u128) -> Self {
        self.minimum = minimum;
        self
    }

    #[must_use]
    pub fn with_approve_target(mut self, target: u128) -> Self {
        self.approve_target = Some(target);
        self
    }

    #[must_use]
    pub fn with_cache_ttl_ms(mut self, ms: u64) -> Self {
        self.cache_ttl_ms = ms;
        self
    }

    /// Cache lifetime, `None` when entries never expire
    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_ms > 0).then(|| Duration::from_millis(self.cache_ttl_ms))
    }

    /// Amount to approve when `required` is not covered
    #[inline]
    #[must_use]
    pub fn approve_amount(&self, required: u128) -> u128 {
        self.approve_target.map_or(required, |t| t.max(required))
    }
}

/// How `ensure_allowance` was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceCheck {
    /// Fresh cached value was enough
    Cached { allowance: u128 },
    /// The chain already had enough
    OnChain { allowance: u128 },
    /// An approval was sent and confirmed
    Approved { amount: u128, tx_hash: TxHash },
}

impl AllowanceCheck {
    /// Approval transaction, if one was needed
    #[inline]
    #[must_use]
    pub fn approval_tx(&self) -> Option<TxHash> {
        match self {
            Self::Approved { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

/// Allowance failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum AllowanceError {
    /// Could not read the current allowance
    #[error("failed to read allowance: {0}")]
    Read(#[source] ChainError),

    /// The allowance could not be raised
    #[error("insufficient allowance: required {required}: {source}")]
    InsufficientAllowance {
        required: u128,
        #[source]
        source: SubmitError,
    },

    /// An increase/decrease transaction failed
    #[error("allowance adjustment failed: {0}")]
    Adjust(#[source] SubmitError),
}

/// Ensures and adjusts per-identity allowances
#[derive(Debug, Clone)]
pub struct AllowanceManager {
    submitter: Arc<TransactionSubmitter>,
    config: AllowanceConfig,
}

impl AllowanceManager {
    #[must_use]
    pub fn new(submitter: Arc<TransactionSubmitter>, config: AllowanceConfig) -> Self {
        Self { submitter, config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AllowanceConfig {
        &self.config
    }

    /// Make sure `identity` has granted at least `required`
    ///
    /// # Errors
    /// - [`AllowanceError::Read`] when the chain read fails
    /// - [`AllowanceError::InsufficientAllowance`] when the approval fails
    pub async fn ensure_allowance(
        &self,
        identity: &SigningIdentity,
        required: u128,
    ) -> Result<AllowanceCheck, AllowanceError> {
        let mut cache = identity.lock_allowance().await;
        self.ensure_locked(identity, &mut cache, required).await
    }

    /// Ensure `amount` and hold the allowance lock until the spending
    /// transaction settles
    ///
    /// Other ensures and reservations for `identity` wait until the returned
    /// reservation is committed, abandoned or dropped.
    ///
    /// # Errors
    /// As [`ensure_allowance`](Self::ensure_allowance)
    pub async fn reserve<'a>(
        &self,
        identity: &'a SigningIdentity,
        amount: u128,
    ) -> Result<(AllowanceCheck, AllowanceReservation<'a>), AllowanceError> {
        let mut cache = identity.lock_allowance().await;
        let check = self.ensure_locked(identity, &mut cache, amount).await?;
        debug!(owner = %identity.address(), amount, "allowance reserved");
        Ok((check, AllowanceReservation { cache, amount }))
    }

    async fn ensure_locked(
        &self,
        identity: &SigningIdentity,
        cache: &mut AllowanceCache,
        required: u128,
    ) -> Result<AllowanceCheck, AllowanceError> {
        let owner = *identity.address();

        if let Some(allowance) = cache.fresh_value(self.config.cache_ttl()) {
            if allowance >= required {
                debug!(%owner, allowance, required, "allowance cache hit");
                return Ok(AllowanceCheck::Cached { allowance });
            }
        }

        let allowance = self
            .submitter
            .chain()
            .allowance(&owner)
            .await
            .map_err(|e| {
                error!(%owner, error = %e, "allowance read failed");
                AllowanceError::Read(e)
            })?;
        cache.observe(allowance);
        if allowance >= required {
            debug!(%owner, allowance, required, "allowance sufficient on chain");
            return Ok(AllowanceCheck::OnChain { allowance });
        }

        let amount = self.config.approve_amount(required);
        info!(%owner, allowance, required, amount, "raising allowance");
        cache.mark_pending(amount);

        match self.submitter.submit(identity, TxCall::Approve { amount }).await {
            Ok(confirmed) => {
                cache.confirm();
                Ok(AllowanceCheck::Approved {
                    amount,
                    tx_hash: confirmed.receipt.tx_hash,
                })
            }
            Err(source) => {
                cache.invalidate();
                error!(%owner, required, error = %source, "allowance approval failed");
                Err(AllowanceError::InsufficientAllowance { required, source })
            }
        }
    }

    /// Raise the allowance by `delta`
    ///
    /// # Errors
    /// Returns [`AllowanceError::Adjust`] when the transaction fails
    pub async fn increase_allowance(
        &self,
        identity: &SigningIdentity,
        delta: u128,
    ) -> Result<TxHash, AllowanceError> {
        self.adjust(identity, TxCall::IncreaseAllowance { delta }, |v| {
            v.saturating_add(delta)
        })
        .await
    }

    /// Lower the allowance by `delta`
    ///
    /// # Errors
    /// Returns [`AllowanceError::Adjust`] when the transaction fails
    pub async fn decrease_allowance(
        &self,
        identity: &SigningIdentity,
        delta: u128,
    ) -> Result<TxHash, AllowanceError> {
        self.adjust(identity, TxCall::DecreaseAllowance { delta }, |v| {
            v.saturating_sub(delta)
        })
        .await
    }

    async fn adjust(
        &self,
        identity: &SigningIdentity,
        call: TxCall,
        apply: impl FnOnce(u128) -> u128,
    ) -> Result<TxHash, AllowanceError> {
        let owner = *identity.address();
        let label = call.label();
        let mut cache = identity.lock_allowance().await;

        match self.submitter.submit(identity, call).await {
            Ok(confirmed) => {
                match cache.fresh_value(self.config.cache_ttl()) {
                    Some(value) => cache.observe(apply(value)),
                    None => cache.invalidate(),
                }
                info!(%owner, call = label, tx = %confirmed.receipt.tx_hash, "allowance adjusted");
                Ok(confirmed.receipt.tx_hash)
            }
            Err(e) => {
                cache.invalidate();
                error!(%owner, call = label, error = %e, "allowance adjustment failed");
                Err(AllowanceError::Adjust(e))
            }
        }
    }
}

/// Allowance held for one spending transaction
///
/// Holds the identity's allowance lock. Dropping it without
/// [`commit`](Self::commit) leaves the cache untouched.
#[derive(Debug)]
pub struct AllowanceReservation<'a> {
    cache: MutexGuard<'a, AllowanceCache>,
    amount: u128,
}

impl AllowanceReservation<'_> {
    #[inline]
    #[must_use]
    pub fn amount(&self) -> u128 {
        self.amount
    }

    /// The spending transaction confirmed; deduct the reserved amount
    pub fn commit(mut self) {
        self.cache.consume(self.amount);
    }

    /// The spending transaction failed; the chain decides next time
    pub fn abandon(mut self) {
        self.cache.invalidate();
    }
}
