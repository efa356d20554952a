//! Per-identity transaction submission
//!
//! Drives one logical transaction through build, sign, submit and confirm
//! while holding the identity's nonce lock:
//! - `NonceTooLow`: refetch the pending nonce and resubmit, bounded
//! - `Underpriced`: raise the gas price by a fixed percentage, wait, resubmit, bounded
//!
//! Each bound counts every rejection of its class within one submission, so
//! alternating rejections cannot resubmit forever.
//! - anything else: surfaced without resubmission
//!
//! Holding the lock through confirmation means an identity never has more
//! than one submitted transaction advancing, and no nonce is signed twice
//! except to replace a rejected attempt.

use crate::api::{ChainApi, ChainError};
use crate::identity::SigningIdentity;
use crate::types::{Receipt, TxCall, TxHash, TxRequest, TxStatus, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Resubmission limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitPolicy {
    /// Nonce-too-low rejections per submission before giving up
    pub max_nonce_retries: u32,
    /// Underpriced rejections per submission before giving up
    pub max_fee_bumps: u32,
    /// Gas price increase per bump, in percent
    pub fee_bump_percent: u32,
    /// Pause before resubmitting an underpriced transaction
    pub resubmit_delay_ms: u64,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            max_nonce_retries: 5,
            max_fee_bumps: 5,
            fee_bump_percent: 20,
            resubmit_delay_ms: 3000,
        }
    }
}

impl SubmitPolicy {
    #[must_use]
    pub fn with_max_nonce_retries(mut self, retries: u32) -> Self {
        self.max_nonce_retries = retries;
        self
    }

    #[must_use]
    pub fn with_max_fee_bumps(mut self, bumps: u32) -> Self {
        self.max_fee_bumps = bumps;
        self
    }

    #[must_use]
    pub fn with_fee_bump_percent(mut self, percent: u32) -> Self {
        self.fee_bump_percent = percent;
        self
    }

    #[must_use]
    pub fn with_resubmit_delay_ms(mut self, ms: u64) -> Self {
        self.resubmit_delay_ms = ms;
        self
    }

    #[inline]
    #[must_use]
    pub fn resubmit_delay(&self) -> Duration {
        Duration::from_millis(self.resubmit_delay_ms)
    }

    /// Next gas price after one bump; always strictly higher
    #[must_use]
    pub fn bump(&self, gas_price: u128) -> u128 {
        let bumped = gas_price.saturating_mul(100 + u128::from(self.fee_bump_percent)) / 100;
        bumped.max(gas_price.saturating_add(1))
    }
}

/// Submission failures after internal recovery is exhausted
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    /// Nonce kept colliding
    #[error("nonce conflict persisted after {attempts} attempts")]
    NonceConflict { attempts: u32 },

    /// Fee escalation did not get the transaction accepted
    #[error("transaction underpriced after {attempts} attempts")]
    Underpriced { attempts: u32 },

    /// Mined but reverted
    #[error("transaction {hash} rejected on chain")]
    Rejected { hash: TxHash },

    /// Any other chain failure
    #[error("transaction failed: {0}")]
    Failed(#[source] ChainError),
}

/// A confirmed transaction and its receipt
#[derive(Debug, Clone)]
pub struct Confirmed {
    pub transaction: Transaction,
    pub receipt: Receipt,
}

/// Submits transactions on behalf of signing identities
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainApi>,
    policy: SubmitPolicy,
}

impl std::fmt::Debug for TransactionSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSubmitter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TransactionSubmitter {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainApi>, policy: SubmitPolicy) -> Self {
        Self { chain, policy }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &SubmitPolicy {
        &self.policy
    }

    #[inline]
    #[must_use]
    pub fn chain(&self) -> &Arc<dyn ChainApi> {
        &self.chain
    }

    /// Submit `call` from `identity` and wait for its receipt
    ///
    /// # Errors
    /// - [`SubmitError::NonceConflict`] after `max_nonce_retries` nonce rejections
    /// - [`SubmitError::Underpriced`] after `max_fee_bumps` underpriced rejections
    /// - [`SubmitError::Rejected`] when the receipt reports failure
    /// - [`SubmitError::Failed`] for any other chain error
    pub async fn submit(
        &self,
        identity: &SigningIdentity,
        call: TxCall,
    ) -> Result<Confirmed, SubmitError> {
        let from = *identity.address();
        let mut nonce_state = identity.lock_nonce().await;

        let gas_limit = self
            .chain
            .estimate_gas(&from, &call)
            .await
            .map_err(SubmitError::Failed)?;
        let mut gas_price = self.chain.gas_price().await.map_err(SubmitError::Failed)?;
        let pending = self
            .chain
            .pending_nonce(&from)
            .await
            .map_err(SubmitError::Failed)?;
        let mut nonce = nonce_state.next(pending);

        let mut nonce_errors = 0u32;
        let mut fee_errors = 0u32;

        let hash = loop {
            let request = TxRequest {
                from,
                call: call.clone(),
                nonce,
                gas_price,
                gas_limit,
            };
            let signed = self
                .chain
                .sign(&request, identity.key())
                .await
                .map_err(SubmitError::Failed)?;
            debug!(%from, nonce, gas_price, call = call.label(), "signed transaction");

            match self.chain.send_raw(&signed).await {
                Ok(hash) => {
                    nonce_state.accept(nonce);
                    break hash;
                }
                Err(ChainError::NonceTooLow) => {
                    nonce_errors += 1;
                    if nonce_errors >= self.policy.max_nonce_retries {
                        error!(%from, attempts = nonce_errors, "nonce conflict not resolved");
                        return Err(SubmitError::NonceConflict {
                            attempts: nonce_errors,
                        });
                    }
                    let pending = self
                        .chain
                        .pending_nonce(&from)
                        .await
                        .map_err(SubmitError::Failed)?;
                    nonce = nonce_state.next(pending);
                    warn!(%from, attempt = nonce_errors, nonce, "nonce too low, resubmitting");
                }
                Err(ChainError::Underpriced) => {
                    fee_errors += 1;
                    if fee_errors >= self.policy.max_fee_bumps {
                        error!(%from, attempts = fee_errors, gas_price, "fee escalation exhausted");
                        return Err(SubmitError::Underpriced {
                            attempts: fee_errors,
                        });
                    }
                    gas_price = self.policy.bump(gas_price);
                    metrics::counter!("dkg_tx_fee_bumps_total").increment(1);
                    warn!(%from, attempt = fee_errors, gas_price, "transaction underpriced, bumping fee");
                    tokio::time::sleep(self.policy.resubmit_delay()).await;
                }
                Err(other) => {
                    error!(%from, error = %other, call = call.label(), "submission failed");
                    return Err(SubmitError::Failed(other));
                }
            }
        };

        let mut transaction = Transaction {
            call,
            nonce,
            gas_price,
            gas_limit,
            hash: Some(hash),
            status: TxStatus::Submitted,
        };
        debug!(%from, %hash, nonce, "transaction submitted");

        let receipt = self
            .chain
            .wait_for_receipt(hash)
            .await
            .map_err(SubmitError::Failed)?;
        drop(nonce_state);

        if !receipt.success {
            transaction.status = TxStatus::Rejected;
            error!(%from, %hash, "transaction reverted");
            return Err(SubmitError::Rejected { hash });
        }

        transaction.status = TxStatus::Confirmed;
        info!(
            %from,
            %hash,
            nonce,
            block = receipt.block_number,
            call = transaction.call.label(),
            "transaction confirmed"
        );
        Ok(Confirmed {
            transaction,
            receipt,
        })
    }
}
