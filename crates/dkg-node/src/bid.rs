//! Stake estimation
//!
//! One best-effort call to the node's bid suggestion endpoint. A missing or
//! non-positive suggestion fails fast; there is no default stake.

use crate::api::NodeApi;
use crate::error::BidError;
use dkg_assertion::ContentHash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stake the network suggests for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    #[serde(with = "stake_string")]
    pub stake: u128,
    pub replication_factor: u32,
}

mod stake_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// Parse a node stake suggestion
///
/// # Errors
/// [`BidError::InvalidBid`] for missing, unparsable, negative or zero values
pub fn parse_stake(raw: Option<&str>) -> Result<u128, BidError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BidError::InvalidBid("no stake suggested".to_string()))?;
    if raw.starts_with('-') {
        return Err(BidError::InvalidBid(format!("negative stake {raw}")));
    }
    let stake: u128 = raw
        .parse()
        .map_err(|_| BidError::InvalidBid(format!("unparsable stake {raw:?}")))?;
    if stake == 0 {
        return Err(BidError::InvalidBid("zero stake".to_string()));
    }
    Ok(stake)
}

/// Asks the node for stake suggestions
pub struct BidEstimator {
    node: Arc<dyn NodeApi>,
}

impl std::fmt::Debug for BidEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidEstimator").finish_non_exhaustive()
    }
}

impl BidEstimator {
    #[must_use]
    pub fn new(node: Arc<dyn NodeApi>) -> Self {
        Self { node }
    }

    /// Suggested stake for publishing `content_id`
    ///
    /// # Errors
    /// - [`BidError::InvalidBid`] for a missing or non-positive suggestion
    /// - [`BidError::Node`] when the request fails
    pub async fn get_bid(
        &self,
        content_id: ContentHash,
        byte_size: u64,
        replication_factor: u32,
    ) -> Result<Bid, BidError> {
        let raw = self
            .node
            .bid_suggestion(content_id, byte_size, replication_factor)
            .await?;
        let stake = parse_stake(raw.as_deref()).map_err(|e| {
            warn!(content_id = %content_id.short(), suggestion = ?raw, "rejecting bid suggestion");
            e
        })?;
        debug!(content_id = %content_id.short(), stake, replication_factor, "bid suggested");
        Ok(Bid {
            stake,
            replication_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockNodeApi;
    use crate::error::NodeError;
    use mockall::predicate::eq;

    #[test]
    fn parse_accepts_positive_integers() {
        assert_eq!(parse_stake(Some("1500")).unwrap(), 1500);
        assert_eq!(parse_stake(Some(" 42 ")).unwrap(), 42);
        assert_eq!(
            parse_stake(Some("340282366920938463463374607431768211455")).unwrap(),
            u128::MAX
        );
    }

    #[test]
    fn parse_rejects_missing_zero_negative_and_garbage() {
        for raw in [None, Some(""), Some("0"), Some("-5"), Some("1.5e3"), Some("abc")] {
            assert!(
                matches!(parse_stake(raw), Err(BidError::InvalidBid(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn get_bid_forwards_size_and_replication() {
        let id = ContentHash::compute(b"asset");
        let mut node = MockNodeApi::new();
        node.expect_bid_suggestion()
            .with(eq(id), eq(512u64), eq(3u32))
            .times(1)
            .returning(|_, _, _| Ok(Some("777".to_string())));

        let bid = BidEstimator::new(Arc::new(node))
            .get_bid(id, 512, 3)
            .await
            .unwrap();
        assert_eq!(
            bid,
            Bid {
                stake: 777,
                replication_factor: 3
            }
        );
    }

    #[tokio::test]
    async fn transport_failure_is_not_invalid_bid() {
        let mut node = MockNodeApi::new();
        node.expect_bid_suggestion()
            .returning(|_, _, _| Err(NodeError::Transport("timeout".into())));

        let err = BidEstimator::new(Arc::new(node))
            .get_bid(ContentHash::default(), 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BidError::Node(_)));
    }
}
