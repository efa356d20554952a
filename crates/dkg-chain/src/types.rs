//! Chain-side value types
//!
//! Addresses, key material, transaction requests and receipts, and the
//! asset handle built from a confirmed creation.

use dkg_assertion::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// 20-byte account or contract address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// Wrap raw address bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseError::InvalidLength {
                expected: 20,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Wrap raw hash bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for TxHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors parsing addresses
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Wrong byte length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not hex
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Secret signing key bytes
///
/// Never printed: `Debug` is redacted and there is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wrap raw key bytes
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex-encoded key, with or without `0x`
    ///
    /// # Errors
    /// Returns [`ParseError::Hex`] for non-hex input
    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        Ok(Self(hex::decode(s.trim().strip_prefix("0x").unwrap_or(s.trim()))?))
    }

    /// Raw key bytes, for signer implementations
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Contract calls the pipeline issues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum TxCall {
    /// Set the token spend allowance for the asset contract
    Approve {
        #[serde(with = "amount")]
        amount: u128,
    },
    /// Raise the allowance by `delta`
    IncreaseAllowance {
        #[serde(with = "amount")]
        delta: u128,
    },
    /// Lower the allowance by `delta`
    DecreaseAllowance {
        #[serde(with = "amount")]
        delta: u128,
    },
    /// Register a knowledge asset
    CreateAsset {
        content_id: ContentHash,
        byte_size: u64,
        replication_factor: u32,
        #[serde(with = "amount")]
        stake: u128,
    },
}

impl TxCall {
    /// Short label for logs and metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::IncreaseAllowance { .. } => "increase_allowance",
            Self::DecreaseAllowance { .. } => "decrease_allowance",
            Self::CreateAsset { .. } => "create_asset",
        }
    }
}

/// Unsigned transaction ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub call: TxCall,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// Signed raw transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub hash: TxHash,
    pub nonce: u64,
    pub gas_price: u128,
    pub raw: Vec<u8>,
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Rejected,
}

/// Record of one logical transaction as it moved through submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub call: TxCall,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub hash: Option<TxHash>,
    pub status: TxStatus,
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    /// Index of the created asset, for creation calls
    pub asset_index: Option<u64>,
}

/// Where assets land: blockchain id and asset contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Blockchain name, e.g. `base`
    pub blockchain: String,
    pub chain_id: u64,
    pub asset_contract: Address,
}

/// Opaque locator for a created knowledge asset
///
/// Shaped `did:dkg:{blockchain}:{chain_id}/{contract}/{index}`. Nothing in
/// the pipeline parses it; validity is checked through
/// [`ChainApi::validate_handle`](crate::ChainApi::validate_handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetHandle(String);

impl AssetHandle {
    /// Build the handle for asset `index` on `network`
    #[must_use]
    pub fn build(network: &NetworkInfo, index: u64) -> Self {
        Self(format!(
            "did:dkg:{}:{}/{}/{}",
            network.blockchain, network.chain_id, network.asset_contract, index
        ))
    }

    /// Wrap an existing handle string
    #[must_use]
    pub fn from_string(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AssetHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serde adapter storing token amounts as decimal strings
///
/// TOML and JSON integers cannot hold the full `u128` range. Plain integers
/// are still accepted on input.
pub mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Str(String),
    }

    /// Serialize as a decimal string
    ///
    /// # Errors
    /// Propagates serializer errors
    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Deserialize from a decimal string or integer
    ///
    /// # Errors
    /// Fails on non-numeric strings
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(u128::from(v)),
            Repr::Str(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }

    /// Same as the parent module, for `Option<u128>`
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        /// # Errors
        /// Propagates serializer errors
        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.collect_str(v),
                None => serializer.serialize_none(),
            }
        }

        /// # Errors
        /// Fails on non-numeric strings
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            #[derive(Deserialize)]
            struct Wrap(#[serde(with = "crate::types::amount")] u128);

            Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
        }
    }
}
