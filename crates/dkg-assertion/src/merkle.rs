//! Merkle commitment over canonical statements
//!
//! Thin wrapper around `rs_merkle`. Leaves are Blake3 digests of the
//! canonical statement lines, in canonical (sorted) order, so the root is
//! the assertion's content identifier.

use crate::hash::ContentHash;
use rs_merkle::{Hasher, MerkleTree};

/// Blake3 hasher adapter for rs_merkle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    type Hash = [u8; 32];

    #[inline]
    fn hash(data: &[u8]) -> Self::Hash {
        *blake3::hash(data).as_bytes()
    }
}

/// Merkle tree over a canonical statement list
pub struct StatementTree {
    inner: MerkleTree<Blake3Hasher>,
    leaf_count: usize,
}

impl std::fmt::Debug for StatementTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementTree")
            .field("leaf_count", &self.leaf_count)
            .field("root", &self.root())
            .finish()
    }
}

impl StatementTree {
    /// Build from statements already in canonical order
    #[must_use]
    pub fn from_statements<S: AsRef<str>>(statements: &[S]) -> Self {
        let leaves: Vec<[u8; 32]> = statements
            .iter()
            .map(|s| Blake3Hasher::hash(s.as_ref().as_bytes()))
            .collect();
        Self {
            inner: MerkleTree::from_leaves(&leaves),
            leaf_count: leaves.len(),
        }
    }

    /// Root hash; zero for an empty tree
    #[inline]
    #[must_use]
    pub fn root(&self) -> ContentHash {
        self.inner.root().map(ContentHash::new).unwrap_or_default()
    }

    /// Number of statements committed
    #[inline]
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Inclusion proof for the statement at `index`, or `None` when out of range
    #[must_use]
    pub fn proof(&self, index: usize) -> Option<StatementProof> {
        (index < self.leaf_count).then(|| StatementProof {
            inner: self.inner.proof(&[index]),
            index,
            total: self.leaf_count,
        })
    }
}

/// Inclusion proof for one canonical statement
pub struct StatementProof {
    inner: rs_merkle::MerkleProof<Blake3Hasher>,
    index: usize,
    total: usize,
}

impl std::fmt::Debug for StatementProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementProof")
            .field("index", &self.index)
            .field("total", &self.total)
            .finish()
    }
}

impl StatementProof {
    /// Check that `statement` sits at this proof's index under `root`
    #[must_use]
    pub fn verify(&self, statement: &str, root: ContentHash) -> bool {
        let leaf = Blake3Hasher::hash(statement.as_bytes());
        self.inner
            .verify(*root.as_bytes(), &[self.index], &[leaf], self.total)
    }
}
