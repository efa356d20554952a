//! DKG Assertion
//!
//! Deterministic canonicalization and content addressing for knowledge
//! asset graphs.
//!
//! # Core Concepts
//!
//! - [`GraphPayload`]: raw public (and optional private) graph content
//! - [`Assertion`]: canonical statements plus content identifier and size
//! - [`ContentHash`]: 32-byte Blake3 content identifier
//! - [`StatementTree`]: Merkle commitment over canonical statements
//!
//! # Example
//!
//! ```rust,ignore
//! use dkg_assertion::{format_graph, GraphPayload};
//!
//! let payload = GraphPayload::public(json!({"@id": "urn:a", "urn:p": "v"}));
//! let assertion = format_graph(&payload)?;
//! println!("{} ({} bytes)", assertion.content_id(), assertion.byte_size());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod format;
mod hash;
mod merkle;

pub use format::{
    format_graph, Assertion, CanonicalGraph, FormatError, GraphPayload, PRIVATE_ROOT_PREDICATE,
};
pub use hash::{ContentHash, HashError};
pub use merkle::{Blake3Hasher, StatementProof, StatementTree};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statement_proofs_verify_against_content_id() {
        let payload = GraphPayload::public(json!({
            "@context": {"@vocab": "http://schema.org/"},
            "@id": "urn:asset:1",
            "name": "asset",
            "size": 3
        }));
        let assertion = format_graph(&payload).unwrap();
        let tree = assertion.public().tree();

        assert_eq!(tree.root(), assertion.content_id());
        for (index, statement) in assertion.public().statements().iter().enumerate() {
            let proof = tree.proof(index).unwrap();
            assert!(proof.verify(statement, assertion.content_id()));
        }
    }
}
