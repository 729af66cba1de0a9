//! Consistent-hash mapping from block hashes to block-server addresses
//!
//! Clients and the metadata service both build the ring from the same
//! address list, so either side can resolve a block's responsible server
//! and the answers agree.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::hash::block_hash_string;

/// Prefix mixed into server ring positions so they occupy a different part
/// of the hash space than raw block hashes.
const RING_KEY_PREFIX: &str = "blockstore";

/// Immutable ring of block-server positions. Membership is fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    /// ring position (hex digest) -> server address, ordered by position
    positions: BTreeMap<String, String>,
}

impl ConsistentHashRing {
    /// Build the ring from the configured block-server addresses.
    #[must_use]
    pub fn new(server_addrs: &[String]) -> Self {
        let mut positions: BTreeMap<String, String> = BTreeMap::new();
        for addr in server_addrs {
            let entry = positions
                .entry(Self::server_position(addr))
                .or_insert_with(|| addr.clone());
            // A position collision is unreachable with 64-hex digests; the
            // lexicographically smaller address wins if one ever happens.
            if *addr < *entry {
                entry.clone_from(addr);
            }
        }
        Self { positions }
    }

    /// Ring position of a server address.
    #[must_use]
    pub fn server_position(addr: &str) -> String {
        block_hash_string(format!("{RING_KEY_PREFIX}{addr}").as_bytes())
    }

    /// The server assigned to a block hash: the first ring position
    /// strictly greater than the hash, wrapping to the smallest position
    /// past the tail. `None` only for an empty ring.
    #[must_use]
    pub fn responsible_server(&self, block_hash: &str) -> Option<&str> {
        self.positions
            .range::<str, _>((Excluded(block_hash), Unbounded))
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, addr)| addr.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
