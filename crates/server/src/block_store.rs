//! In-memory content-addressed block storage
//!
//! Blocks are keyed by the SHA-256 hex digest of their payload. Puts are
//! idempotent: identical payloads land on the same key with the same
//! bytes, so overwrites are harmless.

use std::collections::HashMap;

use tokio::sync::RwLock;

use blocksync_core::hash::block_hash_string;
use blocksync_core::protocol::Block;

/// Content-addressed store for one block server.
#[derive(Default)]
pub struct BlockStore {
    blocks: RwLock<HashMap<String, Block>>,
}

impl BlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the block under its own payload hash.
    pub async fn put_block(&self, block: Block) -> bool {
        let hash = block_hash_string(&block.data);
        self.blocks.write().await.insert(hash, block);
        true
    }

    /// The stored block, or an empty block when the hash is unknown.
    pub async fn get_block(&self, hash: &str) -> Block {
        self.blocks
            .read()
            .await
            .get(hash)
            .cloned()
            .unwrap_or_else(Block::empty)
    }

    /// The input-order subset of `hashes` present in the store. Duplicate
    /// inputs produce duplicate outputs.
    pub async fn has_blocks(&self, hashes: &[String]) -> Vec<String> {
        let blocks = self.blocks.read().await;
        hashes
            .iter()
            .filter(|hash| blocks.contains_key(hash.as_str()))
            .cloned()
            .collect()
    }

    /// Every stored hash once, in no particular order.
    pub async fn block_hashes(&self) -> Vec<String> {
        self.blocks.read().await.keys().cloned().collect()
    }
}
