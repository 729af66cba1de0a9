//! Authoritative file-metadata registry with compare-and-set updates

use std::collections::HashMap;

use tokio::sync::RwLock;

use blocksync_core::meta::{FileInfoMap, FileMetaData, CONFLICT_VERSION};
use blocksync_core::ring::ConsistentHashRing;

/// The metadata service: the file-info map plus the block-server
/// configuration and the sharding ring built from it.
pub struct MetaStore {
    files: RwLock<FileInfoMap>,
    block_store_addrs: Vec<String>,
    ring: ConsistentHashRing,
}

impl MetaStore {
    #[must_use]
    pub fn new(block_store_addrs: Vec<String>) -> Self {
        let ring = ConsistentHashRing::new(&block_store_addrs);
        Self {
            files: RwLock::new(HashMap::new()),
            block_store_addrs,
            ring,
        }
    }

    /// A consistent snapshot of all file metadata.
    pub async fn file_info_map(&self) -> FileInfoMap {
        self.files.read().await.clone()
    }

    /// Compare-and-set update. A first insert is accepted unconditionally;
    /// otherwise the submitted version must be exactly current + 1, else
    /// [`CONFLICT_VERSION`] is returned and nothing changes.
    ///
    /// The write lock spans the version check and the map write, so two
    /// racing updates on one filename cannot both observe the same current
    /// version: at most one succeeds.
    pub async fn update_file(&self, meta: FileMetaData) -> i32 {
        let mut files = self.files.write().await;
        match files.get(&meta.filename) {
            Some(current) if meta.version != current.version + 1 => CONFLICT_VERSION,
            _ => {
                let version = meta.version;
                files.insert(meta.filename.clone(), meta);
                version
            }
        }
    }

    /// Group block hashes by their responsible server. Every input hash
    /// appears in the output; duplicates are preserved.
    #[must_use]
    pub fn block_store_map(&self, hashes: &[String]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for hash in hashes {
            if let Some(addr) = self.ring.responsible_server(hash) {
                map.entry(addr.to_string()).or_default().push(hash.clone());
            }
        }
        map
    }

    /// The configured block-server addresses, in configuration order.
    #[must_use]
    pub fn block_store_addrs(&self) -> &[String] {
        &self.block_store_addrs
    }

    #[must_use]
    pub fn ring(&self) -> &ConsistentHashRing {
        &self.ring
    }
}
