//! Per-file version metadata shared by clients and the metadata service

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hash::{EMPTYFILE_HASH, TOMBSTONE_HASH};

/// Version returned by `UpdateFile` when the submitted version loses the
/// compare-and-set. A value, not an error: the caller reconciles.
pub const CONFLICT_VERSION: i32 = -1;

/// A file's version and content description.
///
/// `version` starts at 1 and is bumped by exactly 1 on every accepted
/// update. The hash list orders the file's blocks; concatenating the
/// referenced block payloads in list order reconstructs the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    /// Path relative to the client's base directory
    pub filename: String,
    pub version: i32,
    pub block_hash_list: Vec<String>,
}

/// The authoritative filename -> metadata mapping held by the MetaStore,
/// and the shape of the client's local index.
pub type FileInfoMap = HashMap<String, FileMetaData>;

impl FileMetaData {
    #[must_use]
    pub fn new(filename: impl Into<String>, version: i32, block_hash_list: Vec<String>) -> Self {
        Self {
            filename: filename.into(),
            version,
            block_hash_list,
        }
    }

    /// A deletion record for `filename` at `version`.
    #[must_use]
    pub fn tombstone(filename: impl Into<String>, version: i32) -> Self {
        Self::new(filename, version, vec![TOMBSTONE_HASH.to_string()])
    }

    /// True if this record encodes a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.block_hash_list.len() == 1 && self.block_hash_list[0] == TOMBSTONE_HASH
    }

    /// True if this record describes a zero-length file.
    #[must_use]
    pub fn is_empty_file(&self) -> bool {
        self.block_hash_list.len() == 1 && self.block_hash_list[0] == EMPTYFILE_HASH
    }
}
