//! blocksync-core: shared types for the blocksync cluster
//!
//! Provides block hashing, the consistent-hash sharding ring, file
//! metadata types, fixed-size chunking, and the wire protocol spoken
//! between clients and the block/metadata services.

pub mod chunk;
pub mod hash;
pub mod meta;
pub mod protocol;
pub mod ring;

pub use hash::{block_hash_string, EMPTYFILE_HASH, INDEX_FILENAME, TOMBSTONE_HASH};
pub use meta::{FileInfoMap, FileMetaData, CONFLICT_VERSION};
pub use protocol::{Block, Request, Response};
pub use ring::ConsistentHashRing;
