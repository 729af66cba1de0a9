//! blocksync-server: the block and metadata services
//!
//! Both stores are in-memory and live for the life of the process. The
//! TCP service loop in [`service`] can host either store or both.

pub mod block_store;
pub mod meta_store;
pub mod service;

pub use block_store::BlockStore;
pub use meta_store::MetaStore;
pub use service::{serve, Services};
