//! blocksync-client: keeps a base directory in sync with a cluster
//!
//! The sync engine reconciles three views of a directory: the files on
//! disk, the durable local index, and the remote metadata registry.

pub mod index;
pub mod rpc;
pub mod sync;

pub use rpc::RpcClient;
pub use sync::sync;
