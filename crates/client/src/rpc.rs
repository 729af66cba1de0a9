//! RPC facade: one fresh connection and one deadline per call
//!
//! There is no retry here. A timed-out or failed call surfaces as an
//! error; the sync engine's remote-wins logic is the recovery path, and
//! the next sync pass is the retry mechanism.

use std::collections::HashMap;
use std::time::Duration;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use tokio::net::TcpStream;
use tokio::time::timeout;

use blocksync_core::meta::{FileInfoMap, FileMetaData};
use blocksync_core::protocol::{self, Block, Request, Response};

/// Default per-call deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for calling the metadata service and any block server.
#[derive(Debug, Clone)]
pub struct RpcClient {
    meta_addr: String,
    timeout: Duration,
}

impl RpcClient {
    #[must_use]
    pub fn new(meta_addr: impl Into<String>) -> Self {
        Self {
            meta_addr: meta_addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, addr: &str, request: Request) -> Result<Response> {
        let response = timeout(self.timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            protocol::write_request(&mut stream, &request).await?;
            protocol::read_response(&mut stream).await
        })
        .await
        .map_err(|_| eyre!("deadline exceeded calling {addr}"))??;

        match response {
            Response::Error(message) => Err(eyre!("server {addr}: {message}")),
            other => Ok(other),
        }
    }

    /// Store a block on the given block server.
    ///
    /// # Errors
    /// Returns an error on connect failure, deadline expiry, or a refused
    /// request.
    pub async fn put_block(&self, block: Block, block_store_addr: &str) -> Result<bool> {
        match self.call(block_store_addr, Request::PutBlock(block)).await? {
            Response::Success(flag) => Ok(flag),
            other => Err(unexpected("PutBlock", &other)),
        }
    }

    /// Fetch a block by hash. An unknown hash yields an empty block.
    pub async fn get_block(&self, hash: &str, block_store_addr: &str) -> Result<Block> {
        let request = Request::GetBlock {
            hash: hash.to_string(),
        };
        match self.call(block_store_addr, request).await? {
            Response::Block(block) => Ok(block),
            other => Err(unexpected("GetBlock", &other)),
        }
    }

    /// The subset of `hashes` already present on the given block server.
    pub async fn has_blocks(&self, hashes: &[String], block_store_addr: &str) -> Result<Vec<String>> {
        let request = Request::HasBlocks {
            hashes: hashes.to_vec(),
        };
        match self.call(block_store_addr, request).await? {
            Response::BlockHashes(present) => Ok(present),
            other => Err(unexpected("HasBlocks", &other)),
        }
    }

    /// Every hash stored on the given block server.
    pub async fn get_block_hashes(&self, block_store_addr: &str) -> Result<Vec<String>> {
        match self.call(block_store_addr, Request::GetBlockHashes).await? {
            Response::BlockHashes(hashes) => Ok(hashes),
            other => Err(unexpected("GetBlockHashes", &other)),
        }
    }

    /// The remote index: a snapshot of all file metadata.
    pub async fn get_file_info_map(&self) -> Result<FileInfoMap> {
        match self.call(&self.meta_addr, Request::GetFileInfoMap).await? {
            Response::FileInfoMap(map) => Ok(map),
            other => Err(unexpected("GetFileInfoMap", &other)),
        }
    }

    /// Submit a versioned metadata update. Returns the accepted version,
    /// or the conflict sentinel on a lost compare-and-set.
    pub async fn update_file(&self, meta: &FileMetaData) -> Result<i32> {
        let request = Request::UpdateFile(meta.clone());
        match self.call(&self.meta_addr, request).await? {
            Response::Version(version) => Ok(version),
            other => Err(unexpected("UpdateFile", &other)),
        }
    }

    /// Group `hashes` by the block server responsible for each.
    pub async fn get_block_store_map(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let request = Request::GetBlockStoreMap {
            hashes: hashes.to_vec(),
        };
        match self.call(&self.meta_addr, request).await? {
            Response::BlockStoreMap(map) => Ok(map),
            other => Err(unexpected("GetBlockStoreMap", &other)),
        }
    }

    /// The configured block-server addresses.
    pub async fn get_block_store_addrs(&self) -> Result<Vec<String>> {
        match self.call(&self.meta_addr, Request::GetBlockStoreAddrs).await? {
            Response::BlockStoreAddrs(addrs) => Ok(addrs),
            other => Err(unexpected("GetBlockStoreAddrs", &other)),
        }
    }
}

fn unexpected(op: &str, response: &Response) -> color_eyre::eyre::Report {
    eyre!("unexpected response to {op}: {response:?}")
}
