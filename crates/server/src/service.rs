//! TCP service loop dispatching protocol requests to the hosted stores
//!
//! One spawned task per connection; each task answers request frames until
//! the peer hangs up. A request for a store this process does not host
//! gets an `Error` response rather than tearing the connection down.

use std::sync::Arc;

use color_eyre::Result;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use blocksync_core::protocol::{self, Request, Response};

use crate::block_store::BlockStore;
use crate::meta_store::MetaStore;

/// The stores hosted by one server process.
#[derive(Clone, Default)]
pub struct Services {
    pub meta: Option<Arc<MetaStore>>,
    pub block: Option<Arc<BlockStore>>,
}

impl Services {
    /// Host only the metadata service.
    #[must_use]
    pub fn meta(block_store_addrs: Vec<String>) -> Self {
        Self {
            meta: Some(Arc::new(MetaStore::new(block_store_addrs))),
            block: None,
        }
    }

    /// Host only the block service.
    #[must_use]
    pub fn block() -> Self {
        Self {
            meta: None,
            block: Some(Arc::new(BlockStore::new())),
        }
    }

    /// Host both services in one process.
    #[must_use]
    pub fn both(block_store_addrs: Vec<String>) -> Self {
        Self {
            meta: Some(Arc::new(MetaStore::new(block_store_addrs))),
            block: Some(Arc::new(BlockStore::new())),
        }
    }
}

/// Accept connections forever, one task per connection.
///
/// # Errors
/// Returns an error only if `accept` itself fails.
pub async fn serve(listener: TcpListener, services: Services) -> Result<()> {
    info!("serving on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("connection from {peer}");
        let services = services.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &services).await {
                // EOF on a finished client lands here too
                debug!("connection from {peer} closed: {e}");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, services: &Services) -> Result<()> {
    loop {
        let request = protocol::read_request(&mut stream).await?;
        let response = dispatch(services, request).await;
        protocol::write_response(&mut stream, &response).await?;
    }
}

async fn dispatch(services: &Services, request: Request) -> Response {
    match request {
        Request::PutBlock(block) => match &services.block {
            Some(store) => Response::Success(store.put_block(block).await),
            None => not_hosted("block"),
        },
        Request::GetBlock { hash } => match &services.block {
            Some(store) => Response::Block(store.get_block(&hash).await),
            None => not_hosted("block"),
        },
        Request::HasBlocks { hashes } => match &services.block {
            Some(store) => Response::BlockHashes(store.has_blocks(&hashes).await),
            None => not_hosted("block"),
        },
        Request::GetBlockHashes => match &services.block {
            Some(store) => Response::BlockHashes(store.block_hashes().await),
            None => not_hosted("block"),
        },
        Request::GetFileInfoMap => match &services.meta {
            Some(store) => Response::FileInfoMap(store.file_info_map().await),
            None => not_hosted("meta"),
        },
        Request::UpdateFile(meta) => match &services.meta {
            Some(store) => Response::Version(store.update_file(meta).await),
            None => not_hosted("meta"),
        },
        Request::GetBlockStoreMap { hashes } => match &services.meta {
            Some(store) => Response::BlockStoreMap(store.block_store_map(&hashes)),
            None => not_hosted("meta"),
        },
        Request::GetBlockStoreAddrs => match &services.meta {
            Some(store) => Response::BlockStoreAddrs(store.block_store_addrs().to_vec()),
            None => not_hosted("meta"),
        },
    }
}

fn not_hosted(service: &str) -> Response {
    Response::Error(format!("{service} service not hosted by this server"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_core::meta::FileMetaData;

    #[tokio::test]
    async fn test_dispatch_to_missing_service_answers_error() {
        let services = Services::block();
        let response = dispatch(&services, Request::GetFileInfoMap).await;
        assert!(matches!(response, Response::Error(_)));

        let services = Services::meta(vec!["bs:9001".to_string()]);
        let response = dispatch(&services, Request::GetBlockHashes).await;
        assert!(matches!(response, Response::Error(_)));
    }

    #[tokio::test]
    async fn test_dispatch_update_file() {
        let services = Services::meta(vec!["bs:9001".to_string()]);
        let meta = FileMetaData::new("a.txt", 1, vec!["-1".to_string()]);
        let response = dispatch(&services, Request::UpdateFile(meta)).await;
        assert_eq!(response, Response::Version(1));
    }
}
