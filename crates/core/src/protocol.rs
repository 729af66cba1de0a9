//! Framed request/response protocol for the block and metadata services
//!
//! Wire format (all integers big-endian):
//!
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Inside payloads: strings are u16-length-prefixed UTF-8, byte buffers are
//! u32-length-prefixed, lists are u32-count-prefixed.
//!
//! Request types:
//! - 0x01: PutBlock (size:4, data)
//! - 0x02: GetBlock (hash)
//! - 0x03: HasBlocks (hash list)
//! - 0x04: GetBlockHashes (no payload)
//! - 0x05: GetFileInfoMap (no payload)
//! - 0x06: UpdateFile (file metadata)
//! - 0x07: GetBlockStoreMap (hash list)
//! - 0x08: GetBlockStoreAddrs (no payload)
//!
//! Response types:
//! - 0x81: Success (flag:1)
//! - 0x82: Block (size:4, data)
//! - 0x83: BlockHashes (hash list)
//! - 0x84: FileInfoMap (count, file metadata entries)
//! - 0x85: Version (version:4)
//! - 0x86: BlockStoreMap (count, (addr, hash list) entries)
//! - 0x87: BlockStoreAddrs (addr list)
//! - 0xFF: Error (message)

use std::collections::HashMap;
use std::io::Cursor;

use bytes::Bytes;
use color_eyre::eyre::{ensure, eyre};
use color_eyre::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::meta::{FileInfoMap, FileMetaData};

/// Upper bound on a frame payload. Generous next to any sane block size.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Message type identifiers
pub mod msg {
    pub const PUT_BLOCK: u8 = 0x01;
    pub const GET_BLOCK: u8 = 0x02;
    pub const HAS_BLOCKS: u8 = 0x03;
    pub const GET_BLOCK_HASHES: u8 = 0x04;
    pub const GET_FILE_INFO_MAP: u8 = 0x05;
    pub const UPDATE_FILE: u8 = 0x06;
    pub const GET_BLOCK_STORE_MAP: u8 = 0x07;
    pub const GET_BLOCK_STORE_ADDRS: u8 = 0x08;

    pub const SUCCESS: u8 = 0x81;
    pub const BLOCK: u8 = 0x82;
    pub const BLOCK_HASHES: u8 = 0x83;
    pub const FILE_INFO_MAP: u8 = 0x84;
    pub const VERSION: u8 = 0x85;
    pub const BLOCK_STORE_MAP: u8 = 0x86;
    pub const BLOCK_STORE_ADDRS: u8 = 0x87;
    pub const ERROR: u8 = 0xFF;
}

/// A block payload with its declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub data: Bytes,
    pub size: i32,
}

impl Block {
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        let size = data.len() as i32;
        Self { data, size }
    }

    /// The well-known answer for an unknown hash: zero bytes, size 0.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            size: 0,
        }
    }
}

/// A call from a client to one of the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    PutBlock(Block),
    GetBlock { hash: String },
    HasBlocks { hashes: Vec<String> },
    GetBlockHashes,
    GetFileInfoMap,
    UpdateFile(FileMetaData),
    GetBlockStoreMap { hashes: Vec<String> },
    GetBlockStoreAddrs,
}

/// A service's answer to a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(bool),
    Block(Block),
    BlockHashes(Vec<String>),
    FileInfoMap(FileInfoMap),
    Version(i32),
    BlockStoreMap(HashMap<String, Vec<String>>),
    BlockStoreAddrs(Vec<String>),
    Error(String),
}

// === payload encoding ===

fn put_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    ensure!(s.len() <= usize::from(u16::MAX), "string too long: {} bytes", s.len());
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_string_list(buf: &mut Vec<u8>, list: &[String]) -> Result<()> {
    buf.extend_from_slice(&(list.len() as u32).to_be_bytes());
    for s in list {
        put_string(buf, s)?;
    }
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn put_block(buf: &mut Vec<u8>, block: &Block) {
    buf.extend_from_slice(&block.size.to_be_bytes());
    put_bytes(buf, &block.data);
}

fn put_file_meta(buf: &mut Vec<u8>, meta: &FileMetaData) -> Result<()> {
    put_string(buf, &meta.filename)?;
    buf.extend_from_slice(&meta.version.to_be_bytes());
    put_string_list(buf, &meta.block_hash_list)
}

// === payload decoding ===

fn get_u16(r: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut b = [0u8; 2];
    std::io::Read::read_exact(r, &mut b)?;
    Ok(u16::from_be_bytes(b))
}

fn get_u32(r: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut b = [0u8; 4];
    std::io::Read::read_exact(r, &mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn get_i32(r: &mut Cursor<&[u8]>) -> Result<i32> {
    let mut b = [0u8; 4];
    std::io::Read::read_exact(r, &mut b)?;
    Ok(i32::from_be_bytes(b))
}

fn get_string(r: &mut Cursor<&[u8]>) -> Result<String> {
    let len = usize::from(get_u16(r)?);
    let mut b = vec![0u8; len];
    std::io::Read::read_exact(r, &mut b)?;
    Ok(String::from_utf8(b)?)
}

fn get_string_list(r: &mut Cursor<&[u8]>) -> Result<Vec<String>> {
    let count = get_u32(r)? as usize;
    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        list.push(get_string(r)?);
    }
    Ok(list)
}

fn get_bytes(r: &mut Cursor<&[u8]>) -> Result<Bytes> {
    let len = get_u32(r)? as usize;
    let mut b = vec![0u8; len];
    std::io::Read::read_exact(r, &mut b)?;
    Ok(Bytes::from(b))
}

fn get_block(r: &mut Cursor<&[u8]>) -> Result<Block> {
    let size = get_i32(r)?;
    let data = get_bytes(r)?;
    Ok(Block { data, size })
}

fn get_file_meta(r: &mut Cursor<&[u8]>) -> Result<FileMetaData> {
    let filename = get_string(r)?;
    let version = get_i32(r)?;
    let block_hash_list = get_string_list(r)?;
    Ok(FileMetaData {
        filename,
        version,
        block_hash_list,
    })
}

// === framing ===

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg_type: u8, payload: &[u8]) -> Result<()> {
    ensure!(
        payload.len() <= MAX_FRAME_LEN as usize,
        "frame payload too large: {} bytes",
        payload.len()
    );
    w.write_u8(msg_type).await?;
    w.write_u32(payload.len() as u32).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(u8, Vec<u8>)> {
    let msg_type = r.read_u8().await?;
    let len = r.read_u32().await?;
    ensure!(len <= MAX_FRAME_LEN, "frame payload too large: {len} bytes");
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Ok((msg_type, payload))
}

/// Send one request frame.
///
/// # Errors
/// Returns an error if encoding or the underlying write fails.
pub async fn write_request<W: AsyncWrite + Unpin>(w: &mut W, request: &Request) -> Result<()> {
    let mut payload = Vec::new();
    let msg_type = match request {
        Request::PutBlock(block) => {
            put_block(&mut payload, block);
            msg::PUT_BLOCK
        }
        Request::GetBlock { hash } => {
            put_string(&mut payload, hash)?;
            msg::GET_BLOCK
        }
        Request::HasBlocks { hashes } => {
            put_string_list(&mut payload, hashes)?;
            msg::HAS_BLOCKS
        }
        Request::GetBlockHashes => msg::GET_BLOCK_HASHES,
        Request::GetFileInfoMap => msg::GET_FILE_INFO_MAP,
        Request::UpdateFile(meta) => {
            put_file_meta(&mut payload, meta)?;
            msg::UPDATE_FILE
        }
        Request::GetBlockStoreMap { hashes } => {
            put_string_list(&mut payload, hashes)?;
            msg::GET_BLOCK_STORE_MAP
        }
        Request::GetBlockStoreAddrs => msg::GET_BLOCK_STORE_ADDRS,
    };
    write_frame(w, msg_type, &payload).await
}

/// Read one request frame.
///
/// # Errors
/// Returns an error on EOF, a malformed payload, or an unknown type.
pub async fn read_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<Request> {
    let (msg_type, payload) = read_frame(r).await?;
    let mut cursor = Cursor::new(payload.as_slice());
    let request = match msg_type {
        msg::PUT_BLOCK => Request::PutBlock(get_block(&mut cursor)?),
        msg::GET_BLOCK => Request::GetBlock {
            hash: get_string(&mut cursor)?,
        },
        msg::HAS_BLOCKS => Request::HasBlocks {
            hashes: get_string_list(&mut cursor)?,
        },
        msg::GET_BLOCK_HASHES => Request::GetBlockHashes,
        msg::GET_FILE_INFO_MAP => Request::GetFileInfoMap,
        msg::UPDATE_FILE => Request::UpdateFile(get_file_meta(&mut cursor)?),
        msg::GET_BLOCK_STORE_MAP => Request::GetBlockStoreMap {
            hashes: get_string_list(&mut cursor)?,
        },
        msg::GET_BLOCK_STORE_ADDRS => Request::GetBlockStoreAddrs,
        other => return Err(eyre!("unknown request type: {other:#04x}")),
    };
    Ok(request)
}

/// Send one response frame.
///
/// # Errors
/// Returns an error if encoding or the underlying write fails.
pub async fn write_response<W: AsyncWrite + Unpin>(w: &mut W, response: &Response) -> Result<()> {
    let mut payload = Vec::new();
    let msg_type = match response {
        Response::Success(flag) => {
            payload.push(u8::from(*flag));
            msg::SUCCESS
        }
        Response::Block(block) => {
            put_block(&mut payload, block);
            msg::BLOCK
        }
        Response::BlockHashes(hashes) => {
            put_string_list(&mut payload, hashes)?;
            msg::BLOCK_HASHES
        }
        Response::FileInfoMap(map) => {
            payload.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for meta in map.values() {
                put_file_meta(&mut payload, meta)?;
            }
            msg::FILE_INFO_MAP
        }
        Response::Version(version) => {
            payload.extend_from_slice(&version.to_be_bytes());
            msg::VERSION
        }
        Response::BlockStoreMap(map) => {
            payload.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for (addr, hashes) in map {
                put_string(&mut payload, addr)?;
                put_string_list(&mut payload, hashes)?;
            }
            msg::BLOCK_STORE_MAP
        }
        Response::BlockStoreAddrs(addrs) => {
            put_string_list(&mut payload, addrs)?;
            msg::BLOCK_STORE_ADDRS
        }
        Response::Error(message) => {
            payload.extend_from_slice(message.as_bytes());
            msg::ERROR
        }
    };
    write_frame(w, msg_type, &payload).await
}

/// Read one response frame.
///
/// # Errors
/// Returns an error on EOF, a malformed payload, or an unknown type.
pub async fn read_response<R: AsyncRead + Unpin>(r: &mut R) -> Result<Response> {
    let (msg_type, payload) = read_frame(r).await?;
    let mut cursor = Cursor::new(payload.as_slice());
    let response = match msg_type {
        msg::SUCCESS => {
            let mut flag = [0u8; 1];
            std::io::Read::read_exact(&mut cursor, &mut flag)?;
            Response::Success(flag[0] != 0)
        }
        msg::BLOCK => Response::Block(get_block(&mut cursor)?),
        msg::BLOCK_HASHES => Response::BlockHashes(get_string_list(&mut cursor)?),
        msg::FILE_INFO_MAP => {
            let count = get_u32(&mut cursor)? as usize;
            let mut map = FileInfoMap::with_capacity(count);
            for _ in 0..count {
                let meta = get_file_meta(&mut cursor)?;
                map.insert(meta.filename.clone(), meta);
            }
            Response::FileInfoMap(map)
        }
        msg::VERSION => Response::Version(get_i32(&mut cursor)?),
        msg::BLOCK_STORE_MAP => {
            let count = get_u32(&mut cursor)? as usize;
            let mut map = HashMap::with_capacity(count);
            for _ in 0..count {
                let addr = get_string(&mut cursor)?;
                let hashes = get_string_list(&mut cursor)?;
                map.insert(addr, hashes);
            }
            Response::BlockStoreMap(map)
        }
        msg::BLOCK_STORE_ADDRS => Response::BlockStoreAddrs(get_string_list(&mut cursor)?),
        msg::ERROR => Response::Error(String::from_utf8_lossy(&payload).into_owned()),
        other => return Err(eyre!("unknown response type: {other:#04x}")),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn request_roundtrip(request: Request) -> Request {
        let mut buf = Cursor::new(Vec::new());
        write_request(&mut buf, &request).await.unwrap();
        let buf = buf.into_inner();
        read_request(&mut buf.as_slice()).await.unwrap()
    }

    async fn response_roundtrip(response: Response) -> Response {
        let mut buf = Cursor::new(Vec::new());
        write_response(&mut buf, &response).await.unwrap();
        let buf = buf.into_inner();
        read_response(&mut buf.as_slice()).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_block_roundtrip() {
        let request = Request::PutBlock(Block::new(Bytes::from_static(b"block payload")));
        assert_eq!(request_roundtrip(request.clone()).await, request);
    }

    #[tokio::test]
    async fn test_empty_payload_requests_roundtrip() {
        for request in [
            Request::GetBlockHashes,
            Request::GetFileInfoMap,
            Request::GetBlockStoreAddrs,
        ] {
            assert_eq!(request_roundtrip(request.clone()).await, request);
        }
    }

    #[tokio::test]
    async fn test_update_file_roundtrip() {
        let request = Request::UpdateFile(FileMetaData::new(
            "dir-entry.txt",
            7,
            vec!["a".repeat(64), "b".repeat(64), "0".to_string()],
        ));
        assert_eq!(request_roundtrip(request.clone()).await, request);
    }

    #[tokio::test]
    async fn test_hash_list_requests_roundtrip() {
        let hashes = vec!["c".repeat(64), "c".repeat(64), "d".repeat(64)];
        for request in [
            Request::HasBlocks {
                hashes: hashes.clone(),
            },
            Request::GetBlockStoreMap {
                hashes: hashes.clone(),
            },
            Request::GetBlock {
                hash: hashes[0].clone(),
            },
        ] {
            assert_eq!(request_roundtrip(request.clone()).await, request);
        }
    }

    #[tokio::test]
    async fn test_file_info_map_roundtrip() {
        let mut map = FileInfoMap::new();
        map.insert(
            "a.txt".to_string(),
            FileMetaData::new("a.txt", 1, vec!["e".repeat(64)]),
        );
        map.insert(
            "b.txt".to_string(),
            FileMetaData::new("b.txt", 3, vec!["-1".to_string()]),
        );
        let response = Response::FileInfoMap(map);
        assert_eq!(response_roundtrip(response.clone()).await, response);
    }

    #[tokio::test]
    async fn test_block_store_map_roundtrip() {
        let mut map = HashMap::new();
        map.insert("server-a:9001".to_string(), vec!["f".repeat(64), "f".repeat(64)]);
        map.insert("server-b:9002".to_string(), vec!["9".repeat(64)]);
        let response = Response::BlockStoreMap(map);
        assert_eq!(response_roundtrip(response.clone()).await, response);
    }

    #[tokio::test]
    async fn test_version_and_error_roundtrip() {
        assert_eq!(
            response_roundtrip(Response::Version(-1)).await,
            Response::Version(-1)
        );
        let err = Response::Error("block service not hosted here".to_string());
        assert_eq!(response_roundtrip(err.clone()).await, err);
    }

    #[tokio::test]
    async fn test_empty_block_response() {
        let response = Response::Block(Block::empty());
        match response_roundtrip(response).await {
            Response::Block(block) => {
                assert!(block.data.is_empty());
                assert_eq!(block.size, 0);
            }
            other => panic!("wrong response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let mut buf = Cursor::new(Vec::new());
        write_frame(&mut buf, 0x7E, b"").await.unwrap();
        let buf = buf.into_inner();
        assert!(read_request(&mut buf.as_slice()).await.is_err());
        assert!(read_response(&mut buf.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_payload_rejected() {
        let mut buf = Cursor::new(Vec::new());
        write_request(
            &mut buf,
            &Request::GetBlock {
                hash: "a".repeat(64),
            },
        )
        .await
        .unwrap();
        let mut buf = buf.into_inner();
        buf.truncate(buf.len() - 3);
        assert!(read_request(&mut buf.as_slice()).await.is_err());
    }
}
