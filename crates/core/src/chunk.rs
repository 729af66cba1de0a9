//! Fixed-size block chunking of local files
//!
//! A file's content is the concatenation of its blocks in hash-list order;
//! every block is `block_size` bytes except a possibly short final block.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use color_eyre::Result;

use crate::hash::{block_hash_string, EMPTYFILE_HASH};

/// Read the next block of at most `block_size` bytes. Short `read` returns
/// are re-driven so only end-of-file can shorten a block.
fn read_block<R: Read>(reader: &mut R, block_size: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    buf.truncate(filled);
    Ok(Some(buf))
}

/// The block payloads of a file, in order. Empty for a zero-length file.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn read_blocks(path: &Path, block_size: usize) -> Result<Vec<Bytes>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut blocks = Vec::new();
    while let Some(block) = read_block(&mut reader, block_size)? {
        blocks.push(Bytes::from(block));
    }
    Ok(blocks)
}

/// Hash list describing a file's content, one hash per block. A
/// zero-length file yields the single empty-file sentinel.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn file_hash_list(path: &Path, block_size: usize) -> Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hashes = Vec::new();
    while let Some(block) = read_block(&mut reader, block_size)? {
        hashes.push(block_hash_string(&block));
    }
    if hashes.is_empty() {
        hashes.push(EMPTYFILE_HASH.to_string());
    }
    Ok(hashes)
}
