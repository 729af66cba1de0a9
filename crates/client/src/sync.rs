//! The sync pass: three-way reconciliation between the base directory,
//! the local index, and the remote metadata registry
//!
//! Remote-wins work (downloads and tombstone applies) runs before uploads
//! so a stale local edit is never pushed over content this pass is about
//! to replace. A lost compare-and-set is never retried with a higher
//! version in the same pass; the next pass reconciles.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use bytes::Bytes;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{debug, info, warn};

use blocksync_core::chunk::{file_hash_list, read_blocks};
use blocksync_core::hash::{block_hash_string, EMPTYFILE_HASH, INDEX_FILENAME};
use blocksync_core::meta::{FileInfoMap, FileMetaData};
use blocksync_core::protocol::Block;

use crate::index::{load_index, write_index, INDEX_TMP_FILENAME};
use crate::rpc::RpcClient;

/// Run one full reconciliation pass over `base_dir`.
///
/// Per-file failures (local I/O, RPC) are logged and skip that file; the
/// rest of the pass proceeds and the index is rewritten from whatever
/// subset completed.
///
/// # Errors
/// Returns an error if the base directory cannot be scanned, the remote
/// index cannot be fetched, or the local index cannot be rewritten.
pub async fn sync(client: &RpcClient, base_dir: &Path, block_size: usize) -> Result<()> {
    let local_hashes = scan_base_dir(base_dir, block_size)?;
    let mut local_index = load_index(base_dir)?;
    let remote_index = client.get_file_info_map().await?;

    let plan = classify(&local_hashes, &local_index, &remote_index);
    info!(
        "sync plan: {} downloads, {} remote deletes, {} local deletes, {} uploads",
        plan.downloads.len(),
        plan.remote_deletes.len(),
        plan.local_deletes.len(),
        plan.uploads.len()
    );

    for filename in &plan.downloads {
        if let Err(e) = download_file(client, base_dir, &remote_index[filename], &mut local_index).await
        {
            warn!("download of {filename} failed: {e}");
        }
    }

    for filename in &plan.remote_deletes {
        if let Err(e) = apply_tombstone(base_dir, &remote_index[filename], &mut local_index) {
            warn!("removing {filename} failed: {e}");
        }
    }

    for filename in &plan.local_deletes {
        if let Err(e) = upload_tombstone(client, base_dir, filename, &mut local_index).await {
            warn!("tombstone for {filename} failed: {e}");
        }
    }

    for filename in &plan.uploads {
        if let Err(e) = upload_file(client, base_dir, filename, block_size, &mut local_index).await {
            warn!("upload of {filename} failed: {e}");
        }
    }

    write_index(base_dir, &local_index)?;
    Ok(())
}

/// Hash every regular file in the base directory (top level only), except
/// the index file and its rewrite scratch. Unreadable files are skipped
/// with a warning.
fn scan_base_dir(base_dir: &Path, block_size: usize) -> Result<HashMap<String, Vec<String>>> {
    let mut hashes = HashMap::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(filename) = entry.file_name().into_string() else {
            warn!("skipping non-UTF-8 filename {:?}", entry.file_name());
            continue;
        };
        if filename == INDEX_FILENAME || filename == INDEX_TMP_FILENAME {
            continue;
        }
        match file_hash_list(&entry.path(), block_size) {
            Ok(list) => {
                hashes.insert(filename, list);
            }
            Err(e) => warn!("skipping unreadable file {filename}: {e}"),
        }
    }
    Ok(hashes)
}

/// What one pass has decided to do, per filename.
#[derive(Debug, Default, PartialEq, Eq)]
struct SyncPlan {
    /// Remote is authoritative: fetch content, or record a tombstone the
    /// local index has never seen.
    downloads: Vec<String>,
    /// A newer remote tombstone: remove the local file and record it.
    remote_deletes: Vec<String>,
    /// The local file is gone: push a tombstone at the next version.
    local_deletes: Vec<String>,
    /// New or edited locally: push blocks, then the metadata update.
    uploads: Vec<String>,
}

/// Classify every filename in the union of the three views.
fn classify(
    local_hashes: &HashMap<String, Vec<String>>,
    local_index: &FileInfoMap,
    remote_index: &FileInfoMap,
) -> SyncPlan {
    let names: BTreeSet<&String> = local_hashes
        .keys()
        .chain(local_index.keys())
        .chain(remote_index.keys())
        .collect();

    let mut plan = SyncPlan::default();
    for &name in &names {
        let on_disk = local_hashes.get(name);
        let local = local_index.get(name);
        let remote = remote_index.get(name);

        match (local, remote) {
            // Never acknowledged here: the remote copy wins whatever is on
            // disk. A remote tombstone only lands in the index.
            (None, Some(_)) => plan.downloads.push(name.clone()),

            (Some(local_meta), Some(remote_meta)) => {
                if remote_meta.version > local_meta.version {
                    if remote_meta.is_tombstone() {
                        plan.remote_deletes.push(name.clone());
                    } else {
                        plan.downloads.push(name.clone());
                    }
                } else if remote_meta.version == local_meta.version {
                    match on_disk {
                        // A file recreated over a tombstone differs from
                        // the tombstone list and goes back up as an edit.
                        Some(hashes) if *hashes != local_meta.block_hash_list => {
                            plan.uploads.push(name.clone());
                        }
                        Some(_) => {}
                        None if !remote_meta.is_tombstone() => {
                            plan.local_deletes.push(name.clone());
                        }
                        None => {}
                    }
                }
                // remote < local cannot occur: the local index never runs
                // ahead of the registry
            }

            // Indexed but gone from the registry: cannot occur under the
            // invariants. Re-offer the file if it still exists.
            (Some(_), None) if on_disk.is_some() => plan.uploads.push(name.clone()),
            (Some(_), None) => {}

            (None, None) => {
                if on_disk.is_some() {
                    plan.uploads.push(name.clone());
                }
            }
        }
    }
    plan
}

/// Fetch `meta`'s content and replace the local file and index entry. A
/// tombstone is recorded without touching the filesystem.
async fn download_file(
    client: &RpcClient,
    base_dir: &Path,
    meta: &FileMetaData,
    local_index: &mut FileInfoMap,
) -> Result<()> {
    if meta.is_tombstone() {
        local_index.insert(meta.filename.clone(), meta.clone());
        debug!("recorded tombstone for {} at v{}", meta.filename, meta.version);
        return Ok(());
    }

    let content = fetch_content(client, meta).await?;
    std::fs::write(base_dir.join(&meta.filename), &content)?;
    local_index.insert(meta.filename.clone(), meta.clone());
    info!("downloaded {} at v{}", meta.filename, meta.version);
    Ok(())
}

/// Concatenate the blocks referenced by `meta`, in hash-list order. The
/// empty-file sentinel yields zero bytes without any block fetch; a block
/// server answering with an empty block contributes zero bytes.
async fn fetch_content(client: &RpcClient, meta: &FileMetaData) -> Result<Vec<u8>> {
    if meta.is_empty_file() {
        return Ok(Vec::new());
    }

    let store_map = client.get_block_store_map(&meta.block_hash_list).await?;
    let mut addr_of: HashMap<&String, &String> = HashMap::new();
    for (addr, hashes) in &store_map {
        for hash in hashes {
            addr_of.insert(hash, addr);
        }
    }

    let mut content = Vec::new();
    for hash in &meta.block_hash_list {
        let addr = addr_of
            .get(hash)
            .ok_or_else(|| eyre!("no block server responsible for {hash}"))?;
        let block = client.get_block(hash, addr).await?;
        content.extend_from_slice(&block.data);
    }
    Ok(content)
}

/// Apply a remote tombstone: remove the local file if present, record the
/// tombstone metadata.
fn apply_tombstone(
    base_dir: &Path,
    meta: &FileMetaData,
    local_index: &mut FileInfoMap,
) -> Result<()> {
    let path = base_dir.join(&meta.filename);
    match std::fs::remove_file(&path) {
        Ok(()) => info!("removed {} (deleted remotely at v{})", meta.filename, meta.version),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    local_index.insert(meta.filename.clone(), meta.clone());
    Ok(())
}

/// Push a tombstone for a locally deleted file. On a lost compare-and-set
/// the remote winner is downloaded instead.
async fn upload_tombstone(
    client: &RpcClient,
    base_dir: &Path,
    filename: &str,
    local_index: &mut FileInfoMap,
) -> Result<()> {
    let version = local_index
        .get(filename)
        .map_or(1, |meta| meta.version + 1);
    let meta = FileMetaData::tombstone(filename, version);
    submit_update(client, base_dir, meta, local_index).await
}

/// Push a file's blocks and its versioned metadata update. On a lost
/// compare-and-set the remote winner is downloaded instead.
async fn upload_file(
    client: &RpcClient,
    base_dir: &Path,
    filename: &str,
    block_size: usize,
    local_index: &mut FileInfoMap,
) -> Result<()> {
    let path = base_dir.join(filename);
    let blocks = read_blocks(&path, block_size)?;
    let hash_list = if blocks.is_empty() {
        vec![EMPTYFILE_HASH.to_string()]
    } else {
        blocks.iter().map(|b| block_hash_string(b)).collect()
    };

    if !blocks.is_empty() {
        put_missing_blocks(client, &hash_list, &blocks).await?;
    }

    let version = local_index
        .get(filename)
        .map_or(1, |meta| meta.version + 1);
    let meta = FileMetaData::new(filename, version, hash_list);
    submit_update(client, base_dir, meta, local_index).await
}

/// Group a file's blocks by responsible server and push the ones each
/// server is missing. Every referenced block is durable before the caller
/// issues the metadata update.
async fn put_missing_blocks(
    client: &RpcClient,
    hash_list: &[String],
    blocks: &[Bytes],
) -> Result<()> {
    let data_of: HashMap<&str, &Bytes> = hash_list
        .iter()
        .map(String::as_str)
        .zip(blocks.iter())
        .collect();

    let store_map = client.get_block_store_map(hash_list).await?;
    for (addr, hashes) in &store_map {
        let present: HashSet<String> = client.has_blocks(hashes, addr).await?.into_iter().collect();
        let mut pushed: HashSet<&String> = HashSet::new();
        for hash in hashes {
            if present.contains(hash) || !pushed.insert(hash) {
                continue;
            }
            let data = data_of
                .get(hash.as_str())
                .ok_or_else(|| eyre!("server returned a hash this file does not contain: {hash}"))?;
            client.put_block(Block::new((*data).clone()), addr).await?;
            debug!("put block {hash} on {addr}");
        }
    }
    Ok(())
}

/// Issue the metadata update and resolve its outcome. A conflict sentinel
/// or a failed call falls back to downloading the current remote record,
/// if one exists: the remote is authoritative.
async fn submit_update(
    client: &RpcClient,
    base_dir: &Path,
    meta: FileMetaData,
    local_index: &mut FileInfoMap,
) -> Result<()> {
    let submitted = meta.version;
    match client.update_file(&meta).await {
        Ok(version) if version == submitted => {
            info!("updated {} to v{version}", meta.filename);
            local_index.insert(meta.filename.clone(), meta);
            Ok(())
        }
        outcome => {
            if let Err(e) = &outcome {
                warn!("UpdateFile for {} failed: {e}", meta.filename);
            } else {
                debug!("lost update race for {} at v{submitted}", meta.filename);
            }
            // The pre-pass snapshot is stale by definition here; fetch the
            // winner's record so the index ends up at the winning version.
            let fresh = client.get_file_info_map().await?;
            if let Some(winner) = fresh.get(&meta.filename) {
                download_file(client, base_dir, winner, local_index).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use blocksync_core::hash::{EMPTYFILE_HASH, TOMBSTONE_HASH};

    fn hashes_of(data: &[&[u8]]) -> Vec<String> {
        data.iter().map(|d| block_hash_string(d)).collect()
    }

    fn meta(filename: &str, version: i32, hashes: &[String]) -> FileMetaData {
        FileMetaData::new(filename, version, hashes.to_vec())
    }

    fn one_file(filename: &str, hashes: &[String]) -> HashMap<String, Vec<String>> {
        HashMap::from([(filename.to_string(), hashes.to_vec())])
    }

    fn index_with(meta: FileMetaData) -> FileInfoMap {
        FileInfoMap::from([(meta.filename.clone(), meta)])
    }

    #[test]
    fn test_scan_skips_index_and_directories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"content").unwrap();
        fs::write(dir.path().join(INDEX_FILENAME), b"not synced").unwrap();
        fs::write(dir.path().join(INDEX_TMP_FILENAME), b"not synced").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let scanned = scan_base_dir(dir.path(), 4096).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned["a.txt"], hashes_of(&[b"content"]));
    }

    #[test]
    fn test_scan_empty_file_gets_sentinel() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty.bin"), b"").unwrap();

        let scanned = scan_base_dir(dir.path(), 4096).unwrap();
        assert_eq!(scanned["empty.bin"], vec![EMPTYFILE_HASH.to_string()]);
    }

    #[test]
    fn test_classify_new_local_file_uploads() {
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"x"])),
            &FileInfoMap::new(),
            &FileInfoMap::new(),
        );
        assert_eq!(plan.uploads, ["a.txt"]);
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn test_classify_unchanged_file_is_noop() {
        let hashes = hashes_of(&[b"x"]);
        let record = meta("a.txt", 2, &hashes);
        let plan = classify(
            &one_file("a.txt", &hashes),
            &index_with(record.clone()),
            &index_with(record),
        );
        assert_eq!(plan, SyncPlan::default());
    }

    #[test]
    fn test_classify_local_edit_uploads() {
        let old = meta("a.txt", 2, &hashes_of(&[b"old"]));
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"new"])),
            &index_with(old.clone()),
            &index_with(old),
        );
        assert_eq!(plan.uploads, ["a.txt"]);
    }

    #[test]
    fn test_classify_newer_remote_downloads() {
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"mine"])),
            &index_with(meta("a.txt", 1, &hashes_of(&[b"mine"]))),
            &index_with(meta("a.txt", 2, &hashes_of(&[b"theirs"]))),
        );
        assert_eq!(plan.downloads, ["a.txt"]);
        assert!(plan.uploads.is_empty());
    }

    #[test]
    fn test_classify_newer_remote_tombstone_deletes_locally() {
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"mine"])),
            &index_with(meta("a.txt", 3, &hashes_of(&[b"mine"]))),
            &index_with(FileMetaData::tombstone("a.txt", 4)),
        );
        assert_eq!(plan.remote_deletes, ["a.txt"]);
        assert!(plan.uploads.is_empty());
    }

    #[test]
    fn test_classify_local_delete_pushes_tombstone() {
        let record = meta("a.txt", 3, &hashes_of(&[b"gone"]));
        let plan = classify(
            &HashMap::new(),
            &index_with(record.clone()),
            &index_with(record),
        );
        assert_eq!(plan.local_deletes, ["a.txt"]);
    }

    #[test]
    fn test_classify_remote_only_file_downloads() {
        let plan = classify(
            &HashMap::new(),
            &FileInfoMap::new(),
            &index_with(meta("a.txt", 1, &hashes_of(&[b"x"]))),
        );
        assert_eq!(plan.downloads, ["a.txt"]);
    }

    #[test]
    fn test_classify_unseen_remote_tombstone_records_only() {
        // Tombstone the local index has never seen: goes through the
        // download path, which records it without touching the disk.
        let plan = classify(
            &HashMap::new(),
            &FileInfoMap::new(),
            &index_with(FileMetaData::tombstone("a.txt", 2)),
        );
        assert_eq!(plan.downloads, ["a.txt"]);
        assert!(plan.remote_deletes.is_empty());
    }

    #[test]
    fn test_classify_settled_tombstone_is_noop() {
        let tombstone = FileMetaData::tombstone("a.txt", 4);
        let plan = classify(
            &HashMap::new(),
            &index_with(tombstone.clone()),
            &index_with(tombstone),
        );
        assert_eq!(plan, SyncPlan::default());
    }

    #[test]
    fn test_classify_recreated_file_over_tombstone_uploads() {
        let tombstone = FileMetaData::tombstone("a.txt", 4);
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"reborn"])),
            &index_with(tombstone.clone()),
            &index_with(tombstone),
        );
        assert_eq!(plan.uploads, ["a.txt"]);
    }

    #[test]
    fn test_classify_orphaned_local_record_reuploads_if_present() {
        // Indexed here but gone from the registry: outside the invariants,
        // so the file on disk is offered back up at the next version
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"still here"])),
            &index_with(meta("a.txt", 2, &hashes_of(&[b"still here"]))),
            &FileInfoMap::new(),
        );
        assert_eq!(plan.uploads, ["a.txt"]);
        assert!(plan.downloads.is_empty());
        assert!(plan.local_deletes.is_empty());
    }

    #[test]
    fn test_classify_orphaned_local_record_without_file_is_noop() {
        let plan = classify(
            &HashMap::new(),
            &index_with(meta("a.txt", 2, &hashes_of(&[b"gone everywhere"]))),
            &FileInfoMap::new(),
        );
        assert_eq!(plan, SyncPlan::default());
    }

    #[test]
    fn test_classify_file_present_but_never_indexed_downloads() {
        // On disk and in the registry, but this client never acknowledged
        // it: the remote copy wins.
        let plan = classify(
            &one_file("a.txt", &hashes_of(&[b"mine"])),
            &FileInfoMap::new(),
            &index_with(meta("a.txt", 1, &hashes_of(&[b"theirs"]))),
        );
        assert_eq!(plan.downloads, ["a.txt"]);
        assert!(plan.uploads.is_empty());
    }

    #[test]
    fn test_classify_mixed_views() {
        let unchanged = meta("same.txt", 1, &hashes_of(&[b"same"]));
        let edited_old = meta("edit.txt", 2, &hashes_of(&[b"old"]));

        let mut local_hashes = one_file("same.txt", &hashes_of(&[b"same"]));
        local_hashes.insert("edit.txt".to_string(), hashes_of(&[b"new"]));
        local_hashes.insert("fresh.txt".to_string(), hashes_of(&[b"fresh"]));

        let mut local_index = index_with(unchanged.clone());
        local_index.insert("edit.txt".to_string(), edited_old.clone());
        local_index.insert(
            "gone.txt".to_string(),
            meta("gone.txt", 1, &hashes_of(&[b"gone"])),
        );

        let mut remote_index = index_with(unchanged);
        remote_index.insert("edit.txt".to_string(), edited_old);
        remote_index.insert(
            "gone.txt".to_string(),
            meta("gone.txt", 1, &hashes_of(&[b"gone"])),
        );
        remote_index.insert(
            "incoming.txt".to_string(),
            meta("incoming.txt", 1, &hashes_of(&[b"incoming"])),
        );

        let plan = classify(&local_hashes, &local_index, &remote_index);
        assert_eq!(plan.downloads, ["incoming.txt"]);
        assert_eq!(plan.local_deletes, ["gone.txt"]);
        assert_eq!(plan.uploads, ["edit.txt", "fresh.txt"]);
        assert!(plan.remote_deletes.is_empty());
    }

    #[test]
    fn test_apply_tombstone_removes_file_and_records() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"doomed").unwrap();

        let tombstone = FileMetaData::tombstone("a.txt", 2);
        let mut local_index = FileInfoMap::new();
        apply_tombstone(dir.path(), &tombstone, &mut local_index).unwrap();

        assert!(!dir.path().join("a.txt").exists());
        assert!(local_index["a.txt"].is_tombstone());
        assert_eq!(local_index["a.txt"].block_hash_list, [TOMBSTONE_HASH]);

        // Applying again with the file already gone is fine
        apply_tombstone(dir.path(), &tombstone, &mut local_index).unwrap();
    }
}
