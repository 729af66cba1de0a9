//! Durable local index: the last remote state this client acknowledged
//!
//! A normalized row set `(file_name, version, hash_index, hash_value)` in
//! a SQLite file inside the base directory. The whole table is rewritten
//! at the end of every sync; the rewrite goes to a temporary database that
//! is renamed over the old index so a crash mid-write cannot leave a torn
//! one behind.

use std::collections::HashMap;
use std::path::Path;

use color_eyre::Result;
use rusqlite::{params, Connection};

use blocksync_core::hash::INDEX_FILENAME;
use blocksync_core::meta::{FileInfoMap, FileMetaData};

/// Scratch name used during the atomic rewrite. Skipped by the scanner.
pub(crate) const INDEX_TMP_FILENAME: &str = "index.db.tmp";

const CREATE_TABLE: &str = "create table if not exists indexes (
    file_name TEXT,
    version INTEGER,
    hash_index INTEGER,
    hash_value TEXT
)";

const SELECT_ROWS: &str = "select file_name, version, hash_value from indexes
    order by file_name, hash_index asc";

const INSERT_ROW: &str =
    "insert into indexes (file_name, version, hash_index, hash_value) values (?1, ?2, ?3, ?4)";

/// Load the index from `base_dir`. A missing index yields an empty map.
///
/// # Errors
/// Returns an error if the index exists but cannot be opened or read.
pub fn load_index(base_dir: &Path) -> Result<FileInfoMap> {
    let index_path = base_dir.join(INDEX_FILENAME);
    if !index_path.exists() {
        return Ok(HashMap::new());
    }

    let conn = Connection::open(&index_path)?;
    conn.execute(CREATE_TABLE, [])?;

    let mut map = FileInfoMap::new();
    let mut stmt = conn.prepare(SELECT_ROWS)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i32>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        let (file_name, version, hash_value) = row?;
        map.entry(file_name.clone())
            .or_insert_with(|| FileMetaData::new(file_name, version, Vec::new()))
            .block_hash_list
            .push(hash_value);
    }
    Ok(map)
}

/// Rewrite the index in `base_dir` from `files`.
///
/// # Errors
/// Returns an error if the temporary database cannot be written or the
/// rename into place fails.
pub fn write_index(base_dir: &Path, files: &FileInfoMap) -> Result<()> {
    let tmp_path = base_dir.join(INDEX_TMP_FILENAME);
    if tmp_path.exists() {
        std::fs::remove_file(&tmp_path)?;
    }

    {
        let mut conn = Connection::open(&tmp_path)?;
        conn.execute(CREATE_TABLE, [])?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_ROW)?;
            for meta in files.values() {
                for (hash_index, hash_value) in meta.block_hash_list.iter().enumerate() {
                    stmt.execute(params![
                        meta.filename,
                        meta.version,
                        hash_index as i64,
                        hash_value
                    ])?;
                }
            }
        }
        tx.commit()?;
    }

    std::fs::rename(&tmp_path, base_dir.join(INDEX_FILENAME))?;
    Ok(())
}
