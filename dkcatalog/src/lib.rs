//! Durable catalog of the backed up files and of their chunks.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use log::*;
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use commons_error::*;
use dkcrypto::dk_crypto::{KEY_LEN, NONCE_SEED_LEN};
use dkcrypto::CypherMode;

pub use model::{chunk_count, remote_key, ChunkRecord, ChunkStatus, FileRecord, FileStatus, NewFileRecord};

mod model;
mod schema;

const SELECT_FILE: &str = r#"SELECT file_id, original_path, file_size, chunk_size, chunk_count, cipher_mode,
                                   encryption_key, encryption_nonce_seed, created_at, status
                            FROM files "#;

const SELECT_CHUNK: &str = r#"SELECT chunk_id, file_id, chunk_index, chunk_size, backend_name, remote_key, checksum, status
                             FROM chunks "#;

/// The catalog serializes its callers on a single connection,
/// every write runs in its own transaction.
pub struct MetadataCatalog {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> BackupError {
    BackupError::Catalog(e.to_string())
}

impl MetadataCatalog {
    /// Open (or create) the catalog database file
    pub fn open(path: &Path) -> BackupResult<Self> {
        let conn = Connection::open(path)
            .map_err(db_err)
            .map_err(err_fwd!("Cannot open the catalog, path=[{:?}]", path))?;
        log_info!("Catalog opened, path=[{:?}]", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> BackupResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err).map_err(tr_fwd!())?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> BackupResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err)
            .map_err(tr_fwd!())?;
        conn.execute_batch(schema::SCHEMA)
            .map_err(db_err)
            .map_err(err_fwd!("Cannot create the catalog tables"))?;
        Ok(MetadataCatalog { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> BackupResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BackupError::Catalog("The catalog lock is poisoned".to_string()))
    }

    /// Register a new file, in the pending status.
    /// # Returns
    /// * `Ok(i64)` - The id of the file
    /// * `Err(BackupError::Validation)` - The record is not consistent
    pub fn create_file(&self, new_file: &NewFileRecord) -> BackupResult<i64> {
        if new_file.chunk_size == 0 {
            return Err(BackupError::validation("The chunk size must be positive"));
        }
        let expected_count = chunk_count(new_file.file_size, new_file.chunk_size);
        if expected_count != new_file.chunk_count as u64 {
            return Err(BackupError::validation(format!(
                "Wrong chunk count, chunk_count=[{}], expected=[{}]",
                new_file.chunk_count, expected_count
            )));
        }
        if new_file.encryption_key.len() != KEY_LEN || new_file.encryption_nonce_seed.len() != NONCE_SEED_LEN {
            return Err(BackupError::validation("Wrong length of the key material"));
        }

        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err).map_err(tr_fwd!())?;
        tx.execute(
            r#"INSERT INTO files (original_path, file_size, chunk_size, chunk_count, cipher_mode,
                                  encryption_key, encryption_nonce_seed, created_at, status)
               VALUES (:p_original_path, :p_file_size, :p_chunk_size, :p_chunk_count, :p_cipher_mode,
                       :p_encryption_key, :p_encryption_nonce_seed, :p_created_at, :p_status)"#,
            named_params! {
                ":p_original_path": new_file.original_path,
                ":p_file_size": new_file.file_size as i64,
                ":p_chunk_size": new_file.chunk_size as i64,
                ":p_chunk_count": new_file.chunk_count,
                ":p_cipher_mode": new_file.cipher_mode.as_str(),
                ":p_encryption_key": new_file.encryption_key,
                ":p_encryption_nonce_seed": new_file.encryption_nonce_seed,
                ":p_created_at": created_at,
                ":p_status": FileStatus::Pending.as_str(),
            },
        )
        .map_err(db_err)
        .map_err(err_fwd!("Cannot insert the file, original_path=[{}]", &new_file.original_path))?;
        let file_id = tx.last_insert_rowid();
        tx.commit().map_err(db_err).map_err(tr_fwd!())?;

        log_debug!(
            "File registered, file_id=[{}], file_size=[{}], chunk_count=[{}]",
            file_id,
            new_file.file_size,
            new_file.chunk_count
        );
        Ok(file_id)
    }

    /// Store the state of a chunk.
    /// An uploaded chunk is never overwritten, a queued or failed one is replaced.
    pub fn record_chunk(&self, chunk: &ChunkRecord) -> BackupResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err).map_err(tr_fwd!())?;

        let file = fetch_file(&tx, chunk.file_id)?.ok_or_else(|| {
            BackupError::validation(format!("The chunk refers to an unknown file, file_id=[{}]", chunk.file_id))
        })?;

        let expected_len = file.expected_chunk_len(chunk.chunk_index).ok_or_else(|| {
            BackupError::validation(format!(
                "Chunk index out of range, file_id=[{}], chunk_index=[{}], chunk_count=[{}]",
                chunk.file_id, chunk.chunk_index, file.chunk_count
            ))
        })?;
        if chunk.chunk_size != expected_len {
            return Err(BackupError::validation(format!(
                "Wrong chunk size, file_id=[{}], chunk_index=[{}], chunk_size=[{}], expected=[{}]",
                chunk.file_id, chunk.chunk_index, chunk.chunk_size, expected_len
            )));
        }

        let changed = tx
            .execute(
                r#"INSERT INTO chunks (file_id, chunk_index, chunk_size, backend_name, remote_key, checksum, status)
                   VALUES (:p_file_id, :p_chunk_index, :p_chunk_size, :p_backend_name, :p_remote_key, :p_checksum, :p_status)
                   ON CONFLICT (file_id, chunk_index) DO UPDATE SET
                        chunk_size = excluded.chunk_size,
                        backend_name = excluded.backend_name,
                        remote_key = excluded.remote_key,
                        checksum = excluded.checksum,
                        status = excluded.status
                   WHERE chunks.status <> 'uploaded'"#,
                named_params! {
                    ":p_file_id": chunk.file_id,
                    ":p_chunk_index": chunk.chunk_index,
                    ":p_chunk_size": chunk.chunk_size as i64,
                    ":p_backend_name": chunk.backend_name,
                    ":p_remote_key": chunk.remote_key,
                    ":p_checksum": chunk.checksum,
                    ":p_status": chunk.status.as_str(),
                },
            )
            .map_err(db_err)
            .map_err(err_fwd!(
                "Cannot store the chunk, file_id=[{}], chunk_index=[{}]",
                chunk.file_id,
                chunk.chunk_index
            ))?;
        tx.commit().map_err(db_err).map_err(tr_fwd!())?;

        if changed == 0 {
            log_warn!(
                "The chunk is already uploaded, kept as is, file_id=[{}], chunk_index=[{}], status=[{}]",
                chunk.file_id,
                chunk.chunk_index,
                chunk.status
            );
        }
        Ok(())
    }

    /// Move the file to a new status, following the allowed transitions
    pub fn set_file_status(&self, file_id: i64, status: FileStatus) -> BackupResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err).map_err(tr_fwd!())?;

        let file = fetch_file(&tx, file_id)?.ok_or(BackupError::UnknownFile(file_id))?;
        if file.status == status {
            return Ok(());
        }
        if !file.status.can_move_to(status) {
            return Err(BackupError::validation(format!(
                "Forbidden status transition, file_id=[{}], from=[{}], to=[{}]",
                file_id, file.status, status
            )));
        }

        tx.execute(
            "UPDATE files SET status = :p_status WHERE file_id = :p_file_id",
            named_params! { ":p_status": status.as_str(), ":p_file_id": file_id },
        )
        .map_err(db_err)
        .map_err(err_fwd!("Cannot update the file status, file_id=[{}]", file_id))?;
        tx.commit().map_err(db_err).map_err(tr_fwd!())?;

        log_debug!("File status changed, file_id=[{}], from=[{}], to=[{}]", file_id, file.status, status);
        Ok(())
    }

    pub fn get_file(&self, file_id: i64) -> BackupResult<FileRecord> {
        let conn = self.lock()?;
        fetch_file(&conn, file_id)?.ok_or(BackupError::UnknownFile(file_id))
    }

    pub fn list_files(&self) -> BackupResult<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY file_id", SELECT_FILE))
            .map_err(db_err)
            .map_err(tr_fwd!())?;
        let rows = stmt.query_map([], read_file_row).map_err(db_err).map_err(tr_fwd!())?;
        collect_rows(rows)?.into_iter().collect()
    }

    /// The chunks of the file, by increasing index
    pub fn list_chunks(&self, file_id: i64) -> BackupResult<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{} WHERE file_id = :p_file_id ORDER BY chunk_index", SELECT_CHUNK))
            .map_err(db_err)
            .map_err(tr_fwd!())?;
        let rows = stmt
            .query_map(named_params! { ":p_file_id": file_id }, read_chunk_row)
            .map_err(db_err)
            .map_err(err_fwd!("Cannot read the chunks, file_id=[{}]", file_id))?;
        collect_rows(rows)?.into_iter().collect()
    }
}

fn fetch_file(conn: &Connection, file_id: i64) -> BackupResult<Option<FileRecord>> {
    let row = conn
        .query_row(
            &format!("{} WHERE file_id = :p_file_id", SELECT_FILE),
            named_params! { ":p_file_id": file_id },
            read_file_row,
        )
        .optional()
        .map_err(db_err)
        .map_err(err_fwd!("Cannot read the file, file_id=[{}]", file_id))?;
    row.transpose()
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> BackupResult<Vec<T>> {
    rows.collect::<rusqlite::Result<Vec<T>>>().map_err(db_err)
}

// Text columns are parsed outside of rusqlite, so a corrupted value surfaces as a catalog error
fn read_file_row(row: &Row<'_>) -> rusqlite::Result<BackupResult<FileRecord>> {
    let cipher_mode: String = row.get(5)?;
    let cipher_mode = match cipher_mode.parse::<CypherMode>() {
        Ok(mode) => mode,
        Err(_) => {
            return Ok(Err(BackupError::Catalog(format!(
                "Unknown cipher mode, cipher_mode=[{}]",
                cipher_mode
            ))))
        }
    };
    let status: String = row.get(9)?;
    let status = match status.parse::<FileStatus>() {
        Ok(status) => status,
        Err(e) => return Ok(Err(e)),
    };
    let file_size: i64 = row.get(2)?;
    let chunk_size: i64 = row.get(3)?;

    Ok(Ok(FileRecord {
        file_id: row.get(0)?,
        original_path: row.get(1)?,
        file_size: file_size as u64,
        chunk_size: chunk_size as u64,
        chunk_count: row.get(4)?,
        cipher_mode,
        encryption_key: row.get(6)?,
        encryption_nonce_seed: row.get(7)?,
        created_at: row.get(8)?,
        status,
    }))
}

fn read_chunk_row(row: &Row<'_>) -> rusqlite::Result<BackupResult<ChunkRecord>> {
    let status: String = row.get(7)?;
    let status = match status.parse::<ChunkStatus>() {
        Ok(status) => status,
        Err(e) => return Ok(Err(e)),
    };
    let chunk_size: i64 = row.get(3)?;

    Ok(Ok(ChunkRecord {
        chunk_id: Some(row.get(0)?),
        file_id: row.get(1)?,
        chunk_index: row.get(2)?,
        chunk_size: chunk_size as u64,
        backend_name: row.get(4)?,
        remote_key: row.get(5)?,
        checksum: row.get(6)?,
        status,
    }))
}
