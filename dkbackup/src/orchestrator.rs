use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::*;
use rayon::prelude::*;

use commons_error::*;
use dkcatalog::{ChunkRecord, ChunkStatus, FileRecord, FileStatus, MetadataCatalog, NewFileRecord};
use dkconfig::BackupConfig;
use dkcrypto::{CipherEngine, FileKeyMaterial};
use dkstorage::SharedBackend;

use crate::chunker::{chunk_count, Chunk, Chunker};
use crate::retry::RetryPolicy;
use crate::scheduler::{UploadContext, UploadScheduler, UploadTask};
use crate::selector::BackendSelector;

/// Steps of a backup run, used in the logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Init,
    Chunking,
    Uploading,
    Finalizing,
    Completed,
    Failed,
}

impl Display for BackupPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackupPhase::Init => "init",
            BackupPhase::Chunking => "chunking",
            BackupPhase::Uploading => "uploading",
            BackupPhase::Finalizing => "finalizing",
            BackupPhase::Completed => "completed",
            BackupPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub file_id: i64,
    pub status: FileStatus,
    pub chunk_count: u32,
    /// Chunks uploaded during this run
    pub uploaded_chunks: u32,
    /// Chunks already uploaded by a previous run
    pub skipped_chunks: u32,
    /// Indices still not uploaded, sorted
    pub failed_indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub file_id: i64,
    pub destination: PathBuf,
    pub chunk_count: u32,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyReport {
    pub file_id: i64,
    pub chunk_count: u32,
    pub verified_chunks: u32,
    /// No uploaded record, or the blob is gone from its backend
    pub missing_indices: Vec<u32>,
    /// The stored blob does not match its checksum
    pub corrupt_indices: Vec<u32>,
    /// The backend is not configured or could not be read
    pub unreachable_indices: Vec<u32>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.missing_indices.is_empty() && self.corrupt_indices.is_empty() && self.unreachable_indices.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub file: FileRecord,
    pub chunks: Vec<ChunkRecord>,
}

enum ChunkCheck {
    Sound,
    Missing,
    Corrupt,
    Unreachable,
}

/// Ties the chunker, the upload scheduler and the catalog together,
/// for the backup, the resume and the restore of a file.
pub struct BackupOrchestrator {
    config: BackupConfig,
    catalog: Arc<MetadataCatalog>,
    selector: BackendSelector,
    retry: RetryPolicy,
}

impl BackupOrchestrator {
    pub fn new(config: BackupConfig, catalog: Arc<MetadataCatalog>, backends: Vec<SharedBackend>) -> BackupResult<Self> {
        if config.chunk_size == 0 || config.worker_count == 0 || config.queue_capacity == 0 {
            return Err(BackupError::validation(
                "The chunk size, the worker count and the queue capacity must be positive",
            ));
        }
        let selector = BackendSelector::new(backends)?;
        let retry = RetryPolicy::from(&config.retry);
        Ok(BackupOrchestrator {
            config,
            catalog,
            selector,
            retry,
        })
    }

    pub fn catalog(&self) -> &Arc<MetadataCatalog> {
        &self.catalog
    }

    /// Chunk, encrypt and distribute the file over the backends
    pub fn backup(&self, path: &Path) -> BackupResult<BackupReport> {
        log_info!("🚀 Start backup, path=[{:?}], phase=[{}]", path, BackupPhase::Init);

        let source = File::open(path).map_err(|e| BackupError::io(format!("Cannot open the source, path=[{:?}]", path), e))?;
        let file_size = source
            .metadata()
            .map_err(|e| BackupError::io(format!("Cannot read the source metadata, path=[{:?}]", path), e))?
            .len();

        let chunk_size = self.config.chunk_size as u64;
        let count = u32::try_from(chunk_count(file_size, chunk_size)).map_err(|_| {
            BackupError::validation(format!(
                "Too many chunks, file_size=[{}], chunk_size=[{}]",
                file_size, chunk_size
            ))
        })?;

        let original_path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let material = FileKeyMaterial::generate();
        let file_id = self
            .catalog
            .create_file(&NewFileRecord {
                original_path: original_path.to_string_lossy().to_string(),
                file_size,
                chunk_size,
                chunk_count: count,
                cipher_mode: self.config.cipher,
                encryption_key: material.key,
                encryption_nonce_seed: material.nonce_seed,
            })
            .map_err(err_fwd!("Cannot register the file, path=[{:?}]", path))?;

        self.catalog.set_file_status(file_id, FileStatus::Uploading).map_err(tr_fwd!())?;
        let record = self.catalog.get_file(file_id).map_err(tr_fwd!())?;

        log_info!(
            "File registered, file_id=[{}], file_size=[{}], chunk_count=[{}], phase=[{}]",
            file_id,
            file_size,
            count,
            BackupPhase::Chunking
        );

        let chunker = Chunker::new(source, self.config.chunk_size)?;
        self.upload_chunks(&record, chunker, 0)
    }

    /// Upload the chunks that are not yet in the catalog
    pub fn resume(&self, file_id: i64, source_override: Option<&Path>) -> BackupResult<BackupReport> {
        let record = self.catalog.get_file(file_id).map_err(tr_fwd!())?;
        log_info!("🚀 Resume backup, file_id=[{}], status=[{}]", file_id, record.status);

        let uploaded = self.uploaded_indices(file_id)?;

        if record.status == FileStatus::Completed {
            return Ok(BackupReport {
                file_id,
                status: FileStatus::Completed,
                chunk_count: record.chunk_count,
                uploaded_chunks: 0,
                skipped_chunks: uploaded.len() as u32,
                failed_indices: vec![],
            });
        }

        let path = source_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&record.original_path));
        let mut source =
            File::open(&path).map_err(|e| BackupError::io(format!("Cannot open the source, path=[{:?}]", &path), e))?;
        let file_size = source
            .metadata()
            .map_err(|e| BackupError::io(format!("Cannot read the source metadata, path=[{:?}]", &path), e))?
            .len();
        if file_size != record.file_size {
            return Err(BackupError::validation(format!(
                "The source changed since the backup started, path=[{:?}], file_size=[{}], expected=[{}]",
                &path, file_size, record.file_size
            )));
        }

        self.catalog.set_file_status(file_id, FileStatus::Uploading).map_err(tr_fwd!())?;

        let missing: Vec<u32> = (0..record.chunk_count).filter(|i| !uploaded.contains(i)).collect();
        log_info!(
            "Chunks to upload, file_id=[{}], missing=[{}], already_uploaded=[{}]",
            file_id,
            missing.len(),
            uploaded.len()
        );

        let chunk_size = record.chunk_size as usize;
        let chunks = missing.into_iter().map(move |index| -> BackupResult<Chunk> {
            let chunk = Chunker::starting_at(&mut source, chunk_size, index)?
                .next()
                .unwrap_or_else(|| {
                    Err(BackupError::validation(format!("The source is too short, chunk_index=[{}]", index)))
                })?;
            Ok(chunk)
        });

        self.upload_chunks(&record, chunks, uploaded.len() as u32)
    }

    fn upload_chunks(
        &self,
        record: &FileRecord,
        chunks: impl Iterator<Item = BackupResult<Chunk>>,
        skipped_chunks: u32,
    ) -> BackupResult<BackupReport> {
        let file_id = record.file_id;
        let key_material = FileKeyMaterial::from_parts(record.encryption_key.clone(), record.encryption_nonce_seed.clone())?;

        let context = Arc::new(UploadContext {
            file_id,
            catalog: Arc::clone(&self.catalog),
            selector: self.selector.clone(),
            cipher: CipherEngine::new(record.cipher_mode),
            key_material,
            retry: self.retry.clone(),
        });
        let scheduler = UploadScheduler::start(context, self.config.worker_count, self.config.queue_capacity)?;

        log_debug!("Upload starts, file_id=[{}], phase=[{}]", file_id, BackupPhase::Uploading);

        for r_chunk in chunks {
            let submitted = r_chunk.and_then(|chunk| {
                let expected_len = record.expected_chunk_len(chunk.index);
                if expected_len != Some(chunk.data.len() as u64) {
                    return Err(BackupError::validation(format!(
                        "The source changed since the backup started, chunk_index=[{}], chunk_count=[{}], length=[{}]",
                        chunk.index,
                        record.chunk_count,
                        chunk.data.len()
                    )));
                }
                scheduler.submit(UploadTask {
                    chunk_index: chunk.index,
                    data: chunk.data,
                })
            });
            if let Err(e) = submitted {
                log_error!("💣 Chunking stopped, file_id=[{}], e=[{}]", file_id, e);
                scheduler.shutdown();
                if let Err(se) = self.catalog.set_file_status(file_id, FileStatus::Failed) {
                    log_error!("💣 Cannot mark the file as failed, file_id=[{}], e=[{}]", file_id, se);
                }
                log_info!("⛔ Backup failed, file_id=[{}], phase=[{}]", file_id, BackupPhase::Failed);
                return Err(e);
            }
        }

        log_debug!("Waiting for the uploads, file_id=[{}], phase=[{}]", file_id, BackupPhase::Finalizing);
        scheduler.await_idle();
        scheduler.shutdown();
        let outcomes = scheduler.take_outcomes();
        let uploaded_chunks = outcomes.iter().filter(|o| o.is_uploaded()).count() as u32;

        self.finalize(record, uploaded_chunks, skipped_chunks)
    }

    fn finalize(&self, record: &FileRecord, uploaded_chunks: u32, skipped_chunks: u32) -> BackupResult<BackupReport> {
        let file_id = record.file_id;
        let uploaded = self.uploaded_indices(file_id)?;
        let failed_indices: Vec<u32> = (0..record.chunk_count).filter(|i| !uploaded.contains(i)).collect();

        let status = if failed_indices.is_empty() {
            FileStatus::Completed
        } else {
            FileStatus::Failed
        };
        self.catalog.set_file_status(file_id, status).map_err(tr_fwd!())?;

        if status == FileStatus::Completed {
            log_info!(
                "🏁 Backup completed, file_id=[{}], chunk_count=[{}], uploaded=[{}], skipped=[{}]",
                file_id,
                record.chunk_count,
                uploaded_chunks,
                skipped_chunks
            );
        } else {
            log_warn!(
                "⛔ Backup failed, file_id=[{}], failed_indices=[{:?}]",
                file_id,
                &failed_indices
            );
        }

        Ok(BackupReport {
            file_id,
            status,
            chunk_count: record.chunk_count,
            uploaded_chunks,
            skipped_chunks,
            failed_indices,
        })
    }

    fn uploaded_indices(&self, file_id: i64) -> BackupResult<BTreeSet<u32>> {
        let chunks = self.catalog.list_chunks(file_id).map_err(tr_fwd!())?;
        Ok(chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .map(|c| c.chunk_index)
            .collect())
    }

    /// Rebuild the file at the destination.
    /// The data goes to `<destination>.part` first, renamed once every chunk is written.
    pub fn restore(&self, file_id: i64, destination: &Path) -> BackupResult<RestoreReport> {
        log_info!("🚀 Start restore, file_id=[{}], destination=[{:?}]", file_id, destination);

        let record = self.catalog.get_file(file_id).map_err(tr_fwd!())?;
        let chunks: Vec<ChunkRecord> = self
            .catalog
            .list_chunks(file_id)
            .map_err(tr_fwd!())?
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .collect();

        let present: BTreeSet<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        let missing_indices: Vec<u32> = (0..record.chunk_count).filter(|i| !present.contains(i)).collect();
        let unavailable_backends: Vec<String> = chunks
            .iter()
            .filter(|c| self.selector.by_name(&c.backend_name).is_none())
            .map(|c| c.backend_name.clone())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();

        if !missing_indices.is_empty() || !unavailable_backends.is_empty() {
            log_error!(
                "💣 The backup cannot be restored, file_id=[{}], missing_indices=[{:?}], unavailable_backends=[{:?}]",
                file_id,
                &missing_indices,
                &unavailable_backends
            );
            return Err(BackupError::IncompleteBackup {
                file_id,
                missing_indices,
                unavailable_backends,
            });
        }

        let part_path = part_path(destination);
        let result = self.write_chunks(&record, &chunks, &part_path).and_then(|bytes_written| {
            fs::rename(&part_path, destination)
                .map_err(|e| BackupError::io(format!("Cannot move the restored file, destination=[{:?}]", destination), e))?;
            Ok(bytes_written)
        });

        match result {
            Ok(bytes_written) => {
                log_info!(
                    "🏁 Restore completed, file_id=[{}], destination=[{:?}], bytes=[{}]",
                    file_id,
                    destination,
                    bytes_written
                );
                Ok(RestoreReport {
                    file_id,
                    destination: destination.to_path_buf(),
                    chunk_count: record.chunk_count,
                    bytes_written,
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&part_path);
                log_error!("💣 Restore failed, file_id=[{}], e=[{}]", file_id, e);
                Err(e)
            }
        }
    }

    fn write_chunks(&self, record: &FileRecord, chunks: &[ChunkRecord], part_path: &Path) -> BackupResult<u64> {
        let engine = CipherEngine::new(record.cipher_mode);
        let file = File::create(part_path)
            .map_err(|e| BackupError::io(format!("Cannot create the restored file, path=[{:?}]", part_path), e))?;
        let mut writer = BufWriter::new(file);
        let mut bytes_written: u64 = 0;
        let mut lost_indices: Vec<u32> = vec![];

        for chunk in chunks {
            let backend = self.selector.by_name(&chunk.backend_name).ok_or_else(|| BackupError::IncompleteBackup {
                file_id: record.file_id,
                missing_indices: vec![],
                unavailable_backends: vec![chunk.backend_name.clone()],
            })?;

            // Once a chunk is lost, the others are only probed to complete the list
            if !lost_indices.is_empty() {
                if !backend.exists(&chunk.remote_key)? {
                    lost_indices.push(chunk.chunk_index);
                }
                continue;
            }

            let fetched = self
                .retry
                .run("get", backend.name(), || backend.get(&chunk.remote_key));
            let ciphertext = match fetched {
                Ok(data) => data,
                Err(exhausted) if exhausted.error.is_not_found() => {
                    log_warn!(
                        "Chunk not found on its backend, file_id=[{}], chunk_index=[{}], backend=[{}]",
                        record.file_id,
                        chunk.chunk_index,
                        &chunk.backend_name
                    );
                    lost_indices.push(chunk.chunk_index);
                    continue;
                }
                Err(exhausted) => return Err(BackupError::Backend(exhausted.error)),
            };

            if CipherEngine::checksum(&ciphertext) != chunk.checksum {
                return Err(BackupError::Crypto(CryptoErrorKind::ChecksumMismatch {
                    index: chunk.chunk_index,
                }));
            }

            let plaintext = engine.decrypt_chunk(
                &record.encryption_key,
                &record.encryption_nonce_seed,
                chunk.chunk_index,
                &ciphertext,
            )?;
            if plaintext.len() as u64 != chunk.chunk_size {
                return Err(BackupError::validation(format!(
                    "Wrong length of the restored chunk, chunk_index=[{}], length=[{}], expected=[{}]",
                    chunk.chunk_index,
                    plaintext.len(),
                    chunk.chunk_size
                )));
            }

            writer
                .write_all(&plaintext)
                .map_err(|e| BackupError::io(format!("Cannot write the restored file, path=[{:?}]", part_path), e))?;
            bytes_written += plaintext.len() as u64;
        }

        if !lost_indices.is_empty() {
            return Err(BackupError::IncompleteBackup {
                file_id: record.file_id,
                missing_indices: lost_indices,
                unavailable_backends: vec![],
            });
        }

        writer
            .flush()
            .map_err(|e| BackupError::io(format!("Cannot write the restored file, path=[{:?}]", part_path), e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| BackupError::io(format!("Cannot sync the restored file, path=[{:?}]", part_path), e))?;
        Ok(bytes_written)
    }

    /// Check that every chunk is still on its backend, untouched.
    /// The chunks are downloaded in parallel and not decrypted.
    pub fn verify(&self, file_id: i64) -> BackupResult<VerifyReport> {
        let record = self.catalog.get_file(file_id).map_err(tr_fwd!())?;
        let chunks: Vec<ChunkRecord> = self
            .catalog
            .list_chunks(file_id)
            .map_err(tr_fwd!())?
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Uploaded)
            .collect();

        let present: BTreeSet<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        let mut report = VerifyReport {
            file_id,
            chunk_count: record.chunk_count,
            missing_indices: (0..record.chunk_count).filter(|i| !present.contains(i)).collect(),
            ..VerifyReport::default()
        };

        let checks: Vec<(u32, ChunkCheck)> = chunks
            .par_iter()
            .map(|chunk| (chunk.chunk_index, self.check_chunk(chunk)))
            .collect();

        for (index, check) in checks {
            match check {
                ChunkCheck::Sound => report.verified_chunks += 1,
                ChunkCheck::Missing => report.missing_indices.push(index),
                ChunkCheck::Corrupt => report.corrupt_indices.push(index),
                ChunkCheck::Unreachable => report.unreachable_indices.push(index),
            }
        }
        report.missing_indices.sort_unstable();
        report.corrupt_indices.sort_unstable();
        report.unreachable_indices.sort_unstable();

        if report.is_healthy() {
            log_info!("😎 Backup verified, file_id=[{}], chunks=[{}]", file_id, report.verified_chunks);
        } else {
            log_warn!(
                "⛔ Backup damaged, file_id=[{}], missing=[{:?}], corrupt=[{:?}], unreachable=[{:?}]",
                file_id,
                &report.missing_indices,
                &report.corrupt_indices,
                &report.unreachable_indices
            );
        }
        Ok(report)
    }

    fn check_chunk(&self, chunk: &ChunkRecord) -> ChunkCheck {
        let Some(backend) = self.selector.by_name(&chunk.backend_name) else {
            return ChunkCheck::Unreachable;
        };
        match self.retry.run("get", backend.name(), || backend.get(&chunk.remote_key)) {
            Ok(data) if CipherEngine::checksum(&data) == chunk.checksum => ChunkCheck::Sound,
            Ok(_) => ChunkCheck::Corrupt,
            Err(exhausted) if exhausted.error.is_not_found() => ChunkCheck::Missing,
            Err(exhausted) => {
                log_warn!(
                    "Cannot read the chunk, chunk_index=[{}], backend=[{}], e=[{}]",
                    chunk.chunk_index,
                    &chunk.backend_name,
                    exhausted.error
                );
                ChunkCheck::Unreachable
            }
        }
    }

    pub fn file_info(&self, file_id: i64) -> BackupResult<FileInfo> {
        let file = self.catalog.get_file(file_id).map_err(tr_fwd!())?;
        let chunks = self.catalog.list_chunks(file_id).map_err(tr_fwd!())?;
        Ok(FileInfo { file, chunks })
    }

    pub fn list_files(&self) -> BackupResult<Vec<FileRecord>> {
        self.catalog.list_files()
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut s: OsString = destination.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}
