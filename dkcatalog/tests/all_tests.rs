use std::sync::{Arc, Once};
use std::thread;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::Config;

use commons_error::BackupError;
use dkcatalog::{remote_key, ChunkRecord, ChunkStatus, FileStatus, MetadataCatalog, NewFileRecord};
use dkcrypto::{CypherMode, FileKeyMaterial};

static INIT: Once = Once::new();

const LOG_ENABLE: bool = false;

fn init_log() {
    if !LOG_ENABLE {
        return;
    }
    INIT.call_once(|| {
        let stdout = ConsoleAppender::builder().build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Debug))
            .unwrap();
        let _ = log4rs::init_config(config);
    });
}

const MB: u64 = 1024 * 1024;

fn new_file(file_size: u64, chunk_size: u64) -> NewFileRecord {
    let material = FileKeyMaterial::generate();
    NewFileRecord {
        original_path: "/data/big.iso".to_string(),
        file_size,
        chunk_size,
        chunk_count: dkcatalog::chunk_count(file_size, chunk_size) as u32,
        cipher_mode: CypherMode::AES,
        encryption_key: material.key,
        encryption_nonce_seed: material.nonce_seed,
    }
}

fn chunk(file_id: i64, index: u32, size: u64, status: ChunkStatus) -> ChunkRecord {
    ChunkRecord {
        chunk_id: None,
        file_id,
        chunk_index: index,
        chunk_size: size,
        backend_name: "gdrive".to_string(),
        remote_key: remote_key(file_id, index),
        checksum: format!("checksum-{}", index),
        status,
    }
}

#[test]
fn a10_create_and_read_file() -> anyhow::Result<()> {
    init_log();
    let catalog = MetadataCatalog::open_in_memory()?;
    let request = new_file(25 * MB, 10 * MB);
    let file_id = catalog.create_file(&request)?;

    let file = catalog.get_file(file_id)?;
    assert_eq!(file_id, file.file_id);
    assert_eq!(3, file.chunk_count);
    assert_eq!(FileStatus::Pending, file.status);
    assert_eq!(request.encryption_key, file.encryption_key);
    assert_eq!(request.encryption_nonce_seed, file.encryption_nonce_seed);
    assert_eq!(CypherMode::AES, file.cipher_mode);
    assert!(file.created_at.ends_with('Z'));
    // the key is not printed
    assert!(!format!("{:?}", file).contains("encryption_key"));

    let other_id = catalog.create_file(&new_file(MB, MB))?;
    assert_ne!(file_id, other_id);
    assert_eq!(2, catalog.list_files()?.len());
    Ok(())
}

#[test]
fn a20_create_file_rejects_inconsistent_records() -> anyhow::Result<()> {
    init_log();
    let catalog = MetadataCatalog::open_in_memory()?;

    let mut wrong_count = new_file(25 * MB, 10 * MB);
    wrong_count.chunk_count = 2;
    assert!(matches!(catalog.create_file(&wrong_count), Err(BackupError::Validation(_))));

    let mut zero_size = new_file(25 * MB, 10 * MB);
    zero_size.chunk_size = 0;
    assert!(matches!(catalog.create_file(&zero_size), Err(BackupError::Validation(_))));

    let mut short_key = new_file(25 * MB, 10 * MB);
    short_key.encryption_key.truncate(16);
    assert!(matches!(catalog.create_file(&short_key), Err(BackupError::Validation(_))));

    assert!(catalog.list_files()?.is_empty());
    Ok(())
}

#[test]
fn a30_unknown_file() -> anyhow::Result<()> {
    let catalog = MetadataCatalog::open_in_memory()?;
    assert!(matches!(catalog.get_file(42), Err(BackupError::UnknownFile(42))));
    assert!(matches!(
        catalog.set_file_status(42, FileStatus::Uploading),
        Err(BackupError::UnknownFile(42))
    ));
    assert!(matches!(
        catalog.record_chunk(&chunk(42, 0, MB, ChunkStatus::Uploaded)),
        Err(BackupError::Validation(_))
    ));
    assert!(catalog.list_chunks(42)?.is_empty());
    Ok(())
}

#[test]
fn b10_chunks_are_listed_by_index() -> anyhow::Result<()> {
    init_log();
    let catalog = MetadataCatalog::open_in_memory()?;
    let file_id = catalog.create_file(&new_file(25 * MB, 10 * MB))?;

    catalog.record_chunk(&chunk(file_id, 2, 5 * MB, ChunkStatus::Uploaded))?;
    catalog.record_chunk(&chunk(file_id, 0, 10 * MB, ChunkStatus::Uploaded))?;
    catalog.record_chunk(&chunk(file_id, 1, 10 * MB, ChunkStatus::Uploaded))?;

    let chunks = catalog.list_chunks(file_id)?;
    let indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(vec![0, 1, 2], indices);
    assert!(chunks.iter().all(|c| c.chunk_id.is_some()));
    assert_eq!("file_1_chunk_2.enc", chunks[2].remote_key);
    Ok(())
}

#[test]
fn b20_chunk_validation() -> anyhow::Result<()> {
    let catalog = MetadataCatalog::open_in_memory()?;
    let file_id = catalog.create_file(&new_file(25 * MB, 10 * MB))?;

    // out of range
    assert!(matches!(
        catalog.record_chunk(&chunk(file_id, 3, MB, ChunkStatus::Uploaded)),
        Err(BackupError::Validation(_))
    ));
    // the last chunk is 5 MB
    assert!(matches!(
        catalog.record_chunk(&chunk(file_id, 2, 10 * MB, ChunkStatus::Uploaded)),
        Err(BackupError::Validation(_))
    ));
    assert!(catalog.list_chunks(file_id)?.is_empty());
    Ok(())
}

#[test]
fn b30_uploaded_chunk_is_never_overwritten() -> anyhow::Result<()> {
    init_log();
    let catalog = MetadataCatalog::open_in_memory()?;
    let file_id = catalog.create_file(&new_file(25 * MB, 10 * MB))?;

    // a failed chunk is replaced by the later success
    catalog.record_chunk(&chunk(file_id, 0, 10 * MB, ChunkStatus::Failed))?;
    assert_eq!(ChunkStatus::Failed, catalog.list_chunks(file_id)?[0].status);

    let mut success = chunk(file_id, 0, 10 * MB, ChunkStatus::Uploaded);
    success.backend_name = "dropbox".to_string();
    catalog.record_chunk(&success)?;

    // the uploaded chunk stays
    catalog.record_chunk(&chunk(file_id, 0, 10 * MB, ChunkStatus::Failed))?;

    let chunks = catalog.list_chunks(file_id)?;
    assert_eq!(1, chunks.len());
    assert_eq!(ChunkStatus::Uploaded, chunks[0].status);
    assert_eq!("dropbox", chunks[0].backend_name);
    Ok(())
}

#[test]
fn c10_status_transitions() -> anyhow::Result<()> {
    let catalog = MetadataCatalog::open_in_memory()?;
    let file_id = catalog.create_file(&new_file(MB, MB))?;

    assert!(matches!(
        catalog.set_file_status(file_id, FileStatus::Completed),
        Err(BackupError::Validation(_))
    ));
    catalog.set_file_status(file_id, FileStatus::Uploading)?;
    // same status is a no-op
    catalog.set_file_status(file_id, FileStatus::Uploading)?;
    catalog.set_file_status(file_id, FileStatus::Failed)?;
    // resume
    catalog.set_file_status(file_id, FileStatus::Uploading)?;
    catalog.set_file_status(file_id, FileStatus::Completed)?;
    assert!(matches!(
        catalog.set_file_status(file_id, FileStatus::Failed),
        Err(BackupError::Validation(_))
    ));
    assert_eq!(FileStatus::Completed, catalog.get_file(file_id)?.status);
    Ok(())
}

#[test]
fn d10_state_survives_a_restart() -> anyhow::Result<()> {
    init_log();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("catalog.db");

    let file_id = {
        let catalog = MetadataCatalog::open(&path)?;
        let file_id = catalog.create_file(&new_file(25 * MB, 10 * MB))?;
        catalog.set_file_status(file_id, FileStatus::Uploading)?;
        catalog.record_chunk(&chunk(file_id, 0, 10 * MB, ChunkStatus::Uploaded))?;
        catalog.record_chunk(&chunk(file_id, 1, 10 * MB, ChunkStatus::Uploaded))?;
        file_id
    };

    let catalog = MetadataCatalog::open(&path)?;
    let file = catalog.get_file(file_id)?;
    assert_eq!(FileStatus::Uploading, file.status);
    assert_eq!(2, catalog.list_chunks(file_id)?.len());
    Ok(())
}

#[test]
fn d20_concurrent_writers() -> anyhow::Result<()> {
    init_log();
    let catalog = Arc::new(MetadataCatalog::open_in_memory()?);
    let chunk_count = 64u64;
    let file_id = catalog.create_file(&new_file(chunk_count * 1024, 1024))?;

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                for index in (t..chunk_count as u32).step_by(4) {
                    catalog
                        .record_chunk(&chunk(file_id, index, 1024, ChunkStatus::Uploaded))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let indices: Vec<u32> = catalog.list_chunks(file_id)?.iter().map(|c| c.chunk_index).collect();
    assert_eq!((0..chunk_count as u32).collect::<Vec<_>>(), indices);
    Ok(())
}
