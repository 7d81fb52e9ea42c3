use std::path::Path;

use anyhow::anyhow;
use serde::Serialize;

use dkbackup::{BackupOrchestrator, BackupReport};
use dkcatalog::{ChunkRecord, FileRecord, FileStatus};

#[derive(Serialize, Debug)]
struct ChunkInfoReply {
    chunk_index: u32,
    chunk_size: u64,
    backend_name: String,
    remote_key: String,
    checksum: String,
    status: String,
}

/// The key material never leaves the catalog
#[derive(Serialize, Debug)]
struct FileInfoReply {
    file_id: i64,
    original_path: String,
    file_size: u64,
    chunk_size: u64,
    chunk_count: u32,
    cipher_mode: String,
    created_at: String,
    status: String,
    chunks: Vec<ChunkInfoReply>,
}

impl FileInfoReply {
    fn new(file: &FileRecord, chunks: &[ChunkRecord]) -> Self {
        FileInfoReply {
            file_id: file.file_id,
            original_path: file.original_path.clone(),
            file_size: file.file_size,
            chunk_size: file.chunk_size,
            chunk_count: file.chunk_count,
            cipher_mode: file.cipher_mode.to_string(),
            created_at: file.created_at.clone(),
            status: file.status.to_string(),
            chunks: chunks
                .iter()
                .map(|c| ChunkInfoReply {
                    chunk_index: c.chunk_index,
                    chunk_size: c.chunk_size,
                    backend_name: c.backend_name.clone(),
                    remote_key: c.remote_key.clone(),
                    checksum: c.checksum.clone(),
                    status: c.status.to_string(),
                })
                .collect(),
        }
    }
}

fn print_report(report: &BackupReport) -> anyhow::Result<()> {
    println!(
        "File id : {}, status : {}, chunks : {}, uploaded : {}, skipped : {}",
        report.file_id, report.status, report.chunk_count, report.uploaded_chunks, report.skipped_chunks
    );
    if report.status != FileStatus::Completed {
        return Err(anyhow!(
            "💣 The backup is not complete, file_id=[{}], failed_indices=[{:?}], run: dkb file resume -id {}",
            report.file_id,
            &report.failed_indices,
            report.file_id
        ));
    }
    println!("😎 File successfully backed up");
    Ok(())
}

pub(crate) fn file_backup(orchestrator: &BackupOrchestrator, path: &str) -> anyhow::Result<()> {
    println!("👶 Backing up the file...");
    let report = orchestrator.backup(Path::new(path))?;
    print_report(&report)
}

pub(crate) fn file_resume(orchestrator: &BackupOrchestrator, file_id: i64, o_path: Option<&str>) -> anyhow::Result<()> {
    println!("👶 Resuming the backup...");
    let report = orchestrator.resume(file_id, o_path.map(Path::new))?;
    print_report(&report)
}

pub(crate) fn file_restore(orchestrator: &BackupOrchestrator, file_id: i64, path: &str) -> anyhow::Result<()> {
    println!("👶 Restoring the file...");
    let report = orchestrator.restore(file_id, Path::new(path))?;
    println!(
        "😎 File restored at: {}, size : {}, chunks : {}",
        report.destination.display(),
        report.bytes_written,
        report.chunk_count
    );
    Ok(())
}

pub(crate) fn file_info(orchestrator: &BackupOrchestrator, file_id: i64, json: bool) -> anyhow::Result<()> {
    let info = orchestrator.file_info(file_id)?;
    if json {
        let s = serde_json::to_string_pretty(&FileInfoReply::new(&info.file, &info.chunks))?;
        println!("{}", &s);
        return Ok(());
    }

    let file = &info.file;
    println!("File id: {}", file.file_id);
    println!("Path: {}", file.original_path);
    println!("Size: {}", file.file_size);
    println!("Chunk size: {}", file.chunk_size);
    println!("Cipher: {}", file.cipher_mode);
    println!("Created at: {}", file.created_at);
    println!("Status: {}", file.status);
    println!("index\tsize\tbackend\tstatus\tkey");
    for c in &info.chunks {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            c.chunk_index, c.chunk_size, c.backend_name, c.status, c.remote_key
        );
    }
    Ok(())
}

pub(crate) fn file_list(orchestrator: &BackupOrchestrator) -> anyhow::Result<()> {
    let files = orchestrator.list_files()?;
    println!("id\tstatus\tsize\tchunks\tcreated\tpath");
    for f in &files {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            f.file_id, f.status, f.file_size, f.chunk_count, f.created_at, f.original_path
        );
    }
    Ok(())
}

pub(crate) fn file_verify(orchestrator: &BackupOrchestrator, file_id: i64) -> anyhow::Result<()> {
    println!("👶 Verifying the backup...");
    let report = orchestrator.verify(file_id)?;
    println!(
        "Chunks : {}, verified : {}, missing : {:?}, corrupt : {:?}, unreachable : {:?}",
        report.chunk_count,
        report.verified_chunks,
        &report.missing_indices,
        &report.corrupt_indices,
        &report.unreachable_indices
    );
    if !report.is_healthy() {
        return Err(anyhow!("💣 The backup is damaged, file_id=[{}]", file_id));
    }
    println!("😎 Backup verified");
    Ok(())
}
