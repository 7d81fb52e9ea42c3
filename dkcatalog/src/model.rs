use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use commons_error::BackupError;
use dkcrypto::CypherMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    /// Status only moves forward, the exception being a failed backup that is resumed.
    /// Staying on the same status is always allowed.
    pub fn can_move_to(&self, next: FileStatus) -> bool {
        use FileStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Uploading) | (Pending, Failed) | (Uploading, Completed) | (Uploading, Failed) | (Failed, Uploading)
        )
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "uploading" => Ok(FileStatus::Uploading),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            other => Err(BackupError::Catalog(format!("Unknown file status, status=[{}]", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Queued,
    Uploaded,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::Uploaded => "uploaded",
            ChunkStatus::Failed => "failed",
        }
    }
}

impl Display for ChunkStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ChunkStatus::Queued),
            "uploaded" => Ok(ChunkStatus::Uploaded),
            "failed" => Ok(ChunkStatus::Failed),
            other => Err(BackupError::Catalog(format!("Unknown chunk status, status=[{}]", other))),
        }
    }
}

/// Everything the catalog needs to register a new file
#[derive(Clone)]
pub struct NewFileRecord {
    pub original_path: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub cipher_mode: CypherMode,
    pub encryption_key: Vec<u8>,
    pub encryption_nonce_seed: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: i64,
    pub original_path: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub cipher_mode: CypherMode,
    pub encryption_key: Vec<u8>,
    pub encryption_nonce_seed: Vec<u8>,
    /// RFC 3339, UTC
    pub created_at: String,
    pub status: FileStatus,
}

impl FileRecord {
    /// Plaintext length of the chunk [index], None when the index is past the last chunk
    pub fn expected_chunk_len(&self, index: u32) -> Option<u64> {
        expected_chunk_len(self.file_size, self.chunk_size, self.chunk_count, index)
    }
}

pub(crate) fn expected_chunk_len(file_size: u64, chunk_size: u64, chunk_count: u32, index: u32) -> Option<u64> {
    if index >= chunk_count {
        return None;
    }
    if index < chunk_count - 1 {
        Some(chunk_size)
    } else {
        let before_last = chunk_size.checked_mul((chunk_count - 1) as u64)?;
        file_size.checked_sub(before_last)
    }
}

// The key material is never printed
impl Debug for FileRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRecord")
            .field("file_id", &self.file_id)
            .field("original_path", &self.original_path)
            .field("file_size", &self.file_size)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_count", &self.chunk_count)
            .field("cipher_mode", &self.cipher_mode)
            .field("created_at", &self.created_at)
            .field("status", &self.status)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// None until the row is stored
    pub chunk_id: Option<i64>,
    pub file_id: i64,
    pub chunk_index: u32,
    /// Plaintext length
    pub chunk_size: u64,
    pub backend_name: String,
    pub remote_key: String,
    /// SHA-256 of the encrypted payload
    pub checksum: String,
    pub status: ChunkStatus,
}

/// Name of the blob of the chunk [chunk_index] on its backend
pub fn remote_key(file_id: i64, chunk_index: u32) -> String {
    format!("file_{}_chunk_{}.enc", file_id, chunk_index)
}

/// ceil(file_size / chunk_size)
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use FileStatus::*;

    #[test]
    fn status_moves_forward_only() {
        assert!(Pending.can_move_to(Uploading));
        assert!(Uploading.can_move_to(Completed));
        assert!(Uploading.can_move_to(Failed));
        assert!(Failed.can_move_to(Uploading));
        assert!(Completed.can_move_to(Completed));

        assert!(!Completed.can_move_to(Uploading));
        assert!(!Completed.can_move_to(Failed));
        assert!(!Uploading.can_move_to(Pending));
        assert!(!Pending.can_move_to(Completed));
        assert!(!Failed.can_move_to(Completed));
    }

    #[test]
    fn count_and_lengths() {
        let mib = 1024 * 1024;
        assert_eq!(3, chunk_count(25 * mib, 10 * mib));
        assert_eq!(2, chunk_count(20 * mib, 10 * mib));
        assert_eq!(0, chunk_count(0, 10 * mib));
        assert_eq!(Some(10 * mib), expected_chunk_len(25 * mib, 10 * mib, 3, 1));
        assert_eq!(Some(5 * mib), expected_chunk_len(25 * mib, 10 * mib, 3, 2));
        assert_eq!(None, expected_chunk_len(25 * mib, 10 * mib, 3, 3));
        assert_eq!(None, expected_chunk_len(0, 10 * mib, 0, 0));
        assert_eq!(None, expected_chunk_len(0, 10 * mib, 0, u32::MAX));
        assert_eq!("file_12_chunk_3.enc", remote_key(12, 3));
    }

    #[test]
    fn status_round_trip_through_text() {
        for s in [Pending, Uploading, Completed, Failed] {
            assert_eq!(s, s.as_str().parse::<FileStatus>().unwrap());
        }
        assert!("done".parse::<FileStatus>().is_err());
        assert_eq!(ChunkStatus::Uploaded, "uploaded".parse::<ChunkStatus>().unwrap());
    }
}
