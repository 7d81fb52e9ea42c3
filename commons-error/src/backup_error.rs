use std::fmt::{Display, Formatter};

use thiserror::Error;

pub type BackupResult<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorKind {
    /// The key or the nonce seed does not have the expected length
    InvalidKeyMaterial,
    /// The tag did not match: tampered data, wrong key, wrong seed or wrong index
    AuthenticationFailure,
    /// The stored digest of an encrypted chunk does not match what was downloaded
    ChecksumMismatch { index: u32 },
}

impl Display for CryptoErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoErrorKind::InvalidKeyMaterial => write!(f, "invalid key material"),
            CryptoErrorKind::AuthenticationFailure => write!(f, "authentication failure"),
            CryptoErrorKind::ChecksumMismatch { index } => {
                write!(f, "checksum mismatch on chunk {}", index)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    NotFound,
    Transient,
    Permanent,
}

/// Error raised by a storage backend.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} error on backend [{backend}]: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub backend: String,
    pub message: String,
}

impl BackendError {
    pub fn not_found(backend: &str, key: &str) -> Self {
        Self {
            kind: BackendErrorKind::NotFound,
            backend: backend.to_string(),
            message: format!("key not found, key=[{}]", key),
        }
    }

    pub fn transient(backend: &str, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Transient,
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(backend: &str, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Permanent,
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == BackendErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == BackendErrorKind::NotFound
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error, {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Crypto error: {0}")]
    Crypto(CryptoErrorKind),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Upload of chunk {index} to [{backend}] failed after {attempts} attempt(s): {reason}")]
    ChunkUploadFailed {
        index: u32,
        backend: String,
        attempts: u32,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Incomplete backup for file {file_id}, missing chunks {missing_indices:?}, unavailable backends {unavailable_backends:?}")]
    IncompleteBackup {
        file_id: i64,
        missing_indices: Vec<u32>,
        unavailable_backends: Vec<String>,
    },

    #[error("Unknown file, file_id=[{0}]")]
    UnknownFile(i64),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BackupError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BackupError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BackupError::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BackupError::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn crypto_kind(&self) -> Option<CryptoErrorKind> {
        match self {
            BackupError::Crypto(kind) => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_backend_errors_are_retryable() {
        assert!(BackupError::from(BackendError::transient("gdrive", "timeout")).is_retryable());
        assert!(!BackupError::from(BackendError::permanent("gdrive", "denied")).is_retryable());
        assert!(!BackupError::from(BackendError::not_found("gdrive", "k")).is_retryable());
        assert!(!BackupError::validation("bad").is_retryable());
        assert!(!BackupError::Crypto(CryptoErrorKind::AuthenticationFailure).is_retryable());
    }

    #[test]
    fn incomplete_backup_message_lists_the_indices() {
        let e = BackupError::IncompleteBackup {
            file_id: 7,
            missing_indices: vec![0, 2],
            unavailable_backends: vec!["dropbox".to_string()],
        };
        let msg = e.to_string();
        assert!(msg.contains("[0, 2]"), "{}", msg);
        assert!(msg.contains("dropbox"), "{}", msg);
    }
}
