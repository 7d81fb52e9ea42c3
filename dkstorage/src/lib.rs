//! Storage capability consumed by the backup pipeline.
//!
//! The pipeline only knows the [`StorageBackend`] trait, it never branches on the concrete type.
//! Two variants live here: a folder on a local (or mounted) file system, and an in-memory map.

use std::sync::Arc;

pub use commons_error::{BackendError, BackendErrorKind};

mod local_folder;
mod memory;

pub use local_folder::LocalFolderBackend;
pub use memory::MemoryBackend;

pub type SharedBackend = Arc<dyn StorageBackend>;

/// Durable key → bytes store.
pub trait StorageBackend: Send + Sync {
    /// Unique name of the backend, recorded in the catalog for every chunk it holds
    fn name(&self) -> &str;

    /// Store the data under the key.
    /// Storing again the same bytes under the same key must succeed.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Read the data stored under the key, `NotFound` if absent
    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;

    fn exists(&self, key: &str) -> Result<bool, BackendError> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject the keys that could escape the backend root
pub(crate) fn validate_key(backend: &str, key: &str) -> Result<(), BackendError> {
    if key.is_empty() {
        return Err(BackendError::permanent(backend, "unsafe storage key: empty"));
    }
    if key.contains('/') || key.contains('\\') || key == "." || key == ".." {
        return Err(BackendError::permanent(
            backend,
            format!("unsafe storage key, key=[{}]", key),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_separators_are_rejected() {
        assert!(validate_key("b", "file_1_chunk_0.enc").is_ok());
        for key in ["", "..", ".", "../x", "a/b", "a\\b"] {
            let e = validate_key("b", key).unwrap_err();
            assert_eq!(BackendErrorKind::Permanent, e.kind);
        }
    }

    #[test]
    fn exists_is_derived_from_get() {
        let backend = MemoryBackend::new("mem");
        assert!(!backend.exists("k").unwrap());
        backend.put("k", b"v").unwrap();
        assert!(backend.exists("k").unwrap());
    }
}
