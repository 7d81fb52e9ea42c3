use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::*;

use commons_error::*;

use crate::{validate_key, StorageBackend};

/// A provider simulated by a folder, one file per key.
pub struct LocalFolderBackend {
    name: String,
    root: PathBuf,
}

impl LocalFolderBackend {
    /// Create the backend, the folder is created if needed
    pub fn new(name: &str, root: &Path) -> Result<Self, BackendError> {
        fs::create_dir_all(root)
            .map_err(|e| map_io_error(name, e))
            .map_err(err_fwd!("Cannot create the backend folder, backend=[{}], root=[{:?}]", name, root))?;
        log_debug!("Local folder backend ready, backend=[{}], root=[{:?}]", name, root);
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, BackendError> {
        validate_key(&self.name, key)?;
        Ok(self.root.join(key))
    }

    // Write a temp file in the same folder, then rename it in place,
    // a reader never sees a partial blob under the final key.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn map_io_error(backend: &str, e: std::io::Error) -> BackendError {
    match e.kind() {
        ErrorKind::NotFound => BackendError {
            kind: BackendErrorKind::NotFound,
            backend: backend.to_string(),
            message: e.to_string(),
        },
        ErrorKind::Interrupted
        | ErrorKind::TimedOut
        | ErrorKind::WouldBlock
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => BackendError::transient(backend, e.to_string()),
        _ => BackendError::permanent(backend, e.to_string()),
    }
}

impl StorageBackend for LocalFolderBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let path = self.resolve(key)?;
        self.atomic_write(&path, data).map_err(|e| map_io_error(&self.name, e))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::not_found(&self.name, key)),
            Err(e) => Err(map_io_error(&self.name, e)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io_error(&self.name, e)),
        }
    }
}
