use std::collections::HashSet;

use commons_error::*;
use dkstorage::SharedBackend;

/// Deterministic round robin over the configured backends
#[derive(Clone)]
pub struct BackendSelector {
    backends: Vec<SharedBackend>,
}

impl BackendSelector {
    pub fn new(backends: Vec<SharedBackend>) -> BackupResult<Self> {
        if backends.is_empty() {
            return Err(BackupError::validation("At least one backend is needed"));
        }
        let mut names = HashSet::new();
        for b in &backends {
            if !names.insert(b.name().to_string()) {
                return Err(BackupError::validation(format!("Duplicate backend, name=[{}]", b.name())));
            }
        }
        Ok(BackendSelector { backends })
    }

    /// The backend of the chunk [chunk_index]
    pub fn select(&self, chunk_index: u32) -> &SharedBackend {
        &self.backends[chunk_index as usize % self.backends.len()]
    }

    pub fn by_name(&self, name: &str) -> Option<&SharedBackend> {
        self.backends.iter().find(|b| b.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use dkstorage::MemoryBackend;

    use super::*;

    fn backends(names: &[&str]) -> Vec<SharedBackend> {
        names
            .iter()
            .map(|n| Arc::new(MemoryBackend::new(n)) as SharedBackend)
            .collect()
    }

    #[test]
    fn round_robin_is_fair() {
        let selector = BackendSelector::new(backends(&["gdrive", "dropbox", "onedrive"])).unwrap();
        assert_eq!("gdrive", selector.select(0).name());
        assert_eq!("dropbox", selector.select(1).name());
        assert_eq!("onedrive", selector.select(2).name());
        assert_eq!("gdrive", selector.select(3).name());

        for k in [0u32, 1, 2, 3, 10, 11, 100] {
            let mut counts: HashMap<String, u32> = HashMap::new();
            for i in 0..k {
                *counts.entry(selector.select(i).name().to_string()).or_default() += 1;
            }
            for name in selector.names() {
                let c = counts.get(&name).copied().unwrap_or(0);
                assert!(c == k / 3 || c == k / 3 + 1, "k={} name={} count={}", k, name, c);
            }
        }
    }

    #[test]
    fn invalid_backend_lists() {
        assert!(matches!(BackendSelector::new(vec![]), Err(BackupError::Validation(_))));
        assert!(matches!(
            BackendSelector::new(backends(&["gdrive", "gdrive"])),
            Err(BackupError::Validation(_))
        ));
    }

    #[test]
    fn lookup_by_name() {
        let selector = BackendSelector::new(backends(&["gdrive", "dropbox"])).unwrap();
        assert_eq!("dropbox", selector.by_name("dropbox").unwrap().name());
        assert!(selector.by_name("onedrive").is_none());
    }
}
