use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::anyhow;

use commons_error::*;
use dkcrypto::CypherMode;

use crate::conf_reader::read_config_from_path;
use crate::property_name::*;

pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_CATALOG_PATH: &str = "backup.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Settings of the backup pipeline.
/// Built once by the binary and passed down, the libraries never read the properties themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub chunk_size: usize,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub cipher: CypherMode,
    pub catalog_path: PathBuf,
    pub retry: RetryConfig,
    pub backends: Vec<BackendConfig>,
    pub log_config: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_WORKER_COUNT * 2,
            cipher: CypherMode::AES,
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            retry: RetryConfig::default(),
            backends: vec![],
            log_config: None,
        }
    }
}

impl BackupConfig {
    /// Read and check the property file
    pub fn load(property_file: &Path) -> anyhow::Result<BackupConfig> {
        let props = read_config_from_path(property_file).map_err(tr_fwd!())?;
        let config = BackupConfig::from_props(&props)
            .map_err(err_fwd!("Invalid configuration, property_file=[{:?}]", property_file))?;
        Ok(config)
    }

    /// One line description of the settings, for the logs
    pub fn summary(&self) -> String {
        format!(
            "chunk_size=[{}], worker_count=[{}], queue_capacity=[{}], cipher=[{}], catalog=[{:?}], backends=[{}]",
            self.chunk_size,
            self.worker_count,
            self.queue_capacity,
            self.cipher,
            self.catalog_path,
            self.backend_names().join(",")
        )
    }

    pub fn from_props(props: &HashMap<String, String>) -> anyhow::Result<BackupConfig> {
        let chunk_size = parse_or(props, CHUNK_SIZE_PROPERTY, DEFAULT_CHUNK_SIZE)?;
        let worker_count = parse_or(props, WORKER_COUNT_PROPERTY, DEFAULT_WORKER_COUNT)?;
        let queue_capacity = parse_or(props, QUEUE_CAPACITY_PROPERTY, worker_count * 2)?;

        let cipher = match prop(props, CIPHER_PROPERTY) {
            None => CypherMode::AES,
            Some(v) => CypherMode::from_str(v).map_err(|e| anyhow!("{}, property=[{}]", e, CIPHER_PROPERTY))?,
        };

        let catalog_path = PathBuf::from(prop(props, CATALOG_PATH_PROPERTY).unwrap_or(DEFAULT_CATALOG_PATH));

        let default_retry = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: parse_or(props, RETRY_MAX_PROPERTY, default_retry.max_retries)?,
            base_delay_ms: parse_or(props, RETRY_DELAY_MS_PROPERTY, default_retry.base_delay_ms)?,
            max_delay_ms: parse_or(props, RETRY_MAX_DELAY_MS_PROPERTY, default_retry.max_delay_ms)?,
        };

        let names = prop(props, BACKENDS_PROPERTY)
            .ok_or_else(|| anyhow!("Missing property, property=[{}]", BACKENDS_PROPERTY))?;

        let mut backends = vec![];
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let path_property = backend_path_property(name);
            let path = prop(props, &path_property)
                .ok_or_else(|| anyhow!("Missing property, property=[{}]", path_property))?;
            backends.push(BackendConfig {
                name: name.to_string(),
                path: PathBuf::from(path),
            });
        }

        let log_config = prop(props, LOG_CONFIG_FILE_PROPERTY).map(PathBuf::from);

        let config = BackupConfig {
            chunk_size,
            worker_count,
            queue_capacity,
            cipher,
            catalog_path,
            retry,
            backends,
            log_config,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("The chunk size must be positive"));
        }
        if self.worker_count == 0 {
            return Err(anyhow!("The worker count must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("The queue capacity must be positive"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow!(
                "The retry delay is greater than the max delay, delay_ms=[{}], max_delay_ms=[{}]",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            ));
        }
        if self.backends.is_empty() {
            return Err(anyhow!("At least one backend is needed, property=[{}]", BACKENDS_PROPERTY));
        }
        let mut seen = HashSet::new();
        for b in &self.backends {
            if !seen.insert(b.name.as_str()) {
                return Err(anyhow!("Duplicate backend, name=[{}]", b.name));
            }
        }
        Ok(())
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name.clone()).collect()
    }
}

fn prop<'a>(props: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    props.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_or<T>(props: &HashMap<String, String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match prop(props, name) {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value, property=[{}], value=[{}], e=[{}]", name, v, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;

    use dkcrypto::CypherMode;

    use crate::backup_config::{BackupConfig, DEFAULT_CHUNK_SIZE};

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn a10_defaults() {
        let config = BackupConfig::from_props(&props(&[
            ("backup.backends", "gdrive"),
            ("backend.gdrive.path", "/tmp/gdrive"),
        ]))
        .unwrap();

        assert_eq!(DEFAULT_CHUNK_SIZE, config.chunk_size);
        assert_eq!(4, config.worker_count);
        assert_eq!(8, config.queue_capacity);
        assert_eq!(CypherMode::AES, config.cipher);
        assert_eq!(PathBuf::from("backup.db"), config.catalog_path);
        assert_eq!(3, config.retry.max_retries);
        assert_eq!(None, config.log_config);

        let summary = config.summary();
        assert!(summary.contains("worker_count=[4]"), "{}", summary);
        assert!(summary.contains("backends=[gdrive]"), "{}", summary);
    }

    #[test]
    fn a20_every_property() {
        let config = BackupConfig::from_props(&props(&[
            ("backup.chunk_size", "1024"),
            ("backup.worker_count", "2"),
            ("backup.cipher", "cc20"),
            ("backup.catalog.path", "/var/dkb/catalog.db"),
            ("backup.retry.max", "5"),
            ("backup.retry.delay_ms", "10"),
            ("backup.retry.max_delay_ms", "100"),
            ("backup.backends", " gdrive , dropbox ,onedrive"),
            ("backend.gdrive.path", "/b/gdrive"),
            ("backend.dropbox.path", "/b/dropbox"),
            ("backend.onedrive.path", "/b/onedrive"),
            ("log4rs.config", "/etc/dkb/log4rs.yaml"),
        ]))
        .unwrap();

        assert_eq!(1024, config.chunk_size);
        // queue capacity follows the worker count
        assert_eq!(4, config.queue_capacity);
        assert_eq!(CypherMode::CC20, config.cipher);
        assert_eq!(5, config.retry.max_retries);
        assert_eq!(vec!["gdrive", "dropbox", "onedrive"], config.backend_names());
        assert_eq!(PathBuf::from("/b/dropbox"), config.backends[1].path);
        assert_eq!(Some(PathBuf::from("/etc/dkb/log4rs.yaml")), config.log_config);
    }

    #[test]
    fn b10_invalid_configurations() {
        // no backend
        assert!(BackupConfig::from_props(&props(&[("backup.chunk_size", "10")])).is_err());
        // backend without path
        assert!(BackupConfig::from_props(&props(&[("backup.backends", "gdrive")])).is_err());
        // duplicate backend
        assert!(BackupConfig::from_props(&props(&[
            ("backup.backends", "gdrive,gdrive"),
            ("backend.gdrive.path", "/b"),
        ]))
        .is_err());
        // zero chunk size
        assert!(BackupConfig::from_props(&props(&[
            ("backup.chunk_size", "0"),
            ("backup.backends", "gdrive"),
            ("backend.gdrive.path", "/b"),
        ]))
        .is_err());
        // not a number
        assert!(BackupConfig::from_props(&props(&[
            ("backup.worker_count", "four"),
            ("backup.backends", "gdrive"),
            ("backend.gdrive.path", "/b"),
        ]))
        .is_err());
        // unknown cipher
        assert!(BackupConfig::from_props(&props(&[
            ("backup.cipher", "DES"),
            ("backup.backends", "gdrive"),
            ("backend.gdrive.path", "/b"),
        ]))
        .is_err());
    }

    #[test]
    fn c10_load_with_references() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "root=/srv/backup").unwrap();
        writeln!(f, "backup.backends=gdrive").unwrap();
        writeln!(f, "backend.gdrive.path=${{root}}/gdrive").unwrap();
        writeln!(f, "backup.catalog.path=${{root}}/catalog.db").unwrap();
        f.flush().unwrap();

        let config = BackupConfig::load(f.path()).unwrap();
        assert_eq!(PathBuf::from("/srv/backup/gdrive"), config.backends[0].path);
        assert_eq!(PathBuf::from("/srv/backup/catalog.db"), config.catalog_path);
    }
}
