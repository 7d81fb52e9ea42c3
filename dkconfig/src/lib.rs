pub mod backup_config;
pub mod conf_reader;
pub mod property_name;

pub use backup_config::{BackendConfig, BackupConfig, RetryConfig};
