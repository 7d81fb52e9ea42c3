pub const CHUNK_SIZE_PROPERTY: &str = "backup.chunk_size";
pub const WORKER_COUNT_PROPERTY: &str = "backup.worker_count";
pub const QUEUE_CAPACITY_PROPERTY: &str = "backup.queue_capacity";
pub const CIPHER_PROPERTY: &str = "backup.cipher";
pub const CATALOG_PATH_PROPERTY: &str = "backup.catalog.path";
pub const RETRY_MAX_PROPERTY: &str = "backup.retry.max";
pub const RETRY_DELAY_MS_PROPERTY: &str = "backup.retry.delay_ms";
pub const RETRY_MAX_DELAY_MS_PROPERTY: &str = "backup.retry.max_delay_ms";
pub const BACKENDS_PROPERTY: &str = "backup.backends";
pub const LOG_CONFIG_FILE_PROPERTY: &str = "log4rs.config";

/// backend.<name>.path
pub fn backend_path_property(backend_name: &str) -> String {
    format!("backend.{}.path", backend_name)
}

pub const CONFIG_ENV_VAR: &str = "DKB_CONFIG";
