//! The chunking, encryption and distribution pipeline of a file backup.

pub mod chunker;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod selector;

pub use chunker::{chunk_count, Chunk, Chunker};
pub use orchestrator::{BackupOrchestrator, BackupPhase, BackupReport, FileInfo, RestoreReport, VerifyReport};
pub use retry::{RetryExhausted, RetryPolicy};
pub use scheduler::{CancellationToken, TaskOutcome, UploadContext, UploadScheduler, UploadTask};
pub use selector::BackendSelector;
