use std::cell::Cell;
use std::collections::VecDeque;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::*;

use commons_error::*;
use dkcatalog::{remote_key, ChunkRecord, ChunkStatus, MetadataCatalog};
use dkcrypto::{CipherEngine, FileKeyMaterial};

use crate::retry::RetryPolicy;
use crate::selector::BackendSelector;

/// Shared stop signal, checked by the workers between two tasks
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a worker needs to process the chunks of one file
pub struct UploadContext {
    pub file_id: i64,
    pub catalog: Arc<MetadataCatalog>,
    pub selector: BackendSelector,
    pub cipher: CipherEngine,
    pub key_material: FileKeyMaterial,
    pub retry: RetryPolicy,
}

/// One plaintext chunk waiting to be encrypted and stored
pub struct UploadTask {
    pub chunk_index: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Uploaded {
        chunk_index: u32,
        backend: String,
        attempts: u32,
    },
    Failed {
        chunk_index: u32,
        backend: String,
        attempts: u32,
        reason: String,
    },
    /// Still in the queue when the scheduler was shut down
    Abandoned { chunk_index: u32 },
}

impl TaskOutcome {
    pub fn chunk_index(&self) -> u32 {
        match self {
            TaskOutcome::Uploaded { chunk_index, .. }
            | TaskOutcome::Failed { chunk_index, .. }
            | TaskOutcome::Abandoned { chunk_index } => *chunk_index,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, TaskOutcome::Uploaded { .. })
    }
}

struct QueueState {
    tasks: VecDeque<UploadTask>,
    // queued + running
    outstanding: usize,
    outcomes: Vec<TaskOutcome>,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    idle: Condvar,
    capacity: usize,
    token: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task_done(&self, outcome: TaskOutcome) {
        let mut st = self.lock();
        st.outcomes.push(outcome);
        st.outstanding -= 1;
        if st.outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed pool of upload threads fed by a bounded queue.
pub struct UploadScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UploadScheduler {
    pub fn start(context: Arc<UploadContext>, worker_count: usize, queue_capacity: usize) -> BackupResult<Self> {
        if worker_count == 0 || queue_capacity == 0 {
            return Err(BackupError::validation(format!(
                "The worker count and the queue capacity must be positive, worker_count=[{}], queue_capacity=[{}]",
                worker_count, queue_capacity
            )));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: VecDeque::with_capacity(queue_capacity),
                outstanding: 0,
                outcomes: vec![],
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            idle: Condvar::new(),
            capacity: queue_capacity,
            token: CancellationToken::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let context = Arc::clone(&context);
            let handle = thread::Builder::new()
                .name(format!("dkb-upload-{}", worker_id))
                .spawn(move || worker_loop(worker_id, &shared, &context))
                .map_err(|e| BackupError::io("Cannot spawn an upload worker", e))?;
            workers.push(handle);
        }

        log_debug!(
            "Upload scheduler started, file_id=[{}], worker_count=[{}], queue_capacity=[{}]",
            context.file_id,
            worker_count,
            queue_capacity
        );

        Ok(UploadScheduler {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Queue a task, blocking while the queue is full
    pub fn submit(&self, task: UploadTask) -> BackupResult<()> {
        let shared = &self.shared;
        let mut st = shared.lock();
        loop {
            if shared.token.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            if st.tasks.len() < shared.capacity {
                break;
            }
            st = shared.not_full.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        st.tasks.push_back(task);
        st.outstanding += 1;
        shared.not_empty.notify_one();
        Ok(())
    }

    /// Block until every submitted task has reached a terminal outcome
    pub fn await_idle(&self) {
        let shared = &self.shared;
        let mut st = shared.lock();
        while st.outstanding > 0 {
            st = shared.idle.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// The outcomes reported since the last call
    pub fn take_outcomes(&self) -> Vec<TaskOutcome> {
        mem::take(&mut self.shared.lock().outcomes)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Stop the workers. The running tasks end normally, the queued ones are abandoned.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        shared.token.cancel();
        {
            let mut st = shared.lock();
            let abandoned: Vec<UploadTask> = st.tasks.drain(..).collect();
            if !abandoned.is_empty() {
                log_warn!("Queued tasks abandoned on shutdown, count=[{}]", abandoned.len());
            }
            for task in abandoned {
                st.outcomes.push(TaskOutcome::Abandoned {
                    chunk_index: task.chunk_index,
                });
                st.outstanding -= 1;
            }
            if st.outstanding == 0 {
                shared.idle.notify_all();
            }
            shared.not_empty.notify_all();
            shared.not_full.notify_all();
        }

        let handles = mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if handle.join().is_err() {
                log_error!("An upload worker ended with a panic");
            }
        }
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker_id: usize, shared: &Shared, context: &UploadContext) {
    loop {
        let task = {
            let mut st = shared.lock();
            loop {
                if shared.token.is_cancelled() {
                    log_debug!("Upload worker stops, worker_id=[{}]", worker_id);
                    return;
                }
                if let Some(task) = st.tasks.pop_front() {
                    shared.not_full.notify_one();
                    break task;
                }
                st = shared.not_empty.wait(st).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let chunk_index = task.chunk_index;
        let outcome = catch_unwind(AssertUnwindSafe(|| process_task(context, task))).unwrap_or_else(|_| {
            log_error!("💣 Upload task panicked, file_id=[{}], chunk_index=[{}]", context.file_id, chunk_index);
            TaskOutcome::Failed {
                chunk_index,
                backend: context.selector.select(chunk_index).name().to_string(),
                attempts: 0,
                reason: "panic in the upload task".to_string(),
            }
        });
        shared.task_done(outcome);
    }
}

/// Encrypt, store with retry, then record the chunk
fn process_task(context: &UploadContext, task: UploadTask) -> TaskOutcome {
    let file_id = context.file_id;
    let chunk_index = task.chunk_index;
    let backend = context.selector.select(chunk_index);
    let backend_name = backend.name().to_string();
    let key = remote_key(file_id, chunk_index);

    let mut record = ChunkRecord {
        chunk_id: None,
        file_id,
        chunk_index,
        chunk_size: task.data.len() as u64,
        backend_name: backend_name.clone(),
        remote_key: key.clone(),
        checksum: String::new(),
        status: ChunkStatus::Failed,
    };

    let encrypted = context.cipher.encrypt_chunk(
        &context.key_material.key,
        &context.key_material.nonce_seed,
        chunk_index,
        &task.data,
    );
    drop(task);

    let attempts = Cell::new(0u32);
    let result = encrypted.and_then(|ciphertext| {
        record.checksum = CipherEngine::checksum(&ciphertext);
        context
            .retry
            .run("put", &backend_name, || {
                attempts.set(attempts.get() + 1);
                backend.put(&key, &ciphertext)
            })
            .map_err(|exhausted| BackupError::ChunkUploadFailed {
                index: chunk_index,
                backend: backend_name.clone(),
                attempts: exhausted.attempts,
                reason: exhausted.error.to_string(),
            })
    });
    let attempts = attempts.get();

    match result {
        Ok(()) => {
            record.status = ChunkStatus::Uploaded;
            match context.catalog.record_chunk(&record) {
                Ok(()) => {
                    log_debug!(
                        "😎 Chunk uploaded, file_id=[{}], chunk_index=[{}], backend=[{}]",
                        file_id,
                        chunk_index,
                        &backend_name
                    );
                    TaskOutcome::Uploaded {
                        chunk_index,
                        backend: backend_name,
                        attempts,
                    }
                }
                Err(e) => {
                    log_error!(
                        "💣 Chunk stored but not recorded, file_id=[{}], chunk_index=[{}], e=[{}]",
                        file_id,
                        chunk_index,
                        e
                    );
                    TaskOutcome::Failed {
                        chunk_index,
                        backend: backend_name,
                        attempts,
                        reason: e.to_string(),
                    }
                }
            }
        }
        Err(e) => {
            log_error!(
                "💣 Chunk upload failed, file_id=[{}], chunk_index=[{}], backend=[{}], e=[{}]",
                file_id,
                chunk_index,
                &backend_name,
                e
            );
            // The failure stays discoverable after a restart
            if let Err(re) = context.catalog.record_chunk(&record) {
                log_error!(
                    "💣 Cannot record the failed chunk, file_id=[{}], chunk_index=[{}], e=[{}]",
                    file_id,
                    chunk_index,
                    re
                );
            }
            TaskOutcome::Failed {
                chunk_index,
                backend: backend_name,
                attempts,
                reason: e.to_string(),
            }
        }
    }
}
