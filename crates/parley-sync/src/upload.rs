//! Image upload jobs.
//!
//! One job per `(chat, message)` coordinate. Starting a job for a
//! coordinate that already has one aborts the old job first
//! (cancel-and-restart); the old job's waiter then observes a cancellation
//! instead of a result. No retry happens here: a retry is a new call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use parley_shared::{ChatBackend, ChatId, ImageRef, MessageId, Result, SyncError};

/// Coordinate of an upload job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadKey {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

struct ActiveJob {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Jobs {
    active: HashMap<UploadKey, ActiveJob>,
    next_generation: u64,
}

/// Handle to the result of one upload.
#[derive(Debug)]
pub struct UploadJob {
    pub key: UploadKey,
    outcome: oneshot::Receiver<Result<ImageRef>>,
}

impl UploadJob {
    /// Wait for the upload. `None` means the job was cancelled or replaced.
    pub async fn finish(self) -> Option<Result<ImageRef>> {
        self.outcome.await.ok()
    }
}

/// Runs blob uploads against the backend. Clones share the job table.
#[derive(Clone)]
pub struct UploadPipeline {
    backend: Arc<dyn ChatBackend>,
    upload_root: String,
    max_bytes: usize,
    jobs: Arc<Mutex<Jobs>>,
}

impl UploadPipeline {
    pub fn new(backend: Arc<dyn ChatBackend>, upload_root: String, max_bytes: usize) -> Self {
        Self {
            backend,
            upload_root,
            max_bytes,
            jobs: Arc::new(Mutex::new(Jobs::default())),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject payloads the pipeline would never upload.
    pub fn check(&self, bytes: &Bytes) -> Result<()> {
        if bytes.is_empty() {
            return Err(SyncError::ValidationRejected("image is empty".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(SyncError::ValidationRejected(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// Start uploading `bytes` for `(chat_id, message_id)`, replacing any
    /// job already running for that coordinate.
    pub fn upload(&self, chat_id: &ChatId, message_id: &MessageId, bytes: Bytes) -> Result<UploadJob> {
        self.check(&bytes)?;

        let key = UploadKey {
            chat_id: chat_id.clone(),
            message_id: message_id.clone(),
        };
        let destination = chat_id.blob_key(&self.upload_root, message_id);
        let (tx, rx) = oneshot::channel();

        // The table stays locked until the job is registered, so a job that
        // finishes immediately still finds its own entry to remove.
        let mut jobs = self.jobs();
        jobs.next_generation += 1;
        let generation = jobs.next_generation;

        if let Some(previous) = jobs.active.remove(&key) {
            previous.abort.abort();
            info!(chat = %chat_id, msg = %message_id, "Restarting upload");
        }

        let backend = Arc::clone(&self.backend);
        let table = Arc::clone(&self.jobs);
        let job_key = key.clone();
        let size = bytes.len();
        let handle = tokio::spawn(async move {
            let result = backend
                .upload_blob(bytes, &destination)
                .await
                .map_err(|e| match e {
                    SyncError::UploadFailed(_) => e,
                    other => SyncError::UploadFailed(other.to_string()),
                });

            {
                let mut jobs = table.lock().unwrap_or_else(|e| e.into_inner());
                if jobs.active.get(&job_key).map(|j| j.generation) == Some(generation) {
                    jobs.active.remove(&job_key);
                }
            }

            match &result {
                Ok(image) => debug!(msg = %job_key.message_id, %image, "Upload finished"),
                Err(e) => warn!(msg = %job_key.message_id, error = %e, "Upload failed"),
            }
            let _ = tx.send(result);
        });

        jobs.active.insert(
            key.clone(),
            ActiveJob {
                generation,
                abort: handle.abort_handle(),
            },
        );
        debug!(chat = %chat_id, msg = %message_id, size, "Upload started");

        Ok(UploadJob { key, outcome: rx })
    }

    /// Abort the job for a coordinate. Returns whether one was running.
    pub fn cancel(&self, chat_id: &ChatId, message_id: &MessageId) -> bool {
        let key = UploadKey {
            chat_id: chat_id.clone(),
            message_id: message_id.clone(),
        };
        match self.jobs().active.remove(&key) {
            Some(job) => {
                job.abort.abort();
                info!(chat = %chat_id, msg = %message_id, "Upload cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, chat_id: &ChatId, message_id: &MessageId) -> bool {
        self.jobs().active.contains_key(&UploadKey {
            chat_id: chat_id.clone(),
            message_id: message_id.clone(),
        })
    }

    /// Number of jobs still running.
    pub fn in_flight(&self) -> usize {
        self.jobs().active.len()
    }
}
