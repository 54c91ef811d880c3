use bytes::Bytes;
use tracing::{debug, info};

use parley_shared::ImageRef;

use crate::memory::MemoryBackend;

impl MemoryBackend {
    /// Hold every `upload_blob` call until [`resume_uploads`](Self::resume_uploads).
    pub fn pause_uploads(&self) {
        self.uploads_paused.send_replace(true);
        info!("Blob uploads paused");
    }

    pub fn resume_uploads(&self) {
        self.uploads_paused.send_replace(false);
        info!("Blob uploads resumed");
    }

    pub(crate) async fn wait_for_uploads(&self) {
        let mut paused = self.uploads_paused.subscribe();
        // The sender lives as long as `self`, so this only errors on teardown.
        let _ = paused.wait_for(|p| !*p).await;
    }

    pub(crate) fn store_blob(&self, bytes: Bytes, key: &str) -> ImageRef {
        debug!(key, size = bytes.len(), "Blob stored");
        self.lock().blobs.insert(key.to_string(), bytes);
        ImageRef(format!("mem://{key}"))
    }

    /// Bytes stored under `key`.
    pub fn blob(&self, key: &str) -> Option<Bytes> {
        self.lock().blobs.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Op;
    use parley_shared::{ChatBackend, SyncError};
    use std::time::Duration;

    #[tokio::test]
    async fn test_upload_returns_reference_for_key() {
        let backend = MemoryBackend::new();
        let image = backend
            .upload_blob(Bytes::from_static(b"jpeg"), "chat_images/a_b/m1.jpg")
            .await
            .unwrap();
        assert_eq!(image, ImageRef("mem://chat_images/a_b/m1.jpg".into()));
        assert_eq!(
            backend.blob("chat_images/a_b/m1.jpg"),
            Some(Bytes::from_static(b"jpeg"))
        );
    }

    #[tokio::test]
    async fn test_paused_upload_waits_for_resume() {
        let backend = MemoryBackend::new();
        backend.pause_uploads();

        let uploader = backend.clone();
        let task = tokio::spawn(async move {
            uploader.upload_blob(Bytes::from_static(b"x"), "k").await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert!(backend.blob("k").is_none());

        backend.resume_uploads();
        let image = task.await.unwrap().unwrap();
        assert_eq!(image.0, "mem://k");
    }

    #[tokio::test]
    async fn test_injected_upload_failure() {
        let backend = MemoryBackend::new();
        backend.fail_next(Op::UploadBlob, SyncError::UploadFailed("quota".into()));
        let err = backend
            .upload_blob(Bytes::from_static(b"x"), "k")
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::UploadFailed("quota".into()));
        assert!(backend.blob("k").is_none());
    }
}
