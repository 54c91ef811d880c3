use thiserror::Error;

/// Errors produced by the sync engine and its backend collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No signed-in user in the session.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The referenced message or chat does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A backend call or network round-trip failed.
    #[error("Backend I/O error: {0}")]
    TransientIo(String),

    /// Input rejected locally before contacting the backend.
    #[error("Rejected: {0}")]
    ValidationRejected(String),

    /// Blob upload failed.
    #[error("Upload failed: {0}")]
    UploadFailed(String),
}

impl SyncError {
    /// Whether the UI should show this error (banner or failed badge).
    ///
    /// Validation errors are silent no-ops and `NotFound` on a mutation is a
    /// lost race with a remote delete, so neither is shown.
    pub fn is_user_visible(&self) -> bool {
        match self {
            SyncError::ValidationRejected(_) | SyncError::NotFound(_) => false,
            SyncError::NotAuthenticated
            | SyncError::TransientIo(_)
            | SyncError::UploadFailed(_) => true,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_policy() {
        assert!(!SyncError::ValidationRejected("empty".into()).is_user_visible());
        assert!(!SyncError::NotFound("m1".into()).is_user_visible());
        assert!(SyncError::TransientIo("offline".into()).is_user_visible());
        assert!(SyncError::UploadFailed("503".into()).is_user_visible());
        assert!(SyncError::NotAuthenticated.is_user_visible());
    }
}
