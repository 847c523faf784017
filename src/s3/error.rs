//! Backend error taxonomy
//!
//! Every backend translates its native errors into [`BackendError`] at the
//! adapter boundary, so the orchestration layer never sees SDK error types.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The client for this backend could not be constructed
    #[error("backend setup failed: {0}")]
    Setup(String),

    /// Identity call rejected
    #[error("identity check failed: {0}")]
    Auth(String),

    /// Listing page or batch rejected
    #[error("listing failed: {0}")]
    List(String),

    /// Single object retrieval failed
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The request was accepted as authenticated but the bucket is wrong
    #[error("credentials are OK, but bucket {bucket:?} does not exist or is wrong")]
    BucketNotFound { bucket: String },
}

impl BackendError {
    pub fn is_bucket_not_found(&self) -> bool {
        matches!(self, BackendError::BucketNotFound { .. })
    }
}

/// Detect the S3 "no such bucket" signature in an error message
pub fn mentions_no_such_bucket(message: &str) -> bool {
    message.contains("NoSuchBucket")
}
