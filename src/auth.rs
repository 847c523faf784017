//! Credential and bucket sanity checks
//!
//! One identity call and one minimal listing per backend. The results are
//! reported only; they never stop the listing or download phases.

use crate::s3::backend::Backend;
use crate::s3::error::BackendError;
use crate::s3::types::IdentityInfo;

#[derive(Debug, Clone)]
pub enum IdentityOutcome {
    Verified(IdentityInfo),
    /// The client library offers no identity call
    Unsupported,
    Failed(BackendError),
}

#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Request accepted; carries the first listed key
    Accepted(String),
    /// Request accepted, bucket empty
    Empty,
    BucketMissing,
    Rejected(BackendError),
}

impl ProbeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProbeOutcome::Accepted(_) | ProbeOutcome::Empty)
    }
}

#[derive(Debug, Clone)]
pub struct AuthReport {
    pub backend: &'static str,
    pub bucket: String,
    pub identity: IdentityOutcome,
    /// `None` when no bucket is configured
    pub probe: Option<ProbeOutcome>,
}

impl AuthReport {
    /// Human-readable report, one line per item
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("=== {}: identity check ===", self.backend)];
        match &self.identity {
            IdentityOutcome::Verified(info) => {
                let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
                lines.push(format!("  Account : {}", field(&info.account)));
                lines.push(format!("  ARN     : {}", field(&info.arn)));
                lines.push(format!("  UserId  : {}", field(&info.user_id)));
                lines.push(format!("  -> {} credentials are valid", self.backend));
            }
            IdentityOutcome::Unsupported => {
                lines.push("  no identity call available; relying on the bucket check".to_string());
            }
            IdentityOutcome::Failed(e) => {
                lines.push(format!("  {} identity call failed: {}", self.backend, e));
            }
        }

        lines.push(format!(
            "=== {}: list sanity check on bucket {:?} ===",
            self.backend, self.bucket
        ));
        match &self.probe {
            None => lines.push("  bucket not set; skipping".to_string()),
            Some(ProbeOutcome::Accepted(key)) => {
                lines.push(format!("  First key from listing: {}", key));
                lines.push(format!("  -> {} request signed & accepted", self.backend));
            }
            Some(ProbeOutcome::Empty) => {
                lines.push("  listing returned no objects, but request was accepted.".to_string());
                lines.push(format!("  -> {} request signed & accepted", self.backend));
            }
            Some(ProbeOutcome::BucketMissing) => {
                lines.push(format!(
                    "  credentials are OK, but bucket {:?} does not exist or is wrong",
                    self.bucket
                ));
            }
            Some(ProbeOutcome::Rejected(e)) => {
                lines.push(format!("  {} S3 call failed: {}", self.backend, e));
            }
        }
        lines
    }
}

/// Run the identity call and, when a bucket is set, the probe listing.
pub async fn check_backend(backend: &dyn Backend) -> AuthReport {
    let identity = match backend.check_identity().await {
        Ok(Some(info)) => IdentityOutcome::Verified(info),
        Ok(None) => IdentityOutcome::Unsupported,
        Err(e) => {
            tracing::warn!("{} identity check failed: {}", backend.name(), e);
            IdentityOutcome::Failed(e)
        }
    };

    let probe = if backend.bucket().is_empty() {
        None
    } else {
        Some(match backend.probe_listing().await {
            Ok(Some(entry)) => ProbeOutcome::Accepted(entry.key.unwrap_or_default()),
            Ok(None) => ProbeOutcome::Empty,
            Err(e) if e.is_bucket_not_found() => ProbeOutcome::BucketMissing,
            Err(e) => {
                tracing::warn!("{} probe listing failed: {}", backend.name(), e);
                ProbeOutcome::Rejected(e)
            }
        })
    };

    AuthReport {
        backend: backend.name(),
        bucket: backend.bucket().to_string(),
        identity,
        probe,
    }
}
