//! Backend adapter interface
//!
//! One [`Backend`] implementation exists per client library. Listing,
//! normalization and downloads are written once against this trait.

use async_trait::async_trait;
use bytes::Bytes;
use clap::ValueEnum;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::S3Config;
use crate::s3::error::BackendError;
use crate::s3::types::{classify, listed_name, IdentityInfo, ObjectEntry, RawEntry};

/// Object body as a sequence of chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Listing pages (or batches) of raw entries in backend-native order
pub type PageStream<'a> = BoxStream<'a, Result<Vec<RawEntry>, BackendError>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name, also used as the download subdirectory
    fn name(&self) -> &'static str;

    /// Bucket this backend session is bound to
    fn bucket(&self) -> &str;

    /// Cheapest call proving the credentials are valid.
    ///
    /// Returns `Ok(None)` when the client library has no identity call.
    async fn check_identity(&self) -> Result<Option<IdentityInfo>, BackendError>;

    /// Fetch at most one page and return its first entry.
    ///
    /// `Ok(None)` means the request was accepted and the bucket is empty.
    async fn probe_listing(&self) -> Result<Option<ObjectEntry>, BackendError> {
        let mut pages = self.list_pages();
        match pages.next().await {
            Some(Ok(page)) => Ok(page.first().map(probe_entry)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Enumerate the bucket root lazily, one page or batch per item
    fn list_pages(&self) -> PageStream<'_>;

    /// Stream one object body
    async fn fetch(&self, key: &str) -> Result<ByteStream, BackendError>;
}

/// Entry reported by a probe: the listed name plus whatever size is known
pub(crate) fn probe_entry(raw: &RawEntry) -> ObjectEntry {
    ObjectEntry {
        key: Some(listed_name(raw)),
        size: classify(raw).entry().and_then(|e| e.size),
    }
}

/// The client libraries a backend can be built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum BackendKind {
    /// Official AWS SDK (`aws-sdk-s3`, `aws-sdk-sts`)
    #[value(name = "aws-sdk")]
    AwsSdk,
    /// Plain HTTP requests signed with SigV4
    #[value(name = "sigv4-http")]
    SigV4Http,
    /// Apache Arrow `object_store`
    #[value(name = "object-store")]
    ObjectStore,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::AwsSdk,
        BackendKind::SigV4Http,
        BackendKind::ObjectStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::AwsSdk => "aws-sdk",
            BackendKind::SigV4Http => "sigv4-http",
            BackendKind::ObjectStore => "object-store",
        }
    }

    /// Build a backend session for this kind
    pub async fn connect(&self, config: &S3Config) -> Result<Box<dyn Backend>, BackendError> {
        let backend: Box<dyn Backend> = match self {
            BackendKind::AwsSdk => Box::new(crate::s3::sdk::SdkBackend::new(config).await),
            BackendKind::SigV4Http => Box::new(crate::s3::sigv4::SigV4Backend::new(config)?),
            BackendKind::ObjectStore => Box::new(crate::s3::store::StoreBackend::new(config)?),
        };
        tracing::debug!("Connected backend {} to bucket {}", self.as_str(), config.bucket);
        Ok(backend)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
