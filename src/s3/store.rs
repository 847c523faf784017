//! Backend built on the Apache Arrow `object_store` crate
//!
//! `object_store` lists objects as a continuous stream; it is consumed here in
//! variable-size batches of whatever is ready.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectMeta, ObjectStore};

use crate::config::{S3Config, DOWNLOAD_CONNECT_TIMEOUT, LIST_TIMEOUT, PROBE_TIMEOUT};
use crate::s3::backend::{probe_entry, Backend, ByteStream, PageStream};
use crate::s3::error::{mentions_no_such_bucket, BackendError};
use crate::s3::types::{IdentityInfo, ObjectEntry, RawEntry};

const LIST_BATCH_SIZE: usize = 1000;

/// Stores share one configuration and differ only in their HTTP timeouts
pub struct StoreBackend {
    store: AmazonS3,
    probe_store: AmazonS3,
    list_store: AmazonS3,
    bucket: String,
}

impl StoreBackend {
    pub fn new(config: &S3Config) -> Result<Self, BackendError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_virtual_hosted_style_request(!config.force_path_style);

        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }

        let build = |options: ClientOptions| {
            builder
                .clone()
                .with_client_options(options)
                .build()
                .map_err(|e| BackendError::Setup(error_chain(&e)))
        };

        Ok(Self {
            // Object bodies may take arbitrarily long to stream
            store: build(
                ClientOptions::new()
                    .with_connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
                    .with_timeout_disabled(),
            )?,
            probe_store: build(
                ClientOptions::new()
                    .with_connect_timeout(PROBE_TIMEOUT)
                    .with_timeout(PROBE_TIMEOUT),
            )?,
            list_store: build(
                ClientOptions::new()
                    .with_connect_timeout(LIST_TIMEOUT)
                    .with_timeout(LIST_TIMEOUT),
            )?,
            bucket: config.bucket.clone(),
        })
    }

    fn translate(
        &self,
        err: object_store::Error,
        kind: fn(String) -> BackendError,
    ) -> BackendError {
        let message = error_chain(&err);
        if mentions_no_such_bucket(&message) {
            return BackendError::BucketNotFound {
                bucket: self.bucket.clone(),
            };
        }
        kind(message)
    }
}

/// Map one listed object to the `Pathed` raw shape
fn raw_entry(meta: ObjectMeta) -> RawEntry {
    RawEntry::Pathed {
        path: meta.location.to_string(),
        size: meta.size,
    }
}

/// Location of a listed key.
///
/// Listings hand back keys verbatim, so the key is taken as-is rather than
/// percent-encoded the way `Path::from` would.
fn object_path(key: &str) -> Result<ObjectPath, BackendError> {
    ObjectPath::parse(key).map_err(|e| BackendError::Fetch(format!("{key}: {}", error_chain(&e))))
}

/// Render an error with all of its sources; `object_store` keeps the S3
/// response body several levels down.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Split a ready batch at its first error so entries before it are kept
fn split_batch(
    batch: Vec<Result<RawEntry, BackendError>>,
) -> Vec<Result<Vec<RawEntry>, BackendError>> {
    let mut out = Vec::new();
    let mut entries = Vec::new();
    for item in batch {
        match item {
            Ok(raw) => entries.push(raw),
            Err(e) => {
                if !entries.is_empty() {
                    out.push(Ok(std::mem::take(&mut entries)));
                }
                out.push(Err(e));
                return out;
            }
        }
    }
    out.push(Ok(entries));
    out
}

#[async_trait]
impl Backend for StoreBackend {
    fn name(&self) -> &'static str {
        "object-store"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_identity(&self) -> Result<Option<IdentityInfo>, BackendError> {
        // object_store has no caller-identity call
        Ok(None)
    }

    async fn probe_listing(&self) -> Result<Option<ObjectEntry>, BackendError> {
        match self.probe_store.list(None).next().await {
            Some(Ok(meta)) => Ok(Some(probe_entry(&raw_entry(meta)))),
            Some(Err(e)) => Err(self.translate(e, BackendError::List)),
            None => Ok(None),
        }
    }

    fn list_pages(&self) -> PageStream<'_> {
        self.list_store
            .list(None)
            .map(move |item| item.map(raw_entry).map_err(|e| self.translate(e, BackendError::List)))
            .ready_chunks(LIST_BATCH_SIZE)
            .flat_map(|batch| futures::stream::iter(split_batch(batch)))
            .boxed()
    }

    async fn fetch(&self, key: &str) -> Result<ByteStream, BackendError> {
        let location = object_path(key)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| self.translate(e, BackendError::Fetch))?;

        let bucket = self.bucket.clone();
        Ok(result
            .into_stream()
            .map_err(move |e| {
                let message = error_chain(&e);
                if mentions_no_such_bucket(&message) {
                    BackendError::BucketNotFound {
                        bucket: bucket.clone(),
                    }
                } else {
                    BackendError::Fetch(message)
                }
            })
            .boxed())
    }
}
