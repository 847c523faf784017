//! Backend built on the official AWS SDK

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::Client;
use futures::StreamExt;

use crate::config::{S3Config, DOWNLOAD_CONNECT_TIMEOUT, LIST_TIMEOUT, PROBE_TIMEOUT};
use crate::s3::backend::{probe_entry, Backend, ByteStream, PageStream};
use crate::s3::error::BackendError;
use crate::s3::types::{IdentityInfo, ObjectEntry, RawEntry};

/// S3 and STS clients sharing one SDK configuration.
///
/// Each S3 client carries the timeout budget of one phase.
pub struct SdkBackend {
    client: Client,
    probe_client: Client,
    list_client: Client,
    sts: aws_sdk_sts::Client,
    bucket: String,
}

impl SdkBackend {
    /// Create clients from explicit static credentials
    pub async fn new(config: &S3Config) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            config.session_token.clone(),
            None,
            "bucket-crosscheck",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
                    .build(),
            )
            .load()
            .await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint);
        }
        let s3_client = |timeouts: TimeoutConfig| {
            Client::from_conf(s3_config.clone().timeout_config(timeouts).build())
        };

        // Identity calls get the short probe budget
        let mut sts_config = aws_sdk_sts::config::Builder::from(&sdk_config).timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(PROBE_TIMEOUT)
                .operation_timeout(PROBE_TIMEOUT)
                .build(),
        );
        if let Some(endpoint) = &config.endpoint_url {
            sts_config = sts_config.endpoint_url(endpoint);
        }

        Self {
            client: s3_client(
                TimeoutConfig::builder()
                    .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
                    .build(),
            ),
            probe_client: s3_client(
                TimeoutConfig::builder()
                    .connect_timeout(PROBE_TIMEOUT)
                    .operation_timeout(PROBE_TIMEOUT)
                    .build(),
            ),
            // Per page request, not for the whole paginated listing
            list_client: s3_client(
                TimeoutConfig::builder()
                    .connect_timeout(LIST_TIMEOUT)
                    .operation_attempt_timeout(LIST_TIMEOUT)
                    .build(),
            ),
            sts: aws_sdk_sts::Client::from_conf(sts_config.build()),
            bucket: config.bucket.clone(),
        }
    }

    fn list_error(&self, err: SdkError<ListObjectsV2Error>) -> BackendError {
        if err.as_service_error().is_some_and(|e| e.is_no_such_bucket()) {
            return BackendError::BucketNotFound {
                bucket: self.bucket.clone(),
            };
        }
        BackendError::List(DisplayErrorContext(&err).to_string())
    }
}

/// Map one listed SDK object to the `Keyed` raw shape
fn raw_entry(obj: &aws_sdk_s3::types::Object) -> RawEntry {
    RawEntry::Keyed {
        key: obj.key().map(|k| k.to_string()),
        size: obj.size().and_then(|s| u64::try_from(s).ok()),
    }
}

#[async_trait]
impl Backend for SdkBackend {
    fn name(&self) -> &'static str {
        "aws-sdk"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_identity(&self) -> Result<Option<IdentityInfo>, BackendError> {
        let response = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| BackendError::Auth(DisplayErrorContext(&e).to_string()))?;

        Ok(Some(IdentityInfo {
            account: response.account().map(|s| s.to_string()),
            arn: response.arn().map(|s| s.to_string()),
            user_id: response.user_id().map(|s| s.to_string()),
        }))
    }

    async fn probe_listing(&self) -> Result<Option<ObjectEntry>, BackendError> {
        let response = self
            .probe_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| self.list_error(e))?;

        Ok(response.contents().first().map(|obj| probe_entry(&raw_entry(obj))))
    }

    fn list_pages(&self) -> PageStream<'_> {
        let pages = self
            .list_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        futures::stream::unfold(pages, |mut pages| async move {
            let page = pages.next().await?;
            Some((page, pages))
        })
        .map(move |page| {
            let page = page.map_err(|e| self.list_error(e))?;
            Ok(page.contents().iter().map(raw_entry).collect())
        })
        .boxed()
    }

    async fn fetch(&self, key: &str) -> Result<ByteStream, BackendError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    BackendError::Fetch(format!("{key}: NoSuchKey"))
                } else {
                    BackendError::Fetch(DisplayErrorContext(&e).to_string())
                }
            })?;

        let body = futures::stream::unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), body)),
                Ok(None) => None,
                Err(e) => Some((Err(BackendError::Fetch(e.to_string())), body)),
            }
        });
        Ok(body.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clients_carry_phase_timeouts() {
        let config = S3Config::new(Some("AK".into()), Some("SK".into()), "us-east-1", "b")
            .unwrap()
            .with_endpoint(Some("http://127.0.0.1:9000".to_string()))
            .unwrap();
        let backend = SdkBackend::new(&config).await;

        let probe = backend.probe_client.config().timeout_config().unwrap();
        assert_eq!(probe.operation_timeout(), Some(PROBE_TIMEOUT));

        let list = backend.list_client.config().timeout_config().unwrap();
        assert_eq!(list.operation_attempt_timeout(), Some(LIST_TIMEOUT));

        let download = backend.client.config().timeout_config().unwrap();
        assert_eq!(download.connect_timeout(), Some(DOWNLOAD_CONNECT_TIMEOUT));

        let sts = backend.sts.config().timeout_config().unwrap();
        assert_eq!(sts.operation_timeout(), Some(PROBE_TIMEOUT));
    }
}
