//! Run configuration
//!
//! Everything the backends and orchestrators need is resolved once at start
//! into a [`Config`] and passed down by reference. Resolving fails with
//! [`ConfigError::MissingCredentials`] before any backend is constructed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::s3::backend::BackendKind;

pub const DEFAULT_REGION: &str = "eu-west-1";
pub const DEFAULT_BUCKET: &str = "auto-product-build-downstream";
pub const DEFAULT_MAX_ITEMS: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Budget for identity and probe calls
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for one listing page request
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect budget for object downloads
pub const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required env vars: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("Invalid endpoint URL {url:?}: {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to prepare output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Connection settings shared by every backend
#[derive(Debug, Clone)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack)
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    /// Build a config, failing if either credential is missing or empty.
    pub fn new(
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let access_key_id = access_key_id.filter(|v| !v.is_empty());
        let secret_access_key = secret_access_key.filter(|v| !v.is_empty());

        let (Some(access_key_id), Some(secret_access_key)) =
            (access_key_id.clone(), secret_access_key.clone())
        else {
            let mut missing = Vec::new();
            if access_key_id.is_none() {
                missing.push(ACCESS_KEY_VAR);
            }
            if secret_access_key.is_none() {
                missing.push(SECRET_KEY_VAR);
            }
            return Err(ConfigError::MissingCredentials(missing));
        };

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: None,
            region: region.into(),
            bucket: bucket.into().trim().to_string(),
            endpoint_url: None,
            force_path_style: false,
        })
    }

    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Point every backend at a custom endpoint. Custom endpoints use
    /// path-style addressing.
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Result<Self, ConfigError> {
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            url::Url::parse(&endpoint).map_err(|source| ConfigError::InvalidEndpoint {
                url: endpoint.clone(),
                source,
            })?;
            self.endpoint_url = Some(endpoint.trim_end_matches('/').to_string());
            self.force_path_style = true;
        }
        Ok(self)
    }

    pub fn has_bucket(&self) -> bool {
        !self.bucket.is_empty()
    }
}

/// Fully resolved run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub s3: S3Config,
    pub max_items: usize,
    pub backends: Vec<BackendKind>,
}

impl Config {
    pub fn new(s3: S3Config) -> Self {
        Self {
            s3,
            max_items: DEFAULT_MAX_ITEMS,
            backends: BackendKind::ALL.to_vec(),
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Restrict the run to the given backends; an empty list keeps all three.
    pub fn with_backends(mut self, backends: &[BackendKind]) -> Self {
        if !backends.is_empty() {
            let mut selected = Vec::new();
            for kind in backends {
                if !selected.contains(kind) {
                    selected.push(*kind);
                }
            }
            self.backends = selected;
        }
        self
    }
}

/// Expand a leading `~`, create the directory and make it absolute.
pub fn prepare_output_dir(raw: &Path) -> Result<PathBuf, ConfigError> {
    let expanded = match raw.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| raw.to_path_buf()),
        Err(_) => raw.to_path_buf(),
    };

    std::fs::create_dir_all(&expanded).map_err(|source| ConfigError::OutputDir {
        path: expanded.clone(),
        source,
    })?;

    std::fs::canonicalize(&expanded).map_err(|source| ConfigError::OutputDir {
        path: expanded,
        source,
    })
}
