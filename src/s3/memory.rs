//! In-memory backend used by the orchestrator tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::s3::backend::{Backend, ByteStream, PageStream};
use crate::s3::error::BackendError;
use crate::s3::types::{IdentityInfo, RawEntry};

pub(crate) struct MemoryBackend {
    name: &'static str,
    entries: Vec<RawEntry>,
    bodies: Vec<(String, Bytes)>,
    page_size: usize,
    chunk_size: usize,
    failing_page: Option<usize>,
    failing_keys: HashSet<String>,
    identity: Option<IdentityInfo>,
    pages_served: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            bodies: Vec::new(),
            page_size: 1000,
            chunk_size: 4,
            failing_page: None,
            failing_keys: HashSet::new(),
            identity: None,
            pages_served: Arc::new(AtomicUsize::new(0)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add an object listed in the `Keyed` shape
    pub fn with_object(mut self, key: &str, body: &[u8]) -> Self {
        self.entries.push(RawEntry::Keyed {
            key: Some(key.to_string()),
            size: Some(body.len() as u64),
        });
        self.bodies.push((key.to_string(), Bytes::copy_from_slice(body)));
        self
    }

    /// Add a listing entry with no fetchable body
    pub fn with_entry(mut self, raw: RawEntry) -> Self {
        self.entries.push(raw);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_identity(mut self, identity: IdentityInfo) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Make the listing fail when the given page index is requested
    pub fn failing_listing_at(mut self, page: usize) -> Self {
        self.failing_page = Some(page);
        self
    }

    pub fn failing_fetch(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn bucket(&self) -> &str {
        "memory-bucket"
    }

    async fn check_identity(&self) -> Result<Option<IdentityInfo>, BackendError> {
        Ok(self.identity.clone())
    }

    fn list_pages(&self) -> PageStream<'_> {
        let pages: Vec<Vec<RawEntry>> = self
            .entries
            .chunks(self.page_size)
            .map(|c| c.to_vec())
            .collect();
        let failing_page = self.failing_page;
        let served = Arc::clone(&self.pages_served);

        futures::stream::iter(0..pages.len().max(failing_page.map_or(0, |p| p + 1)))
            .map(move |index| {
                served.fetch_add(1, Ordering::SeqCst);
                if failing_page == Some(index) {
                    return Err(BackendError::List(format!("page {index} rejected")));
                }
                Ok(pages.get(index).cloned().unwrap_or_default())
            })
            .boxed()
    }

    async fn fetch(&self, key: &str) -> Result<ByteStream, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_keys.contains(key) {
            return Err(BackendError::Fetch(format!("{key}: access denied")));
        }
        let body = self
            .bodies
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| BackendError::Fetch(format!("{key}: NoSuchKey")))?;

        let chunks: Vec<Result<Bytes, BackendError>> = body
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}
