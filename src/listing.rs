//! Listing orchestration
//!
//! Drives a backend's pages up to a cap on raw entries. Every raw entry seen is
//! recorded, downloadable or not, so listed and downloadable counts stay
//! independently observable.

use futures::StreamExt;

use crate::s3::backend::Backend;
use crate::s3::error::BackendError;
use crate::s3::types::listed_name;

/// Keys gathered from one backend
#[derive(Debug, Clone)]
pub struct ListingResult {
    pub backend: &'static str,
    pub max_items: usize,
    pub keys: Vec<String>,
    /// Set when a page was rejected; `keys` holds what was gathered before
    pub error: Option<BackendError>,
}

impl ListingResult {
    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

/// List up to `max_items` raw entries from the bucket root.
pub async fn list_keys(backend: &dyn Backend, max_items: usize) -> ListingResult {
    let mut result = ListingResult {
        backend: backend.name(),
        max_items,
        keys: Vec::new(),
        error: None,
    };
    if max_items == 0 {
        return result;
    }

    let mut pages = backend.list_pages();
    'pages: while let Some(page) = pages.next().await {
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    "{} listing stopped after {} entries: {}",
                    backend.name(),
                    result.keys.len(),
                    e
                );
                result.error = Some(e);
                break;
            }
        };

        for raw in &page {
            result.keys.push(listed_name(raw));
            if result.keys.len() >= max_items {
                break 'pages;
            }
        }
    }

    tracing::debug!(
        "{} listed {} of at most {} entries",
        backend.name(),
        result.keys.len(),
        max_items
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::memory::MemoryBackend;
    use crate::s3::types::RawEntry;
    use serde_json::json;

    fn backend_with(count: usize) -> MemoryBackend {
        (0..count).fold(MemoryBackend::new("mem"), |b, i| {
            b.with_object(&format!("obj-{i:02}.txt"), b"x")
        })
    }

    #[tokio::test]
    async fn test_cap_applies_mid_page() {
        let backend = backend_with(20).with_page_size(10);
        let result = list_keys(&backend, 5).await;

        assert_eq!(result.count(), 5);
        assert_eq!(result.keys[4], "obj-04.txt");
        assert_eq!(backend.pages_served(), 1);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_cap_on_page_boundary_stops_paging() {
        let backend = backend_with(30).with_page_size(10);
        let result = list_keys(&backend, 10).await;

        assert_eq!(result.count(), 10);
        assert_eq!(backend.pages_served(), 1);
    }

    #[tokio::test]
    async fn test_lists_across_pages_in_order() {
        let backend = backend_with(25).with_page_size(10);
        let result = list_keys(&backend, 100).await;

        assert_eq!(result.count(), 25);
        assert_eq!(backend.pages_served(), 3);
        let expected: Vec<String> = (0..25).map(|i| format!("obj-{i:02}.txt")).collect();
        assert_eq!(result.keys, expected);
    }

    #[tokio::test]
    async fn test_zero_cap_does_not_list() {
        let backend = backend_with(3);
        let result = list_keys(&backend, 0).await;

        assert_eq!(result.count(), 0);
        assert_eq!(backend.pages_served(), 0);
    }

    #[tokio::test]
    async fn test_prefix_markers_are_listed_unfiltered() {
        let backend = MemoryBackend::new("mem")
            .with_entry(RawEntry::Keyed {
                key: Some("folder/".to_string()),
                size: Some(0),
            })
            .with_object("folder/file.txt", b"abc")
            .with_entry(RawEntry::Keyed {
                key: Some("empty.txt".to_string()),
                size: Some(0),
            });
        let result = list_keys(&backend, 100).await;

        assert_eq!(result.keys, vec!["folder/", "folder/file.txt", "empty.txt"]);
    }

    #[tokio::test]
    async fn test_mixed_shapes_normalize_to_keys() {
        let fields = |v: serde_json::Value| match v {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        let backend = MemoryBackend::new("mem")
            .with_entry(RawEntry::Mapping(fields(json!({ "Key": "a", "Size": "1" }))))
            .with_entry(RawEntry::Mapping(fields(json!({ "path": "b", "size": 2 }))))
            .with_entry(RawEntry::Pathed {
                path: "c".to_string(),
                size: 3,
            })
            .with_entry(RawEntry::Opaque("?".to_string()));
        let result = list_keys(&backend, 100).await;

        assert_eq!(result.keys, vec!["a", "b", "c", "?"]);
    }

    #[tokio::test]
    async fn test_listing_error_keeps_partial_keys() {
        let backend = backend_with(15).with_page_size(10).failing_listing_at(1);
        let result = list_keys(&backend, 100).await;

        assert_eq!(result.count(), 10);
        assert!(matches!(result.error, Some(BackendError::List(_))));
    }

    #[tokio::test]
    async fn test_listing_rejected_immediately() {
        let backend = backend_with(5).failing_listing_at(0);
        let result = list_keys(&backend, 100).await;

        assert_eq!(result.count(), 0);
        assert!(result.error.is_some());
    }
}
