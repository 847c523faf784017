//! Application state and phase orchestration
//!
//! A run is three phases over every connected backend: auth checks, listings
//! and, in download mode, downloads. Phases run one after the other; backends
//! download concurrently.

use std::path::PathBuf;

use crate::auth::{check_backend, AuthReport};
use crate::config::Config;
use crate::download::{
    download_keys, DownloadOptions, DownloadOutcome, DownloadStatus, DownloadSummary,
};
use crate::listing::{list_keys, ListingResult};
use crate::s3::backend::Backend;
use crate::s3::types::size_string;

/// What a run does after the auth checks
#[derive(Debug, Clone)]
pub enum Mode {
    /// Auth checks and listings
    Auth,
    /// Auth checks, listings and downloads
    Download(DownloadOptions),
}

/// One backend's download results
#[derive(Debug)]
pub struct DownloadBatch {
    pub backend: &'static str,
    pub dir: PathBuf,
    pub total: usize,
    pub outcomes: Vec<DownloadOutcome>,
}

impl DownloadBatch {
    pub fn summary(&self) -> DownloadSummary {
        DownloadSummary::from_outcomes(&self.outcomes)
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "=== {}: downloading {} objects into {} ===",
            self.backend,
            self.total,
            self.dir.display()
        )];
        if self.total == 0 {
            lines.push("  (no keys to download)".to_string());
            return lines;
        }

        for outcome in &self.outcomes {
            match &outcome.status {
                DownloadStatus::Downloaded { path, bytes } => {
                    lines.push(format!(
                        "  downloaded: {} -> {} ({})",
                        outcome.key,
                        path.display(),
                        size_string(Some(*bytes))
                    ));
                }
                DownloadStatus::Skipped(reason) => {
                    lines.push(format!("  skipped: {} ({})", outcome.key, reason.as_str()));
                }
                DownloadStatus::Failed(e) => {
                    lines.push(format!(
                        "  FAILED to download {:?} via {}: {}",
                        outcome.key, self.backend, e
                    ));
                }
            }
        }

        let summary = self.summary();
        lines.push(format!(
            "  -> {} downloaded {}, skipped {}, failed {} (of {} keys)",
            self.backend, summary.downloaded, summary.skipped, summary.failed, self.total
        ));
        lines
    }
}

/// Report lines for one listing
pub fn listing_lines(result: &ListingResult, bucket: &str) -> Vec<String> {
    let mut lines = vec![format!(
        "=== {}: listing up to {} objects in bucket {:?} ===",
        result.backend, result.max_items, bucket
    )];
    lines.extend(result.keys.iter().map(|key| format!("  - {}", key)));
    match &result.error {
        Some(e) => lines.push(format!("  {} bucket listing failed: {}", result.backend, e)),
        None => lines.push(format!(
            "  -> {} listed {} objects (limit {}).",
            result.backend,
            result.count(),
            result.max_items
        )),
    }
    lines
}

/// Main application state
pub struct App {
    config: Config,
    backends: Vec<Box<dyn Backend>>,
}

impl App {
    /// Connect every configured backend. A backend that cannot be built is
    /// reported and left out of the run.
    pub async fn connect(config: Config) -> Self {
        let mut backends = Vec::with_capacity(config.backends.len());
        for kind in &config.backends {
            match kind.connect(&config.s3).await {
                Ok(backend) => backends.push(backend),
                Err(e) => {
                    tracing::error!("Failed to create {} client: {}", kind, e);
                    println!("=== {}: client setup failed: {} ===", kind, e);
                }
            }
        }
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: Config, backends: Vec<Box<dyn Backend>>) -> Self {
        Self { config, backends }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn run_auth_checks(&self) -> Vec<AuthReport> {
        let mut reports = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            reports.push(check_backend(backend.as_ref()).await);
        }
        reports
    }

    pub async fn run_listings(&self) -> Vec<ListingResult> {
        let mut results = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            results.push(list_keys(backend.as_ref(), self.config.max_items).await);
        }
        results
    }

    /// Download each backend's own listed keys, all backends at once.
    pub async fn run_downloads(
        &self,
        listings: &[ListingResult],
        options: &DownloadOptions,
    ) -> Vec<DownloadBatch> {
        let batches = self.backends.iter().map(|backend| {
            let keys: &[String] = listings
                .iter()
                .find(|l| l.backend == backend.name())
                .map(|l| l.keys.as_slice())
                .unwrap_or_default();
            async move {
                let outcomes = download_keys(backend.as_ref(), keys, options).await;
                DownloadBatch {
                    backend: backend.name(),
                    dir: options.backend_dir(backend.name()),
                    total: keys.len(),
                    outcomes,
                }
            }
        });
        futures::future::join_all(batches).await
    }

    /// Run every phase for `mode`, printing the report to stdout.
    pub async fn run(&self, mode: &Mode) {
        tracing::info!(
            "Running {} backend(s) against bucket {:?}",
            self.backends.len(),
            self.config.s3.bucket
        );

        for report in self.run_auth_checks().await {
            print_lines(&report.lines());
        }

        if !self.config.s3.has_bucket() {
            println!("\nbucket not set; skipping listing and downloads.");
            return;
        }

        let listings = self.run_listings().await;
        for listing in &listings {
            print_lines(&listing_lines(listing, &self.config.s3.bucket));
        }

        if let Mode::Download(options) = mode {
            for batch in self.run_downloads(&listings, options).await {
                print_lines(&batch.lines());
            }
        }
    }
}

fn print_lines(lines: &[String]) {
    println!();
    for line in lines {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::S3Config;
    use crate::download::SkipReason;
    use crate::s3::memory::MemoryBackend;
    use tempfile::TempDir;

    fn config(max_items: usize) -> Config {
        let s3 = S3Config::new(Some("AK".to_string()), Some("SK".to_string()), "r", "b").unwrap();
        Config::new(s3).with_max_items(max_items)
    }

    fn app(max_items: usize) -> App {
        let first = MemoryBackend::new("one")
            .with_object("dir/", b"")
            .with_object("dir/a.txt", b"alpha")
            .with_object("b.txt", b"bravo")
            .failing_fetch("b.txt");
        let second = MemoryBackend::new("two")
            .with_object("c.txt", b"charlie")
            .with_page_size(1);
        App::with_backends(config(max_items), vec![Box::new(first), Box::new(second)])
    }

    #[tokio::test]
    async fn test_listings_follow_backend_order() {
        let app = app(100);
        let listings = app.run_listings().await;

        assert_eq!(app.backend_names(), vec!["one", "two"]);
        assert_eq!(app.config().max_items, 100);
        assert_eq!(listings[0].keys, vec!["dir/", "dir/a.txt", "b.txt"]);
        assert_eq!(listings[1].keys, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn test_downloads_isolated_per_backend() {
        let temp = TempDir::new().unwrap();
        let app = app(100);
        let options = DownloadOptions::new(temp.path()).with_concurrency(2);

        let listings = app.run_listings().await;
        let batches = app.run_downloads(&listings, &options).await;

        assert_eq!(batches.len(), 2);
        let one = batches[0].summary();
        assert_eq!((one.downloaded, one.skipped, one.failed), (1, 1, 1));
        assert!(matches!(
            batches[0].outcomes[0].status,
            DownloadStatus::Skipped(SkipReason::NotDownloadable)
        ));
        assert_eq!(batches[1].summary().downloaded, 1);

        assert_eq!(std::fs::read(temp.path().join("one/dir/a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(temp.path().join("two/c.txt")).unwrap(), b"charlie");
        assert_eq!(
            batches[0].lines().last().unwrap(),
            "  -> one downloaded 1, skipped 1, failed 1 (of 3 keys)"
        );
    }

    #[tokio::test]
    async fn test_download_respects_listing_cap() {
        let temp = TempDir::new().unwrap();
        let app = app(1);
        let options = DownloadOptions::new(temp.path());

        let listings = app.run_listings().await;
        let batches = app.run_downloads(&listings, &options).await;

        assert_eq!(batches[0].total, 1);
        assert_eq!(batches[0].outcomes[0].key, "dir/");
    }

    #[test]
    fn test_empty_batch_lines() {
        let batch = DownloadBatch {
            backend: "aws-sdk",
            dir: PathBuf::from("/out/aws-sdk"),
            total: 0,
            outcomes: Vec::new(),
        };
        assert_eq!(
            batch.lines(),
            vec![
                "=== aws-sdk: downloading 0 objects into /out/aws-sdk ===".to_string(),
                "  (no keys to download)".to_string(),
            ]
        );
    }

    #[test]
    fn test_listing_lines_summary() {
        let result = ListingResult {
            backend: "object-store",
            max_items: 10,
            keys: vec!["a".to_string(), "b".to_string()],
            error: None,
        };
        let lines = listing_lines(&result, "bucket");
        assert_eq!(lines[1], "  - a");
        assert_eq!(lines.last().unwrap(), "  -> object-store listed 2 objects (limit 10).");
    }
}
