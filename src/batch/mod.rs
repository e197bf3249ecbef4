use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::{NetworkError, ToolError, ToolResult};
use crate::fetcher::{Fetcher, PageContent};
use crate::storage::{ArtifactRef, ArtifactStore};

/// Terminal state of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Succeeded,
    Failed { error: NetworkError },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// 1-based position in the input list.
    pub position: usize,
    pub url: String,
    #[serde(flatten)]
    pub status: TargetStatus,
    /// Archive entry holding the page, for succeeded targets.
    pub entry_name: Option<String>,
    pub title: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Cancelled))
    }

    fn count(&self, pred: impl Fn(&TargetStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }
}

/// Archive plus manifest of a batch with at least one success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub archive: ArtifactRef,
    pub manifest_file: ArtifactRef,
    pub manifest: Manifest,
}

enum TargetOutcome {
    Succeeded(PageContent),
    Failed(NetworkError),
    Cancelled,
}

pub struct BatchScraper {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<ArtifactStore>,
    max_concurrent: usize,
    max_targets: usize,
}

impl BatchScraper {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<ArtifactStore>, config: &BatchConfig) -> Self {
        Self {
            fetcher,
            store,
            max_concurrent: config.max_concurrent.max(1),
            max_targets: config.max_targets,
        }
    }

    /// Fetch every target with at most `max_concurrent` in flight.
    ///
    /// Targets are admitted in input order and reported in input order. A failed
    /// target never aborts the batch; the call fails only when nothing succeeded.
    /// Once `cancel` fires, unfinished targets are reported as cancelled.
    pub async fn scrape(&self, urls: &[String], cancel: &CancellationToken) -> ToolResult<BatchOutput> {
        if urls.is_empty() {
            return Err(ToolError::InvalidArguments("no targets supplied".to_string()));
        }
        if urls.len() > self.max_targets {
            return Err(ToolError::InvalidArguments(format!(
                "{} targets exceeds the limit of {}",
                urls.len(),
                self.max_targets
            )));
        }

        let job_id = ArtifactStore::unique_stem("scraped_content");
        info!("Batch {} starting: {} targets, {} at a time", job_id, urls.len(), self.max_concurrent);

        // fair semaphore + join_all polling in order = FIFO admission
        let limiter = Semaphore::new(self.max_concurrent);
        let outcomes = join_all(
            urls.iter()
                .map(|url| self.scrape_target(url, &limiter, cancel)),
        )
        .await;

        let mut entries = Vec::with_capacity(urls.len());
        let mut archive_entries = Vec::new();

        for (idx, (url, outcome)) in urls.iter().zip(outcomes).enumerate() {
            let position = idx + 1;
            let entry = match outcome {
                TargetOutcome::Succeeded(page) => {
                    let entry_name = format!("page_{:03}_{}.json", position, sanitize_name(url));
                    let digest = format!("{:x}", Sha256::digest(page.text.as_bytes()));
                    let body = json!({
                        "url": url,
                        "final_url": page.url,
                        "title": page.title,
                        "fetched_at": page.fetched_at,
                        "text": page.text,
                    });
                    archive_entries.push((entry_name.clone(), serde_json::to_vec_pretty(&body)?));

                    ManifestEntry {
                        position,
                        url: url.clone(),
                        status: TargetStatus::Succeeded,
                        entry_name: Some(entry_name),
                        title: page.title,
                        sha256: Some(digest),
                    }
                }
                TargetOutcome::Failed(error) => {
                    warn!("Batch {} target {} ({}) failed: {}", job_id, position, url, error);
                    Self::bare_entry(position, url, TargetStatus::Failed { error })
                }
                TargetOutcome::Cancelled => Self::bare_entry(position, url, TargetStatus::Cancelled),
            };
            entries.push(entry);
        }

        let manifest = Manifest { job_id: job_id.clone(), entries };

        if archive_entries.is_empty() {
            if manifest.cancelled() > 0 {
                warn!("Batch {} cancelled before any target succeeded", job_id);
                return Err(ToolError::Cancelled);
            }
            warn!("Batch {}: all {} targets failed", job_id, urls.len());
            return Err(ToolError::AllTargetsFailed(manifest));
        }

        let archive = self.store.write_archive(&job_id, archive_entries).await?;
        let manifest_file = self.store.write_manifest(&job_id, &manifest).await?;

        info!(
            "Batch {} finished: {} succeeded, {} failed, {} cancelled",
            job_id,
            manifest.succeeded(),
            manifest.failed(),
            manifest.cancelled()
        );

        Ok(BatchOutput {
            archive,
            manifest_file,
            manifest,
        })
    }

    async fn scrape_target(&self, url: &str, limiter: &Semaphore, cancel: &CancellationToken) -> TargetOutcome {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TargetOutcome::Cancelled,
            permit = limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return TargetOutcome::Cancelled,
            },
        };

        debug!("Fetching batch target {}", url);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => TargetOutcome::Cancelled,
            result = self.fetcher.fetch(url) => match result {
                Ok(page) => TargetOutcome::Succeeded(page),
                Err(error) => TargetOutcome::Failed(error),
            },
        }
    }

    fn bare_entry(position: usize, url: &str, status: TargetStatus) -> ManifestEntry {
        ManifestEntry {
            position,
            url: url.to_string(),
            status,
            entry_name: None,
            title: None,
            sha256: None,
        }
    }
}

/// File-name-safe rendering of a URL's host and path.
pub fn sanitize_name(raw: &str) -> String {
    let source = match url::Url::parse(raw) {
        Ok(url) => format!("{}{}", url.host_str().unwrap_or_default(), url.path()),
        Err(_) => raw.to_string(),
    };

    let mut name = String::with_capacity(source.len());
    for ch in source.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            name.push(ch);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }

    let name: String = name.trim_matches('_').chars().take(60).collect();
    let name = name.trim_end_matches('_');
    if name.is_empty() {
        "page".to_string()
    } else {
        name.to_string()
    }
}
