use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{BatchScraper, TargetStatus};
use crate::error::{ToolError, ToolResult};
use crate::fetcher::{Fetcher, PageContent};
use crate::llm::Translator;
use crate::parser::{truncate_chars, TableExtractor};
use crate::storage::{ArtifactRef, ArtifactStore};
use crate::tools::{ExtractTableArgs, ToolInput, TranslateArgs};

/// What a successful tool call hands back to the decision procedure and the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub summary: String,
    pub artifacts: Vec<ArtifactRef>,
}

impl ToolOutput {
    fn text(summary: String) -> Self {
        Self {
            summary,
            artifacts: Vec::new(),
        }
    }
}

/// Runs typed tool inputs against the fetcher, batch scraper, table extractor and translator.
pub struct ToolExecutor {
    fetcher: Arc<dyn Fetcher>,
    batch: Arc<BatchScraper>,
    tables: TableExtractor,
    translator: Arc<dyn Translator>,
    store: Arc<ArtifactStore>,
    max_text_chars: usize,
}

impl ToolExecutor {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        batch: Arc<BatchScraper>,
        translator: Arc<dyn Translator>,
        store: Arc<ArtifactStore>,
        max_text_chars: usize,
    ) -> Self {
        Self {
            fetcher,
            batch,
            tables: TableExtractor::new(),
            translator,
            store,
            max_text_chars,
        }
    }

    pub async fn execute(&self, input: ToolInput, cancel: &CancellationToken) -> ToolResult<ToolOutput> {
        debug!("Executing {:?} tool", input.kind());
        match input {
            ToolInput::Fetch(args) => {
                let page = self.fetch_page(&args.url, cancel).await?;
                Ok(ToolOutput::text(self.describe_page(&page)))
            }
            ToolInput::BatchFetch(args) => self.batch_fetch(&args.urls, cancel).await,
            ToolInput::ExtractTable(args) => self.extract_tables(args, cancel).await,
            ToolInput::Translate(args) => self.translate(args, cancel).await,
        }
    }

    async fn fetch_page(&self, url: &str, cancel: &CancellationToken) -> ToolResult<PageContent> {
        Ok(until_cancelled(cancel, self.fetcher.fetch(url)).await??)
    }

    fn describe_page(&self, page: &PageContent) -> String {
        let text = truncate_chars(&page.text, self.max_text_chars);
        let mut summary = String::new();
        if let Some(title) = &page.title {
            summary.push_str(&format!("Title: {}\n", title));
        }
        summary.push_str(&format!("URL: {}\n\n{}", page.url, text));
        if text.len() < page.text.len() {
            summary.push_str("\n[content truncated]");
        }
        summary
    }

    async fn batch_fetch(&self, urls: &[String], cancel: &CancellationToken) -> ToolResult<ToolOutput> {
        let output = self.batch.scrape(urls, cancel).await?;
        let manifest = &output.manifest;

        let mut summary = format!(
            "Scraped {} of {} pages into {}\nManifest: {}",
            manifest.succeeded(),
            manifest.entries.len(),
            output.archive.url,
            output.manifest_file.url
        );
        for entry in &manifest.entries {
            match &entry.status {
                TargetStatus::Succeeded => {}
                TargetStatus::Failed { error } => {
                    summary.push_str(&format!("\nFailed: {} ({})", entry.url, error));
                }
                TargetStatus::Cancelled => summary.push_str(&format!("\nCancelled: {}", entry.url)),
            }
        }

        Ok(ToolOutput {
            summary,
            artifacts: vec![output.archive, output.manifest_file],
        })
    }

    async fn extract_tables(&self, args: ExtractTableArgs, cancel: &CancellationToken) -> ToolResult<ToolOutput> {
        let page = self.fetch_page(&args.url, cancel).await?;
        let mut tables = self.tables.extract(&page.html)?;

        if let Some(index) = args.table_index {
            if index >= tables.len() {
                return Err(ToolError::InvalidArguments(format!(
                    "table_index {} out of range: page has {} tables",
                    index,
                    tables.len()
                )));
            }
            tables = vec![tables.swap_remove(index)];
        }

        let stem = ArtifactStore::unique_stem("tables");
        let mut artifacts = Vec::with_capacity(tables.len());
        let mut summary = format!("Extracted {} table(s) from {}", tables.len(), page.url);

        for table in &tables {
            let artifact = self.store.write_table_csv(&stem, table).await?;
            summary.push_str(&format!(
                "\nTable {}: {} rows x {} columns -> {}",
                table.index,
                table.rows.len(),
                table.width(),
                artifact.url
            ));
            if table.discrepancies > 0 {
                summary.push_str(&format!(" ({} irregular rows skipped)", table.discrepancies));
            }
            artifacts.push(artifact);
        }

        info!("Exported {} tables from {}", artifacts.len(), page.url);
        Ok(ToolOutput { summary, artifacts })
    }

    async fn translate(&self, args: TranslateArgs, cancel: &CancellationToken) -> ToolResult<ToolOutput> {
        let translated = until_cancelled(
            cancel,
            self.translator
                .translate(&args.text, &args.target_language, args.source_language.as_deref()),
        )
        .await??;
        Ok(ToolOutput::text(translated))
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, work: impl Future<Output = T>) -> ToolResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        value = work => Ok(value),
    }
}
