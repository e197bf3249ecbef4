use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::batch::Manifest;
use crate::config::OutputConfig;
use crate::error::{ToolError, ToolResult};
use crate::parser::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Archive,
    Manifest,
    Csv,
}

/// A file produced by a tool call, addressable by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

pub struct CsvFormatter;

impl CsvFormatter {
    pub fn format_table(table: &Table) -> String {
        let mut output = String::new();
        if let Some(headers) = &table.headers {
            Self::push_row(&mut output, headers);
        }
        for row in &table.rows {
            Self::push_row(&mut output, row);
        }
        output
    }

    fn push_row(output: &mut String, cells: &[String]) {
        let row: Vec<String> = cells.iter().map(|c| Self::escape_csv_field(c)).collect();
        output.push_str(&row.join(","));
        output.push('\n');
    }

    fn escape_csv_field(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    pub fn file_extension() -> &'static str {
        "csv"
    }
}

/// Writes tool artifacts into the output directory and derives their public URLs.
pub struct ArtifactStore {
    directory: PathBuf,
    base_url: String,
}

impl ArtifactStore {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn ensure_directory(&self) -> ToolResult<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }

    /// `{prefix}_{timestamp}_{short id}`, unique across concurrent calls.
    pub fn unique_stem(prefix: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", prefix, Utc::now().format("%Y%m%d_%H%M%S"), &id[..8])
    }

    /// Zip `entries` (name, bytes) in the given order.
    pub async fn write_archive(&self, stem: &str, entries: Vec<(String, Vec<u8>)>) -> ToolResult<ArtifactRef> {
        self.ensure_directory().await?;
        let file_name = format!("{}.zip", stem);
        let path = self.directory.join(&file_name);

        let target = path.clone();
        let bytes = tokio::task::spawn_blocking(move || Self::zip_entries(&target, entries))
            .await
            .map_err(|e| ToolError::Storage(format!("archive task failed: {}", e)))??;

        info!("Wrote archive {:?} ({} bytes)", path, bytes);
        Ok(self.artifact(ArtifactKind::Archive, file_name, path))
    }

    fn zip_entries(path: &Path, entries: Vec<(String, Vec<u8>)>) -> ToolResult<u64> {
        let file = std::fs::File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, data) in entries {
            zip.start_file(name, options)?;
            zip.write_all(&data)?;
        }

        let file = zip.finish()?;
        Ok(file.metadata()?.len())
    }

    pub async fn write_manifest(&self, stem: &str, manifest: &Manifest) -> ToolResult<ArtifactRef> {
        let file_name = format!("{}.manifest.json", stem);
        let content = serde_json::to_vec_pretty(manifest)?;
        self.write_file(ArtifactKind::Manifest, file_name, content).await
    }

    pub async fn write_table_csv(&self, stem: &str, table: &Table) -> ToolResult<ArtifactRef> {
        let file_name = format!("{}_table{}.{}", stem, table.index, CsvFormatter::file_extension());
        let content = CsvFormatter::format_table(table).into_bytes();
        self.write_file(ArtifactKind::Csv, file_name, content).await
    }

    async fn write_file(&self, kind: ArtifactKind, file_name: String, content: Vec<u8>) -> ToolResult<ArtifactRef> {
        self.ensure_directory().await?;
        let path = self.directory.join(&file_name);
        tokio::fs::write(&path, &content).await?;

        debug!("Wrote {:?} ({} bytes)", path, content.len());
        Ok(self.artifact(kind, file_name, path))
    }

    fn artifact(&self, kind: ArtifactKind, file_name: String, path: PathBuf) -> ArtifactRef {
        ArtifactRef {
            kind,
            url: self.url_for(&file_name),
            file_name,
            path,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(&OutputConfig {
            directory: dir.join("output"),
            base_url: "http://localhost:8000/output/".to_string(),
        })
    }

    fn sample_table() -> Table {
        Table {
            index: 2,
            caption: None,
            headers: Some(vec!["name".to_string(), "note".to_string()]),
            rows: vec![
                vec!["Widget".to_string(), "plain".to_string()],
                vec!["Gadget, large".to_string(), "says \"hi\"".to_string()],
            ],
            discrepancies: 0,
        }
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(CsvFormatter::escape_csv_field("simple"), "simple");
        assert_eq!(CsvFormatter::escape_csv_field("with,comma"), "\"with,comma\"");
        assert_eq!(CsvFormatter::escape_csv_field("with\"quote"), "\"with\"\"quote\"");
        assert_eq!(CsvFormatter::escape_csv_field("with\nnewline"), "\"with\nnewline\"");
    }

    #[test]
    fn test_format_table() {
        let csv = CsvFormatter::format_table(&sample_table());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["name,note", "Widget,plain", "\"Gadget, large\",\"says \"\"hi\"\"\""]);
    }

    #[tokio::test]
    async fn test_write_table_csv() {
        let temp_dir = tempdir().unwrap();
        let store = store(temp_dir.path());

        let artifact = store.write_table_csv("structured_data_test", &sample_table()).await.unwrap();

        assert_eq!(artifact.kind, ArtifactKind::Csv);
        assert_eq!(artifact.file_name, "structured_data_test_table2.csv");
        assert_eq!(artifact.url, "http://localhost:8000/output/structured_data_test_table2.csv");
        let content = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(content.starts_with("name,note\n"));
    }

    #[tokio::test]
    async fn test_write_archive_keeps_entry_order() {
        let temp_dir = tempdir().unwrap();
        let store = store(temp_dir.path());

        let entries = vec![
            ("page_001_b.json".to_string(), b"{\"n\":1}".to_vec()),
            ("page_002_a.json".to_string(), b"{\"n\":2}".to_vec()),
        ];
        let artifact = store.write_archive("bundle", entries).await.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Archive);

        let file = std::fs::File::open(&artifact.path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "page_001_b.json");

        let mut body = String::new();
        archive.by_index(1).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "{\"n\":2}");

        assert!(std::fs::metadata(&artifact.path).unwrap().len() > 0);
    }

    #[test]
    fn test_unique_stem() {
        let a = ArtifactStore::unique_stem("scraped_content");
        let b = ArtifactStore::unique_stem("scraped_content");
        assert!(a.starts_with("scraped_content_"));
        assert_ne!(a, b);
    }
}
