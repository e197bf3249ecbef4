use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{ToolError, ToolResult};
use crate::tools::ToolKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchArgs {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFetchArgs {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractTableArgs {
    pub url: String,
    #[serde(default)]
    pub table_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateArgs {
    pub text: String,
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
}

/// Arguments of one tool call, typed by the kind of tool it targets.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Fetch(FetchArgs),
    BatchFetch(BatchFetchArgs),
    ExtractTable(ExtractTableArgs),
    Translate(TranslateArgs),
}

impl ToolInput {
    pub fn parse(kind: ToolKind, arguments: &Value) -> ToolResult<Self> {
        let input = match kind {
            ToolKind::Fetch => ToolInput::Fetch(decode(arguments)?),
            ToolKind::BatchFetch => ToolInput::BatchFetch(decode(arguments)?),
            ToolKind::ExtractTable => ToolInput::ExtractTable(decode(arguments)?),
            ToolKind::Translate => ToolInput::Translate(decode(arguments)?),
        };
        input.check()?;
        Ok(input)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInput::Fetch(_) => ToolKind::Fetch,
            ToolInput::BatchFetch(_) => ToolKind::BatchFetch,
            ToolInput::ExtractTable(_) => ToolKind::ExtractTable,
            ToolInput::Translate(_) => ToolKind::Translate,
        }
    }

    fn check(&self) -> ToolResult<()> {
        match self {
            ToolInput::Fetch(args) => check_url(&args.url).map(|_| ()),
            ToolInput::ExtractTable(args) => check_url(&args.url).map(|_| ()),
            ToolInput::BatchFetch(args) => {
                if args.urls.is_empty() {
                    return Err(ToolError::InvalidArguments("urls cannot be empty".to_string()));
                }
                args.urls.iter().try_for_each(|url| check_url(url).map(|_| ()))
            }
            ToolInput::Translate(args) => {
                if args.text.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("text cannot be empty".to_string()));
                }
                if args.target_language.trim().is_empty() {
                    return Err(ToolError::InvalidArguments("target_language cannot be empty".to_string()));
                }
                Ok(())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(arguments: &Value) -> ToolResult<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Accepts only absolute http(s) URLs with a host.
pub fn check_url(raw: &str) -> ToolResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported url scheme '{}' in '{}'",
                other, raw
            )))
        }
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ToolError::InvalidArguments(format!("url '{}' has no host", raw)));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_each_kind() {
        let fetch = ToolInput::parse(ToolKind::Fetch, &json!({ "url": "https://example.com" })).unwrap();
        assert_eq!(fetch.kind(), ToolKind::Fetch);

        let batch = ToolInput::parse(
            ToolKind::BatchFetch,
            &json!({ "urls": ["https://a.example", "http://b.example/path"] }),
        )
        .unwrap();
        assert!(matches!(batch, ToolInput::BatchFetch(ref a) if a.urls.len() == 2));

        let table = ToolInput::parse(ToolKind::ExtractTable, &json!({ "url": "https://example.com" })).unwrap();
        assert!(matches!(table, ToolInput::ExtractTable(ExtractTableArgs { table_index: None, .. })));

        let translate = ToolInput::parse(
            ToolKind::Translate,
            &json!({ "text": "hello", "target_language": "French" }),
        )
        .unwrap();
        assert!(matches!(translate, ToolInput::Translate(ref t) if t.source_language.is_none()));
    }

    #[test]
    fn test_rejects_bad_urls() {
        for url in ["not a url", "ftp://example.com/file", "file:///etc/passwd", "mailto:a@b.c"] {
            let result = ToolInput::parse(ToolKind::Fetch, &json!({ "url": url }));
            assert!(matches!(result, Err(ToolError::InvalidArguments(_))), "accepted {}", url);
        }
    }

    #[test]
    fn test_rejects_empty_batch() {
        let result = ToolInput::parse(ToolKind::BatchFetch, &json!({ "urls": [] }));
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn test_rejects_blank_translation() {
        let result = ToolInput::parse(ToolKind::Translate, &json!({ "text": "  ", "target_language": "French" }));
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let result = ToolInput::parse(ToolKind::ExtractTable, &json!({ "url": "https://a.b", "table_index": -1 }));
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
