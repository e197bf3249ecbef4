use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::browser::{BrowserManager, UserAgentGenerator};
use crate::config::{FetchMode, FetcherConfig};
use crate::error::{DispatchError, NetworkError, Result};
use crate::parser::{page_title, visible_text};

const DEFAULT_USER_AGENT: &str = concat!("web-agent-dispatch/", env!("CARGO_PKG_VERSION"));

/// One fetched page, normalized to readable text plus the raw HTML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// URL after redirects.
    pub url: String,
    /// HTTP status of the final response, when the transport reports one.
    pub status: Option<u16>,
    pub title: Option<String>,
    pub text: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl PageContent {
    pub fn from_html(url: impl Into<String>, status: Option<u16>, html: String) -> Self {
        Self {
            url: url.into(),
            status,
            title: page_title(&html),
            text: visible_text(&html),
            html,
            fetched_at: Utc::now(),
        }
    }
}

/// A single request/render cycle. Failures are classified, never retried here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<PageContent, NetworkError>;
}

pub struct HttpFetcher {
    client: Client,
    user_agents: Option<UserAgentGenerator>,
    max_body_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DispatchError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agents: config.rotate_user_agents.then(UserAgentGenerator::new),
            max_body_bytes: config.max_body_bytes()?,
        })
    }

    fn user_agent(&self) -> &str {
        self.user_agents
            .as_ref()
            .map(|g| g.random_user_agent())
            .unwrap_or(DEFAULT_USER_AGENT)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<PageContent, NetworkError> {
        debug!("Fetching {}", url);

        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            warn!("Fetch of {} returned {}", url, status);
            return Err(NetworkError::NonSuccessStatus(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes {
                return Err(too_large(self.max_body_bytes));
            }
        }

        let final_url = response.url().to_string();
        let encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(charset_encoding)
            .unwrap_or(UTF_8);
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_body_bytes {
                return Err(too_large(self.max_body_bytes));
            }
        }

        let (html, used, malformed) = encoding.decode(&body);
        if malformed {
            debug!("{} is not valid {}; replaced bad sequences", final_url, used.name());
        }
        let html = html.into_owned();
        info!("Fetched {} ({} bytes, {})", final_url, body.len(), used.name());
        Ok(PageContent::from_html(final_url, Some(status.as_u16()), html))
    }
}

/// Encoding named by the `charset` parameter of a `Content-Type` value.
pub(crate) fn charset_encoding(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, label)| Encoding::for_label(label.trim().trim_matches('"').as_bytes()))
}

fn too_large(limit: u64) -> NetworkError {
    NetworkError::Unreachable(format!("response body exceeds {} bytes", limit))
}

/// Maps a transport failure onto the network error kinds.
pub(crate) fn classify(err: reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        return NetworkError::Timeout;
    }
    let mut reason = err.to_string();
    if let Some(source) = std::error::Error::source(&err) {
        reason = format!("{}: {}", reason, source);
    }
    NetworkError::Unreachable(reason)
}

/// The fetcher selected by `fetcher.mode`.
pub async fn build_fetcher(config: &FetcherConfig) -> Result<Arc<dyn Fetcher>> {
    match config.mode {
        FetchMode::Http => {
            info!("Using HTTP fetcher");
            Ok(Arc::new(HttpFetcher::new(config)?))
        }
        FetchMode::Browser => {
            info!("Using headless browser fetcher");
            Ok(Arc::new(BrowserManager::launch(config).await?))
        }
    }
}
