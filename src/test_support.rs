//! Fakes and fixtures shared by the unit tests.

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{DispatchError, NetworkError, Result, ToolError, ToolResult};
use crate::fetcher::{Fetcher, PageContent};
use crate::llm::{Decision, DecisionProcedure, DecisionRequest, Translator};

pub const FIXTURE_PAGE: &str = r#"<html>
<head><title>Fixture Page</title><script>console.log("hidden")</script></head>
<body>
<h1>Hello from the fixture</h1>
<table>
<thead><tr><th>City</th><th>Country</th></tr></thead>
<tbody><tr><td>Paris</td><td>France</td></tr><tr><td>Lima</td><td>Peru</td></tr></tbody>
</table>
</body>
</html>"#;

/// Serves a few fixed routes on an ephemeral local port; returns the base URL.
pub async fn spawn_site() -> String {
    let app = Router::new()
        .route("/page", get(|| async { Html(FIXTURE_PAGE) }))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "gone") }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route("/big", get(|| async { "x".repeat(4096) }))
        .route(
            "/latin1",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/html; charset=ISO-8859-1")],
                    b"<html><head><title>Caf\xe9</title></head><body><p>Na\xefve text</p></body></html>".to_vec(),
                )
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A URL on a port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted fetcher that records how many calls overlap.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, std::result::Result<String, NetworkError>>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), Ok(html.to_string()));
        self
    }

    pub fn with_error(mut self, url: &str, error: NetworkError) -> Self {
        self.pages.insert(url.to_string(), Err(error));
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<PageContent, NetworkError> {
        self.started.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.delays.get(url).copied().unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;

        match self.pages.get(url) {
            Some(Ok(html)) => Ok(PageContent::from_html(url, Some(200), html.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Err(NetworkError::Unreachable(format!("dns error: {} not found", url))),
        }
    }
}

/// Replays canned decisions and keeps every request it saw.
pub struct ScriptedDecisionProcedure {
    script: Mutex<VecDeque<Result<Decision>>>,
    requests: Mutex<Vec<DecisionRequest>>,
    delay: Duration,
}

impl ScriptedDecisionProcedure {
    pub fn new(script: Vec<Result<Decision>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionProcedure for ScriptedDecisionProcedure {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision> {
        self.requests.lock().unwrap().push(request);
        tokio::time::sleep(self.delay).await;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DispatchError::DecisionProcedure("script exhausted".to_string())))
    }
}

/// Word-for-word translator backed by a tiny dictionary.
pub struct DictionaryTranslator;

#[async_trait]
impl Translator for DictionaryTranslator {
    async fn translate(&self, text: &str, target_language: &str, _source: Option<&str>) -> ToolResult<String> {
        let dictionary: &[(&str, &str, &str)] = &[
            ("french", "hello", "bonjour"),
            ("french", "world", "monde"),
            ("spanish", "hello", "hola"),
        ];
        let target = target_language.to_lowercase();

        text.split_whitespace()
            .map(|word| {
                let clean = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
                dictionary
                    .iter()
                    .find(|(lang, from, _)| *lang == target && *from == clean)
                    .map(|(_, _, to)| to.to_string())
                    .ok_or_else(|| ToolError::Translation(format!("no {} translation for '{}'", target_language, clean)))
            })
            .collect::<ToolResult<Vec<_>>>()
            .map(|words| words.join(" "))
    }
}
