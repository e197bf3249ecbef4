use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::stealth::{headless_args, UserAgentGenerator};
use crate::config::FetcherConfig;
use crate::error::{DispatchError, NetworkError, Result};
use crate::fetcher::{Fetcher, PageContent};

const LAUNCH_ATTEMPTS: u32 = 3;

struct Rendered {
    html: String,
    final_url: Option<String>,
    /// Main-frame response status; absent for documents without one (e.g. `data:` URLs).
    status: Option<u16>,
}

/// Renders pages in a shared headless Chrome, one tab per fetch.
pub struct BrowserManager {
    browser: Browser,
    handler: JoinHandle<()>,
    pages: Semaphore,
    request_timeout: Duration,
    user_agents: Option<UserAgentGenerator>,
}

impl BrowserManager {
    pub async fn launch(config: &FetcherConfig) -> Result<Self> {
        let (browser, handler) = Self::create_browser().await?;

        Ok(Self {
            browser,
            handler,
            pages: Semaphore::new(config.max_browser_pages),
            request_timeout: config.request_timeout,
            user_agents: config.rotate_user_agents.then(UserAgentGenerator::new),
        })
    }

    async fn create_browser() -> Result<(Browser, JoinHandle<()>)> {
        // unique profile dir avoids the singleton lock between processes
        let user_data_dir = std::env::temp_dir().join(format!(
            "web-agent-dispatch-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&user_data_dir)?;

        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .args(headless_args(&user_data_dir.to_string_lossy()))
            .build()
            .map_err(|e| DispatchError::Browser(format!("Failed to create browser config: {}", e)))?;

        let mut last_error = String::new();
        for attempt in 1..=LAUNCH_ATTEMPTS {
            match Browser::launch(browser_config.clone()).await {
                Ok((browser, mut handler)) => {
                    info!("Browser launched on attempt {}", attempt);

                    let task = tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                let message = e.to_string();
                                // chromiumoxide cannot decode every CDP event; those are noise
                                if message.contains("data did not match any variant") {
                                    debug!("Ignoring CDP decode error: {}", e);
                                } else {
                                    warn!("Browser handler error: {}", e);
                                }
                            }
                        }
                        debug!("Browser handler task ended");
                    });

                    return Ok((browser, task));
                }
                Err(e) => {
                    error!("Browser launch attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < LAUNCH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(DispatchError::Browser(format!(
            "Failed to launch browser after {} attempts: {}",
            LAUNCH_ATTEMPTS, last_error
        )))
    }

    async fn open_page(&self) -> std::result::Result<Page, NetworkError> {
        let page = match tokio::time::timeout(self.request_timeout, self.browser.new_page("about:blank")).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return Err(NetworkError::Unreachable(format!("failed to open tab: {}", e))),
            Err(_) => return Err(NetworkError::Timeout),
        };

        if let Some(generator) = &self.user_agents {
            let params = SetUserAgentOverrideParams::new(generator.random_user_agent());
            if let Err(e) = page.execute(params).await {
                warn!("Failed to set user agent: {}", e);
            }
        }

        Ok(page)
    }

    async fn render(page: &Page, url: &str) -> std::result::Result<Rendered, CdpError> {
        page.goto(url).await?;
        let status = page
            .wait_for_navigation_response()
            .await?
            .and_then(|request| request.response.as_ref().map(|response| response.status))
            .and_then(|status| u16::try_from(status).ok());
        let html = page.content().await?;
        let final_url = page.url().await?;
        Ok(Rendered { html, final_url, status })
    }
}

#[async_trait]
impl Fetcher for BrowserManager {
    async fn fetch(&self, url: &str) -> std::result::Result<PageContent, NetworkError> {
        let _permit = self
            .pages
            .acquire()
            .await
            .map_err(|_| NetworkError::Unreachable("browser is shutting down".to_string()))?;

        debug!("Rendering {}", url);
        let page = self.open_page().await?;
        let outcome = tokio::time::timeout(self.request_timeout, Self::render(&page, url)).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close tab for {}: {}", url, e);
        }

        match outcome {
            Ok(Ok(rendered)) => {
                if let Some(status) = rendered.status.filter(|s| !(200..300).contains(s)) {
                    warn!("Render of {} returned {}", url, status);
                    return Err(NetworkError::NonSuccessStatus(status));
                }
                info!("Rendered {} ({} bytes)", url, rendered.html.len());
                Ok(PageContent::from_html(
                    rendered.final_url.unwrap_or_else(|| url.to_string()),
                    rendered.status,
                    rendered.html,
                ))
            }
            Ok(Err(e)) => Err(NetworkError::Unreachable(e.to_string())),
            Err(_) => Err(NetworkError::Timeout),
        }
    }
}

impl Drop for BrowserManager {
    fn drop(&mut self) {
        self.handler.abort();
        info!("Browser manager dropped");
    }
}
