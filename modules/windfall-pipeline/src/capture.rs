use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use rand::prelude::IndexedRandom;
use tracing::{debug, warn};

/// Raw page material as the browser rendered it, before any size cap.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub html: String,
    pub title: String,
}

/// Headless browser capable of rendering script-driven pages.
#[async_trait]
pub trait CaptureAgent: Send + Sync {
    /// Open one browser session. The dispatcher reuses a session across a
    /// whole run and closes it when done.
    async fn open_session(&self) -> Result<Box<dyn CaptureSession>>;
}

/// One live browser session with a pinned fingerprint.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<CapturedPage>;
    async fn close(self: Box<Self>) -> Result<()>;
}

// --- Fingerprint rotation ---

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

const TIMEZONES: &[&str] = &["America/New_York", "America/Chicago", "America/Los_Angeles"];

/// Stealth shim evaluated before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

/// Browser identity drawn fresh for each session and held constant across
/// every page that session visits.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: &'static str,
    pub viewport: (u32, u32),
    pub timezone: &'static str,
}

impl Fingerprint {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            user_agent: USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]),
            viewport: VIEWPORTS.choose(&mut rng).copied().unwrap_or(VIEWPORTS[0]),
            timezone: TIMEZONES.choose(&mut rng).copied().unwrap_or(TIMEZONES[0]),
        }
    }
}

// --- Chromium-backed agent ---

pub struct ChromiumCaptureAgent {
    chrome_executable: Option<String>,
    nav_timeout: Duration,
}

impl ChromiumCaptureAgent {
    pub fn new(chrome_executable: Option<String>, nav_timeout: Duration) -> Self {
        Self {
            chrome_executable,
            nav_timeout,
        }
    }
}

#[async_trait]
impl CaptureAgent for ChromiumCaptureAgent {
    async fn open_session(&self) -> Result<Box<dyn CaptureSession>> {
        let fingerprint = Fingerprint::random();
        debug!(
            user_agent = fingerprint.user_agent,
            timezone = fingerprint.timezone,
            "Opening capture session"
        );

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport.0, fingerprint.viewport.1)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--lang=en-US");
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| anyhow!(e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        // The handler stream must be driven for the session to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            browser,
            handler_task,
            fingerprint,
            nav_timeout: self.nav_timeout,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    fingerprint: Fingerprint,
    nav_timeout: Duration,
}

#[async_trait]
impl CaptureSession for ChromiumSession {
    async fn fetch(&self, url: &str) -> Result<CapturedPage> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL {url}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow!("Unsupported URL scheme: {}", parsed.scheme()));
        }

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;

        let result = self.capture_on_page(&page, url).await;

        // Close on both paths so failed captures don't leak pages
        if let Err(e) = page.close().await {
            warn!(url, error = %e, "Failed to close page");
        }
        result
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut browser = self.browser;
        browser.close().await.context("Failed to close browser")?;
        let _ = browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

impl ChromiumSession {
    async fn capture_on_page(&self, page: &Page, url: &str) -> Result<CapturedPage> {
        page.execute(SetUserAgentOverrideParams::new(self.fingerprint.user_agent))
            .await
            .context("Failed to set user agent")?;
        page.execute(SetTimezoneOverrideParams::new(self.fingerprint.timezone))
            .await
            .context("Failed to set timezone")?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .context("Failed to install stealth script")?;

        // Intercept requests so heavy subresources never transfer
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable request interception")?;
        let mut paused_events = page
            .event_listener::<EventRequestPaused>()
            .await
            .context("Failed to listen for intercepted requests")?;
        let intercept_page = page.clone();
        let block_task = tokio::spawn(async move {
            while let Some(event) = paused_events.next().await {
                let blocked = matches!(
                    event.resource_type,
                    ResourceType::Image | ResourceType::Media | ResourceType::Font
                );
                let result = if blocked {
                    intercept_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    intercept_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    debug!(error = %e, "Request interception reply failed");
                }
            }
        });

        let outcome = async {
            tokio::time::timeout(self.nav_timeout, page.goto(url))
                .await
                .map_err(|_| anyhow!("Navigation timed out after {:?}", self.nav_timeout))?
                .with_context(|| format!("Navigation failed for {url}"))?;

            // Best effort: many listing pages never reach network idle
            let _ = tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await;

            // Nudge lazy-loaded listings into rendering
            if let Err(e) = page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await
            {
                debug!(url, error = %e, "Scroll nudge failed");
            }
            tokio::time::sleep(Duration::from_secs(2)).await;

            let html = page.content().await.context("Failed to read page content")?;
            let title = page
                .get_title()
                .await
                .context("Failed to read page title")?
                .unwrap_or_default();

            Ok(CapturedPage { html, title })
        }
        .await;

        block_task.abort();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_draws_from_known_pools() {
        for _ in 0..20 {
            let fp = Fingerprint::random();
            assert!(USER_AGENTS.contains(&fp.user_agent));
            assert!(VIEWPORTS.contains(&fp.viewport));
            assert!(TIMEZONES.contains(&fp.timezone));
        }
    }
}
