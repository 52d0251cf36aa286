//! [`Driver`] implementation over eoka's CDP browser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eoka::{Browser, Page, StealthConfig};
use serde::Deserialize;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::scripts;
use super::{
    BrowserHandle, ConsoleMessage, DisconnectListener, Driver, Locator, PageHandle, RawNode,
    Resolved,
};
use crate::settings::{BrowserEngine, LaunchOptions};
use crate::{Error, Result};

/// How often the watchdog probes the browser.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on a single liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches Chromium through eoka.
#[derive(Debug, Default, Clone)]
pub struct ChromiumDriver {
    patch_binary: bool,
}

impl ChromiumDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch the Chrome binary's automation markers before launch.
    pub fn with_patched_binary(mut self, patch: bool) -> Self {
        self.patch_binary = patch;
        self
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    type Browser = ChromiumBrowser;

    async fn launch(&self, options: &LaunchOptions) -> Result<ChromiumBrowser> {
        if options.engine != BrowserEngine::Chromium {
            return Err(Error::Driver(format!(
                "engine {} is not available; only chromium can be driven",
                options.engine
            )));
        }

        let config = StealthConfig {
            headless: options.headless,
            user_agent: Some(options.user_agent.clone()),
            viewport_width: options.viewport.width,
            viewport_height: options.viewport.height,
            patch_binary: self.patch_binary,
            ..Default::default()
        };
        debug!(
            headless = options.headless,
            width = options.viewport.width,
            height = options.viewport.height,
            args = ?options.args,
            "launching chromium"
        );
        let browser = Browser::launch_with_config(config).await?;
        Ok(ChromiumBrowser::new(browser))
    }
}

struct Shared {
    browser: Mutex<Option<Browser>>,
    connected: AtomicBool,
    listener: parking_lot::Mutex<Option<DisconnectListener>>,
}

impl Shared {
    fn fire_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener.lock().take() {
            listener();
        }
    }

    async fn probe(&self) -> bool {
        let guard = self.browser.lock().await;
        let Some(browser) = guard.as_ref() else {
            return false;
        };
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, browser.tabs()).await,
            Ok(Ok(_))
        )
    }
}

/// A running Chromium process.
pub struct ChromiumBrowser {
    shared: Arc<Shared>,
}

impl ChromiumBrowser {
    fn new(browser: Browser) -> Self {
        Self {
            shared: Arc::new(Shared {
                browser: Mutex::new(Some(browser)),
                connected: AtomicBool::new(true),
                listener: parking_lot::Mutex::new(None),
            }),
        }
    }

    async fn browser(&self) -> Result<MappedMutexGuard<'_, Browser>> {
        MutexGuard::try_map(self.shared.browser.lock().await, |b| b.as_mut())
            .map_err(|_| Error::BrowserDisconnected("browser has been closed".into()))
    }
}

fn wrap(page: Page) -> ChromiumPage {
    ChromiumPage {
        id: page.target_id().to_string(),
        page: Arc::new(page),
    }
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    type Page = ChromiumPage;

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && self.shared.probe().await
    }

    fn on_disconnect(&self, listener: DisconnectListener) {
        *self.shared.listener.lock() = Some(listener);
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCHDOG_INTERVAL).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if !shared.connected.load(Ordering::SeqCst) {
                    return;
                }
                if shared.browser.lock().await.is_none() {
                    return;
                }
                if !shared.probe().await {
                    warn!("browser stopped responding, marking disconnected");
                    shared.fire_disconnect();
                    return;
                }
            }
        });
    }

    async fn new_page(&self) -> Result<ChromiumPage> {
        let page = self.browser().await?.new_blank_page().await?;
        Ok(wrap(page))
    }

    async fn page_ids(&self) -> Result<Vec<String>> {
        let tabs = self.browser().await?.tabs().await?;
        Ok(tabs.into_iter().map(|t| t.id).collect())
    }

    async fn wait_for_new_page(&self, known: &[String], timeout: Duration) -> Result<ChromiumPage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let tabs = self.browser().await?.tabs().await?;
            let fresh = tabs
                .into_iter()
                .find(|t| !known.contains(&t.id) && !t.url.is_empty() && t.url != "about:blank");
            if let Some(tab) = fresh {
                debug!(id = %tab.id, url = %tab.url, "new tab opened");
                // Attach to the popup itself so its opener and history survive.
                let page = self.browser().await?.attach_page(&tab.id).await?;
                return Ok(wrap(page));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no new tab opened within {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn activate(&self, page: &ChromiumPage) -> Result<()> {
        self.browser().await?.activate_tab(&page.id).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Mark first so the watchdog does not report our own shutdown.
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.listener.lock().take();
        let browser = self.shared.browser.lock().await.take();
        if let Some(browser) = browser {
            browser.close().await?;
        }
        Ok(())
    }
}

/// A Chromium tab.
#[derive(Clone)]
pub struct ChromiumPage {
    id: String,
    page: Arc<Page>,
}

#[derive(Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

impl ChromiumPage {
    async fn exec_bool(&self, js: &str) -> Result<bool> {
        Ok(self.page.evaluate::<bool>(js).await?)
    }

    async fn expect_found(&self, js: &str, target: &Resolved) -> Result<()> {
        if self.exec_bool(js).await? {
            Ok(())
        } else {
            Err(Error::ElementNotFound(target.path.clone()))
        }
    }

    /// Console hooks live on the document, so re-arm after navigation.
    async fn rearm_console(&self) {
        if let Err(e) = self.page.execute(scripts::CONSOLE_HOOK_JS).await {
            debug!(error = %e, "console hook not installed");
        }
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn is_closed(&self) -> bool {
        !matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.page.url()).await,
            Ok(Ok(_))
        )
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.rearm_console().await;
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.page.back().await?;
        self.rearm_console().await;
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.page.forward().await?;
        self.rearm_console().await;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.title().await?)
    }

    async fn visible_text(&self) -> Result<String> {
        match self.page.text().await {
            Ok(text) => Ok(text),
            Err(_) => Ok(self.page.evaluate::<String>(scripts::VISIBLE_TEXT_JS).await?),
        }
    }

    async fn wait_for_dom_content_loaded(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Evaluation fails while the old document is torn down; keep polling.
            if let Ok(state) = self.page.evaluate::<String>(scripts::READY_STATE_JS).await {
                if state != "loading" {
                    self.rearm_console().await;
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "DOMContentLoaded not reached within {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn snapshot(&self, selectors: &[&str], max_nodes: usize) -> Result<Vec<RawNode>> {
        let json: String = self
            .page
            .evaluate(&scripts::snapshot(selectors, max_nodes))
            .await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn resolve(&self, locator: &Locator) -> Result<Resolved> {
        let js = scripts::resolve(&locator.frame, &locator.selector);
        Ok(self.page.evaluate(&js).await?)
    }

    async fn scroll_into_view(&self, target: &Resolved) -> Result<()> {
        self.expect_found(&scripts::scroll(&target.frame, &target.path), target)
            .await
    }

    async fn click(&self, target: &Resolved) -> Result<()> {
        match &target.frame {
            None => Ok(self.page.click(&target.path).await?),
            Some(_) => {
                self.expect_found(&scripts::click(&target.frame, &target.path), target)
                    .await
            }
        }
    }

    async fn fill(&self, target: &Resolved, value: &str) -> Result<()> {
        match &target.frame {
            None => Ok(self.page.fill(&target.path, value).await?),
            Some(_) => {
                self.expect_found(&scripts::fill(&target.frame, &target.path, value), target)
                    .await
            }
        }
    }

    async fn hover(&self, target: &Resolved) -> Result<()> {
        let point: Option<Point> = self
            .page
            .evaluate(&scripts::center(&target.frame, &target.path))
            .await?;
        let point = point.ok_or_else(|| Error::ElementNotFound(target.path.clone()))?;
        self.page
            .session()
            .dispatch_mouse_event(
                eoka::cdp::MouseEventType::MouseMoved,
                point.x,
                point.y,
                None,
                None,
            )
            .await?;
        Ok(())
    }

    async fn select_option(&self, target: &Resolved, value: &str) -> Result<bool> {
        self.exec_bool(&scripts::select(&target.frame, &target.path, value))
            .await
    }

    async fn drag(&self, source: &Resolved, target: &Resolved) -> Result<()> {
        let js = scripts::drag(&source.frame, &source.path, &target.frame, &target.path);
        self.expect_found(&js, source).await
    }

    async fn focus(&self, target: &Resolved) -> Result<()> {
        self.expect_found(&scripts::focus(&target.frame, &target.path), target)
            .await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        Ok(self.page.human().press_key(key).await?)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let json: String = self.page.evaluate(&scripts::evaluate(script)).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn install_console_capture(&self) -> Result<()> {
        self.page.execute(scripts::CONSOLE_HOOK_JS).await?;
        Ok(())
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>> {
        let json: String = self.page.evaluate(scripts::CONSOLE_READ_JS).await?;
        Ok(serde_json::from_str(&json)?)
    }
}
