//! Browser session lifecycle.
//!
//! [`SessionManager`] owns the browser and its current page. Every entry point
//! re-validates them, because the browser is an external process that can die
//! between calls.
//!
//! ```text
//! Uninitialized -> Launching -> Ready -> Disconnected
//!       ^                         |            |
//!       +------------- reset -----+------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{BrowserHandle, Driver, PageHandle, PageOf};
use crate::settings::SessionSettings;
use crate::{Error, Result};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Launching,
    Ready,
    Disconnected,
}

/// State tag plus a generation counter. Every launch and reset bumps the
/// generation, so a disconnect callback from an older browser is ignored.
#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    generation: u64,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            generation: 0,
        }
    }

    fn begin_launch(&mut self) -> u64 {
        self.generation += 1;
        self.state = SessionState::Launching;
        self.generation
    }

    /// Returns `false` if the browser went away while launching.
    fn finish_launch(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.state == SessionState::Launching {
            self.state = SessionState::Ready;
            true
        } else {
            false
        }
    }

    /// Returns `true` if the transition was taken.
    fn mark_disconnected(&mut self, generation: u64) -> bool {
        let live = matches!(self.state, SessionState::Launching | SessionState::Ready);
        if self.generation == generation && live {
            self.state = SessionState::Disconnected;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.state = SessionState::Uninitialized;
    }
}

/// Owns the browser process and the current page.
pub struct SessionManager<D: Driver> {
    driver: D,
    settings: SessionSettings,
    lifecycle: Arc<Mutex<Lifecycle>>,
    browser: Option<D::Browser>,
    page: Option<PageOf<D>>,
}

impl<D: Driver> SessionManager<D> {
    pub fn new(driver: D, settings: SessionSettings) -> Self {
        Self {
            driver,
            settings,
            lifecycle: Arc::new(Mutex::new(Lifecycle::new())),
            browser: None,
            page: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// The current page, without any liveness check.
    pub fn current_page(&self) -> Option<&PageOf<D>> {
        self.page.as_ref()
    }

    /// Ensure a live browser launched with the current settings.
    pub async fn ensure_page(&mut self) -> Result<PageOf<D>> {
        let settings = self.settings.clone();
        self.ensure_browser(&settings).await
    }

    /// Return a live, open page, launching or relaunching as needed.
    ///
    /// A change of engine, viewport, headless mode or user agent tears the
    /// old browser down first. Launch failures are retried once from a clean
    /// slate; a second failure is [`Error::BrowserLaunch`].
    pub async fn ensure_browser(&mut self, settings: &SessionSettings) -> Result<PageOf<D>> {
        if self.settings.requires_relaunch(settings) {
            info!(
                engine = %settings.engine,
                custom_user_agent = settings.user_agent.is_some(),
                "session settings changed, relaunching browser"
            );
            self.reset().await;
            self.settings = settings.clone();
        }

        match self.state() {
            SessionState::Disconnected => {
                warn!("browser disconnected since last call, relaunching");
                self.reset().await;
            }
            SessionState::Ready => {
                let connected = match &self.browser {
                    Some(browser) => browser.is_connected().await,
                    None => false,
                };
                if !connected {
                    warn!("browser no longer connected, relaunching");
                    self.reset().await;
                }
            }
            SessionState::Uninitialized | SessionState::Launching => {}
        }

        if self.browser.is_none() {
            self.launch_with_retry().await?;
        }

        let stale = match &self.page {
            Some(page) => page.is_closed().await,
            None => true,
        };
        if stale {
            debug!("current page is closed, opening a new one");
            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| Error::BrowserDisconnected("browser is not running".into()))?;
            let page = browser.new_page().await?;
            install_console_capture(&page).await;
            self.page = Some(page);
        }

        self.page
            .clone()
            .ok_or_else(|| Error::BrowserDisconnected("no current page".into()))
    }

    /// Drop browser and page and return to [`SessionState::Uninitialized`].
    /// Safe to call repeatedly.
    pub async fn reset(&mut self) {
        let page = self.page.take();
        let browser = self.browser.take();
        self.lifecycle.lock().reset();
        drop(page);
        if let Some(browser) = browser {
            debug!("closing browser");
            if let Err(e) = browser.close().await {
                debug!(error = %e, "browser close failed during reset");
            }
        }
    }

    /// Make `page` the current page and bring it to the foreground. The
    /// previous page is released, not closed.
    pub async fn adopt_page(&mut self, page: PageOf<D>) -> Result<()> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| Error::BrowserDisconnected("browser is not running".into()))?;
        browser.activate(&page).await?;
        install_console_capture(&page).await;
        let previous = self.page.replace(page);
        debug!(
            previous = ?previous.map(|p| p.id()),
            current = ?self.page.as_ref().map(|p| p.id()),
            "switched current page"
        );
        Ok(())
    }

    /// Ids of all open pages in the browser.
    pub async fn page_ids(&self) -> Result<Vec<String>> {
        self.running()?.page_ids().await
    }

    /// Wait for a page that is not in `known` to open.
    pub async fn wait_for_new_page(
        &self,
        known: &[String],
        timeout: Duration,
    ) -> Result<PageOf<D>> {
        self.running()?.wait_for_new_page(known, timeout).await
    }

    fn running(&self) -> Result<&D::Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| Error::BrowserDisconnected("browser is not running".into()))
    }

    async fn launch_with_retry(&mut self) -> Result<()> {
        let first = match self.launch_once().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(error = %first, "browser launch failed, retrying from scratch");
        self.reset().await;
        match self.launch_once().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset().await;
                Err(Error::BrowserLaunch(e.to_string()))
            }
        }
    }

    async fn launch_once(&mut self) -> Result<()> {
        let generation = self.lifecycle.lock().begin_launch();
        let options = self.settings.launch_options();
        info!(
            engine = %options.engine,
            headless = options.headless,
            width = options.viewport.width,
            height = options.viewport.height,
            "launching browser"
        );

        let browser = self.driver.launch(&options).await?;

        let lifecycle = Arc::clone(&self.lifecycle);
        browser.on_disconnect(Box::new(move || {
            if lifecycle.lock().mark_disconnected(generation) {
                warn!("browser disconnected");
            }
        }));

        let page = match browser.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                return Err(e);
            }
        };
        install_console_capture(&page).await;

        let ready = self.lifecycle.lock().finish_launch(generation);
        if !ready {
            let _ = browser.close().await;
            return Err(Error::BrowserDisconnected(
                "browser went away during launch".into(),
            ));
        }

        self.browser = Some(browser);
        self.page = Some(page);
        info!("browser ready");
        Ok(())
    }
}

async fn install_console_capture<P: PageHandle>(page: &P) {
    if let Err(e) = page.install_console_capture().await {
        warn!(error = %e, "console capture not installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::settings::BrowserEngine;

    fn session() -> (FakeDriver, SessionManager<FakeDriver>) {
        let driver = FakeDriver::new();
        let session = SessionManager::new(driver.clone(), SessionSettings::default());
        (driver, session)
    }

    #[tokio::test]
    async fn test_first_call_launches() {
        let (driver, mut session) = session();
        assert_eq!(session.state(), SessionState::Uninitialized);

        let page = session.ensure_page().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(driver.launches(), 1);
        assert!(!page.is_closed().await);

        let opts = driver.last_options().unwrap();
        assert!(opts.args.contains(&"--no-sandbox".to_string()));
    }

    #[tokio::test]
    async fn test_second_call_reuses_browser() {
        let (driver, mut session) = session();
        let a = session.ensure_page().await.unwrap();
        let b = session.ensure_page().await.unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(driver.launches(), 1);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (driver, mut session) = session();
        session.ensure_page().await.unwrap();

        session.reset().await;
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.current_page().is_none());

        session.reset().await;
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(driver.closed_browsers(), 1);
    }

    #[tokio::test]
    async fn test_reset_before_launch() {
        let (_, mut session) = session();
        session.reset().await;
        session.reset().await;
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_recovers_after_disconnect() {
        let (driver, mut session) = session();
        let stale = session.ensure_page().await.unwrap();

        driver.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);

        let fresh = session.ensure_page().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(driver.launches(), 2);
        assert_ne!(fresh.id(), stale.id());
        assert!(!fresh.is_closed().await);
        assert!(stale.is_closed().await);
    }

    #[tokio::test]
    async fn test_launch_retries_once() {
        let (driver, mut session) = session();
        driver.fail_next_launches(1);

        session.ensure_page().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(driver.launches(), 1);
    }

    #[tokio::test]
    async fn test_launch_fails_after_retry() {
        let (driver, mut session) = session();
        driver.fail_next_launches(2);

        let err = session.ensure_page().await.unwrap_err();
        assert!(matches!(err, Error::BrowserLaunch(_)), "{:?}", err);
        assert!(err.to_string().contains("failed to spawn"));
        assert_eq!(session.state(), SessionState::Uninitialized);

        // next call may succeed
        session.ensure_page().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_closed_page_replaced_in_same_browser() {
        let (driver, mut session) = session();
        let first = session.ensure_page().await.unwrap();
        first.close();

        let second = session.ensure_page().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(driver.launches(), 1);
        assert_eq!(second.console_installs(), 1);
    }

    #[tokio::test]
    async fn test_settings_change_relaunches() {
        let (driver, mut session) = session();
        session.ensure_page().await.unwrap();

        let firefox = SessionSettings {
            engine: BrowserEngine::Firefox,
            ..SessionSettings::default()
        };
        session.ensure_browser(&firefox).await.unwrap();
        assert_eq!(driver.launches(), 2);
        assert_eq!(driver.closed_browsers(), 1);
        assert_eq!(driver.last_options().unwrap().engine, BrowserEngine::Firefox);
        assert_eq!(session.settings().engine, BrowserEngine::Firefox);
    }

    #[tokio::test]
    async fn test_console_capture_installed_once() {
        let (_, mut session) = session();
        let page = session.ensure_page().await.unwrap();
        session.ensure_page().await.unwrap();
        session.ensure_page().await.unwrap();
        assert_eq!(page.console_installs(), 1);
    }

    #[tokio::test]
    async fn test_adopt_page_replaces_current() {
        let (_, mut session) = session();
        let first = session.ensure_page().await.unwrap();
        let known = session.page_ids().await.unwrap();
        assert_eq!(known, vec![first.id()]);

        let browser = session.browser.as_ref().unwrap();
        let other = browser.new_page().await.unwrap();
        session.adopt_page(other.clone()).await.unwrap();

        assert_eq!(session.current_page().unwrap().id(), other.id());
        // old page stays open
        assert!(!first.is_closed().await);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_stale_disconnect_ignored() {
        let mut lc = Lifecycle::new();
        let old = lc.begin_launch();
        assert!(lc.finish_launch(old));
        lc.reset();
        let current = lc.begin_launch();
        assert!(lc.finish_launch(current));

        assert!(!lc.mark_disconnected(old));
        assert_eq!(lc.state, SessionState::Ready);
        assert!(lc.mark_disconnected(current));
        assert_eq!(lc.state, SessionState::Disconnected);
    }

    #[test]
    fn test_disconnect_during_launch_blocks_ready() {
        let mut lc = Lifecycle::new();
        let generation = lc.begin_launch();
        assert!(lc.mark_disconnected(generation));
        assert!(!lc.finish_launch(generation));
        assert_eq!(lc.state, SessionState::Disconnected);
    }
}
