//! Page interactions and their observable consequences.
//!
//! Each action resolves its target, scrolls it into view, settles, acts,
//! settles again, and then reports what changed: a navigation (with a summary
//! of the new page), new elements (a diff), or the unchanged page state.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::diff::{diff, ElementDiff};
use crate::driver::{Driver, Locator, PageHandle, PageOf, Resolved};
use crate::session::SessionManager;
use crate::summarize::{self, PageSummary, COMPACT_LIMIT};
use crate::{Error, Result};

pub const POST_SCROLL_SETTLE_MS: u64 = 500;
pub const POST_ACTION_WAIT_MS: u64 = 1000;
pub const IFRAME_SETTLE_MS: u64 = 2000;
pub const NAVIGATION_TIMEOUT_MS: u64 = 10_000;
pub const NEW_TAB_TIMEOUT_MS: u64 = 10_000;

/// Settle delays and timeouts used around actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// After scrolling the target into view.
    pub post_scroll: Duration,
    /// After the action, before re-reading the page.
    pub post_action: Duration,
    /// After locating an iframe, before looking inside it.
    pub iframe_settle: Duration,
    /// Bound on waiting for DOMContentLoaded after a navigation.
    pub navigation_timeout: Duration,
    /// Bound on waiting for a tab opened by a click.
    pub new_tab_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            post_scroll: Duration::from_millis(POST_SCROLL_SETTLE_MS),
            post_action: Duration::from_millis(POST_ACTION_WAIT_MS),
            iframe_settle: Duration::from_millis(IFRAME_SETTLE_MS),
            navigation_timeout: Duration::from_millis(NAVIGATION_TIMEOUT_MS),
            new_tab_timeout: Duration::from_millis(NEW_TAB_TIMEOUT_MS),
        }
    }
}

impl Timing {
    /// No settle delays. Tab and load waits keep a short bound.
    pub fn immediate() -> Self {
        Self {
            post_scroll: Duration::ZERO,
            post_action: Duration::ZERO,
            iframe_settle: Duration::ZERO,
            navigation_timeout: Duration::from_millis(50),
            new_tab_timeout: Duration::from_secs(1),
        }
    }
}

/// A URL change caused by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub from: String,
    pub to: String,
}

/// What the page looks like after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    /// Summary of the page reached by navigating.
    Navigated(PageSummary),
    /// Elements that appeared without navigation.
    NewElements(ElementDiff),
    /// Nothing meaningful appeared; the full current state.
    Current(PageSummary),
}

/// Outcome of one action, rendered as the tool response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub headline: String,
    /// Non-fatal issues, e.g. a selector matching several elements.
    pub warnings: Vec<String>,
    pub navigation: Option<Navigation>,
    pub notes: Vec<String>,
    pub state: Option<PageState>,
}

impl ActionReport {
    pub fn new(headline: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            warnings: Vec::new(),
            navigation: None,
            notes: Vec::new(),
            state: None,
        }
    }
}

impl fmt::Display for ActionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.headline)?;
        for w in &self.warnings {
            write!(f, "\n{}", w)?;
        }
        if let Some(nav) = &self.navigation {
            write!(f, "\nNavigation detected: {} -> {}", nav.from, nav.to)?;
        }
        for n in &self.notes {
            write!(f, "\n{}", n)?;
        }
        match &self.state {
            Some(PageState::Navigated(summary)) => write!(f, "\n\n{}", summary),
            Some(PageState::NewElements(d)) => write!(f, "\n\n{}", d),
            Some(PageState::Current(summary)) => write!(
                f,
                "\n\nNo new interactive elements appeared. Current page state:\n{}",
                summary
            ),
            None => Ok(()),
        }
    }
}

fn multiple_match_warning(locator: &Locator, count: usize) -> String {
    format!(
        "Warning: selector \"{}\" matched {} elements; used the first match",
        locator, count
    )
}

/// Runs actions against the session's current page.
pub struct ActionExecutor<'a, D: Driver> {
    session: &'a mut SessionManager<D>,
    timing: Timing,
}

impl<'a, D: Driver> ActionExecutor<'a, D> {
    pub fn new(session: &'a mut SessionManager<D>, timing: Timing) -> Self {
        Self { session, timing }
    }

    /// Load `url` in the current page and summarize it.
    pub async fn navigate(&mut self, url: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        page.goto(url)
            .await
            .map_err(|e| Error::action("navigate", url, e))?;
        let mut report = ActionReport::new(format!("Navigated to {}", url));
        self.settle_after_navigation(&page, &mut report).await?;
        Ok(report)
    }

    pub async fn go_back(&mut self) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        page.go_back().await?;
        let url = page.url().await?;
        Ok(ActionReport::new(format!("Went back to {}", url)))
    }

    pub async fn go_forward(&mut self) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        page.go_forward().await?;
        let url = page.url().await?;
        Ok(ActionReport::new(format!("Went forward to {}", url)))
    }

    /// Click, then report a navigation or the new elements.
    pub async fn click(&mut self, selector: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let locator = Locator::page(selector);
        let mut report = ActionReport::new(format!("Clicked {}", selector));
        let target = self.prepare(&page, &locator, "click", &mut report).await?;

        let before_url = page.url().await?;
        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.click(&target)
            .await
            .map_err(|e| Error::action("click", selector, e))?;
        tokio::time::sleep(self.timing.post_action).await;

        self.observe(&page, &before_url, before, &mut report).await?;
        Ok(report)
    }

    pub async fn fill(&mut self, selector: &str, value: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let locator = Locator::page(selector);
        let mut report = ActionReport::new(format!("Filled {}", selector));
        let target = self.prepare(&page, &locator, "fill", &mut report).await?;

        let before_url = page.url().await?;
        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.fill(&target, value)
            .await
            .map_err(|e| Error::action("fill", selector, e))?;
        tokio::time::sleep(self.timing.post_action).await;

        self.observe(&page, &before_url, before, &mut report).await?;
        Ok(report)
    }

    /// Select an option of a `<select>` by value or visible text.
    pub async fn select(&mut self, selector: &str, value: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let locator = Locator::page(selector);
        let mut report = ActionReport::new(format!("Selected \"{}\" in {}", value, selector));
        let target = self.prepare(&page, &locator, "select", &mut report).await?;

        let before_url = page.url().await?;
        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        let selected = page
            .select_option(&target, value)
            .await
            .map_err(|e| Error::action("select", selector, e))?;
        if !selected {
            return Err(Error::action_failed(
                "select",
                selector,
                format!("no option with value or text \"{}\"", value),
            ));
        }
        tokio::time::sleep(self.timing.post_action).await;

        self.observe(&page, &before_url, before, &mut report).await?;
        Ok(report)
    }

    pub async fn hover(&mut self, selector: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let locator = Locator::page(selector);
        let mut report = ActionReport::new(format!("Hovered {}", selector));
        let target = self.prepare(&page, &locator, "hover", &mut report).await?;

        let before_url = page.url().await?;
        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.hover(&target)
            .await
            .map_err(|e| Error::action("hover", selector, e))?;
        tokio::time::sleep(self.timing.post_action).await;

        self.observe(&page, &before_url, before, &mut report).await?;
        Ok(report)
    }

    pub async fn drag(&mut self, source: &str, target: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let mut report = ActionReport::new(format!("Dragged {} onto {}", source, target));
        let from = self
            .prepare(&page, &Locator::page(source), "drag", &mut report)
            .await?;
        let to = self
            .locate(&page, &Locator::page(target), "drag", &mut report)
            .await?;

        let before_url = page.url().await?;
        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.drag(&from, &to)
            .await
            .map_err(|e| Error::action("drag", source, e))?;
        tokio::time::sleep(self.timing.post_action).await;

        self.observe(&page, &before_url, before, &mut report).await?;
        Ok(report)
    }

    /// Press a key, optionally focusing `selector` first.
    pub async fn press_key(&mut self, key: &str, selector: Option<&str>) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let mut report = match selector {
            Some(s) => ActionReport::new(format!("Pressed {} on {}", key, s)),
            None => ActionReport::new(format!("Pressed {}", key)),
        };
        if let Some(selector) = selector {
            let target = self
                .prepare(&page, &Locator::page(selector), "press_key", &mut report)
                .await?;
            page.focus(&target)
                .await
                .map_err(|e| Error::action("press_key", selector, e))?;
        }

        let before_url = page.url().await?;
        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.press_key(key)
            .await
            .map_err(|e| Error::action("press_key", selector.unwrap_or(key), e))?;
        tokio::time::sleep(self.timing.post_action).await;

        self.observe(&page, &before_url, before, &mut report).await?;
        Ok(report)
    }

    /// Click an element inside an iframe. No navigation detection.
    pub async fn iframe_click(&mut self, iframe: &str, selector: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let mut report = ActionReport::new(format!("Clicked {} in iframe {}", selector, iframe));
        let target = self
            .prepare_in_frame(&page, iframe, selector, "iframe_click", &mut report)
            .await?;

        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.click(&target)
            .await
            .map_err(|e| Error::action("iframe_click", selector, e))?;
        tokio::time::sleep(self.timing.post_action).await;

        let after = summarize::capture(&page, COMPACT_LIMIT).await?;
        report.state = Some(changes(&before, after));
        Ok(report)
    }

    /// Fill an element inside an iframe. No navigation detection.
    pub async fn iframe_fill(
        &mut self,
        iframe: &str,
        selector: &str,
        value: &str,
    ) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let mut report = ActionReport::new(format!("Filled {} in iframe {}", selector, iframe));
        let target = self
            .prepare_in_frame(&page, iframe, selector, "iframe_fill", &mut report)
            .await?;

        let before = summarize::capture(&page, COMPACT_LIMIT).await?;
        page.fill(&target, value)
            .await
            .map_err(|e| Error::action("iframe_fill", selector, e))?;
        tokio::time::sleep(self.timing.post_action).await;

        let after = summarize::capture(&page, COMPACT_LIMIT).await?;
        report.state = Some(changes(&before, after));
        Ok(report)
    }

    /// Click something that opens a new tab and make that tab current.
    pub async fn click_and_switch_tab(&mut self, selector: &str) -> Result<ActionReport> {
        let page = self.session.ensure_page().await?;
        let locator = Locator::page(selector);
        let mut report = ActionReport::new(String::new());
        let target = self
            .prepare(&page, &locator, "click_and_switch_tab", &mut report)
            .await?;

        let known = self.session.page_ids().await?;
        let (new_page, ()) = tokio::try_join!(
            self.session
                .wait_for_new_page(&known, self.timing.new_tab_timeout),
            page.click(&target)
        )
        .map_err(|e| Error::action("click_and_switch_tab", selector, e))?;

        self.await_load(&new_page, &mut report).await?;
        self.session.adopt_page(new_page.clone()).await?;
        let url = new_page.url().await?;
        info!(%url, "switched to new tab");
        report.headline = format!("Clicked {} and switched to new tab: {}", selector, url);
        self.attach_summary(&new_page, &mut report).await?;
        Ok(report)
    }

    /// Resolve, warn on multiple matches, fail on none.
    async fn locate(
        &self,
        page: &PageOf<D>,
        locator: &Locator,
        action: &'static str,
        report: &mut ActionReport,
    ) -> Result<Resolved> {
        let resolved = page
            .resolve(locator)
            .await
            .map_err(|e| Error::action(action, locator.to_string(), e))?;
        if !resolved.frame_found {
            let frame = locator.frame.clone().unwrap_or_default();
            return Err(Error::IframeNotFound(frame));
        }
        if resolved.count == 0 {
            return Err(Error::ElementNotFound(locator.to_string()));
        }
        if resolved.count > 1 {
            debug!(%locator, count = resolved.count, "selector matched several elements");
            report
                .warnings
                .push(multiple_match_warning(locator, resolved.count));
        }
        Ok(resolved)
    }

    /// [`Self::locate`], then scroll into view and settle.
    async fn prepare(
        &self,
        page: &PageOf<D>,
        locator: &Locator,
        action: &'static str,
        report: &mut ActionReport,
    ) -> Result<Resolved> {
        let target = self.locate(page, locator, action, report).await?;
        page.scroll_into_view(&target)
            .await
            .map_err(|e| Error::action(action, locator.to_string(), e))?;
        tokio::time::sleep(self.timing.post_scroll).await;
        Ok(target)
    }

    async fn prepare_in_frame(
        &self,
        page: &PageOf<D>,
        iframe: &str,
        selector: &str,
        action: &'static str,
        report: &mut ActionReport,
    ) -> Result<Resolved> {
        let frame = page
            .resolve(&Locator::page(iframe))
            .await
            .map_err(|e| Error::action(action, iframe, e))?;
        if frame.count == 0 {
            return Err(Error::IframeNotFound(iframe.to_string()));
        }
        tokio::time::sleep(self.timing.iframe_settle).await;
        self.prepare(page, &Locator::in_frame(iframe, selector), action, report)
            .await
    }

    /// After the action: navigation summary, diff, or current state.
    async fn observe(
        &self,
        page: &PageOf<D>,
        before_url: &str,
        before: PageSummary,
        report: &mut ActionReport,
    ) -> Result<()> {
        let after_url = page.url().await?;
        if after_url != before_url {
            info!(from = %before_url, to = %after_url, "navigation detected");
            report.navigation = Some(Navigation {
                from: before_url.to_string(),
                to: after_url,
            });
            return self.settle_after_navigation(page, report).await;
        }
        let after = summarize::capture(page, COMPACT_LIMIT).await?;
        report.state = Some(changes(&before, after));
        Ok(())
    }

    /// Wait for DOMContentLoaded (giving up quietly on timeout) and attach a
    /// summary of the new page.
    async fn settle_after_navigation(
        &self,
        page: &PageOf<D>,
        report: &mut ActionReport,
    ) -> Result<()> {
        self.await_load(page, report).await?;
        self.attach_summary(page, report).await
    }

    /// Wait for DOMContentLoaded; a slow page only earns a note.
    async fn await_load(&self, page: &PageOf<D>, report: &mut ActionReport) -> Result<()> {
        if let Err(e) = page
            .wait_for_dom_content_loaded(self.timing.navigation_timeout)
            .await
        {
            if e.is_connectivity() {
                return Err(e);
            }
            warn!(error = %e, "page load wait gave up");
            report.notes.push(format!(
                "Page did not finish loading within {}ms; summary may be incomplete.",
                self.timing.navigation_timeout.as_millis()
            ));
        }
        Ok(())
    }

    async fn attach_summary(&self, page: &PageOf<D>, report: &mut ActionReport) -> Result<()> {
        match summarize::capture(page, COMPACT_LIMIT).await {
            Ok(summary) => report.state = Some(PageState::Navigated(summary)),
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                warn!(error = %e, "summary after navigation failed");
                report.notes.push(format!("Page summary unavailable: {}", e));
            }
        }
        Ok(())
    }
}

fn changes(before: &PageSummary, after: PageSummary) -> PageState {
    match diff(before, &after) {
        Some(d) => PageState::NewElements(d),
        None => PageState::Current(after),
    }
}
