//! In-memory driver for unit tests.
//!
//! Pages are lists of [`FakeNode`]s. A node answers to the selectors listed in
//! `matches` and may carry an [`Effect`] that runs when it is clicked. URLs
//! resolve to [`Site`]s registered on the driver.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BrowserHandle, ConsoleMessage, DisconnectListener, Driver, Locator, PageHandle, RawNode,
    Resolved,
};
use crate::settings::LaunchOptions;
use crate::{Error, Result};

/// What clicking a node does.
#[derive(Debug, Clone)]
pub(crate) enum Effect {
    /// Make the nodes at these indices visible.
    Reveal(Vec<usize>),
    /// Load the site registered at this URL into the same page.
    Navigate(String),
    /// Open the site registered at this URL in a new tab.
    OpenPopup(String),
    /// Kill the browser without firing its disconnect listener.
    Crash,
    /// Reject the click with this driver message.
    Fail(String),
}

#[derive(Debug, Clone)]
pub(crate) struct FakeNode {
    pub raw: RawNode,
    pub matches: Vec<String>,
    pub on_click: Option<Effect>,
}

impl FakeNode {
    pub fn new(tag: &str) -> Self {
        Self {
            raw: RawNode {
                tag: tag.to_string(),
                display: "block".into(),
                visibility: "visible".into(),
                ..Default::default()
            },
            matches: vec![tag.to_string()],
            on_click: None,
        }
    }

    pub fn matching(mut self, selector: &str) -> Self {
        self.matches.push(selector.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.raw.text = text.to_string();
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.raw.id = Some(id.to_string());
        self.matching(&format!("#{}", id))
    }

    pub fn name(mut self, name: &str) -> Self {
        self.raw.name = Some(name.to_string());
        let sel = format!("{}[name=\"{}\"]", self.raw.tag, name);
        self.matching(&sel)
    }

    pub fn input_type(mut self, ty: &str) -> Self {
        self.raw.input_type = Some(ty.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.raw.classes.push(class.to_string());
        self.matching(&format!(".{}", class))
    }

    pub fn value(mut self, value: &str) -> Self {
        self.raw.value = Some(value.to_string());
        self
    }

    pub fn placeholder(mut self, placeholder: &str) -> Self {
        self.raw.placeholder = Some(placeholder.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.raw.display = "none".into();
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click = Some(effect);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Site {
    pub title: String,
    pub nodes: Vec<FakeNode>,
    pub frames: Vec<(String, Vec<FakeNode>)>,
    /// `wait_for_dom_content_loaded` times out on this site.
    pub slow_load: bool,
    /// `title` fails with this driver message.
    pub title_error: Option<String>,
}

impl Site {
    pub fn new(title: &str, nodes: Vec<FakeNode>) -> Self {
        Self {
            title: title.to_string(),
            nodes,
            ..Default::default()
        }
    }

    pub fn with_frame(mut self, selector: &str, nodes: Vec<FakeNode>) -> Self {
        self.frames.push((selector.to_string(), nodes));
        self
    }

    pub fn slow(mut self) -> Self {
        self.slow_load = true;
        self
    }

    pub fn failing_title(mut self, message: &str) -> Self {
        self.title_error = Some(message.to_string());
        self
    }
}

#[derive(Default)]
struct World {
    sites: HashMap<String, Site>,
    launches: usize,
    fail_next_launches: usize,
    options: Vec<LaunchOptions>,
    next_page: u64,
    browsers: Vec<Arc<BrowserInner>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDriver {
    world: Arc<Mutex<World>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn site(&self, url: &str, site: Site) -> &Self {
        self.world.lock().sites.insert(url.to_string(), site);
        self
    }

    pub fn fail_next_launches(&self, n: usize) {
        self.world.lock().fail_next_launches = n;
    }

    pub fn launches(&self) -> usize {
        self.world.lock().launches
    }

    pub fn last_options(&self) -> Option<LaunchOptions> {
        self.world.lock().options.last().cloned()
    }

    /// Number of browsers closed through [`BrowserHandle::close`].
    pub fn closed_browsers(&self) -> usize {
        self.world
            .lock()
            .browsers
            .iter()
            .filter(|b| b.state.lock().closed)
            .count()
    }

    /// Kill the most recent browser and fire its disconnect listener.
    pub fn disconnect(&self) {
        let browser = self.world.lock().browsers.last().cloned();
        if let Some(browser) = browser {
            let listener = {
                let mut state = browser.state.lock();
                state.connected = false;
                state.listener.take()
            };
            if let Some(listener) = listener {
                listener();
            }
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    type Browser = FakeBrowser;

    async fn launch(&self, options: &LaunchOptions) -> Result<FakeBrowser> {
        let mut world = self.world.lock();
        world.options.push(options.clone());
        if world.fail_next_launches > 0 {
            world.fail_next_launches -= 1;
            return Err(Error::Driver("failed to spawn browser process".into()));
        }
        world.launches += 1;
        let inner = Arc::new(BrowserInner {
            state: Mutex::new(BrowserState {
                connected: true,
                ..Default::default()
            }),
        });
        world.browsers.push(inner.clone());
        Ok(FakeBrowser {
            inner,
            world: self.world.clone(),
        })
    }
}

#[derive(Default)]
struct BrowserState {
    connected: bool,
    closed: bool,
    listener: Option<DisconnectListener>,
    pages: Vec<FakePage>,
    activated: Vec<String>,
}

struct BrowserInner {
    state: Mutex<BrowserState>,
}

impl BrowserInner {
    fn check(&self) -> Result<()> {
        let state = self.state.lock();
        if state.connected && !state.closed {
            Ok(())
        } else {
            Err(Error::Driver("Target closed".into()))
        }
    }
}

pub(crate) struct FakeBrowser {
    inner: Arc<BrowserInner>,
    world: Arc<Mutex<World>>,
}

impl FakeBrowser {
    fn open(&self, url: &str) -> FakePage {
        let mut world = self.world.lock();
        world.next_page += 1;
        let id = format!("page-{}", world.next_page);
        let site = world.sites.get(url).cloned().unwrap_or_default();
        let page = FakePage {
            id,
            browser: self.inner.clone(),
            world: self.world.clone(),
            state: Arc::new(Mutex::new(PageState::load(url, site))),
        };
        self.inner.state.lock().pages.push(page.clone());
        page
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    type Page = FakePage;

    async fn is_connected(&self) -> bool {
        self.inner.check().is_ok()
    }

    fn on_disconnect(&self, listener: DisconnectListener) {
        self.inner.state.lock().listener = Some(listener);
    }

    async fn new_page(&self) -> Result<FakePage> {
        self.inner.check()?;
        Ok(self.open("about:blank"))
    }

    async fn page_ids(&self) -> Result<Vec<String>> {
        self.inner.check()?;
        Ok(self
            .inner
            .state
            .lock()
            .pages
            .iter()
            .filter(|p| !p.state.lock().closed)
            .map(|p| p.id.clone())
            .collect())
    }

    async fn wait_for_new_page(&self, known: &[String], timeout: Duration) -> Result<FakePage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.inner.check()?;
            let fresh = self
                .inner
                .state
                .lock()
                .pages
                .iter()
                .find(|p| !known.contains(&p.id))
                .cloned();
            if let Some(page) = fresh {
                return Ok(page);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout("no new tab opened".into()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn activate(&self, page: &FakePage) -> Result<()> {
        self.inner.check()?;
        self.inner.state.lock().activated.push(page.id.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.listener = None;
        Ok(())
    }
}

struct PageState {
    url: String,
    site: Site,
    closed: bool,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    keys: Vec<String>,
    hovers: usize,
    console_installs: usize,
    console: Vec<ConsoleMessage>,
    history: Vec<String>,
    future: Vec<String>,
}

impl PageState {
    fn load(url: &str, site: Site) -> Self {
        Self {
            url: url.to_string(),
            site,
            closed: false,
            clicks: Vec::new(),
            fills: Vec::new(),
            keys: Vec::new(),
            hovers: 0,
            console_installs: 0,
            console: Vec::new(),
            history: Vec::new(),
            future: Vec::new(),
        }
    }

    fn nodes(&self, frame: &Option<String>) -> Option<&Vec<FakeNode>> {
        match frame {
            None => Some(&self.site.nodes),
            Some(f) => self
                .site
                .frames
                .iter()
                .find(|(sel, _)| sel == f)
                .map(|(_, nodes)| nodes),
        }
    }

    fn node(&self, target: &Resolved) -> Result<&FakeNode> {
        let index = parse_path(&target.path)?;
        self.nodes(&target.frame)
            .and_then(|nodes| nodes.get(index))
            .ok_or_else(|| Error::ElementNotFound(target.path.clone()))
    }
}

fn parse_path(path: &str) -> Result<usize> {
    path.strip_prefix("node:")
        .and_then(|i| i.parse().ok())
        .ok_or_else(|| Error::ElementNotFound(path.to_string()))
}

#[derive(Clone)]
pub(crate) struct FakePage {
    id: String,
    browser: Arc<BrowserInner>,
    world: Arc<Mutex<World>>,
    state: Arc<Mutex<PageState>>,
}

impl std::fmt::Debug for FakePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakePage").field("id", &self.id).finish_non_exhaustive()
    }
}

impl FakePage {
    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().fills.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().keys.clone()
    }

    pub fn hovers(&self) -> usize {
        self.state.lock().hovers
    }

    pub fn console_installs(&self) -> usize {
        self.state.lock().console_installs
    }

    pub fn push_console(&self, level: &str, text: &str) {
        self.state.lock().console.push(ConsoleMessage {
            level: level.to_string(),
            text: text.to_string(),
        });
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    fn live(&self) -> Result<()> {
        self.browser.check()?;
        if self.state.lock().closed {
            return Err(Error::Driver("Page has been closed".into()));
        }
        Ok(())
    }

    fn load(&self, url: &str) {
        let site = self.world.lock().sites.get(url).cloned().unwrap_or_default();
        let mut state = self.state.lock();
        state.url = url.to_string();
        state.site = site;
    }

    fn open_popup(&self, url: &str) {
        let browser = FakeBrowser {
            inner: self.browser.clone(),
            world: self.world.clone(),
        };
        browser.open(url);
    }
}

#[async_trait]
impl PageHandle for FakePage {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn is_closed(&self) -> bool {
        self.live().is_err()
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.live()?;
        {
            let mut state = self.state.lock();
            let prev = state.url.clone();
            state.history.push(prev);
            state.future.clear();
        }
        self.load(url);
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.live()?;
        let prev = {
            let mut state = self.state.lock();
            let prev = state.history.pop();
            if prev.is_some() {
                let cur = state.url.clone();
                state.future.push(cur);
            }
            prev
        };
        if let Some(url) = prev {
            self.load(&url);
        }
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.live()?;
        let next = {
            let mut state = self.state.lock();
            let next = state.future.pop();
            if next.is_some() {
                let cur = state.url.clone();
                state.history.push(cur);
            }
            next
        };
        if let Some(url) = next {
            self.load(&url);
        }
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        self.live()?;
        Ok(self.state.lock().url.clone())
    }

    async fn title(&self) -> Result<String> {
        self.live()?;
        let state = self.state.lock();
        match &state.site.title_error {
            Some(msg) => Err(Error::Driver(msg.clone())),
            None => Ok(state.site.title.clone()),
        }
    }

    async fn visible_text(&self) -> Result<String> {
        self.live()?;
        let state = self.state.lock();
        let parts: Vec<&str> = state
            .site
            .nodes
            .iter()
            .filter(|n| !n.raw.is_hidden() && !n.raw.text.is_empty())
            .map(|n| n.raw.text.as_str())
            .collect();
        Ok(parts.join("\n"))
    }

    async fn wait_for_dom_content_loaded(&self, timeout: Duration) -> Result<()> {
        self.live()?;
        if self.state.lock().site.slow_load {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout("DOMContentLoaded not reached".into()));
        }
        Ok(())
    }

    async fn snapshot(&self, _selectors: &[&str], max_nodes: usize) -> Result<Vec<RawNode>> {
        self.live()?;
        let state = self.state.lock();
        Ok(state
            .site
            .nodes
            .iter()
            .take(max_nodes)
            .map(|n| n.raw.clone())
            .collect())
    }

    async fn resolve(&self, locator: &Locator) -> Result<Resolved> {
        self.live()?;
        let state = self.state.lock();
        let Some(nodes) = state.nodes(&locator.frame) else {
            return Ok(Resolved {
                frame: locator.frame.clone(),
                frame_found: false,
                count: 0,
                path: String::new(),
            });
        };
        let hits: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.matches.iter().any(|m| m == &locator.selector))
            .map(|(i, _)| i)
            .collect();
        Ok(Resolved {
            frame: locator.frame.clone(),
            frame_found: true,
            count: hits.len(),
            path: hits
                .first()
                .map(|i| format!("node:{}", i))
                .unwrap_or_default(),
        })
    }

    async fn scroll_into_view(&self, target: &Resolved) -> Result<()> {
        self.live()?;
        self.state.lock().node(target).map(|_| ())
    }

    async fn click(&self, target: &Resolved) -> Result<()> {
        self.live()?;
        let effect = {
            let mut state = self.state.lock();
            let effect = state.node(target)?.on_click.clone();
            state.clicks.push(target.path.clone());
            effect
        };
        match effect {
            Some(Effect::Reveal(indices)) => {
                let mut state = self.state.lock();
                for i in indices {
                    if let Some(node) = state.site.nodes.get_mut(i) {
                        node.raw.display = "block".into();
                    }
                }
            }
            Some(Effect::Navigate(url)) => {
                {
                    let mut state = self.state.lock();
                    let prev = state.url.clone();
                    state.history.push(prev);
                }
                self.load(&url);
            }
            Some(Effect::OpenPopup(url)) => self.open_popup(&url),
            Some(Effect::Crash) => self.browser.state.lock().connected = false,
            Some(Effect::Fail(msg)) => return Err(Error::Driver(msg)),
            None => {}
        }
        Ok(())
    }

    async fn fill(&self, target: &Resolved, value: &str) -> Result<()> {
        self.live()?;
        let mut state = self.state.lock();
        let index = parse_path(&target.path)?;
        let frame = target.frame.clone();
        let node = match &frame {
            None => state.site.nodes.get_mut(index),
            Some(f) => state
                .site
                .frames
                .iter_mut()
                .find(|(sel, _)| sel == f)
                .and_then(|(_, nodes)| nodes.get_mut(index)),
        }
        .ok_or_else(|| Error::ElementNotFound(target.path.clone()))?;
        node.raw.value = Some(value.to_string());
        state.fills.push((target.path.clone(), value.to_string()));
        Ok(())
    }

    async fn hover(&self, target: &Resolved) -> Result<()> {
        self.live()?;
        let mut state = self.state.lock();
        state.node(target)?;
        state.hovers += 1;
        Ok(())
    }

    async fn select_option(&self, target: &Resolved, value: &str) -> Result<bool> {
        self.live()?;
        let state = self.state.lock();
        let node = state.node(target)?;
        // options are modeled as the node's `|`-separated text
        Ok(node.raw.text.split('|').any(|o| o.trim() == value))
    }

    async fn drag(&self, source: &Resolved, target: &Resolved) -> Result<()> {
        self.live()?;
        let state = self.state.lock();
        state.node(source)?;
        state.node(target)?;
        Ok(())
    }

    async fn focus(&self, target: &Resolved) -> Result<()> {
        self.live()?;
        self.state.lock().node(target).map(|_| ())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.live()?;
        self.state.lock().keys.push(key.to_string());
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.live()?;
        Ok(serde_json::json!({ "script": script }))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.live()?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn install_console_capture(&self) -> Result<()> {
        self.live()?;
        self.state.lock().console_installs += 1;
        Ok(())
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>> {
        self.live()?;
        Ok(self.state.lock().console.clone())
    }
}
