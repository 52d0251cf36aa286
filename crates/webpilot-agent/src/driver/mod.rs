//! Browser driver seam.
//!
//! The session state machine and the summarizer only talk to a browser through
//! these traits. [`chromium::ChromiumDriver`] drives a real Chromium over CDP.

pub mod chromium;
mod scripts;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::settings::LaunchOptions;
use crate::Result;

/// Callback fired (at most once) when a browser process goes away.
pub type DisconnectListener = Box<dyn FnOnce() + Send + 'static>;

/// Page handle type produced by a driver.
pub type PageOf<D> = <<D as Driver>::Browser as BrowserHandle>::Page;

/// Launches browser processes.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Browser: BrowserHandle;

    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Browser>;
}

/// A running browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync + 'static {
    type Page: PageHandle;

    /// Cheap liveness check.
    async fn is_connected(&self) -> bool;

    /// Register the disconnect listener. Called once per browser.
    fn on_disconnect(&self, listener: DisconnectListener);

    /// Open a page in the first existing context, creating a context if none exists.
    async fn new_page(&self) -> Result<Self::Page>;

    /// Ids of all open pages.
    async fn page_ids(&self) -> Result<Vec<String>>;

    /// Wait for a page that is not in `known` to open and finish its initial load.
    async fn wait_for_new_page(&self, known: &[String], timeout: Duration) -> Result<Self::Page>;

    /// Bring a page to the foreground.
    async fn activate(&self, page: &Self::Page) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A single page (tab). Clones refer to the same page.
#[async_trait]
pub trait PageHandle: Clone + Send + Sync + 'static {
    fn id(&self) -> String;

    async fn is_closed(&self) -> bool;

    async fn goto(&self, url: &str) -> Result<()>;
    async fn go_back(&self) -> Result<()>;
    async fn go_forward(&self) -> Result<()>;

    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    async fn visible_text(&self) -> Result<String>;

    /// Wait until the document is past the `loading` state.
    async fn wait_for_dom_content_loaded(&self, timeout: Duration) -> Result<()>;

    /// Collect nodes matching `selectors`, in selector order then document
    /// order, each node at most once.
    async fn snapshot(&self, selectors: &[&str], max_nodes: usize) -> Result<Vec<RawNode>>;

    /// Resolve a locator to its first match.
    async fn resolve(&self, locator: &Locator) -> Result<Resolved>;

    async fn scroll_into_view(&self, target: &Resolved) -> Result<()>;
    async fn click(&self, target: &Resolved) -> Result<()>;
    async fn fill(&self, target: &Resolved, value: &str) -> Result<()>;
    async fn hover(&self, target: &Resolved) -> Result<()>;
    /// Returns `false` if no option matches `value` by value or visible text.
    async fn select_option(&self, target: &Resolved, value: &str) -> Result<bool>;
    async fn drag(&self, source: &Resolved, target: &Resolved) -> Result<()>;
    async fn focus(&self, target: &Resolved) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Start capturing console output, page errors and unhandled rejections.
    async fn install_console_capture(&self) -> Result<()>;
    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>>;
}

/// Raw DOM facts about one node, as read from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawNode {
    pub tag: String,
    pub id: Option<String>,
    pub test_id: Option<String>,
    pub classes: Vec<String>,
    pub name: Option<String>,
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub text: String,
    pub placeholder: Option<String>,
    pub value: Option<String>,
    pub src: Option<String>,
    pub alt: Option<String>,
    pub href: Option<String>,
    /// Computed `display`.
    pub display: String,
    /// Computed `visibility`.
    pub visibility: String,
}

impl RawNode {
    /// Whether computed style hides the node.
    pub fn is_hidden(&self) -> bool {
        self.display == "none" || self.visibility == "hidden"
    }
}

/// Where to find an element: a selector, optionally inside an iframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub frame: Option<String>,
    pub selector: String,
}

impl Locator {
    pub fn page(selector: impl Into<String>) -> Self {
        Self {
            frame: None,
            selector: selector.into(),
        }
    }

    pub fn in_frame(frame: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            frame: Some(frame.into()),
            selector: selector.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.frame {
            Some(frame) => write!(f, "{} >> {}", frame, self.selector),
            None => f.write_str(&self.selector),
        }
    }
}

/// Result of resolving a [`Locator`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Resolved {
    /// Frame selector the path is relative to.
    #[serde(default)]
    pub frame: Option<String>,
    /// `false` if the locator names an iframe that does not exist.
    pub frame_found: bool,
    /// Number of matching elements.
    pub count: usize,
    /// Unique CSS path to the first match. Empty when `count == 0`.
    #[serde(default)]
    pub path: String,
}

/// One captured console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    /// `log`, `info`, `warn`, `error`, `pageerror` or `unhandledrejection`.
    pub level: String,
    pub text: String,
}

impl fmt::Display for ConsoleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.text)
    }
}
