//! Browser launch settings.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Plain desktop Chrome user agent used unless a session overrides it.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Browser engine to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowserEngine {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl fmt::Display for BrowserEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrowserEngine::Chromium => "chromium",
            BrowserEngine::Firefox => "firefox",
            BrowserEngine::Webkit => "webkit",
        })
    }
}

impl FromStr for BrowserEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserEngine::Chromium),
            "firefox" => Ok(BrowserEngine::Firefox),
            "webkit" => Ok(BrowserEngine::Webkit),
            other => Err(Error::InvalidArgument(format!(
                "unknown browser engine \"{}\" (expected chromium, firefox or webkit)",
                other
            ))),
        }
    }
}

/// Settings a session is launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub engine: BrowserEngine,
    pub viewport: Viewport,
    pub headless: bool,
    /// Custom user agent. `None` means [`DEFAULT_USER_AGENT`].
    pub user_agent: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            viewport: Viewport::default(),
            headless: true,
            user_agent: None,
        }
    }
}

impl SessionSettings {
    /// Whether moving from `self` to `next` needs a fresh browser and context.
    pub fn requires_relaunch(&self, next: &SessionSettings) -> bool {
        self.engine != next.engine
            || self.headless != next.headless
            || self.viewport != next.viewport
            || self.user_agent != next.user_agent
    }

    /// Resolve into the concrete options handed to a driver.
    pub fn launch_options(&self) -> LaunchOptions {
        let Viewport { width, height } = self.viewport;
        LaunchOptions {
            engine: self.engine,
            headless: self.headless,
            viewport: self.viewport,
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
                format!("--window-size={},{}", width, height),
            ],
        }
    }
}

/// Fully resolved launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub engine: BrowserEngine,
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: String,
    pub args: Vec<String>,
}
