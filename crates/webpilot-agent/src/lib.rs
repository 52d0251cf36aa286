//! # webpilot-agent
//!
//! A recoverable browser session for LLM-driven automation. Actions are
//! addressed by selector and answer with what changed on the page: a
//! navigation, newly revealed elements, or the current interactive state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use webpilot_agent::{
//!     ChromiumDriver, Dispatcher, NavigationLimiter, NavigationLimits, SessionManager,
//!     SessionSettings, Timing,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let session = SessionManager::new(ChromiumDriver::new(), SessionSettings::default());
//! let limiter = NavigationLimiter::new(NavigationLimits::default());
//! let mut tools = Dispatcher::new(session, Timing::default(), limiter);
//!
//! let page = tools.call_named("navigate", json!({ "url": "https://example.com" })).await;
//! println!("{}", page.text());
//! let clicked = tools.call_named("click", json!({ "selector": "text=\"More information...\"" })).await;
//! println!("{}", clicked.text());
//! tools.call_named("close", json!({})).await;
//! # }
//! ```

pub mod actions;
pub mod diff;
pub mod dispatch;
pub mod driver;
mod error;
pub mod ratelimit;
pub mod session;
pub mod settings;
pub mod summarize;

pub use actions::{ActionExecutor, ActionReport, Timing};
pub use diff::ElementDiff;
pub use dispatch::{Dispatcher, ToolCall, ToolContent, ToolResponse};
pub use driver::chromium::ChromiumDriver;
pub use error::{Error, Result};
pub use ratelimit::{CompositeLimiter, NavigationLimiter, NavigationLimits, RateLimiter};
pub use session::{SessionManager, SessionState};
pub use settings::{BrowserEngine, SessionSettings, Viewport};
pub use summarize::{InteractiveElement, PageSummary};
