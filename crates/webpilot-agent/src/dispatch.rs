//! Tool-call boundary.
//!
//! A call arrives as a tool name plus JSON arguments and always leaves as a
//! [`ToolResponse`]. Failures never escape as errors: connectivity failures
//! reset the session and ask the caller to retry, everything else becomes an
//! `isError` response carrying the message.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::actions::{ActionExecutor, Timing};
use crate::driver::{Driver, PageHandle};
use crate::ratelimit::NavigationLimiter;
use crate::session::SessionManager;
use crate::settings::SessionSettings;
use crate::summarize::{self, EXTENDED_LIMIT};
use crate::{Error, Result};

/// Longest visible-text response, in characters.
pub const MAX_VISIBLE_TEXT_CHARS: usize = 20_000;
/// Console messages returned when no limit is given.
pub const DEFAULT_CONSOLE_LIMIT: usize = 50;

/// Every tool name [`ToolCall::parse`] accepts.
pub const TOOL_NAMES: &[&str] = &[
    "navigate",
    "go_back",
    "go_forward",
    "page_elements",
    "visible_text",
    "screenshot",
    "click",
    "fill",
    "select",
    "hover",
    "drag",
    "press_key",
    "iframe_click",
    "iframe_fill",
    "click_and_switch_tab",
    "set_user_agent",
    "evaluate",
    "console_logs",
    "close",
];

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct NavigateRequest {
    #[schemars(description = "URL to navigate to")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SelectorRequest {
    #[schemars(
        description = "CSS selector, or text=\"...\" for an exact text match (text=... for a substring)"
    )]
    pub selector: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct FillRequest {
    #[schemars(description = "Selector of the input or textarea")]
    pub selector: String,
    #[schemars(description = "Text to fill in")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SelectRequest {
    #[schemars(description = "Selector of the <select> element")]
    pub selector: String,
    #[schemars(description = "Option value or visible text")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct DragRequest {
    #[schemars(description = "Selector of the element to drag")]
    pub source_selector: String,
    #[schemars(description = "Selector of the drop target")]
    pub target_selector: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct PressKeyRequest {
    #[schemars(description = "Key name, e.g. Enter, Tab, Escape, ArrowDown")]
    pub key: String,
    #[schemars(description = "Element to focus before pressing the key")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct IframeClickRequest {
    #[schemars(description = "Selector of the <iframe> element")]
    pub iframe_selector: String,
    #[schemars(description = "Selector of the element inside the iframe")]
    pub selector: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct IframeFillRequest {
    #[schemars(description = "Selector of the <iframe> element")]
    pub iframe_selector: String,
    #[schemars(description = "Selector of the input inside the iframe")]
    pub selector: String,
    #[schemars(description = "Text to fill in")]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
pub struct PageElementsRequest {
    #[schemars(description = "Maximum number of elements to list (default and cap: 100)")]
    pub max: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct UserAgentRequest {
    #[schemars(description = "User-agent string for the relaunched browser")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct EvaluateRequest {
    #[schemars(description = "JavaScript expression to evaluate in the page")]
    pub script: String,
}

#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
pub struct ConsoleLogsRequest {
    #[schemars(description = "Return only the most recent N messages (default 50)")]
    pub limit: Option<usize>,
}

/// One parsed tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    Navigate(NavigateRequest),
    GoBack,
    GoForward,
    PageElements(PageElementsRequest),
    VisibleText,
    Screenshot,
    Click(SelectorRequest),
    Fill(FillRequest),
    Select(SelectRequest),
    Hover(SelectorRequest),
    Drag(DragRequest),
    PressKey(PressKeyRequest),
    IframeClick(IframeClickRequest),
    IframeFill(IframeFillRequest),
    ClickAndSwitchTab(SelectorRequest),
    SetUserAgent(UserAgentRequest),
    Evaluate(EvaluateRequest),
    ConsoleLogs(ConsoleLogsRequest),
    Close,
}

fn args<T: DeserializeOwned>(name: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidArgument(format!("{}: {}", name, e)))
}

impl ToolCall {
    /// Parse a `{name, arguments}` pair. Missing or null arguments count as `{}`.
    pub fn parse(name: &str, arguments: Value) -> Result<Self> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let call = match name {
            "navigate" => ToolCall::Navigate(args(name, arguments)?),
            "go_back" => ToolCall::GoBack,
            "go_forward" => ToolCall::GoForward,
            "page_elements" => ToolCall::PageElements(args(name, arguments)?),
            "visible_text" => ToolCall::VisibleText,
            "screenshot" => ToolCall::Screenshot,
            "click" => ToolCall::Click(args(name, arguments)?),
            "fill" => ToolCall::Fill(args(name, arguments)?),
            "select" => ToolCall::Select(args(name, arguments)?),
            "hover" => ToolCall::Hover(args(name, arguments)?),
            "drag" => ToolCall::Drag(args(name, arguments)?),
            "press_key" => ToolCall::PressKey(args(name, arguments)?),
            "iframe_click" => ToolCall::IframeClick(args(name, arguments)?),
            "iframe_fill" => ToolCall::IframeFill(args(name, arguments)?),
            "click_and_switch_tab" => ToolCall::ClickAndSwitchTab(args(name, arguments)?),
            "set_user_agent" => ToolCall::SetUserAgent(args(name, arguments)?),
            "evaluate" => ToolCall::Evaluate(args(name, arguments)?),
            "console_logs" => ToolCall::ConsoleLogs(args(name, arguments)?),
            "close" => ToolCall::Close,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown tool \"{}\" (available: {})",
                    other,
                    TOOL_NAMES.join(", ")
                )))
            }
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Navigate(_) => "navigate",
            ToolCall::GoBack => "go_back",
            ToolCall::GoForward => "go_forward",
            ToolCall::PageElements(_) => "page_elements",
            ToolCall::VisibleText => "visible_text",
            ToolCall::Screenshot => "screenshot",
            ToolCall::Click(_) => "click",
            ToolCall::Fill(_) => "fill",
            ToolCall::Select(_) => "select",
            ToolCall::Hover(_) => "hover",
            ToolCall::Drag(_) => "drag",
            ToolCall::PressKey(_) => "press_key",
            ToolCall::IframeClick(_) => "iframe_click",
            ToolCall::IframeFill(_) => "iframe_fill",
            ToolCall::ClickAndSwitchTab(_) => "click_and_switch_tab",
            ToolCall::SetUserAgent(_) => "set_user_agent",
            ToolCall::Evaluate(_) => "evaluate",
            ToolCall::ConsoleLogs(_) => "console_logs",
            ToolCall::Close => "close",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }

    pub fn png(bytes: &[u8]) -> Self {
        ToolContent::Image {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: "image/png".into(),
        }
    }
}

/// `{content: [...], isError}` as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn success(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn ok_text(text: impl Into<String>) -> Result<Vec<ToolContent>> {
    Ok(vec![ToolContent::text(text)])
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => {
            let rest = text[cut..].chars().count();
            format!("{}\n...[truncated, {} more characters]", &text[..cut], rest)
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes tool calls to the session, the action executor and the limiter.
pub struct Dispatcher<D: Driver> {
    session: SessionManager<D>,
    timing: Timing,
    navigation: NavigationLimiter,
}

impl<D: Driver> Dispatcher<D> {
    pub fn new(session: SessionManager<D>, timing: Timing, navigation: NavigationLimiter) -> Self {
        Self {
            session,
            timing,
            navigation,
        }
    }

    pub fn session(&self) -> &SessionManager<D> {
        &self.session
    }

    /// Parse and run a named call.
    pub async fn call_named(&mut self, name: &str, arguments: Value) -> ToolResponse {
        match ToolCall::parse(name, arguments) {
            Ok(call) => self.call(call).await,
            Err(e) => ToolResponse::error(e.to_string()),
        }
    }

    /// Run a call. Never fails; failures become `isError` responses.
    pub async fn call(&mut self, call: ToolCall) -> ToolResponse {
        let name = call.name();
        debug!(tool = name, "tool call");
        match self.run(call).await {
            Ok(content) => ToolResponse::success(content),
            Err(e) if e.is_connectivity() => {
                warn!(tool = name, error = %e, "browser connection lost, resetting session");
                self.session.reset().await;
                ToolResponse::error(format!(
                    "Browser connection lost during {}: {}. Browser state has been reset; please retry.",
                    name, e
                ))
            }
            Err(e) => {
                debug!(tool = name, error = %e, "tool call failed");
                ToolResponse::error(e.to_string())
            }
        }
    }

    async fn run(&mut self, call: ToolCall) -> Result<Vec<ToolContent>> {
        let timing = self.timing;
        match call {
            ToolCall::Navigate(req) => {
                if req.url.trim().is_empty() {
                    return Err(Error::InvalidArgument("url must not be empty".into()));
                }
                self.navigation.acquire(&req.url).await;
                let report = ActionExecutor::new(&mut self.session, timing)
                    .navigate(&req.url)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::GoBack => {
                let report = ActionExecutor::new(&mut self.session, timing).go_back().await?;
                ok_text(report.to_string())
            }
            ToolCall::GoForward => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .go_forward()
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::PageElements(req) => {
                let limit = req.max.unwrap_or(EXTENDED_LIMIT).clamp(1, EXTENDED_LIMIT);
                let page = self.session.ensure_page().await?;
                let summary = summarize::capture(&page, limit).await?;
                ok_text(summary.to_string())
            }
            ToolCall::VisibleText => {
                let page = self.session.ensure_page().await?;
                let text = page.visible_text().await?;
                ok_text(truncate_chars(&text, MAX_VISIBLE_TEXT_CHARS))
            }
            ToolCall::Screenshot => {
                let page = self.session.ensure_page().await?;
                let png = page.screenshot().await?;
                let url = page.url().await?;
                Ok(vec![
                    ToolContent::png(&png),
                    ToolContent::text(format!("Screenshot of {} ({} bytes)", url, png.len())),
                ])
            }
            ToolCall::Click(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .click(&req.selector)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::Fill(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .fill(&req.selector, &req.value)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::Select(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .select(&req.selector, &req.value)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::Hover(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .hover(&req.selector)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::Drag(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .drag(&req.source_selector, &req.target_selector)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::PressKey(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .press_key(&req.key, req.selector.as_deref())
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::IframeClick(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .iframe_click(&req.iframe_selector, &req.selector)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::IframeFill(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .iframe_fill(&req.iframe_selector, &req.selector, &req.value)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::ClickAndSwitchTab(req) => {
                let report = ActionExecutor::new(&mut self.session, timing)
                    .click_and_switch_tab(&req.selector)
                    .await?;
                ok_text(report.to_string())
            }
            ToolCall::SetUserAgent(req) => {
                let user_agent = req.user_agent.trim();
                if user_agent.is_empty() {
                    return Err(Error::InvalidArgument("user_agent must not be empty".into()));
                }
                let settings = SessionSettings {
                    user_agent: Some(user_agent.to_string()),
                    ..self.session.settings().clone()
                };
                self.session.ensure_browser(&settings).await?;
                ok_text(format!(
                    "User agent set to \"{}\". The browser was relaunched; navigate again to continue.",
                    user_agent
                ))
            }
            ToolCall::Evaluate(req) => {
                let page = self.session.ensure_page().await?;
                let value = page.evaluate(&req.script).await?;
                ok_text(serde_json::to_string_pretty(&value)?)
            }
            ToolCall::ConsoleLogs(req) => {
                let page = self.session.ensure_page().await?;
                let messages = page.console_messages().await?;
                if messages.is_empty() {
                    return ok_text("No console messages captured.");
                }
                let limit = req.limit.unwrap_or(DEFAULT_CONSOLE_LIMIT);
                let skip = messages.len().saturating_sub(limit);
                let mut out = format!(
                    "Console messages ({} of {}):",
                    messages.len() - skip,
                    messages.len()
                );
                for m in &messages[skip..] {
                    out.push_str(&format!("\n{}", m));
                }
                ok_text(out)
            }
            ToolCall::Close => {
                self.session.reset().await;
                ok_text("Browser session closed.")
            }
        }
    }
}
