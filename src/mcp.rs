use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use std::sync::Arc;
use tokio::sync::Mutex;

use webpilot_agent::dispatch::{
    ConsoleLogsRequest, DragRequest, EvaluateRequest, FillRequest, IframeClickRequest,
    IframeFillRequest, NavigateRequest, PageElementsRequest, PressKeyRequest, SelectRequest,
    SelectorRequest, UserAgentRequest,
};
use webpilot_agent::{ChromiumDriver, Dispatcher, ToolCall, ToolContent, ToolResponse};

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

type Res = Result<CallToolResult, ErrorData>;

/// Tool failures are `isError` results, never protocol errors.
fn into_result(response: ToolResponse) -> CallToolResult {
    let content = response
        .content
        .into_iter()
        .map(|c| match c {
            ToolContent::Text { text } => Content::text(text),
            ToolContent::Image { data, mime_type } => Content::image(data, mime_type),
        })
        .collect();
    if response.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

#[derive(Clone)]
pub struct WebpilotServer {
    tools: Arc<Mutex<Dispatcher<ChromiumDriver>>>,
    tool_router: ToolRouter<Self>,
}

impl WebpilotServer {
    async fn run(&self, call: ToolCall) -> Res {
        let mut tools = self.tools.lock().await;
        Ok(into_result(tools.call(call).await))
    }
}

#[tool_router]
impl WebpilotServer {
    pub fn new(tools: Dispatcher<ChromiumDriver>) -> Self {
        Self {
            tools: Arc::new(Mutex::new(tools)),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Navigate to a URL. Launches the browser on first call. Returns the page title and its interactive elements."
    )]
    async fn navigate(&self, req: Parameters<NavigateRequest>) -> Res {
        self.run(ToolCall::Navigate(req.0)).await
    }

    #[tool(description = "Go back in browser history.")]
    async fn go_back(&self) -> Res {
        self.run(ToolCall::GoBack).await
    }

    #[tool(description = "Go forward in browser history.")]
    async fn go_forward(&self) -> Res {
        self.run(ToolCall::GoForward).await
    }

    #[tool(
        description = "List interactive elements of the current page with ranked selectors, grouped by kind. Password values are hidden."
    )]
    async fn page_elements(&self, req: Parameters<PageElementsRequest>) -> Res {
        self.run(ToolCall::PageElements(req.0)).await
    }

    #[tool(description = "Visible text of the current page (truncated to 20000 characters).")]
    async fn visible_text(&self) -> Res {
        self.run(ToolCall::VisibleText).await
    }

    #[tool(description = "Take a PNG screenshot of the viewport.")]
    async fn screenshot(&self) -> Res {
        self.run(ToolCall::Screenshot).await
    }

    #[tool(
        description = "Click an element by selector. Reports navigation, newly appeared elements, or the current page state. If several elements match, the first is clicked and a warning is returned."
    )]
    async fn click(&self, req: Parameters<SelectorRequest>) -> Res {
        self.run(ToolCall::Click(req.0)).await
    }

    #[tool(description = "Fill an input or textarea by selector.")]
    async fn fill(&self, req: Parameters<FillRequest>) -> Res {
        self.run(ToolCall::Fill(req.0)).await
    }

    #[tool(description = "Select a dropdown option by value or visible text.")]
    async fn select(&self, req: Parameters<SelectRequest>) -> Res {
        self.run(ToolCall::Select(req.0)).await
    }

    #[tool(description = "Hover over an element, e.g. to open a menu or tooltip.")]
    async fn hover(&self, req: Parameters<SelectorRequest>) -> Res {
        self.run(ToolCall::Hover(req.0)).await
    }

    #[tool(description = "Drag one element onto another.")]
    async fn drag(&self, req: Parameters<DragRequest>) -> Res {
        self.run(ToolCall::Drag(req.0)).await
    }

    #[tool(
        description = "Press a key, optionally after focusing an element. Enter on a form field usually submits it."
    )]
    async fn press_key(&self, req: Parameters<PressKeyRequest>) -> Res {
        self.run(ToolCall::PressKey(req.0)).await
    }

    #[tool(description = "Click an element inside an iframe.")]
    async fn iframe_click(&self, req: Parameters<IframeClickRequest>) -> Res {
        self.run(ToolCall::IframeClick(req.0)).await
    }

    #[tool(description = "Fill an input inside an iframe.")]
    async fn iframe_fill(&self, req: Parameters<IframeFillRequest>) -> Res {
        self.run(ToolCall::IframeFill(req.0)).await
    }

    #[tool(
        description = "Click an element that opens a new tab and continue in that tab."
    )]
    async fn click_and_switch_tab(&self, req: Parameters<SelectorRequest>) -> Res {
        self.run(ToolCall::ClickAndSwitchTab(req.0)).await
    }

    #[tool(description = "Relaunch the browser with a custom user agent.")]
    async fn set_user_agent(&self, req: Parameters<UserAgentRequest>) -> Res {
        self.run(ToolCall::SetUserAgent(req.0)).await
    }

    #[tool(description = "Evaluate a JavaScript expression and return its JSON value.")]
    async fn evaluate(&self, req: Parameters<EvaluateRequest>) -> Res {
        self.run(ToolCall::Evaluate(req.0)).await
    }

    #[tool(description = "Console messages, page errors and unhandled rejections of the current page.")]
    async fn console_logs(&self, req: Parameters<ConsoleLogsRequest>) -> Res {
        self.run(ToolCall::ConsoleLogs(req.0)).await
    }

    #[tool(description = "Close the browser and release resources.")]
    async fn close(&self) -> Res {
        self.run(ToolCall::Close).await
    }
}

#[tool_handler]
impl ServerHandler for WebpilotServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "webpilot".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Browser automation server. Use 'navigate' to open a URL (launches the browser automatically) \
                 and 'page_elements' to list interactive elements with their selectors. \
                 Act with click/fill/select/hover/drag/press_key using those selectors; each action reports \
                 navigation or newly appeared elements. Use iframe_click/iframe_fill inside iframes and \
                 click_and_switch_tab for links that open a new tab. If the browser connection is lost the \
                 session resets and the call can simply be retried."
                    .into(),
            ),
        }
    }
}

pub async fn run_server(tools: Dispatcher<ChromiumDriver>) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = WebpilotServer::new(tools);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
