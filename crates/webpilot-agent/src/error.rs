//! Error types for browser sessions and page actions.

/// Result type for webpilot-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session manager, action executor and drivers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("browser failed to launch after retry: {0}")]
    BrowserLaunch(String),

    #[error("browser disconnected: {0}")]
    BrowserDisconnected(String),

    #[error("no element matches selector \"{0}\"")]
    ElementNotFound(String),

    #[error("iframe not found: \"{0}\"")]
    IframeNotFound(String),

    #[error("{action} on \"{selector}\" failed: {message}")]
    ActionExecution {
        action: &'static str,
        selector: String,
        message: String,
        /// Whether the wrapped failure meant the browser or page went away.
        connectivity: bool,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message fragments that mean the browser or page is gone.
const CONNECTIVITY_MARKERS: &[&str] = &[
    "target closed",
    "page closed",
    "page has been closed",
    "browser closed",
    "browser has been closed",
    "connection closed",
    "protocol error",
    "no such session",
    "session closed",
    "websocket",
    "transport",
    "broken pipe",
    "reset by peer",
    "disconnected",
];

impl Error {
    /// Wrap an underlying failure with the action and selector it belongs to.
    pub fn action(action: &'static str, selector: impl Into<String>, source: Error) -> Self {
        match source {
            e @ (Error::BrowserDisconnected(_)
            | Error::ElementNotFound(_)
            | Error::IframeNotFound(_)
            | Error::ActionExecution { .. }) => e,
            other => Error::ActionExecution {
                action,
                selector: selector.into(),
                message: other.to_string(),
                connectivity: other.is_connectivity(),
            },
        }
    }

    /// An action failure that did not come from the driver.
    pub fn action_failed(
        action: &'static str,
        selector: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::ActionExecution {
            action,
            selector: selector.into(),
            message: message.into(),
            connectivity: false,
        }
    }

    /// Whether this error means the browser process or page went away.
    ///
    /// Only driver and protocol text is inspected, never selectors or
    /// exceptions thrown by page scripts.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::BrowserDisconnected(_) => true,
            Error::ActionExecution { connectivity, .. } => *connectivity,
            Error::Browser(e) => browser_error_is_connectivity(e),
            Error::Driver(msg) => has_marker(msg),
            Error::BrowserLaunch(_)
            | Error::ElementNotFound(_)
            | Error::IframeNotFound(_)
            | Error::Timeout(_)
            | Error::InvalidArgument(_)
            | Error::Json(_) => false,
        }
    }
}

fn has_marker(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    CONNECTIVITY_MARKERS.iter().any(|m| msg.contains(m))
}

fn browser_error_is_connectivity(e: &eoka::Error) -> bool {
    match e {
        eoka::Error::Transport { .. } | eoka::Error::Io(_) => true,
        eoka::Error::Cdp { message, .. } => has_marker(message),
        // Exceptions thrown by page scripts carry page-controlled text.
        eoka::Error::CdpSimple(msg) if msg.starts_with("JavaScript error") => false,
        eoka::Error::CdpSimple(msg) => has_marker(msg),
        _ => false,
    }
}
