use clap::Parser;
use webpilot_agent::{BrowserEngine, NavigationLimits, SessionSettings, Viewport};

#[derive(Debug, Parser)]
#[command(name = "webpilot-mcp")]
#[command(about = "Browser automation tools for AI agents, served over MCP stdio")]
#[command(version)]
pub struct Cli {
    /// Run the browser headless
    #[arg(
        long,
        env = "WEBPILOT_HEADLESS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub headless: bool,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long, env = "WEBPILOT_ENGINE", default_value = "chromium")]
    pub engine: BrowserEngine,

    #[arg(long, env = "WEBPILOT_VIEWPORT_WIDTH", default_value_t = 1920)]
    pub viewport_width: u32,

    #[arg(long, env = "WEBPILOT_VIEWPORT_HEIGHT", default_value_t = 1080)]
    pub viewport_height: u32,

    /// Custom user agent for every launch
    #[arg(long, env = "WEBPILOT_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Navigations per minute across all hosts (0 disables)
    #[arg(long, env = "WEBPILOT_NAV_PER_MINUTE", default_value_t = 60)]
    pub nav_per_minute: u32,

    /// Navigations per minute to a single host (0 disables)
    #[arg(long, env = "WEBPILOT_NAV_PER_HOST_PER_MINUTE", default_value_t = 20)]
    pub nav_per_host_per_minute: u32,

    /// Patch the Chrome binary's automation markers before launch
    #[arg(long, env = "WEBPILOT_PATCH_BINARY")]
    pub patch_binary: bool,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            engine: self.engine,
            viewport: Viewport {
                width: self.viewport_width,
                height: self.viewport_height,
            },
            headless: self.headless,
            user_agent: self
                .user_agent
                .as_deref()
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(str::to_string),
        }
    }

    pub fn navigation_limits(&self) -> NavigationLimits {
        NavigationLimits {
            per_minute: self.nav_per_minute,
            per_host_per_minute: self.nav_per_host_per_minute,
        }
    }

    /// Default filter directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
