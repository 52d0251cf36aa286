mod config;
mod mcp;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use webpilot_agent::{ChromiumDriver, Dispatcher, NavigationLimiter, SessionManager, Timing};

use crate::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the MCP protocol; logs go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let settings = cli.session_settings();
    let limits = cli.navigation_limits();
    tracing::info!(
        engine = %settings.engine,
        headless = settings.headless,
        nav_per_minute = limits.per_minute,
        nav_per_host_per_minute = limits.per_host_per_minute,
        "starting webpilot MCP server"
    );

    let driver = ChromiumDriver::new().with_patched_binary(cli.patch_binary);
    let tools = Dispatcher::new(
        SessionManager::new(driver, settings),
        Timing::default(),
        NavigationLimiter::new(limits),
    );
    mcp::run_server(tools).await
}
