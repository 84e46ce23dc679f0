use anyhow::{Context, Result};
use hub_backend::config::HubConfig;
use hub_backend::runtime::HubRuntime;
use hub_backend::server::serve_backend;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hub_backend=debug")),
        )
        .init();

    let config = HubConfig::load();
    let runtime = HubRuntime::bootstrap(config).context("failed to bootstrap hub runtime")?;

    tracing::info!(
        "Starting hub backend (set HUB_BACKEND_TOKEN + optional HUB_BACKEND_BIND; auth mode via HUB_BACKEND_AUTH_MODE; Telegram via TELEGRAM_BOT_TOKEN)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime))
}
