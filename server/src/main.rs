use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sweeper_server::config::SweeperConfig;
use sweeper_server::discord::client::GuildClient;
use sweeper_server::discord::rate_limiter::RateLimiter;
use sweeper_server::discord::rest::DiscordRestClient;
use sweeper_server::web::app_state::AppState;
use sweeper_server::web::router::build_router;

/// How long to wait before retrying a failed identify call.
const IDENTIFY_RETRY: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "guild-sweeper", about = "Find and clean up silent or inactive Discord members")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "guild-sweeper.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SweeperConfig::load(&cli.config)?;
    config.validate()?;

    let limiter = RateLimiter::new(
        config.discord.burst,
        config.discord.refill_ms.max(1) as f64 / 1000.0,
    );
    let client: Arc<dyn GuildClient> = Arc::new(DiscordRestClient::new(
        &config.discord.token,
        &config.discord.api_base,
        limiter,
    ));

    let web_addr = config.server.web_address.clone();
    let state = Arc::new(AppState::new(config, client));

    // Identify in the background; job endpoints answer 503 until this succeeds.
    let identify_state = state.clone();
    tokio::spawn(async move {
        loop {
            match identify_state.client.current_user().await {
                Ok(me) => {
                    info!(bot = %me.username, guild = %identify_state.guild_id, "Discord client ready");
                    identify_state.mark_ready();
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Discord identify failed, retrying");
                    tokio::time::sleep(IDENTIFY_RETRY).await;
                }
            }
        }
    });

    let app = build_router(state);

    info!("Guild Sweeper starting on {}", web_addr);

    let listener = tokio::net::TcpListener::bind(&web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
