mod command;
mod config;
mod error;
mod pipeline;
mod platform;
mod reply;
mod router;
mod shopping;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{api_token_from_env, Config};
use crate::pipeline::{IngestExit, Publisher};
use crate::platform::slack::SlackClient;
use crate::router::{CommandRegistry, Router};
use crate::shopping::HttpShoppingList;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shopbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let token = api_token_from_env()?;

    info!("Configuration loaded successfully");
    info!("  Shopping list service: {}", config.shopping_list.base_url);
    info!("  Slack API: {}", config.slack.api_base);
    info!("  Publish attempts: {}", config.publisher.max_attempts);

    let registry = CommandRegistry::builtin();
    anyhow::ensure!(!registry.is_empty(), "No commands registered");
    info!("Registered {} commands", registry.len());

    let slack = Arc::new(SlackClient::new(token, &config.slack));
    let shopping = Arc::new(HttpShoppingList::new(&config.shopping_list));
    let router = Router::new(registry, shopping, config.bot.clone());
    let publisher = Publisher::new(slack.clone(), &config.publisher);

    info!("Bot is starting...");
    let events = slack.connect();
    match pipeline::run(events, router, publisher).await? {
        IngestExit::InvalidAuth => warn!("Stopped: the Slack token was rejected"),
        IngestExit::StreamEnded => info!("Stopped: the event stream ended"),
        IngestExit::RouterStopped => warn!("Stopped: the router exited early"),
    }

    Ok(())
}
