use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the Slack bot token.
pub const API_TOKEN_VAR: &str = "SLACK_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    pub shopping_list: ShoppingListConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// Title of the help reply
    #[serde(default = "default_tagline")]
    pub tagline: String,
    /// Accent color used on bot-authored replies
    #[serde(default = "default_brand_color")]
    pub brand_color: String,
    #[serde(default = "default_help_pretext")]
    pub help_pretext: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tagline: default_tagline(),
            brand_color: default_brand_color(),
            help_pretext: default_help_pretext(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShoppingListConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl PublisherConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_slack_api_base(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_tagline() -> String {
    "Fortune & Karam with Luck".to_string()
}

fn default_brand_color() -> String {
    "#B733FF".to_string()
}

fn default_help_pretext() -> String {
    "Bot Command List".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if config.shopping_list.base_url.trim().is_empty() {
            anyhow::bail!("shopping_list.base_url must not be empty");
        }
        if config.publisher.max_attempts == 0 {
            anyhow::bail!("publisher.max_attempts must be at least 1");
        }

        Ok(config)
    }
}

/// Read the platform API token from the process environment.
/// A missing or blank token is a startup error.
pub fn api_token_from_env() -> Result<String> {
    validate_token(std::env::var(API_TOKEN_VAR).ok())
}

fn validate_token(token: Option<String>) -> Result<String> {
    let token = token.with_context(|| format!("{} is not set", API_TOKEN_VAR))?;
    if token.trim().is_empty() {
        anyhow::bail!("{} is empty", API_TOKEN_VAR);
    }
    Ok(token)
}
