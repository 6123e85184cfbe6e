//! Environment-derived server configuration.

use std::env;
use std::time::Duration;

/// All recognized environment keys in one place.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address (`HOST`, default 0.0.0.0).
    pub host: String,
    /// HTTP bind port (`PORT`, default 8420).
    pub port: u16,
    /// Background health loop + scheduler (`AUTONOMIC_ENABLED`,
    /// default false).
    pub autonomic_enabled: bool,
    /// Scheduler tick interval (`AUTONOMIC_HEARTBEAT_INTERVAL`, seconds,
    /// default 60).
    pub heartbeat_interval: Duration,
    /// Health sweep interval (`AUTONOMIC_HEALTH_INTERVAL`, seconds,
    /// default 300).
    pub health_interval: Duration,
    /// `CLAUDE_API_KEY`, reasoning/vision/synthesis tool credential.
    pub claude_api_key: Option<String>,
    /// `TAVILY_API_KEY`, web-search tool credential.
    pub tavily_api_key: Option<String>,
    /// `TELEGRAM_BOT_TOKEN` plus `TELEGRAM_CHAT_ID`; notifications are
    /// enabled only when both are present.
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_string("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8420),
            autonomic_enabled: env_bool("AUTONOMIC_ENABLED", false),
            heartbeat_interval: env_secs("AUTONOMIC_HEARTBEAT_INTERVAL", 60),
            health_interval: env_secs("AUTONOMIC_HEALTH_INTERVAL", 300),
            claude_api_key: env_string("CLAUDE_API_KEY"),
            tavily_api_key: env_string("TAVILY_API_KEY"),
            telegram_bot_token: env_string("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_string("TELEGRAM_CHAT_ID"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8420,
            autonomic_enabled: false,
            heartbeat_interval: Duration::from_secs(60),
            health_interval: Duration::from_secs(300),
            claude_api_key: None,
            tavily_api_key: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}
