use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::types::EventKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub gateway: GatewayConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header.
    pub telegram_secret_token: Option<String>,
    /// Expected bearer token on gateway webhook calls.
    pub gateway_webhook_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.wa-bridge/accounts.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_url: String,
    pub qr_url: String,
    /// Public base URL of this service, used for webhook registration.
    pub public_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.green-api.com".to_string(),
            qr_url: "https://qr.green-api.com".to_string(),
            public_url: None,
        }
    }
}

impl GatewayConfig {
    pub fn whatsapp_webhook_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/webhook/whatsapp", base.trim_end_matches('/')))
    }

    pub fn telegram_webhook_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/webhook/telegram", base.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Gateway event kinds to forward; `None` means the default set.
    pub allowed_kinds: Option<Vec<EventKind>>,
    /// Staleness bound of the account cache; 0 disables caching.
    pub cache_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            allowed_kinds: None,
            cache_ttl_seconds: 30,
            request_timeout_seconds: 30,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("BRIDGE_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.wa-bridge/bridge.json"))
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();
    let mut cfg = Config::default();

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => tracing::warn!(path = %config_path.display(), "ignoring malformed config: {err}"),
            },
            Err(err) => tracing::warn!(path = %config_path.display(), "cannot read config: {err}"),
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(token) = env_value("TELEGRAM_BOT_TOKEN") {
        cfg.telegram.bot_token = Some(token);
    }

    if let Some(url) = env_value("WEBHOOK_URL") {
        cfg.gateway.public_url = Some(url);
    }

    if let Some(port) = env_value("PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.server.port = port;
    }

    if let Some(url) = env_value("BRIDGE_DATABASE_URL") {
        cfg.database.url = Some(url);
    }

    if let Some(path) = env_value("BRIDGE_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }

    if let Some(secret) = env_value("BRIDGE_TELEGRAM_SECRET") {
        cfg.auth.telegram_secret_token = Some(secret);
    }

    if let Some(token) = env_value("BRIDGE_GATEWAY_TOKEN") {
        cfg.auth.gateway_webhook_token = Some(token);
    }
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
