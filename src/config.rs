use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which send pipeline the context-menu action runs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Requires a linked account; posts with a bearer token.
    #[default]
    Token,
    /// Requires a destination phone from the page or a prompt; no auth.
    Phone,
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMode::Token => write!(f, "token"),
            PipelineMode::Phone => write!(f, "phone"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub extension: ExtensionConfig,
    #[serde(default)]
    pub sites: SitesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_phone_path")]
    pub phone_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            phone_path: default_phone_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiConfig {
    /// Token-mode ingest endpoint.
    pub fn messages_url(&self) -> String {
        format!(
            "{}/ingest/browser-extension/messages",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Phone-mode order endpoint.
    pub fn phone_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.phone_path)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtensionConfig {
    #[serde(default)]
    pub mode: PipelineMode,
    /// Context-menu title. Empty means the default for the configured mode.
    #[serde(default)]
    pub menu_title: String,
}

impl ExtensionConfig {
    pub fn effective_menu_title(&self) -> &str {
        if !self.menu_title.is_empty() {
            return &self.menu_title;
        }
        match self.mode {
            PipelineMode::Token => "Send to Wady Inbox",
            PipelineMode::Phone => "Send WhatsApp Order",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SitesConfig {
    /// Host of the messaging web client whose DOM we read.
    #[serde(default = "default_messaging_host")]
    pub messaging_host: String,
    /// Host of the dashboard allowed to issue tokens.
    #[serde(default = "default_dashboard_host")]
    pub dashboard_host: String,
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            messaging_host: default_messaging_host(),
            dashboard_host: default_dashboard_host(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_toast_ms")]
    pub toast_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
            toast_ms: default_toast_ms(),
        }
    }
}

impl RelayConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_ms)
    }
}

fn default_base_url() -> String {
    "https://api.wady.ai/v1".to_string()
}

fn default_phone_path() -> String {
    "/api/v1/whatsapp/email".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_messaging_host() -> String {
    "web.whatsapp.com".to_string()
}

fn default_dashboard_host() -> String {
    "wady.ai".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("wady-relay.db")
}

fn default_reply_timeout_ms() -> u64 {
    5000
}

fn default_toast_ms() -> u64 {
    3000
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;

        if !config.api.phone_path.starts_with('/') {
            anyhow::bail!(
                "api.phone_path must start with '/', got '{}'",
                config.api.phone_path
            );
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.extension.mode, PipelineMode::Token);
        assert_eq!(config.api.base_url, "https://api.wady.ai/v1");
        assert_eq!(config.sites.messaging_host, "web.whatsapp.com");
        assert_eq!(config.relay.toast_ms, 3000);
        assert_eq!(config.extension.effective_menu_title(), "Send to Wady Inbox");
    }

    #[test]
    fn test_phone_mode_title_and_urls() {
        let config = Config::parse(
            r#"
            [api]
            base_url = "http://localhost:8000/"

            [extension]
            mode = "phone"
            "#,
        )
        .unwrap();
        assert_eq!(config.extension.mode, PipelineMode::Phone);
        assert_eq!(config.extension.effective_menu_title(), "Send WhatsApp Order");
        assert_eq!(
            config.api.phone_url(),
            "http://localhost:8000/api/v1/whatsapp/email"
        );
        assert_eq!(
            config.api.messages_url(),
            "http://localhost:8000/ingest/browser-extension/messages"
        );
    }

    #[test]
    fn test_custom_menu_title_wins() {
        let config = Config::parse(
            r#"
            [extension]
            menu_title = "Forward to inbox"
            "#,
        )
        .unwrap();
        assert_eq!(config.extension.effective_menu_title(), "Forward to inbox");
    }

    #[test]
    fn test_rejects_relative_phone_path() {
        let err = Config::parse(
            r#"
            [api]
            phone_path = "orders"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("phone_path"));
    }

    #[test]
    fn test_unknown_mode_is_an_error() {
        assert!(Config::parse("[extension]\nmode = \"sms\"").is_err());
    }
}
