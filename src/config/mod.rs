use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Engine configuration, loaded from a TOML file. The data directory can be
/// overridden with `KANTOOR_DATA_DIR`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    pub website: Option<WebsiteConfig>,
    pub accounting: Option<AccountingConfig>,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default, rename = "mailbox")]
    pub mailboxes: Vec<MailboxConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// Root for db, .key, attachments/, backups/. Defaults to ~/kantoor.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsiteConfig {
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountingConfig {
    pub auth_url: String,
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_key: String,
    #[serde(default = "default_subscription_key_header")]
    pub subscription_key_header: String,
    /// ISO country code stamped on new relations.
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    pub secret: Option<String>,
    #[serde(default = "default_webhook_max_body")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub enabled: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            port: default_webhook_port(),
            secret: None,
            max_body_bytes: default_webhook_max_body(),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    /// Plaintext in the config file; encrypted at rest when seeded into the
    /// store.
    pub password: String,
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Base cadence in seconds for website pull pipelines.
    #[serde(default = "default_pull_cadence_secs")]
    pub pull_cadence_secs: u64,
    /// Base cadence in seconds for push pipelines.
    #[serde(default = "default_push_cadence_secs")]
    pub push_cadence_secs: u64,
    /// Base cadence in seconds for mailbox pulls.
    #[serde(default = "default_mail_cadence_secs")]
    pub mail_cadence_secs: u64,
    /// Wall-clock deadline per pipeline run, seconds.
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Grace period after stop() before in-flight runs are cancelled.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            pull_cadence_secs: default_pull_cadence_secs(),
            push_cadence_secs: default_push_cadence_secs(),
            mail_cadence_secs: default_mail_cadence_secs(),
            run_deadline_secs: default_run_deadline_secs(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn pull_cadence(&self) -> Duration {
        Duration::from_secs(self.pull_cadence_secs)
    }

    pub fn push_cadence(&self) -> Duration {
        Duration::from_secs(self.push_cadence_secs)
    }

    pub fn mail_cadence(&self) -> Duration {
        Duration::from_secs(self.mail_cadence_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        if config.website.is_none() && config.accounting.is_none() && config.mailboxes.is_empty() {
            warn!("Config defines no remotes; only the webhook receiver can do work");
        }
        Ok(config)
    }

    /// Resolves the data directory: env override, configured root, then
    /// ~/kantoor, then ./kantoor-data as a last resort.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Ok(custom) = env::var("KANTOOR_DATA_DIR") {
            let path = PathBuf::from(custom);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("creating KANTOOR_DATA_DIR at {}", path.display()))?;
            return Ok(path);
        }

        if let Some(root) = &self.store.root {
            std::fs::create_dir_all(root)
                .with_context(|| format!("creating store root {}", root.display()))?;
            return Ok(root.clone());
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join("kantoor");
            if std::fs::create_dir_all(&path).is_ok() {
                return Ok(path);
            }
            warn!(
                "Unable to create {}/kantoor; falling back to workspace-local storage",
                home.display()
            );
        }

        let cwd = env::current_dir().context("determining current directory")?;
        let path = cwd.join("kantoor-data");
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating fallback data directory {}", path.display()))?;
        Ok(path)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_subscription_key_header() -> String {
    "Ocp-Apim-Subscription-Key".to_string()
}

fn default_country_code() -> String {
    "NL".to_string()
}

fn default_webhook_port() -> u16 {
    8085
}

fn default_webhook_max_body() -> usize {
    1024 * 1024
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_pull_cadence_secs() -> u64 {
    300
}

fn default_push_cadence_secs() -> u64 {
    300
}

fn default_mail_cadence_secs() -> u64 {
    600
}

fn default_run_deadline_secs() -> u64 {
    300
}

fn default_stop_grace_secs() -> u64 {
    10
}
