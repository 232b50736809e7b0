//! Service configuration.
//!
//! The YAML file is deserialized into [`Config`] as written, then a handful of
//! environment variables override it, and finally [`Config::validate`] turns
//! it into typed [`LifecycleSettings`]. Anything that fails validation stops
//! the process before a single job is scheduled.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

use crate::connector::helm::HelmSettings;
use crate::models::duration::{parse_duration, DurationError};
use crate::notification::NotifierSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid duration for {key}: {source}")]
    Duration {
        key: &'static str,
        #[source]
        source: DurationError,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ── File layout ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Public base URL of this service, used in extension links.
    pub api_url: String,
    pub listen_addr: String,
    pub admin_api_key: String,
    pub dry_run: bool,
    pub default_ttl: String,
    pub max_extend_duration: String,
    pub crawl_interval: String,
    pub delete_interval: String,
    /// Falls back to `delete_interval`.
    pub stale_check_interval: Option<String>,
    pub stale_threshold: String,
    pub storage: StorageConfig,
    pub notifications: NotificationsConfig,
    pub environments: EnvironmentsConfig,
    pub connectors: ConnectorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            listen_addr: "0.0.0.0:8080".into(),
            admin_api_key: String::new(),
            dry_run: false,
            default_ttl: "7d".into(),
            max_extend_duration: "1w".into(),
            crawl_interval: "10m".into(),
            delete_interval: "1h".into(),
            stale_check_interval: None,
            stale_threshold: "1d".into(),
            storage: StorageConfig::default(),
            notifications: NotificationsConfig::default(),
            environments: EnvironmentsConfig::default(),
            connectors: ConnectorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sqlite: Option<SqliteConfig>,
    pub postgresql: Option<PostgresConfig>,
    /// PostgreSQL connection URL. `DATABASE_URL` replaces whatever storage
    /// the file configures.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn default_pg_port() -> u16 {
    5432
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Send every message to the admin channel instead of owners.
    pub admin_only: bool,
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub sender_name: String,
    pub admin_channel: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentsConfig {
    pub helm: HelmConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub enabled: bool,
    pub delete_release_namespace: bool,
    pub whitelist_releases_regex: Vec<String>,
    pub blacklist_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorsConfig {
    pub k8s: K8sConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct K8sConfig {
    pub kubeconfig: Option<PathBuf>,
}

// ── Validated settings ───────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Sqlite(PathBuf),
    Postgres(PgConnectOptions),
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub api_url: String,
    pub listen_addr: SocketAddr,
    pub admin_api_key: String,
    pub dry_run: bool,
    pub default_ttl: Duration,
    pub max_extend: Duration,
    pub crawl_interval: Duration,
    pub delete_interval: Duration,
    pub stale_check_interval: Duration,
    pub stale_threshold: Duration,
    pub storage: StorageBackend,
    pub notifier: NotifierSettings,
    /// Present when Slack delivery is enabled.
    pub slack_webhook_url: Option<String>,
    /// Present when the Helm connector is enabled.
    pub helm: Option<HelmSettings>,
}

/// What the `env` client commands need.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub admin_api_key: String,
}

/// Read `path`, apply environment overrides. `.env` is loaded first.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg = Config::from_yaml(&raw)?;
    cfg.apply_env(|key| std::env::var(key).ok());
    Ok(cfg)
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Secrets and deployment-specific values may come from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        if let Some(url) = set(lookup("DATABASE_URL")) {
            self.storage = StorageConfig {
                database_url: Some(url),
                ..StorageConfig::default()
            };
        }
        if let Some(key) = set(lookup("ENV_CLEANER_ADMIN_API_KEY")) {
            self.admin_api_key = key;
        }
        if let Some(url) = set(lookup("ENV_CLEANER_SLACK_WEBHOOK_URL")) {
            self.notifications.slack.webhook_url = url;
        }
        if let Some(url) = set(lookup("ENV_CLEANER_API_URL")) {
            self.api_url = url;
        }
    }

    pub fn validate(&self) -> Result<LifecycleSettings, ConfigError> {
        let default_ttl = duration("default_ttl", &self.default_ttl)?;
        let max_extend = duration("max_extend_duration", &self.max_extend_duration)?;
        let crawl_interval = duration("crawl_interval", &self.crawl_interval)?;
        let delete_interval = duration("delete_interval", &self.delete_interval)?;
        let stale_check_interval = match &self.stale_check_interval {
            Some(v) => duration("stale_check_interval", v)?,
            None => delete_interval,
        };
        let stale_threshold = duration("stale_threshold", &self.stale_threshold)?;

        if stale_threshold > max_extend {
            return Err(invalid(
                "stale_threshold must not exceed max_extend_duration",
            ));
        }

        if self.api_url.trim().is_empty() {
            return Err(invalid("api_url is required"));
        }
        if self.admin_api_key.is_empty() {
            return Err(invalid("admin_api_key is required"));
        }
        let listen_addr = self
            .listen_addr
            .parse()
            .map_err(|e| invalid(format!("listen_addr '{}': {e}", self.listen_addr)))?;

        let storage = self.storage_backend()?;

        let slack = &self.notifications.slack;
        let slack_webhook_url = if slack.enabled {
            if slack.webhook_url.is_empty()
                || slack.sender_name.is_empty()
                || slack.admin_channel.is_empty()
            {
                return Err(invalid(
                    "slack requires webhook_url, sender_name and admin_channel",
                ));
            }
            Some(slack.webhook_url.clone())
        } else {
            None
        };

        let helm_cfg = &self.environments.helm;
        let helm = if helm_cfg.enabled {
            for pattern in &helm_cfg.whitelist_releases_regex {
                regex::Regex::new(pattern)
                    .map_err(|e| invalid(format!("whitelist_releases_regex '{pattern}': {e}")))?;
            }
            Some(HelmSettings {
                kubeconfig: self.connectors.k8s.kubeconfig.clone(),
                delete_release_namespace: helm_cfg.delete_release_namespace,
                whitelist_releases_regex: helm_cfg.whitelist_releases_regex.clone(),
                blacklist_namespaces: helm_cfg.blacklist_namespaces.clone(),
            })
        } else {
            None
        };

        if helm.is_none() {
            return Err(invalid("no connectors enabled"));
        }

        Ok(LifecycleSettings {
            api_url: self.api_url.trim().to_string(),
            listen_addr,
            admin_api_key: self.admin_api_key.clone(),
            dry_run: self.dry_run,
            default_ttl,
            max_extend,
            crawl_interval,
            delete_interval,
            stale_check_interval,
            stale_threshold,
            storage,
            notifier: NotifierSettings {
                admin_only: self.notifications.admin_only,
                api_url: self.api_url.trim().to_string(),
                stale_threshold,
                max_extend,
                sender_name: slack.sender_name.clone(),
                admin_channel: slack.admin_channel.clone(),
            },
            slack_webhook_url,
            helm,
        })
    }

    fn storage_backend(&self) -> Result<StorageBackend, ConfigError> {
        let s = &self.storage;
        let configured =
            s.sqlite.is_some() as u8 + s.postgresql.is_some() as u8 + s.database_url.is_some() as u8;
        if configured != 1 {
            return Err(invalid(
                "exactly one of storage.sqlite, storage.postgresql or storage.database_url must be set",
            ));
        }

        if let Some(sqlite) = &s.sqlite {
            return Ok(StorageBackend::Sqlite(sqlite.path.clone()));
        }
        if let Some(pg) = &s.postgresql {
            let mut options = PgConnectOptions::new()
                .host(&pg.host)
                .port(pg.port)
                .database(&pg.database);
            if !pg.username.is_empty() {
                options = options.username(&pg.username);
            }
            if !pg.password.is_empty() {
                options = options.password(&pg.password);
            }
            return Ok(StorageBackend::Postgres(options));
        }
        let url = s.database_url.as_deref().unwrap_or_default();
        PgConnectOptions::from_str(url)
            .map(StorageBackend::Postgres)
            .map_err(|e| invalid(format!("database_url: {e}")))
    }

    pub fn client(&self) -> Result<ClientSettings, ConfigError> {
        if self.api_url.trim().is_empty() || self.admin_api_key.is_empty() {
            return Err(invalid("api_url and admin_api_key are required"));
        }
        Ok(ClientSettings {
            api_url: self.api_url.trim().to_string(),
            admin_api_key: self.admin_api_key.clone(),
        })
    }
}

fn duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let d = parse_duration(value).map_err(|source| ConfigError::Duration { key, source })?;
    if d.is_zero() {
        return Err(invalid(format!("{key} must be greater than zero")));
    }
    Ok(d)
}
