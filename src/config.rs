use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::models::{ExtractRules, FailurePolicy, FetchMode, SourceConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Whole fetch attempt, in seconds.
    pub request_timeout: u64,
    /// Single browser step (navigation, wait, click), in seconds.
    pub step_timeout: u64,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    pub max_items_per_source: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    #[serde(default)]
    pub fail_on: FailurePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    #[default]
    Slack,
    Discord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub format: WebhookFormat,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

/// SMTP delivery of new-tender digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_address: String,
    #[serde(default = "default_username")]
    pub from_name: String,
    pub to: Vec<String>,
    /// TLS on port 465, STARTTLS elsewhere; false means plaintext, for local
    /// relays only.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files.
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_headless() -> bool {
    true
}

fn default_username() -> String {
    "TenderBot".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

fn default_log_level() -> String {
    "tenderbot=info".to_string()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            format: WebhookFormat::default(),
            username: default_username(),
            email: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout)
    }
}

impl EmailConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_host.trim().is_empty() {
            return Err(ConfigError::Message("notifications.email.smtp_host must be set".into()));
        }

        if self.smtp_port == 0 {
            return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::Message(
                "notifications.email needs both username and password, or neither".into(),
            ));
        }

        if self.to.is_empty() {
            return Err(ConfigError::Message("notifications.email.to needs at least one recipient".into()));
        }

        for address in std::iter::once(&self.from_address).chain(&self.to) {
            if address.trim().parse::<lettre::Address>().is_err() {
                return Err(ConfigError::Message(format!("Invalid e-mail address '{}'", address)));
            }
        }

        Ok(())
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Layered load: `config/default`, `config/{RUN_MODE}`, `config/local`, then
    /// `TENDERBOT__*` environment variables. An explicit file replaces the
    /// three file layers.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
                builder = builder
                    .add_source(File::with_name("config/default"))
                    .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
                    .add_source(File::with_name("config/local").required(false));
            }
        }

        let s = builder
            .add_source(Environment::with_prefix("TENDERBOT").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Database
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("database.url must be set".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        // Scraper
        if self.scraper.request_timeout == 0 || self.scraper.step_timeout == 0 {
            return Err(ConfigError::Message("Scraper timeouts must be greater than 0".into()));
        }

        if self.scraper.retry_max_delay_ms < self.scraper.retry_delay_ms {
            return Err(ConfigError::Message(
                "Scraper retry_max_delay_ms cannot be lower than retry_delay_ms".into(),
            ));
        }

        if self.scraper.max_items_per_source == 0 {
            return Err(ConfigError::Message("Scraper max_items_per_source must be greater than 0".into()));
        }

        // Scheduler
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Message("Scheduler interval_secs must be greater than 0".into()));
        }

        if self.relevance.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Message("Relevance keywords cannot be blank".into()));
        }

        if let Some(webhook_url) = &self.notifications.webhook_url {
            if Url::parse(webhook_url).is_err() {
                return Err(ConfigError::Message("Invalid notifications.webhook_url".into()));
            }
        }

        if let Some(email) = &self.notifications.email {
            email.validate()?;
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        self.validate_sources()
    }

    fn validate_sources(&self) -> Result<(), ConfigError> {
        if !self.sources.iter().any(|s| s.enabled) {
            return Err(ConfigError::Message("At least one enabled source is required".into()));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Message("Source name cannot be empty".into()));
            }

            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Message(format!("Duplicate source name '{}'", source.name)));
            }

            if source.fetch == FetchMode::File {
                if source.url.trim().is_empty() {
                    return Err(ConfigError::Message(format!("Source '{}' has an empty path", source.name)));
                }
            } else if Url::parse(&source.url).is_err() {
                return Err(ConfigError::Message(format!("Source '{}' has an invalid URL", source.name)));
            }

            if source.uses_browser_navigation() && !source.needs_browser() {
                return Err(ConfigError::Message(format!(
                    "Source '{}' uses browser navigation but fetch mode is not browser",
                    source.name
                )));
            }

            if source.max_pages == 0 {
                return Err(ConfigError::Message(format!(
                    "Source '{}' max_pages must be greater than 0",
                    source.name
                )));
            }

            for selector in source.css_selectors() {
                if Selector::parse(selector).is_err() {
                    return Err(ConfigError::Message(format!(
                        "Source '{}' has an invalid CSS selector '{}'",
                        source.name, selector
                    )));
                }
            }

            if let Some(pattern) = source.id_pattern() {
                let regex = Regex::new(pattern).map_err(|e| {
                    ConfigError::Message(format!("Source '{}' has an invalid id_pattern: {}", source.name, e))
                })?;
                if regex.captures_len() < 2 {
                    return Err(ConfigError::Message(format!(
                        "Source '{}' id_pattern needs a capture group",
                        source.name
                    )));
                }
            }

            if let ExtractRules::Json(rules) = &source.extract {
                let pointers = [Some(rules.items.as_str()), Some(rules.title.as_str())]
                    .into_iter()
                    .chain([
                        rules.link.as_deref(),
                        rules.id.as_deref(),
                        rules.deadline.as_deref(),
                        rules.buyer.as_deref(),
                        rules.category.as_deref(),
                        rules.description.as_deref(),
                    ])
                    .flatten();
                for pointer in pointers {
                    if !pointer.is_empty() && !pointer.starts_with('/') {
                        return Err(ConfigError::Message(format!(
                            "Source '{}' has an invalid JSON pointer '{}'",
                            source.name, pointer
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Enabled sources in configured order, optionally narrowed to `only`.
    pub fn active_sources(&self, only: &[String]) -> Result<Vec<SourceConfig>, ConfigError> {
        for name in only {
            if !self.sources.iter().any(|s| &s.name == name) {
                return Err(ConfigError::Message(format!("Unknown source '{}'", name)));
            }
        }

        let sources: Vec<SourceConfig> = self
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| only.is_empty() || only.contains(&s.name))
            .cloned()
            .collect();

        if sources.is_empty() {
            return Err(ConfigError::Message("No enabled source matches the selection".into()));
        }

        Ok(sources)
    }
}
