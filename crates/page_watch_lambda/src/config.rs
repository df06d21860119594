use std::time::Duration;

use page_watch_core::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use page_watch_core::schedule::PollInterval;

use crate::error::ConfigError;

pub const DEFAULT_REGISTRATIONS_TABLE: &str = "notion-webhooks-database-id";
pub const DEFAULT_SEEN_ITEMS_TABLE: &str = "notion-webhooks-page-info";
pub const DEFAULT_NOTION_API_BASE: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 60;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
const MAX_CONCURRENCY_LIMIT: usize = 64;

/// Execution limits shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub interval: PollInterval,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub max_concurrency: usize,
    pub lookback_minutes: u32,
}

impl RunSettings {
    pub fn budget(&self) -> Duration {
        self.interval.invocation_budget()
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        let interval = PollInterval::from_minutes(1).expect("one minute is a valid interval");
        Self {
            interval,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS).min(interval.invocation_budget()),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub api_base: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub settings: RunSettings,
    pub notion: NotionSettings,
    pub registrations_table: String,
    pub seen_items_table: String,
    account_id: Option<String>,
    secret_key: Option<String>,
    monitor_function: Option<String>,
    dispatch_function: Option<String>,
    integration_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let interval_minutes = parse_or(&value, "INTERVAL_MINUTES", 1u32)?;
        let interval = PollInterval::from_minutes(interval_minutes).map_err(|error| {
            ConfigError::Invalid {
                name: "INTERVAL_MINUTES",
                message: error.to_string(),
            }
        })?;

        let max_attempts = parse_or(&value, "MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let retry = RetryPolicy::with_max_attempts(max_attempts).map_err(|error| {
            ConfigError::Invalid {
                name: "MAX_ATTEMPTS",
                message: error.to_string(),
            }
        })?;

        let call_timeout_secs = parse_or(&value, "CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?;
        if call_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "CALL_TIMEOUT_SECS",
                message: "must be a positive number of seconds".to_string(),
            });
        }

        let max_concurrency = parse_or(&value, "MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?;
        if !(1..=MAX_CONCURRENCY_LIMIT).contains(&max_concurrency) {
            return Err(ConfigError::Invalid {
                name: "MAX_CONCURRENCY",
                message: format!("must be between 1 and {MAX_CONCURRENCY_LIMIT}"),
            });
        }

        let lookback_minutes = parse_or(&value, "LOOKBACK_MINUTES", DEFAULT_LOOKBACK_MINUTES)?;
        if lookback_minutes < interval.minutes() {
            return Err(ConfigError::Invalid {
                name: "LOOKBACK_MINUTES",
                message: format!(
                    "must be at least the poll interval ({} minutes)",
                    interval.minutes()
                ),
            });
        }

        let settings = RunSettings {
            interval,
            retry,
            call_timeout: Duration::from_secs(call_timeout_secs).min(interval.invocation_budget()),
            max_concurrency,
            lookback_minutes,
        };

        Ok(Self {
            log_level: value("LOGLEVEL").unwrap_or_else(|| "info".to_string()),
            settings,
            notion: NotionSettings {
                api_base: value("NOTION_API_BASE")
                    .unwrap_or_else(|| DEFAULT_NOTION_API_BASE.to_string()),
                version: value("NOTION_VERSION")
                    .unwrap_or_else(|| DEFAULT_NOTION_VERSION.to_string()),
            },
            registrations_table: value("TABLE_NAME")
                .unwrap_or_else(|| DEFAULT_REGISTRATIONS_TABLE.to_string()),
            seen_items_table: value("PAGE_TABLE_NAME")
                .unwrap_or_else(|| DEFAULT_SEEN_ITEMS_TABLE.to_string()),
            account_id: value("USER_ID"),
            secret_key: value("SECRET_KEY"),
            monitor_function: value("LAMBDA_NAME_MONITORING"),
            dispatch_function: value("LAMBDA_NAME_WEBHOOKS"),
            integration_url: value("INTEGRATION_URL"),
        })
    }

    pub fn account_id(&self) -> Result<&str, ConfigError> {
        self.account_id.as_deref().ok_or(ConfigError::Missing("USER_ID"))
    }

    pub fn secret_key(&self) -> Result<&str, ConfigError> {
        self.secret_key.as_deref().ok_or(ConfigError::Missing("SECRET_KEY"))
    }

    pub fn monitor_function(&self) -> Result<&str, ConfigError> {
        self.monitor_function
            .as_deref()
            .ok_or(ConfigError::Missing("LAMBDA_NAME_MONITORING"))
    }

    pub fn dispatch_function(&self) -> Result<&str, ConfigError> {
        self.dispatch_function
            .as_deref()
            .ok_or(ConfigError::Missing("LAMBDA_NAME_WEBHOOKS"))
    }

    pub fn integration_url(&self) -> Result<&str, ConfigError> {
        let url = self
            .integration_url
            .as_deref()
            .ok_or(ConfigError::Missing("INTEGRATION_URL"))?;
        reqwest::Url::parse(url).map_err(|error| ConfigError::Invalid {
            name: "INTEGRATION_URL",
            message: error.to_string(),
        })?;
        Ok(url)
    }
}

fn parse_or<T>(
    value: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value(name) {
        Some(raw) => raw.parse().map_err(|error: T::Err| ConfigError::Invalid {
            name,
            message: format!("'{raw}': {error}"),
        }),
        None => Ok(default),
    }
}
