use crate::error::AppError;
use crate::logging::DEFAULT_LOG_LEVEL;
use crate::market::types::DEFAULT_COLLECTION;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const MIN_EVENT_CAPACITY: usize = 16;
pub const MAX_EVENT_CAPACITY: usize = 65_536;

pub const ENV_API_URL: &str = "TICKER_API_URL";
pub const ENV_WS_URL: &str = "TICKER_WS_URL";
pub const ENV_COLLECTION: &str = "TICKER_COLLECTION";
pub const ENV_EVENT_CAPACITY: &str = "TICKER_EVENT_CAPACITY";
pub const ENV_LOG_LEVEL: &str = "TICKER_LOG_LEVEL";
pub const ENV_TRADER_ID: &str = "TICKER_TRADER_ID";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTickerArgs {
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub collection: Option<String>,
    pub event_capacity: Option<usize>,
    pub log_level: Option<String>,
    pub trader_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TickerConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub collection: String,
    pub event_capacity: usize,
    pub log_level: String,
    pub trader_id: Option<String>,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            trader_id: None,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn require_scheme(name: &str, url: String, schemes: &[&str]) -> Result<String, AppError> {
    let has_scheme = schemes.iter().any(|scheme| {
        url.strip_prefix(scheme)
            .and_then(|rest| rest.strip_prefix("://"))
            .is_some_and(|host| !host.is_empty())
    });
    if !has_scheme {
        return Err(AppError::InvalidArgument(format!(
            "{name} must be a {} url",
            schemes.join("/")
        )));
    }
    Ok(url)
}

impl StartTickerArgs {
    pub fn normalize(self) -> Result<TickerConfig, AppError> {
        let api_base_url = require_scheme(
            "apiBaseUrl",
            non_blank(self.api_base_url).unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            &["http", "https"],
        )?;
        let ws_url = require_scheme(
            "wsUrl",
            non_blank(self.ws_url).unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            &["ws", "wss"],
        )?;

        let collection =
            non_blank(self.collection).unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        if !collection.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidArgument(
                "collection must be non-empty alphanumeric ASCII".to_string(),
            ));
        }

        let event_capacity = self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY);
        if !(MIN_EVENT_CAPACITY..=MAX_EVENT_CAPACITY).contains(&event_capacity) {
            return Err(AppError::InvalidArgument(format!(
                "eventCapacity must be between {MIN_EVENT_CAPACITY} and {MAX_EVENT_CAPACITY}"
            )));
        }

        let log_level = non_blank(self.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
            .to_ascii_lowercase();

        Ok(TickerConfig {
            api_base_url,
            ws_url,
            collection,
            event_capacity,
            log_level,
            trader_id: non_blank(self.trader_id),
        })
    }
}

impl TickerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `TICKER_*` variables resolved through `lookup`.
    /// Blank values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let event_capacity = match non_blank(lookup(ENV_EVENT_CAPACITY)) {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                AppError::InvalidArgument(format!("{ENV_EVENT_CAPACITY} must be an integer"))
            })?),
            None => None,
        };

        StartTickerArgs {
            api_base_url: lookup(ENV_API_URL),
            ws_url: lookup(ENV_WS_URL),
            collection: lookup(ENV_COLLECTION),
            event_capacity,
            log_level: lookup(ENV_LOG_LEVEL),
            trader_id: lookup(ENV_TRADER_ID),
        }
        .normalize()
    }
}
