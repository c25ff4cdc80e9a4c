//! Connection settings for the remote task store and its realtime service.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, TaskSyncError};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_TABLE: &str = "tasks";

/// Default timeout for REST requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// How long `subscribe` waits for the channel join to be acknowledged.
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;
/// Phoenix heartbeat cadence used by the hosted realtime service.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;

pub const ENV_URL: &str = "UPKEEP_SUPABASE_URL";
pub const ENV_API_KEY: &str = "UPKEEP_SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "UPKEEP_SUPABASE_ACCESS_TOKEN";
pub const ENV_SCHEMA: &str = "UPKEEP_TASKS_SCHEMA";
pub const ENV_TABLE: &str = "UPKEEP_TASKS_TABLE";

const REALTIME_PATH: &str = "/realtime/v1/websocket";
const REALTIME_VSN: &str = "1.0.0";

#[derive(Clone, PartialEq, Eq)]
pub struct TaskSyncConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    pub url: String,
    /// Publishable (anon) key sent as `apikey`.
    pub api_key: String,
    /// User session token. Falls back to the api key when absent.
    pub access_token: Option<String>,
    pub schema: String,
    pub table: String,
    pub request_timeout: Duration,
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl fmt::Debug for TaskSyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSyncConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("has_access_token", &self.access_token.is_some())
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("request_timeout", &self.request_timeout)
            .field("join_timeout", &self.join_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

fn clean_value(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TaskSyncConfig {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            url: url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            access_token: None,
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }

    /// Build a configuration from `UPKEEP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = clean_value(lookup(ENV_URL))
            .ok_or_else(|| TaskSyncError::config(format!("{} not configured", ENV_URL)))?;
        let api_key = clean_value(lookup(ENV_API_KEY))
            .ok_or_else(|| TaskSyncError::config(format!("{} not configured", ENV_API_KEY)))?;

        let mut config = Self::new(&url, &api_key);
        config.access_token = clean_value(lookup(ENV_ACCESS_TOKEN));
        if let Some(schema) = clean_value(lookup(ENV_SCHEMA)) {
            config.schema = schema;
        }
        if let Some(table) = clean_value(lookup(ENV_TABLE)) {
            config.table = table;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = clean_value(Some(token.into()));
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(TaskSyncError::config(format!(
                "Project URL must start with http:// or https:// (got '{}')",
                self.url
            )));
        }
        if self.api_key.is_empty() {
            return Err(TaskSyncError::config("API key must not be empty"));
        }
        if self.schema.trim().is_empty() || self.table.trim().is_empty() {
            return Err(TaskSyncError::config("Schema and table must not be empty"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(TaskSyncError::config("Heartbeat interval must be positive"));
        }
        Ok(())
    }

    /// Token sent as `Authorization: Bearer` and as the channel access token.
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    /// PostgREST endpoint for the task table.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.url, self.table)
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> Result<String> {
        let host = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(TaskSyncError::config(format!(
                "Cannot derive realtime URL from '{}'",
                self.url
            )));
        };
        Ok(format!(
            "{}{}?apikey={}&vsn={}",
            host,
            REALTIME_PATH,
            urlencoding::encode(&self.api_key),
            REALTIME_VSN
        ))
    }
}
