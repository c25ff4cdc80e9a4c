//! Connection to the hosted backend, shared by every write and subscription.
//!
//! The process-wide slot is created once with [`init_shared`] and reused
//! afterwards. [`reset_shared`] drops it so a fresh client can be installed.

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::config::{TaskSyncConfig, DEFAULT_SCHEMA};
use crate::error::{Result, TaskSyncError};
use crate::types::ApiErrorResponse;

const MAX_LOG_BODY_CHARS: usize = 512;
/// Makes PostgREST answer with a single JSON object instead of an array.
const SINGLE_OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";

static SHARED_CLIENT: OnceLock<RwLock<Option<Arc<RemoteClient>>>> = OnceLock::new();

fn shared_slot() -> &'static RwLock<Option<Arc<RemoteClient>>> {
    SHARED_CLIENT.get_or_init(|| RwLock::new(None))
}

/// Install the process-wide client, or return the one already installed.
pub fn init_shared(config: TaskSyncConfig) -> Result<Arc<RemoteClient>> {
    let mut slot = shared_slot()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = slot.as_ref() {
        debug!("[TaskSync] Reusing shared remote client for {}", existing.config().url);
        return Ok(Arc::clone(existing));
    }
    let client = Arc::new(RemoteClient::new(config)?);
    *slot = Some(Arc::clone(&client));
    debug!("[TaskSync] Shared remote client initialized for {}", client.config().url);
    Ok(client)
}

/// The process-wide client installed by [`init_shared`].
pub fn shared() -> Result<Arc<RemoteClient>> {
    shared_slot()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(TaskSyncError::NotInitialized)
}

/// Remove the process-wide client, returning it if one was installed.
pub fn reset_shared() -> Option<Arc<RemoteClient>> {
    shared_slot()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// HTTP client plus the settings every request needs.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    config: Arc<TaskSyncConfig>,
}

impl RemoteClient {
    pub fn new(config: TaskSyncConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &TaskSyncConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Headers for a single-row PostgREST write.
    pub(crate) fn rest_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static(SINGLE_OBJECT_MEDIA_TYPE));
        headers.insert("prefer", HeaderValue::from_static("return=representation"));

        let api_key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|_| TaskSyncError::auth("Invalid API key format"))?;
        headers.insert("apikey", api_key);

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.config.bearer_token()))
            .map_err(|_| TaskSyncError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if self.config.schema != DEFAULT_SCHEMA {
            let profile = HeaderValue::from_str(&self.config.schema)
                .map_err(|_| TaskSyncError::config("Invalid schema name"))?;
            headers.insert("content-profile", profile.clone());
            headers.insert("accept-profile", profile);
        }

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[TaskSync] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[TaskSync] Response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body, mapping error responses to [`TaskSyncError::Api`].
    pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                let message = error.detailed_message();
                return Err(match error.code {
                    Some(code) => TaskSyncError::api_with_code(status.as_u16(), code, message),
                    None => TaskSyncError::api(status.as_u16(), message),
                });
            }
            return Err(TaskSyncError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "[TaskSync] Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            TaskSyncError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }
}
