//! Remote REST API seam.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::CredentialProvider;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::util::compact_text;

/// Remote operations the sync driver replays queued mutations against.
///
/// Endpoints are logical resource paths such as `/audits/{id}`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// POST `payload` to a collection endpoint.
    async fn create(&self, endpoint: &str, payload: &Value) -> Result<Value>;

    /// PUT `payload` to an item endpoint.
    async fn update(&self, endpoint: &str, payload: &Value) -> Result<Value>;

    /// DELETE an item endpoint.
    async fn delete(&self, endpoint: &str) -> Result<()>;

    /// GET an item endpoint; `None` when the remote has no such record.
    async fn fetch(&self, endpoint: &str) -> Result<Option<Value>>;

    /// GET a collection endpoint.
    async fn list(&self, endpoint: &str) -> Result<Vec<Value>>;
}

/// `reqwest` implementation of [`RemoteApi`] with bearer auth.
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for HttpRemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApi {
    pub fn new(config: &EngineConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let base_url = config
            .api_base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::Config("api_base_url is not configured".to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("quickaudit/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url,
            client,
            credentials,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, self.url(endpoint))
            .header("Accept", "application/json");
        match self.credentials.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Option<Value>> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Remote {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_str(&body).map(Some).map_err(|error| {
            Error::Transport(format!(
                "invalid JSON from remote: {error}: {}",
                compact_text(&body)
            ))
        })
    }

    async fn send_expecting(&self, request: RequestBuilder, endpoint: &str) -> Result<Value> {
        self.send(request).await?.ok_or_else(|| Error::Remote {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: format!("{endpoint} not found"),
        })
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let request = self.request(Method::POST, endpoint).json(payload);
        self.send_expecting(request, endpoint).await
    }

    async fn update(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let request = self.request(Method::PUT, endpoint).json(payload);
        self.send_expecting(request, endpoint).await
    }

    async fn delete(&self, endpoint: &str) -> Result<()> {
        // Already gone counts as deleted.
        self.send(self.request(Method::DELETE, endpoint)).await?;
        Ok(())
    }

    async fn fetch(&self, endpoint: &str) -> Result<Option<Value>> {
        Ok(self
            .send(self.request(Method::GET, endpoint))
            .await?
            .map(unwrap_data))
    }

    async fn list(&self, endpoint: &str) -> Result<Vec<Value>> {
        let value = self
            .send_expecting(self.request(Method::GET, endpoint), endpoint)
            .await?;
        match unwrap_data(value) {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::Transport(format!(
                "expected a list from {endpoint}, got {}",
                compact_text(&other.to_string())
            ))),
        }
    }
}

/// Unwrap `{"data": ...}` envelopes.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut object) if object.len() == 1 && object.contains_key("data") => {
            object.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        compact_text(trimmed)
    }
}
