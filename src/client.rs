use crate::highlight::{Highlight, HighlightDraft, NotePatch};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server responded {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Message suitable for showing to the reader.
    pub fn user_message(&self) -> &str {
        match self {
            ClientError::Status { message, .. } => message,
            ClientError::Transport { .. } => "Could not reach the server",
            ClientError::Malformed { .. } => "The server sent an unexpected response",
        }
    }
}

/// `{success, data?, message?}` as every highlight endpoint answers.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// HTTP client for the highlight and dictionary endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` points at the `/api` prefix, e.g. [`DEFAULT_API_URL`].
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list(&self) -> Result<Vec<Highlight>, ClientError> {
        self.data(Method::GET, "/highlight".to_string(), None::<&()>)
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Highlight, ClientError> {
        self.data(Method::GET, format!("/highlight/{}", encode(id)), None::<&()>)
            .await
    }

    pub async fn create(&self, draft: &HighlightDraft) -> Result<Highlight, ClientError> {
        self.data(
            Method::POST,
            "/highlight/createHighlight".to_string(),
            Some(draft),
        )
        .await
    }

    pub async fn update_note(&self, id: &str, patch: &NotePatch) -> Result<Highlight, ClientError> {
        self.data(
            Method::PUT,
            format!("/highlight/updateHighlight/{}", encode(id)),
            Some(patch),
        )
        .await
    }

    /// Returns the server's confirmation message.
    pub async fn delete(&self, id: &str) -> Result<String, ClientError> {
        let path = format!("/highlight/deleteHighlight/{}", encode(id));
        let (url, body) = self.send(Method::DELETE, &path, None::<&()>).await?;
        let envelope: Envelope<Value> = decode(&url, &body)?;
        Ok(envelope.message.unwrap_or_default())
    }

    /// Dictionary entry for `word`; the proxy answers with the bare entry.
    pub async fn lookup(&self, word: &str) -> Result<Value, ClientError> {
        let path = format!("/dictionary/{}", encode(word));
        let (url, body) = self.send(Method::GET, &path, None::<&()>).await?;
        decode(&url, &body)
    }

    pub async fn passage(&self) -> Result<Vec<String>, ClientError> {
        self.data(Method::GET, "/passage".to_string(), None::<&()>)
            .await
    }

    async fn data<T, B>(
        &self,
        method: Method,
        path: String,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let (url, bytes) = self.send(method, &path, body).await?;
        let envelope: Envelope<T> = decode(&url, &bytes)?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(ClientError::Malformed {
                url,
                reason: envelope
                    .message
                    .unwrap_or_else(|| "missing `data` in response".to_string()),
            }),
        }
    }

    /// Sends the request; non-success statuses become [`ClientError::Status`].
    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(String, Vec<u8>), ClientError>
    where
        B: serde::Serialize + ?Sized,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request: RequestBuilder = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let transport = |source| ClientError::Transport {
            url: url.clone(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?.to_vec();
        debug!(%method, %url, %status, "api response");
        if !status.is_success() {
            return Err(ClientError::Status {
                status,
                message: error_message(status, &bytes),
            });
        }
        Ok((url, bytes))
    }
}

fn decode<T: DeserializeOwned>(url: &str, bytes: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(bytes).map_err(|err| ClientError::Malformed {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

fn error_message(status: StatusCode, bytes: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(bytes)
        .ok()
        .and_then(|body| body.message.or(body.error))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}
