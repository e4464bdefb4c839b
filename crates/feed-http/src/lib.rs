//! HTTP transport for the chat feed API.
//!
//! `GET {base}?limit=&offset=` returns a JSON array of messages, newest first;
//! `POST {base}` with `{"content": ...}` submits one. The engine only sees
//! [`FeedTransport`], so nothing else depends on `reqwest`.

use async_trait::async_trait;
use feed_core::{FeedTransport, RawMessage, TransportError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://cue2a.spdrm.ru/api/messages";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid api base url: {0}")]
    InvalidBase(#[from] url::ParseError),
    #[error("response is not a JSON array: {0}")]
    NotAnArray(String),
}

impl From<HttpError> for TransportError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::UnexpectedStatus { status, body } => TransportError::Status {
                status: status.as_u16(),
                body,
            },
            HttpError::Http(err) if err.is_decode() => TransportError::Decode(err.to_string()),
            HttpError::NotAnArray(detail) => TransportError::Decode(detail),
            other => TransportError::Request(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    content: &'a str,
}

#[derive(Clone)]
pub struct HttpFeedClient {
    http: Client,
    base: Url,
}

impl HttpFeedClient {
    pub fn new(base: &str) -> Result<Self, HttpError> {
        Ok(Self::with_client(Client::new(), Url::parse(base)?))
    }

    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<RawMessage>, HttpError> {
        let res = self
            .http
            .get(self.base.clone())
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        let res = ensure_success(res).await?;
        let body: serde_json::Value = res.json().await?;
        let serde_json::Value::Array(items) = body else {
            return Err(HttpError::NotAnArray(kind_of(&body).to_string()));
        };
        let messages: Vec<RawMessage> = items.into_iter().map(salvage_message).collect();
        trace!(target: "feed.http", offset, limit, received = messages.len(), "fetched page");
        Ok(messages)
    }

    pub async fn post_message(&self, content: &str) -> Result<(), HttpError> {
        let res = self
            .http
            .post(self.base.clone())
            .json(&SubmitBody { content })
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(HttpError::UnexpectedStatus { status, body })
    }
}

/// One message per array element, even when an element is malformed: the
/// pager reads a short page as the end of history, so the count must match
/// what the server sent. Fields of the wrong type are left empty and the
/// record is rejected during merge.
fn salvage_message(item: Value) -> RawMessage {
    match RawMessage::deserialize(&item) {
        Ok(message) => message,
        Err(err) => {
            debug!(target: "feed.http", error = %err, kind = kind_of(&item), "salvaging malformed message");
            let Value::Object(mut fields) = item else {
                return RawMessage::default();
            };
            let text = |value: Option<Value>| match value {
                Some(Value::String(text)) => Some(text),
                _ => None,
            };
            RawMessage {
                content: text(fields.remove("content")),
                posted_at: text(fields.remove("postedAt")),
                author_ref: fields.remove("telegramId").filter(|value| !value.is_null()),
            }
        }
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[async_trait]
impl FeedTransport for HttpFeedClient {
    async fn fetch_messages(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        Ok(self.fetch_page(offset, limit).await?)
    }

    async fn submit_message(&self, content: &str) -> Result<(), TransportError> {
        Ok(self.post_message(content).await?)
    }
}
