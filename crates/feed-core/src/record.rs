//! Message shapes: what the server sends, what the store admits, and what the
//! sender holds while waiting for confirmation.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::identity::IdentityKey;

/// A message as it arrives on the wire. Every field is optional here;
/// validation happens when converting into a [`MessageRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub posted_at: Option<String>,
    #[serde(default, rename = "telegramId")]
    pub author_ref: Option<serde_json::Value>,
}

impl RawMessage {
    pub fn new(content: impl Into<String>, posted_at: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            posted_at: Some(posted_at.into()),
            author_ref: None,
        }
    }

    pub fn with_author_ref(mut self, author_ref: impl Into<serde_json::Value>) -> Self {
        self.author_ref = Some(author_ref.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record has no content")]
    MissingContent,
    #[error("record has no postedAt timestamp")]
    MissingTimestamp,
    #[error("invalid postedAt timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        source: time::error::Parse,
    },
}

/// A server-confirmed message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    content: String,
    posted_at: OffsetDateTime,
    author_ref: Option<String>,
}

impl MessageRecord {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn posted_at(&self) -> OffsetDateTime {
        self.posted_at
    }

    pub fn author_ref(&self) -> Option<&str> {
        self.author_ref.as_deref()
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::of(self)
    }

    /// Link a reply can point at, if the message carries an external reference.
    pub fn reply_link(&self, base: &str) -> Option<String> {
        self.author_ref
            .as_deref()
            .map(|reference| reply_link(base, reference))
    }
}

impl TryFrom<RawMessage> for MessageRecord {
    type Error = RecordError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let content = raw
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or(RecordError::MissingContent)?;
        let stamp = raw.posted_at.ok_or(RecordError::MissingTimestamp)?;
        let posted_at = OffsetDateTime::parse(stamp.trim(), &Rfc3339)
            .map_err(|source| RecordError::InvalidTimestamp {
                value: stamp.clone(),
                source,
            })?;
        let author_ref = raw.author_ref.and_then(|value| match value {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        });
        Ok(Self {
            content,
            posted_at,
            author_ref,
        })
    }
}

pub fn reply_link(base: &str, author_ref: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), author_ref)
}

/// Puts a reply link on its own line above whatever the user has drafted.
pub fn reply_prefix(link: &str, draft: &str) -> String {
    format!("{link}\n{draft}")
}

/// Per-session identifier for a locally submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    Submitting,
    Submitted,
    Failed,
}

/// A locally sent message that the server has not echoed back yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    local_id: LocalId,
    content: String,
    local_timestamp: OffsetDateTime,
    status: PendingStatus,
}

impl PendingRecord {
    pub fn new(local_id: LocalId, content: impl Into<String>) -> Self {
        Self {
            local_id,
            content: content.into(),
            local_timestamp: OffsetDateTime::now_utc(),
            status: PendingStatus::Submitting,
        }
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn local_timestamp(&self) -> OffsetDateTime {
        self.local_timestamp
    }

    pub fn status(&self) -> PendingStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: PendingStatus) {
        self.status = status;
    }
}
