use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::record::RawMessage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// The network side the engine consumes. Implementations perform the request
/// and decode the body; ordering and validation are the engine's job.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Returns up to `limit` records starting `offset` records back from the
    /// newest, in any order.
    async fn fetch_messages(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Fire-and-confirm: success carries no record; the message shows up in a
    /// later fetch, or never if the server withholds it.
    async fn submit_message(&self, content: &str) -> Result<(), TransportError>;
}

/// In-memory feed server for tests and offline wiring.
///
/// Published messages are served newest-first, the way the chat API pages.
/// Scripted responses, failures, moderation, and latency can be layered on top.
#[derive(Default)]
pub struct InMemoryTransport {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    feed: Vec<RawMessage>,
    scripted: VecDeque<Result<Vec<RawMessage>, TransportError>>,
    submit_failures: VecDeque<TransportError>,
    moderated: HashSet<String>,
    latency: Option<Duration>,
    fetch_calls: Vec<(usize, usize)>,
    submissions: Vec<String>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a message to the server-side feed as the newest entry.
    pub fn publish(&self, message: RawMessage) {
        self.inner.lock().feed.push(message);
    }

    /// The next fetch returns `response` instead of reading the feed.
    pub fn script_fetch(&self, response: Result<Vec<RawMessage>, TransportError>) {
        self.inner.lock().scripted.push_back(response);
    }

    pub fn fail_next_submit(&self, error: TransportError) {
        self.inner.lock().submit_failures.push_back(error);
    }

    /// Submissions with this content succeed but never appear in the feed.
    pub fn moderate(&self, content: impl Into<String>) {
        self.inner.lock().moderated.insert(content.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    pub fn fetch_calls(&self) -> Vec<(usize, usize)> {
        self.inner.lock().fetch_calls.clone()
    }

    pub fn submissions(&self) -> Vec<String> {
        self.inner.lock().submissions.clone()
    }

    fn latency(&self) -> Option<Duration> {
        self.inner.lock().latency
    }
}

#[async_trait]
impl FeedTransport for InMemoryTransport {
    async fn fetch_messages(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.inner.lock().fetch_calls.push((offset, limit));
        if let Some(delay) = self.latency() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.inner.lock();
        if let Some(response) = state.scripted.pop_front() {
            return response;
        }
        Ok(state
            .feed
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn submit_message(&self, content: &str) -> Result<(), TransportError> {
        if let Some(delay) = self.latency() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.inner.lock();
        state.submissions.push(content.to_string());
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        if !state.moderated.contains(content) {
            let stamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|err| TransportError::Decode(err.to_string()))?;
            state.feed.push(RawMessage::new(content, stamp));
        }
        Ok(())
    }
}
