use time::OffsetDateTime;

use crate::record::MessageRecord;

/// Dedup token for confirmed messages.
///
/// Two records with the same content posted at the same instant are the same
/// logical message. The timestamp is held as UTC nanoseconds so that two wire
/// spellings of one instant (`...00Z`, `...00.000+00:00`) compare equal, and the
/// pair is kept structured so no choice of content can alias another key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    content: String,
    posted_at_nanos: i128,
}

impl IdentityKey {
    pub fn new(content: impl Into<String>, posted_at: OffsetDateTime) -> Self {
        Self {
            content: content.into(),
            posted_at_nanos: posted_at.unix_timestamp_nanos(),
        }
    }

    pub fn of(record: &MessageRecord) -> Self {
        Self::new(record.content(), record.posted_at())
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
