//! Confirmed and pending message sequences, and the merge that keeps them
//! consistent.

use std::collections::HashSet;

use time::OffsetDateTime;
use tracing::debug;

use crate::identity::IdentityKey;
use crate::record::{
    reply_link, LocalId, MessageRecord, PendingRecord, PendingStatus, RawMessage,
};

/// Where a batch came from, which decides the splice side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrigin {
    /// Forward poll: new records append to the back.
    Forward,
    /// History page: new records prepend to the front.
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub origin: MergeOrigin,
    pub received: usize,
    pub dropped: usize,
    pub inserted: usize,
    pub promoted: Vec<LocalId>,
}

impl MergeOutcome {
    /// False for the no-op result: nothing new and no pending record promoted.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || !self.promoted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Confirmed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderItem {
    pub kind: RenderKind,
    pub content: String,
    pub timestamp: OffsetDateTime,
    pub author_ref: Option<String>,
    pub local_id: Option<LocalId>,
}

impl RenderItem {
    pub fn reply_link(&self, base: &str) -> Option<String> {
        self.author_ref
            .as_deref()
            .map(|reference| reply_link(base, reference))
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    confirmed: Vec<MessageRecord>,
    index: HashSet<IdentityKey>,
    pending: Vec<PendingRecord>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirmed(&self) -> &[MessageRecord] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingRecord] {
        &self.pending
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.index.contains(key)
    }

    /// Folds a fetched batch into the confirmed sequence and promotes any
    /// pending record whose content the batch carries.
    ///
    /// Malformed records are dropped individually; the rest of the batch still
    /// applies. The batch may arrive in any order.
    pub fn merge<I>(&mut self, batch: I, origin: MergeOrigin) -> MergeOutcome
    where
        I: IntoIterator<Item = RawMessage>,
    {
        let mut received = 0usize;
        let mut valid = Vec::new();
        // Promotion only needs the text, so records rejected below still count.
        let mut echoed: HashSet<String> = HashSet::new();
        for raw in batch {
            received += 1;
            if let Some(content) = raw.content.as_deref() {
                if !content.trim().is_empty() && !self.pending.is_empty() {
                    echoed.insert(content.to_owned());
                }
            }
            match MessageRecord::try_from(raw) {
                Ok(record) => valid.push(record),
                Err(err) => {
                    debug!(target: "feed.store", error = %err, "dropping malformed record");
                }
            }
        }
        let dropped = received - valid.len();
        valid.sort_by_key(MessageRecord::posted_at);

        let promoted = self.promote(&echoed);

        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for record in valid {
            let key = record.identity_key();
            if self.index.contains(&key) || !seen.insert(key) {
                continue;
            }
            fresh.push(record);
        }
        let inserted = fresh.len();

        if inserted > 0 {
            self.index.extend(fresh.iter().map(MessageRecord::identity_key));
            let seam = match origin {
                MergeOrigin::Backward => {
                    let seam = fresh.len();
                    fresh.extend(self.confirmed.drain(..));
                    self.confirmed = fresh;
                    seam
                }
                MergeOrigin::Forward => {
                    let seam = self.confirmed.len();
                    self.confirmed.extend(fresh);
                    seam
                }
            };
            self.repair_seam(seam);
        }

        debug!(
            target: "feed.store",
            ?origin,
            received,
            dropped,
            inserted,
            promoted = promoted.len(),
            total = self.confirmed.len(),
            "merged batch"
        );

        MergeOutcome {
            origin,
            received,
            dropped,
            inserted,
            promoted,
        }
    }

    /// Both halves of a splice are sorted, so only the join can break order.
    /// When it does (a page and a poll raced across the same boundary) a stable
    /// sort restores it; that input is two sorted runs, which the sort merges in
    /// linear time.
    fn repair_seam(&mut self, seam: usize) {
        if seam == 0 || seam >= self.confirmed.len() {
            return;
        }
        if self.confirmed[seam - 1].posted_at() > self.confirmed[seam].posted_at() {
            debug!(target: "feed.store", seam, "splice broke ordering; re-sorting");
            self.confirmed.sort_by_key(MessageRecord::posted_at);
        }
    }

    fn promote(&mut self, echoed: &HashSet<String>) -> Vec<LocalId> {
        if self.pending.is_empty() || echoed.is_empty() {
            return Vec::new();
        }
        let mut promoted = Vec::new();
        self.pending.retain(|pending| {
            if echoed.contains(pending.content()) {
                promoted.push(pending.local_id());
                false
            } else {
                true
            }
        });
        promoted
    }

    pub fn add_pending(&mut self, record: PendingRecord) {
        self.pending.push(record);
    }

    pub fn mark_submitted(&mut self, local_id: LocalId) -> bool {
        self.set_status(local_id, PendingStatus::Submitted)
    }

    pub fn mark_failed(&mut self, local_id: LocalId) -> bool {
        self.set_status(local_id, PendingStatus::Failed)
    }

    fn set_status(&mut self, local_id: LocalId, status: PendingStatus) -> bool {
        match self.pending.iter_mut().find(|p| p.local_id() == local_id) {
            Some(record) => {
                record.set_status(status);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, local_id: LocalId) -> Option<PendingRecord> {
        let position = self.pending.iter().position(|p| p.local_id() == local_id)?;
        Some(self.pending.remove(position))
    }

    /// Confirmed records in time order, then pending records in submission order.
    pub fn render(&self) -> Vec<RenderItem> {
        let confirmed = self.confirmed.iter().map(|record| RenderItem {
            kind: RenderKind::Confirmed,
            content: record.content().to_string(),
            timestamp: record.posted_at(),
            author_ref: record.author_ref().map(str::to_string),
            local_id: None,
        });
        let pending = self.pending.iter().map(|record| RenderItem {
            kind: match record.status() {
                PendingStatus::Failed => RenderKind::Failed,
                PendingStatus::Submitting | PendingStatus::Submitted => RenderKind::Pending,
            },
            content: record.content().to_string(),
            timestamp: record.local_timestamp(),
            author_ref: None,
            local_id: Some(record.local_id()),
        });
        confirmed.chain(pending).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, minute: u8) -> RawMessage {
        RawMessage::new(content, format!("2024-01-01T00:{minute:02}:00Z"))
    }

    fn contents(store: &MessageStore) -> Vec<String> {
        store
            .confirmed()
            .iter()
            .map(|r| r.content().to_string())
            .collect()
    }

    fn assert_ordered(store: &MessageStore) {
        assert!(store
            .confirmed()
            .windows(2)
            .all(|pair| pair[0].posted_at() <= pair[1].posted_at()));
    }

    #[test]
    fn merging_the_same_batch_twice_is_idempotent() {
        let mut store = MessageStore::new();
        let batch = vec![msg("a", 1), msg("b", 2)];
        let first = store.merge(batch.clone(), MergeOrigin::Forward);
        assert_eq!(first.inserted, 2);
        let snapshot = store.confirmed().to_vec();

        let second = store.merge(batch, MergeOrigin::Forward);
        assert!(!second.changed());
        assert_eq!(store.confirmed(), snapshot.as_slice());
    }

    #[test]
    fn sorts_unordered_batches_and_dedups_within_a_batch() {
        let mut store = MessageStore::new();
        let outcome = store.merge(
            vec![msg("c", 3), msg("a", 1), msg("b", 2), msg("a", 1)],
            MergeOrigin::Forward,
        );
        assert_eq!(outcome.inserted, 3);
        assert_eq!(contents(&store), ["a", "b", "c"]);
    }

    #[test]
    fn backward_batches_prepend_and_forward_batches_append() {
        let mut store = MessageStore::new();
        store.merge(vec![msg("mid", 10)], MergeOrigin::Forward);
        store.merge(vec![msg("old", 1), msg("older", 0)], MergeOrigin::Backward);
        store.merge(vec![msg("new", 20)], MergeOrigin::Forward);
        assert_eq!(contents(&store), ["older", "old", "mid", "new"]);
    }

    #[test]
    fn racing_splices_keep_time_order() {
        let mut store = MessageStore::new();
        store.merge(vec![msg("b", 5), msg("c", 6)], MergeOrigin::Forward);
        // A history page resolving late that overlaps the poll's window.
        store.merge(vec![msg("a", 4), msg("late", 7)], MergeOrigin::Backward);
        assert_ordered(&store);
        assert_eq!(contents(&store), ["a", "b", "c", "late"]);
        // A poll delivering something older than the tail.
        store.merge(vec![msg("early", 0)], MergeOrigin::Forward);
        assert_ordered(&store);
        assert_eq!(contents(&store).first().map(String::as_str), Some("early"));
    }

    #[test]
    fn malformed_records_are_dropped_without_blocking_the_batch() {
        let mut store = MessageStore::new();
        let outcome = store.merge(
            vec![
                msg("ok", 1),
                RawMessage::default(),
                RawMessage::new("bad time", "not-a-date"),
                msg("  ", 2),
                msg("fine", 3),
            ],
            MergeOrigin::Forward,
        );
        assert_eq!(outcome.received, 5);
        assert_eq!(outcome.dropped, 3);
        assert_eq!(contents(&store), ["ok", "fine"]);
    }

    #[test]
    fn known_duplicate_still_promotes_pending() {
        let mut store = MessageStore::new();
        store.merge(vec![msg("hello", 1)], MergeOrigin::Forward);
        store.add_pending(PendingRecord::new(LocalId(1), "hello"));

        let outcome = store.merge(vec![msg("hello", 1)], MergeOrigin::Forward);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.promoted, vec![LocalId(1)]);
        assert!(outcome.changed());
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn backward_batches_promote_too() {
        let mut store = MessageStore::new();
        store.add_pending(PendingRecord::new(LocalId(3), "from history"));
        store.merge(vec![msg("from history", 0)], MergeOrigin::Backward);
        assert!(store.pending().is_empty());
    }

    #[test]
    fn echo_with_unusable_timestamp_still_promotes() {
        let mut store = MessageStore::new();
        store.add_pending(PendingRecord::new(LocalId(1), "hi"));
        store.add_pending(PendingRecord::new(LocalId(2), "bye"));
        store.add_pending(PendingRecord::new(LocalId(3), "  "));

        let outcome = store.merge(
            vec![
                RawMessage {
                    content: Some("hi".into()),
                    ..RawMessage::default()
                },
                RawMessage::new("bye", "yesterday"),
                RawMessage::new("  ", "2024-01-01T00:00:00Z"),
            ],
            MergeOrigin::Forward,
        );
        assert_eq!(outcome.dropped, 3);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.promoted, vec![LocalId(1), LocalId(2)]);
        assert!(outcome.changed());
        assert_eq!(store.confirmed_len(), 0);
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn render_puts_pending_after_confirmed_regardless_of_time() {
        let mut store = MessageStore::new();
        store.add_pending(PendingRecord::new(LocalId(1), "mine"));
        store.add_pending(PendingRecord::new(LocalId(2), "also mine"));
        // Far-future confirmed record still sorts before pending in render.
        store.merge(
            vec![RawMessage::new("theirs", "2999-01-01T00:00:00Z")],
            MergeOrigin::Forward,
        );
        store.mark_failed(LocalId(2));

        let rendered = store.render();
        let kinds: Vec<_> = rendered.iter().map(|item| item.kind).collect();
        assert_eq!(
            kinds,
            [RenderKind::Confirmed, RenderKind::Pending, RenderKind::Failed]
        );
        assert_eq!(rendered[1].local_id, Some(LocalId(1)));
    }

    #[test]
    fn remove_and_status_changes_target_one_record() {
        let mut store = MessageStore::new();
        store.add_pending(PendingRecord::new(LocalId(1), "x"));
        store.add_pending(PendingRecord::new(LocalId(2), "y"));

        assert!(store.mark_submitted(LocalId(2)));
        assert_eq!(store.pending()[1].status(), PendingStatus::Submitted);
        assert_eq!(store.pending()[0].status(), PendingStatus::Submitting);

        let removed = store.remove(LocalId(1)).expect("removed");
        assert_eq!(removed.content(), "x");
        assert!(store.remove(LocalId(1)).is_none());
        assert!(!store.mark_failed(LocalId(9)));
    }
}
