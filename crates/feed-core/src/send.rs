//! Optimistic sends: show the message immediately, submit it, then either let
//! the next poll promote it or roll it back.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::engine::{EngineInner, FeedEvent};
use crate::record::{LocalId, PendingRecord};
use crate::scroll::Mutation;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Skipped,
    /// The server accepted the message. It stays pending until a poll returns it.
    Submitted(LocalId),
    /// The submit failed and the pending record was rolled back.
    RolledBack {
        local_id: LocalId,
        reason: TransportError,
    },
}

pub struct OptimisticSendController {
    next_local_id: AtomicU64,
    in_flight: AtomicUsize,
    keep_failed: bool,
}

/// Decrements the in-flight count on every exit path.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl OptimisticSendController {
    pub(crate) fn new(keep_failed: bool) -> Self {
        Self {
            next_local_id: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            keep_failed,
        }
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    fn allocate(&self) -> LocalId {
        LocalId(self.next_local_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) async fn send(&self, engine: &EngineInner, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Skipped;
        }
        let record = PendingRecord::new(self.allocate(), text);
        let local_id = record.local_id();
        {
            let mut state = engine.state.lock();
            state.store.add_pending(record);
            state.anchor.follow_bottom();
            state.record_mutation(Mutation::PendingChanged);
        }
        engine.emit(FeedEvent::Updated {
            mutation: Mutation::PendingChanged,
        });

        let submitted = {
            let _in_flight = InFlight::enter(&self.in_flight);
            engine.transport.submit_message(text).await
        };

        match submitted {
            Ok(()) => {
                engine.state.lock().store.mark_submitted(local_id);
                debug!(target: "feed.send", %local_id, "submitted; polling for confirmation");
                // A failed poll is already reported; the schedule retries it.
                let _ = poll_after_submit(engine).await;
                SendOutcome::Submitted(local_id)
            }
            Err(reason) => {
                warn!(target: "feed.send", %local_id, error = %reason, "submit failed; rolling back");
                {
                    let mut state = engine.state.lock();
                    state.store.mark_failed(local_id);
                    if !self.keep_failed {
                        state.store.remove(local_id);
                    }
                    state.record_mutation(Mutation::PendingChanged);
                }
                engine.emit(FeedEvent::SendFailed {
                    local_id,
                    content: text.to_string(),
                    reason: reason.clone(),
                });
                engine.emit(FeedEvent::Updated {
                    mutation: Mutation::PendingChanged,
                });
                SendOutcome::RolledBack { local_id, reason }
            }
        }
    }
}

async fn poll_after_submit(engine: &EngineInner) -> Result<(), TransportError> {
    let result = engine
        .transport
        .fetch_messages(0, engine.config.page_size)
        .await;
    engine.apply_forward(result).map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::FeedConfig;
    use crate::engine::{FeedEngine, FeedEvent};
    use crate::record::RawMessage;
    use crate::store::RenderKind;
    use crate::transport::{InMemoryTransport, TransportError};

    use super::SendOutcome;

    fn engine(transport: &Arc<InMemoryTransport>, keep_failed_sends: bool) -> FeedEngine {
        FeedEngine::new(
            transport.clone(),
            FeedConfig {
                keep_failed_sends,
                ..FeedConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let transport = InMemoryTransport::new();
        let engine = engine(&transport, false);
        assert_eq!(engine.send("   \n").await, SendOutcome::Skipped);
        assert!(transport.submissions().is_empty());
        assert!(engine.render().is_empty());
    }

    #[tokio::test]
    async fn accepted_send_is_promoted_by_the_follow_up_poll() {
        let transport = InMemoryTransport::new();
        let engine = engine(&transport, false);
        let outcome = engine.send("hello").await;
        assert!(matches!(outcome, SendOutcome::Submitted(_)));

        let rendered = engine.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].kind, RenderKind::Confirmed);
        assert_eq!(rendered[0].content, "hello");
        assert!(!engine.is_sending());
    }

    #[tokio::test]
    async fn moderated_send_stays_pending() {
        let transport = InMemoryTransport::new();
        transport.moderate("shh");
        let engine = engine(&transport, false);
        engine.send("shh").await;

        let rendered = engine.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].kind, RenderKind::Pending);
        // Later polls do not expire it either.
        engine.poll_now().await.unwrap();
        assert_eq!(engine.render().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_rolls_back_and_signals() {
        let transport = InMemoryTransport::new();
        transport.fail_next_submit(TransportError::Request("connection reset".into()));
        let engine = engine(&transport, false);
        let mut events = engine.subscribe();

        let outcome = engine.send("x").await;
        assert!(matches!(outcome, SendOutcome::RolledBack { .. }));
        assert!(engine.render().iter().all(|item| item.content != "x"));

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let FeedEvent::SendFailed { content, .. } = event {
                assert_eq!(content, "x");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        // No automatic retry.
        assert_eq!(transport.submissions(), ["x"]);
        assert!(transport.fetch_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_send_can_stay_visible_when_configured() {
        let transport = InMemoryTransport::new();
        transport.fail_next_submit(TransportError::Status {
            status: 503,
            body: "busy".into(),
        });
        let engine = engine(&transport, true);
        engine.send("retry me").await;
        let rendered = engine.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].kind, RenderKind::Failed);
    }

    #[tokio::test]
    async fn local_ids_are_unique_per_engine() {
        let transport = InMemoryTransport::new();
        transport.moderate("a");
        transport.moderate("b");
        let engine = engine(&transport, false);
        let first = engine.send("a").await;
        let second = engine.send("b").await;
        match (first, second) {
            (SendOutcome::Submitted(a), SendOutcome::Submitted(b)) => assert_ne!(a, b),
            other => panic!("unexpected outcomes {other:?}"),
        }
        transport.publish(RawMessage::new("a", "2024-01-01T00:00:00Z"));
        engine.poll_now().await.unwrap();
        let pending: Vec<_> = engine
            .render()
            .into_iter()
            .filter(|item| item.kind == RenderKind::Pending)
            .map(|item| item.content)
            .collect();
        assert_eq!(pending, ["b"]);
    }
}
