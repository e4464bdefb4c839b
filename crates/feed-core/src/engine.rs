//! The presentation-facing facade that ties the store, pager, poller, sender,
//! and scroll anchor to a transport.

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::{ConfigError, FeedConfig};
use crate::pagination::{PageRequest, PaginationController, PaginationState};
use crate::polling::{PollingHandle, PollingScheduler};
use crate::record::{reply_link, reply_prefix, LocalId, RawMessage};
use crate::scroll::{Mutation, ScrollAdjustment, ScrollAnchor, ViewportMetrics};
use crate::send::{OptimisticSendController, SendOutcome};
use crate::store::{MergeOrigin, MergeOutcome, MessageStore, RenderItem};
use crate::transport::{FeedTransport, TransportError};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The render-ready sequence changed.
    Updated { mutation: Mutation },
    /// A submit failed; the pending record has been rolled back (or marked
    /// failed when failed sends are kept).
    SendFailed {
        local_id: LocalId,
        content: String,
        reason: TransportError,
    },
    HistoryExhausted,
    FetchFailed {
        origin: MergeOrigin,
        reason: TransportError,
    },
}

pub(crate) struct FeedState {
    pub(crate) store: MessageStore,
    pub(crate) pagination: PaginationController,
    pub(crate) anchor: ScrollAnchor,
    unsettled: Option<Mutation>,
}

impl FeedState {
    pub(crate) fn record_mutation(&mut self, mutation: Mutation) {
        // A prepend still needs its shift even if a poll lands before the frame.
        if self.unsettled != Some(Mutation::Prepended) {
            self.unsettled = Some(mutation);
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) transport: Arc<dyn FeedTransport>,
    pub(crate) config: FeedConfig,
    pub(crate) state: Mutex<FeedState>,
    pub(crate) sender: OptimisticSendController,
    events: broadcast::Sender<FeedEvent>,
}

impl EngineInner {
    pub(crate) fn emit(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn apply_forward(
        &self,
        result: Result<Vec<RawMessage>, TransportError>,
    ) -> Result<MergeOutcome, TransportError> {
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                warn!(target: "feed.polling", error = %err, "forward poll failed");
                self.emit(FeedEvent::FetchFailed {
                    origin: MergeOrigin::Forward,
                    reason: err.clone(),
                });
                return Err(err);
            }
        };
        let outcome = {
            let mut state = self.state.lock();
            let outcome = state.store.merge(batch, MergeOrigin::Forward);
            if let Some(mutation) = forward_mutation(&outcome) {
                state.record_mutation(mutation);
            }
            outcome
        };
        if let Some(mutation) = forward_mutation(&outcome) {
            self.emit(FeedEvent::Updated { mutation });
        }
        Ok(outcome)
    }

    fn apply_backward(
        &self,
        result: Result<Vec<RawMessage>, TransportError>,
    ) -> Result<MergeOutcome, TransportError> {
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                warn!(target: "feed.pagination", error = %err, "history fetch failed");
                {
                    let mut state = self.state.lock();
                    state.pagination.abort();
                    state.anchor.discard_capture();
                }
                self.emit(FeedEvent::FetchFailed {
                    origin: MergeOrigin::Backward,
                    reason: err.clone(),
                });
                return Err(err);
            }
        };
        let received = batch.len();
        let (outcome, pager_state) = {
            let mut state = self.state.lock();
            let outcome = state.store.merge(batch, MergeOrigin::Backward);
            let pager_state = state.pagination.complete(received);
            if outcome.inserted > 0 {
                state.record_mutation(Mutation::Prepended);
            } else {
                state.anchor.discard_capture();
                if outcome.changed() {
                    state.record_mutation(Mutation::PendingChanged);
                }
            }
            (outcome, pager_state)
        };
        if outcome.inserted > 0 {
            self.emit(FeedEvent::Updated {
                mutation: Mutation::Prepended,
            });
        } else if outcome.changed() {
            self.emit(FeedEvent::Updated {
                mutation: Mutation::PendingChanged,
            });
        }
        if pager_state == PaginationState::Exhausted {
            self.emit(FeedEvent::HistoryExhausted);
        }
        Ok(outcome)
    }
}

fn forward_mutation(outcome: &MergeOutcome) -> Option<Mutation> {
    if outcome.inserted > 0 {
        Some(Mutation::Appended)
    } else if outcome.changed() {
        Some(Mutation::PendingChanged)
    } else {
        None
    }
}

/// Forward poll for tasks that must not keep the engine alive. The result is
/// discarded if the engine was torn down while the request was in flight.
pub(crate) async fn poll_detached(
    engine: Weak<EngineInner>,
    transport: Arc<dyn FeedTransport>,
    limit: usize,
) {
    let result = transport.fetch_messages(0, limit).await;
    match engine.upgrade() {
        Some(inner) => {
            let _ = inner.apply_forward(result);
        }
        None => debug!(target: "feed.polling", "engine gone; discarding poll result"),
    }
}

async fn page_detached(
    engine: Weak<EngineInner>,
    transport: Arc<dyn FeedTransport>,
    request: PageRequest,
) {
    let result = transport
        .fetch_messages(request.offset, request.limit)
        .await;
    match engine.upgrade() {
        Some(inner) => {
            let _ = inner.apply_backward(result);
        }
        None => debug!(target: "feed.pagination", "engine gone; discarding history page"),
    }
}

/// Spawns onto the current Tokio runtime, or reports `false` when there is none.
pub(crate) fn spawn_detached<F>(task: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
            true
        }
        Err(err) => {
            warn!(target: "feed.engine", error = %err, "no async runtime available");
            false
        }
    }
}

/// Client-side view of the feed. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct FeedEngine {
    inner: Arc<EngineInner>,
}

impl FeedEngine {
    /// Builds an engine over `transport`. Rejects a config the poller or pager
    /// could not run with.
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        config: FeedConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = FeedState {
            store: MessageStore::new(),
            pagination: PaginationController::new(config.page_size),
            anchor: ScrollAnchor::new(config.near_bottom_threshold),
            unsettled: None,
        };
        let sender = OptimisticSendController::new(config.keep_failed_sends);
        Ok(Self {
            inner: Arc::new(EngineInner {
                transport,
                config,
                state: Mutex::new(state),
                sender,
                events,
            }),
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.events.subscribe()
    }

    pub fn render(&self) -> Vec<RenderItem> {
        self.inner.state.lock().store.render()
    }

    pub fn confirmed_len(&self) -> usize {
        self.inner.state.lock().store.confirmed_len()
    }

    pub fn is_loading_history(&self) -> bool {
        self.inner.state.lock().pagination.is_loading()
    }

    pub fn has_more(&self) -> bool {
        self.inner.state.lock().pagination.has_more()
    }

    pub fn pagination_state(&self) -> PaginationState {
        self.inner.state.lock().pagination.state()
    }

    pub fn is_sending(&self) -> bool {
        self.inner.sender.is_sending()
    }

    /// Starts the repeating forward poll. Dropping or stopping the handle
    /// cancels the timer.
    pub fn start_polling(&self) -> PollingHandle {
        PollingScheduler::new(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.transport),
            self.inner.config.poll_interval,
            self.inner.config.overlap_policy,
            self.inner.config.page_size,
        )
        .start()
    }

    /// One forward fetch outside the schedule.
    pub async fn poll_now(&self) -> Result<MergeOutcome, TransportError> {
        let result = self
            .inner
            .transport
            .fetch_messages(0, self.inner.config.page_size)
            .await;
        self.inner.apply_forward(result)
    }

    /// Fetches one page of older history. `Ok(None)` means no fetch was issued:
    /// a page is already in flight, history is exhausted, or nothing is loaded.
    pub async fn load_older(&self) -> Result<Option<MergeOutcome>, TransportError> {
        let request = {
            let mut state = self.inner.state.lock();
            let confirmed_len = state.store.confirmed_len();
            state.pagination.try_begin(confirmed_len)
        };
        let Some(request) = request else {
            return Ok(None);
        };
        let result = self
            .inner
            .transport
            .fetch_messages(request.offset, request.limit)
            .await;
        self.inner.apply_backward(result).map(Some)
    }

    /// Optimistically sends `text`; see [`OptimisticSendController`].
    pub async fn send(&self, text: &str) -> SendOutcome {
        self.inner.sender.send(&self.inner, text).await
    }

    /// Scroll hook. Tracks bottom proximity and, at the top edge, starts a
    /// history page in the background. Returns whether a page was started.
    pub fn on_viewport_scrolled(
        &self,
        scroll_top: f64,
        scroll_height: f64,
        client_height: f64,
    ) -> bool {
        let metrics = ViewportMetrics::new(scroll_top, scroll_height, client_height);
        let request = {
            let mut state = self.inner.state.lock();
            state.anchor.observe(&metrics);
            if !metrics.at_top() {
                return false;
            }
            let confirmed_len = state.store.confirmed_len();
            let request = state.pagination.try_begin(confirmed_len);
            if request.is_some() {
                state.anchor.capture_before_prepend(scroll_height);
            }
            request
        };
        let Some(request) = request else {
            return false;
        };
        let started = spawn_detached(page_detached(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.transport),
            request,
        ));
        if !started {
            let mut state = self.inner.state.lock();
            state.pagination.abort();
            state.anchor.discard_capture();
        }
        started
    }

    /// Call after the presentation layer has laid out the latest `render()`.
    pub fn settle_viewport(&self, new_scroll_height: f64) -> ScrollAdjustment {
        let mut state = self.inner.state.lock();
        match state.unsettled.take() {
            Some(mutation) => state.anchor.settle(new_scroll_height, mutation),
            None => ScrollAdjustment::Keep,
        }
    }

    /// Reply-link line for `item`, if it carries an external reference.
    pub fn reply_link(&self, item: &RenderItem) -> Option<String> {
        item.reply_link(&self.inner.config.reply_link_base)
    }

    /// Draft text with a reply link to `author_ref` on its first line.
    pub fn compose_reply(&self, author_ref: &str, draft: &str) -> String {
        reply_prefix(
            &reply_link(&self.inner.config.reply_link_base, author_ref),
            draft,
        )
    }
}
