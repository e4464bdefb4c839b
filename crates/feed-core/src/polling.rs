//! The repeating forward refresh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::engine::{poll_detached, spawn_detached, EngineInner};
use crate::transport::FeedTransport;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// What to do when a tick fires while the previous poll is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Fire anyway; merge tolerates duplicate delivery.
    Allow,
    /// Skip the tick.
    SkipIfInFlight,
}

pub struct PollingScheduler {
    engine: Weak<EngineInner>,
    transport: Arc<dyn FeedTransport>,
    interval: Duration,
    policy: OverlapPolicy,
    limit: usize,
}

impl PollingScheduler {
    pub(crate) fn new(
        engine: Weak<EngineInner>,
        transport: Arc<dyn FeedTransport>,
        interval: Duration,
        policy: OverlapPolicy,
        limit: usize,
    ) -> Self {
        Self {
            engine,
            transport,
            interval,
            policy,
            limit,
        }
    }

    /// Spawns the ticker. The first tick fires immediately, which doubles as
    /// the initial load.
    pub fn start(self) -> PollingHandle {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(target: "feed.polling", error = %err, "no async runtime; polling disabled");
                return PollingHandle { task: None };
            }
        };
        debug!(
            target: "feed.polling",
            interval_ms = self.interval.as_millis() as u64,
            policy = ?self.policy,
            "starting poller"
        );
        let task = handle.spawn(self.run());
        PollingHandle { task: Some(task) }
    }

    async fn run(self) {
        let in_flight = Arc::new(AtomicBool::new(false));
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.engine.strong_count() == 0 {
                debug!(target: "feed.polling", "engine gone; stopping poller");
                break;
            }
            if self.policy == OverlapPolicy::SkipIfInFlight
                && in_flight.swap(true, Ordering::AcqRel)
            {
                debug!(target: "feed.polling", "previous poll still in flight; skipping tick");
                continue;
            }
            let engine = self.engine.clone();
            let transport = Arc::clone(&self.transport);
            let in_flight = Arc::clone(&in_flight);
            let limit = self.limit;
            spawn_detached(async move {
                poll_detached(engine, transport, limit).await;
                in_flight.store(false, Ordering::Release);
            });
        }
    }
}

/// Owns the ticker task; stopping or dropping it cancels the timer. Fetches
/// already in flight run to completion.
#[derive(Debug)]
pub struct PollingHandle {
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(target: "feed.polling", "poller stopped");
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::engine::FeedEngine;
    use crate::record::RawMessage;
    use crate::transport::InMemoryTransport;

    fn config(interval_ms: u64, policy: OverlapPolicy) -> FeedConfig {
        FeedConfig {
            poll_interval: Duration::from_millis(interval_ms),
            overlap_policy: policy,
            ..FeedConfig::default()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_loads_immediately_then_repeats() {
        let transport = InMemoryTransport::new();
        transport.publish(RawMessage::new("hi", "2024-01-01T00:00:00Z"));
        let engine =
            FeedEngine::new(transport.clone(), config(3_000, OverlapPolicy::Allow)).unwrap();
        let _poller = engine.start_polling();

        settle().await;
        assert_eq!(engine.confirmed_len(), 1);
        assert_eq!(transport.fetch_calls().len(), 1);

        tokio::time::advance(Duration::from_millis(3_000)).await;
        settle().await;
        tokio::time::advance(Duration::from_millis(3_000)).await;
        settle().await;
        assert_eq!(transport.fetch_calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_timer() {
        let transport = InMemoryTransport::new();
        let engine =
            FeedEngine::new(transport.clone(), config(1_000, OverlapPolicy::Allow)).unwrap();
        let mut poller = engine.start_polling();
        settle().await;
        assert!(poller.is_running());

        poller.stop();
        assert!(!poller.is_running());
        tokio::time::advance(Duration::from_millis(5_000)).await;
        settle().await;
        assert_eq!(transport.fetch_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels_the_timer() {
        let transport = InMemoryTransport::new();
        let engine =
            FeedEngine::new(transport.clone(), config(1_000, OverlapPolicy::Allow)).unwrap();
        {
            let _poller = engine.start_polling();
            settle().await;
        }
        tokio::time::advance(Duration::from_millis(5_000)).await;
        settle().await;
        assert_eq!(transport.fetch_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_follow_the_policy() {
        for (policy, expected) in [
            (OverlapPolicy::Allow, 3),
            (OverlapPolicy::SkipIfInFlight, 1),
        ] {
            let transport = InMemoryTransport::new();
            transport.set_latency(Duration::from_millis(2_500));
            let engine =
                FeedEngine::new(transport.clone(), config(1_000, policy)).unwrap();
            let _poller = engine.start_polling();

            // Ticks at 0, 1000, 2000; the first fetch is still sleeping.
            for _ in 0..2 {
                settle().await;
                tokio::time::advance(Duration::from_millis(1_000)).await;
            }
            settle().await;
            assert_eq!(transport.fetch_calls().len(), expected, "{policy:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_poll_after_teardown_is_discarded() {
        let transport = InMemoryTransport::new();
        transport.set_latency(Duration::from_millis(500));
        transport.publish(RawMessage::new("late", "2024-01-01T00:00:00Z"));
        let engine =
            FeedEngine::new(transport.clone(), config(1_000, OverlapPolicy::Allow)).unwrap();
        let poller = engine.start_polling();
        settle().await;
        assert_eq!(transport.fetch_calls().len(), 1);

        drop(poller);
        drop(engine);
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(transport.fetch_calls().len(), 1);
    }
}
