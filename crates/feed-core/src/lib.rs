//! Client-side synchronization for a polled chat feed.
//!
//! The engine keeps two sequences: messages the server has confirmed, ordered
//! by their posting time, and messages sent from this client that the server
//! has not echoed back yet. Forward polls, backward history pages, and local
//! sends all funnel through [`MessageStore::merge`] and friends so that:
//! - confirmed messages stay in time order and are never duplicated
//! - a pending message disappears the moment its confirmed copy arrives
//! - only one history page is ever in flight
//! - the viewport stays put when older history is prepended
//!
//! Networking is behind [`FeedTransport`]; presentation talks to [`FeedEngine`].

pub mod config;
pub mod engine;
pub mod identity;
pub mod pagination;
pub mod polling;
pub mod record;
pub mod scroll;
pub mod send;
pub mod store;
pub mod transport;

pub use config::{ConfigError, FeedConfig};
pub use engine::{FeedEngine, FeedEvent};
pub use identity::IdentityKey;
pub use pagination::{PageRequest, PaginationController, PaginationState};
pub use polling::{OverlapPolicy, PollingHandle, PollingScheduler};
pub use record::{LocalId, MessageRecord, PendingRecord, PendingStatus, RawMessage, RecordError};
pub use scroll::{Mutation, ScrollAdjustment, ScrollAnchor, ViewportMetrics};
pub use send::{OptimisticSendController, SendOutcome};
pub use store::{MergeOrigin, MergeOutcome, MessageStore, RenderItem, RenderKind};
pub use transport::{FeedTransport, InMemoryTransport, TransportError};
