//! Backward history paging.

use tracing::{debug, info};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Idle,
    /// A history page is in flight; `offset` is the snapshot taken at trigger time.
    LoadingOlder { offset: usize },
    /// The server returned a short page. Terminal until `reset`.
    Exhausted,
}

/// The window a history fetch should ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct PaginationController {
    state: PaginationState,
    page_size: usize,
}

impl PaginationController {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: PaginationState::Idle,
            page_size: page_size.max(1),
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, PaginationState::LoadingOlder { .. })
    }

    pub fn has_more(&self) -> bool {
        self.state != PaginationState::Exhausted
    }

    /// Moves `Idle -> LoadingOlder` and returns the request to issue, or `None`
    /// when a page is already in flight, history is exhausted, or nothing has
    /// loaded yet to page behind.
    pub fn try_begin(&mut self, confirmed_len: usize) -> Option<PageRequest> {
        if self.state != PaginationState::Idle || confirmed_len == 0 {
            return None;
        }
        self.state = PaginationState::LoadingOlder {
            offset: confirmed_len,
        };
        debug!(target: "feed.pagination", offset = confirmed_len, limit = self.page_size, "loading older history");
        Some(PageRequest {
            offset: confirmed_len,
            limit: self.page_size,
        })
    }

    /// Applies the result of the in-flight page. `received` is the raw number of
    /// records the server returned.
    pub fn complete(&mut self, received: usize) -> PaginationState {
        if !self.is_loading() {
            return self.state;
        }
        self.state = if received < self.page_size {
            info!(target: "feed.pagination", received, "history exhausted");
            PaginationState::Exhausted
        } else {
            PaginationState::Idle
        };
        self.state
    }

    /// The page failed; go back to `Idle` so a later scroll can retry.
    pub fn abort(&mut self) {
        if self.is_loading() {
            self.state = PaginationState::Idle;
        }
    }

    pub fn reset(&mut self) {
        self.state = PaginationState::Idle;
    }
}

impl Default for PaginationController {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_page_before_first_load() {
        let mut pager = PaginationController::default();
        assert_eq!(pager.try_begin(0), None);
        assert_eq!(pager.state(), PaginationState::Idle);
    }

    #[test]
    fn offset_is_snapshotted_and_second_trigger_is_ignored() {
        let mut pager = PaginationController::new(50);
        let request = pager.try_begin(50).expect("request");
        assert_eq!(request, PageRequest { offset: 50, limit: 50 });
        assert!(pager.is_loading());

        // A poll grew the store meanwhile; the in-flight window must not move
        // and no second page may start.
        assert_eq!(pager.try_begin(53), None);
        assert_eq!(pager.state(), PaginationState::LoadingOlder { offset: 50 });
    }

    #[test]
    fn full_page_returns_to_idle_short_page_exhausts() {
        let mut pager = PaginationController::new(50);
        pager.try_begin(50);
        assert_eq!(pager.complete(50), PaginationState::Idle);
        assert!(pager.has_more());

        pager.try_begin(100);
        assert_eq!(pager.complete(30), PaginationState::Exhausted);
        assert!(!pager.has_more());
        assert_eq!(pager.try_begin(130), None);
    }

    #[test]
    fn abort_allows_retry_and_reset_reopens_history() {
        let mut pager = PaginationController::new(10);
        pager.try_begin(10);
        pager.abort();
        assert_eq!(pager.state(), PaginationState::Idle);
        assert!(pager.try_begin(10).is_some());

        pager.complete(0);
        assert_eq!(pager.state(), PaginationState::Exhausted);
        pager.reset();
        assert!(pager.has_more());
    }
}
