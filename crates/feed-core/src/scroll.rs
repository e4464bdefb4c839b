//! Viewport policy around feed mutations: pin content across history
//! prepends, follow the bottom only when the reader was already there.

pub const DEFAULT_NEAR_BOTTOM_PX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ViewportMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn at_top(&self) -> bool {
        self.scroll_top <= 0.0
    }

    pub fn distance_from_bottom(&self) -> f64 {
        self.scroll_height - self.scroll_top - self.client_height
    }
}

/// What changed in the rendered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Older history was prepended.
    Prepended,
    /// A forward poll added records.
    Appended,
    /// Only the pending sequence changed.
    PendingChanged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollAdjustment {
    /// Add this many pixels to the current scroll offset.
    ShiftBy(f64),
    FollowBottom,
    Keep,
}

#[derive(Debug, Clone)]
pub struct ScrollAnchor {
    threshold: f64,
    near_bottom: bool,
    height_before_prepend: Option<f64>,
}

impl ScrollAnchor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            // Fresh views start pinned to the newest message.
            near_bottom: true,
            height_before_prepend: None,
        }
    }

    pub fn near_bottom(&self) -> bool {
        self.near_bottom
    }

    pub fn observe(&mut self, metrics: &ViewportMetrics) {
        self.near_bottom = metrics.distance_from_bottom() < self.threshold;
    }

    /// Forces follow mode, e.g. after the user sends a message.
    pub fn follow_bottom(&mut self) {
        self.near_bottom = true;
    }

    pub fn capture_before_prepend(&mut self, scroll_height: f64) {
        self.height_before_prepend = Some(scroll_height);
    }

    pub fn discard_capture(&mut self) {
        self.height_before_prepend = None;
    }

    /// Adjustment for the frame following `mutation`. Consumes the height
    /// captured before a prepend.
    pub fn settle(&mut self, new_height: f64, mutation: Mutation) -> ScrollAdjustment {
        match (mutation, self.height_before_prepend.take()) {
            (Mutation::Prepended, Some(previous)) => {
                resolve(previous, new_height, mutation, self.near_bottom)
            }
            (Mutation::Prepended, None) => ScrollAdjustment::Keep,
            (other, captured) => {
                // A poll landed while the page is still in flight; keep the snapshot.
                self.height_before_prepend = captured;
                resolve(new_height, new_height, other, self.near_bottom)
            }
        }
    }
}

impl Default for ScrollAnchor {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_BOTTOM_PX)
    }
}

pub fn resolve(
    previous_height: f64,
    new_height: f64,
    mutation: Mutation,
    was_near_bottom: bool,
) -> ScrollAdjustment {
    match mutation {
        Mutation::Prepended => ScrollAdjustment::ShiftBy(new_height - previous_height),
        Mutation::Appended | Mutation::PendingChanged if was_near_bottom => {
            ScrollAdjustment::FollowBottom
        }
        Mutation::Appended | Mutation::PendingChanged => ScrollAdjustment::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_shifts_by_height_delta() {
        assert_eq!(
            resolve(1000.0, 1400.0, Mutation::Prepended, false),
            ScrollAdjustment::ShiftBy(400.0)
        );
    }

    #[test]
    fn appends_follow_only_readers_at_the_bottom() {
        assert_eq!(
            resolve(1000.0, 1100.0, Mutation::Appended, true),
            ScrollAdjustment::FollowBottom
        );
        assert_eq!(
            resolve(1000.0, 1100.0, Mutation::Appended, false),
            ScrollAdjustment::Keep
        );
        assert_eq!(
            resolve(1000.0, 1000.0, Mutation::PendingChanged, true),
            ScrollAdjustment::FollowBottom
        );
    }

    #[test]
    fn near_bottom_uses_a_tolerance() {
        let mut anchor = ScrollAnchor::new(100.0);
        anchor.observe(&ViewportMetrics::new(850.0, 1500.0, 600.0));
        assert!(anchor.near_bottom());
        anchor.observe(&ViewportMetrics::new(700.0, 1500.0, 600.0));
        assert!(!anchor.near_bottom());
        anchor.follow_bottom();
        assert!(anchor.near_bottom());
    }

    #[test]
    fn captured_height_survives_an_interleaved_poll() {
        let mut anchor = ScrollAnchor::new(100.0);
        anchor.observe(&ViewportMetrics::new(0.0, 1000.0, 600.0));
        anchor.capture_before_prepend(1000.0);

        assert_eq!(anchor.settle(1050.0, Mutation::Appended), ScrollAdjustment::Keep);
        assert_eq!(
            anchor.settle(1450.0, Mutation::Prepended),
            ScrollAdjustment::ShiftBy(450.0)
        );
        assert_eq!(anchor.settle(1500.0, Mutation::Prepended), ScrollAdjustment::Keep);
    }
}
