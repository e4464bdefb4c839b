use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::polling::{OverlapPolicy, DEFAULT_POLL_INTERVAL};
use crate::scroll::DEFAULT_NEAR_BOTTOM_PX;

pub const DEFAULT_REPLY_LINK_BASE: &str = "https://t.me/cue2a";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("near-bottom threshold must be a non-negative number, got {0}")]
    InvalidThreshold(f64),
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: usize,
    pub poll_interval: Duration,
    pub near_bottom_threshold: f64,
    pub overlap_policy: OverlapPolicy,
    /// Keep a failed send visible as `Failed` instead of rolling it back.
    pub keep_failed_sends: bool,
    pub reply_link_base: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            near_bottom_threshold: DEFAULT_NEAR_BOTTOM_PX,
            overlap_policy: OverlapPolicy::Allow,
            keep_failed_sends: false,
            reply_link_base: DEFAULT_REPLY_LINK_BASE.to_string(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from `FEED_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let page_size = parse_var(&lookup, "FEED_PAGE_SIZE").unwrap_or(defaults.page_size);
        let poll_interval = parse_var::<u64, _>(&lookup, "FEED_POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let near_bottom_threshold = parse_var(&lookup, "FEED_NEAR_BOTTOM_PX")
            .unwrap_or(defaults.near_bottom_threshold);
        let overlap_policy = match lookup("FEED_SKIP_OVERLAPPING_POLLS") {
            Some(v) if truthy(&v) => OverlapPolicy::SkipIfInFlight,
            _ => defaults.overlap_policy,
        };
        let keep_failed_sends = lookup("FEED_KEEP_FAILED_SENDS")
            .map(|v| truthy(&v))
            .unwrap_or(defaults.keep_failed_sends);
        let reply_link_base = lookup("FEED_REPLY_LINK_BASE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.reply_link_base);
        Self {
            page_size,
            poll_interval,
            near_bottom_threshold,
            overlap_policy,
            keep_failed_sends,
            reply_link_base,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.near_bottom_threshold.is_nan() || self.near_bottom_threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.near_bottom_threshold));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "feed.config", key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "on")
}
