use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use feed_core::{ConfigError, FeedConfig, OverlapPolicy};
use feed_http::DEFAULT_API_BASE;

use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "feed",
    about = "Read and post to the anonymous chat feed",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "FEED_API_BASE",
        default_value = DEFAULT_API_BASE,
        help = "Messages endpoint of the chat API"
    )]
    pub api_base: String,

    #[arg(long, value_name = "N", help = "Messages per poll and per history page")]
    pub page_size: Option<usize>,

    #[arg(long, value_name = "MS", help = "Delay between forward polls")]
    pub poll_interval_ms: Option<u64>,

    #[arg(
        long,
        value_name = "LINES",
        default_value_t = 2.0,
        help = "How close to the bottom still counts as following new messages"
    )]
    pub near_bottom_lines: f64,

    #[arg(long, help = "Skip a scheduled poll while the previous one is still running")]
    pub skip_overlapping_polls: bool,

    #[arg(long, help = "Keep failed sends on screen instead of removing them")]
    pub keep_failed: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// `FEED_*` environment settings with command-line overrides on top.
    pub fn feed_config(&self) -> Result<FeedConfig, ConfigError> {
        let mut config = FeedConfig::from_env();
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        // The terminal view measures in lines, not pixels.
        config.near_bottom_threshold = self.near_bottom_lines;
        if self.skip_overlapping_polls {
            config.overlap_policy = OverlapPolicy::SkipIfInFlight;
        }
        if self.keep_failed {
            config.keep_failed_sends = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "FEED_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "FEED_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
