use std::io;

use feed_core::ConfigError;
use feed_http::HttpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Http(#[from] HttpError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
