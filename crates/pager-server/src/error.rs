//! Server error types.

use crate::config::ConfigError;
use crate::consul::ConsulError;
use pager::PagerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Consul agent unreachable at {address}: {source}")]
    ConsulUnreachable {
        address: String,
        source: ConsulError,
    },

    #[error(transparent)]
    Consul(#[from] ConsulError),

    #[error(transparent)]
    Pager(#[from] PagerError),
}
