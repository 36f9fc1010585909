//! CLI error types and conversions

use crate::cache::CacheError;
use crate::fetcher::TransportError;
use crate::registry::RegistryError;
use crate::RangeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Start is not before end
    #[error("invalid time range: {0}")]
    RangeError(#[from] RangeError),

    /// Collector selection failed
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// HTTP client could not be built
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Cache maintenance command failed
    #[error("cache error: {0}")]
    CacheError(#[from] CacheError),

    /// Summary could not be serialized
    #[error("output error: {0}")]
    OutputError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
