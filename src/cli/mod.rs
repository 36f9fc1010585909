//! CLI command implementations

pub mod cache;
pub mod collectors;
pub mod download;
pub mod error;

pub use cache::CacheCommand;
pub use collectors::CollectorsCommand;
pub use download::{Cli, Commands, DownloadArgs, OutputFormat};
pub use error::CliError;
