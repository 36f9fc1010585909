//! Local placement of downloaded files

pub mod path;

pub use path::{sanitize_collector, PartitionStrategy};
