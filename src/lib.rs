pub mod cache;
pub mod cli;
pub mod error;
pub mod filter;
pub mod peers;
pub mod schedule;
pub mod settings;
pub mod transport;

pub use cache::Cache;
pub use error::{CacheError, Result};
