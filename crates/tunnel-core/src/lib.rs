pub mod config;
pub mod types;

pub use config::{DatastoreConfig, RetryConfig, TunnelConfig};
pub use types::*;
