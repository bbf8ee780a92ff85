//! Engine configuration: flush timing, sync endpoint, and retry policy.

mod loader;
mod types;

pub use loader::ConfigError;
pub use types::{Config, ScheduleConfig, SyncConfig};
