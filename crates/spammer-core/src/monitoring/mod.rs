//! Monitoring of submitted transactions.
//!
//! The pending watcher polls a sample of submitted transactions until they
//! are included and reports throughput estimates from what it sees.

pub mod watcher;

pub use watcher::{PendingWatcher, WatcherOutcome, WatcherSettings};
