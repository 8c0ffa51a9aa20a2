//! State module for tracking workers and crawl totals
//!
//! # Components
//!
//! - `WorkerState`: Lifecycle of a category worker (idle, starting, running, etc.)
//! - `CrawlCounters`: Cumulative per-worker counters shared with the supervisor

mod counters;
mod worker_state;

// Re-export main types
pub use counters::{CounterSnapshot, CrawlCounters};
pub use worker_state::WorkerState;
