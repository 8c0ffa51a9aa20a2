//! Output module for reporting harvest results
//!
//! This module handles:
//! - Collecting catalog totals and per-category progress
//! - Printing them for the `--status` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, CategoryStatistics, HarvestStatistics};
