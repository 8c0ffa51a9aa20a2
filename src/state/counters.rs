//! Cumulative crawl counters
//!
//! Counters are shared between the pipeline and whoever reports on it, so
//! they are plain atomics. They survive across sessions and only go back to
//! zero on an explicit reset.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters of one worker
#[derive(Debug, Default)]
pub struct CrawlCounters {
    pub pages: AtomicU64,
    pub new_items: AtomicU64,
    pub updated_items: AtomicU64,
    pub skipped_duplicates: AtomicU64,
    /// Writes rejected by a unique constraint
    pub duplicate_writes: AtomicU64,
    pub sub_records: AtomicU64,
    pub errors: AtomicU64,
}

/// Point-in-time copy of [`CrawlCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub pages: u64,
    pub new_items: u64,
    pub updated_items: u64,
    pub skipped_duplicates: u64,
    pub duplicate_writes: u64,
    pub sub_records: u64,
    pub errors: u64,
}

impl CrawlCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            pages: self.pages.load(Ordering::Relaxed),
            new_items: self.new_items.load(Ordering::Relaxed),
            updated_items: self.updated_items.load(Ordering::Relaxed),
            skipped_duplicates: self.skipped_duplicates.load(Ordering::Relaxed),
            duplicate_writes: self.duplicate_writes.load(Ordering::Relaxed),
            sub_records: self.sub_records.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.pages,
            &self.new_items,
            &self.updated_items,
            &self.skipped_duplicates,
            &self.duplicate_writes,
            &self.sub_records,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl CounterSnapshot {
    /// Difference between two snapshots, used for per-session stats
    pub fn since(&self, earlier: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            pages: self.pages.saturating_sub(earlier.pages),
            new_items: self.new_items.saturating_sub(earlier.new_items),
            updated_items: self.updated_items.saturating_sub(earlier.updated_items),
            skipped_duplicates: self
                .skipped_duplicates
                .saturating_sub(earlier.skipped_duplicates),
            duplicate_writes: self.duplicate_writes.saturating_sub(earlier.duplicate_writes),
            sub_records: self.sub_records.saturating_sub(earlier.sub_records),
            errors: self.errors.saturating_sub(earlier.errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let counters = CrawlCounters::new();
        CrawlCounters::add(&counters.pages, 2);
        CrawlCounters::add(&counters.new_items, 20);

        let before = counters.snapshot();
        CrawlCounters::add(&counters.new_items, 5);
        let delta = counters.snapshot().since(&before);
        assert_eq!(delta.new_items, 5);
        assert_eq!(delta.pages, 0);

        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }
}
