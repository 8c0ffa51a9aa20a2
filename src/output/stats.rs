//! Statistics gathered from the catalog database and the progress store
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics without running a crawl.

use crate::progress::{CrawlProgress, ProgressStatus, ProgressStore, SessionStats};
use crate::storage::CatalogStore;
use crate::HarvestError;

/// Per-category summary
#[derive(Debug, Clone)]
pub struct CategoryStatistics {
    pub category: String,

    /// Records stored under this category
    pub records: u64,

    /// Resume cursor and status
    pub progress: CrawlProgress,

    /// Stats of the last finished session, if any
    pub last_session: Option<SessionStats>,

    /// Number of logged failures still within retention
    pub logged_errors: usize,
}

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total number of catalog records
    pub total_records: u64,

    /// Total number of sub-records
    pub total_sub_records: u64,

    pub categories: Vec<CategoryStatistics>,
}

/// Loads statistics for the given categories
///
/// # Arguments
///
/// * `store` - The catalog database to count records in
/// * `progress` - The progress store holding cursors and session stats
/// * `categories` - Categories to report on
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query the database or the progress store
pub fn load_statistics(
    store: &dyn CatalogStore,
    progress: &ProgressStore,
    categories: &[String],
) -> Result<HarvestStatistics, HarvestError> {
    let total_records = store.count_records(None)?;
    let total_sub_records = store.count_sub_records()?;

    let mut per_category = Vec::with_capacity(categories.len());
    for category in categories {
        let records = store.count_records(Some(category))?;
        let last_session = progress.get_session_stats(category)?;
        let logged_errors = progress.get_failed_pages(category)?.errors.len();

        per_category.push(CategoryStatistics {
            category: category.clone(),
            records,
            progress: progress.get_progress(category),
            last_session,
            logged_errors,
        });
    }

    Ok(HarvestStatistics {
        total_records,
        total_sub_records,
        categories: per_category,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Total records: {}", stats.total_records);
    println!("  Total sub-records: {}", stats.total_sub_records);
    println!();

    println!("Categories ({}):", stats.categories.len());
    for category in &stats.categories {
        let share = if stats.total_records > 0 {
            (category.records as f64 / stats.total_records as f64) * 100.0
        } else {
            0.0
        };
        println!(
            "  {}: {} records ({:.1}%)",
            category.category, category.records, share
        );

        let progress = &category.progress;
        match progress.status {
            ProgressStatus::New => println!("    Status: new"),
            _ => println!(
                "    Status: {} (page {}, {} items listed, updated {})",
                progress.status,
                progress.current_page,
                progress.total_processed,
                progress.last_updated_at.format("%Y-%m-%d %H:%M:%S")
            ),
        }
        if let Some(error) = &progress.last_error {
            println!("    Last error: {}", error);
        }

        if let Some(session) = &category.last_session {
            println!(
                "    Last session: {} - {} pages, {} new, {} updated, {} skipped, {} errors",
                session.outcome,
                session.pages,
                session.new_items,
                session.updated_items,
                session.skipped_duplicates,
                session.errors
            );
        }

        if category.logged_errors > 0 {
            println!("    Logged failures: {}", category.logged_errors);
        }
    }
}
