//! Crawler module for catalog enumeration and fetching
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching against the source API
//! - Payload schemas and validation
//! - Session-scoped deduplication against stored records
//! - The three-phase crawl pipeline

mod dedup;
mod fetcher;
pub mod metrics;
mod pipeline;
mod schema;

pub use dedup::{ExistingIdCache, Freshness};
pub use fetcher::{build_http_client, Exchange, SourceClient};
pub use pipeline::{
    CrawlPipeline, EnumerationEnd, EnumerationSummary, PipelineContext, SessionOutcome,
};
pub use schema::{
    flatten_sub_records, parse_detail, parse_listing, CatalogItemRef, FlatSubRecord,
    SubRecordEntry, SubRecordGroup,
};
