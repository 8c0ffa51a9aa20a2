//! Integration tests for Catalog Harvester
//!
//! These tests run the crawl pipeline and the supervisor against a wiremock
//! catalog API, with databases in temporary directories.

mod common;
mod pipeline_tests;
mod supervisor_tests;
