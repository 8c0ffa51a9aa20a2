//! Supervised crawls with real worker threads

use crate::common::{harvest_config, mount_category, slugs};
use catalog_harvester::progress::open_progress_store;
use catalog_harvester::storage::{open_catalog_store, CatalogStore};
use catalog_harvester::supervisor::{PipelineLauncher, WorkerSupervisor};
use catalog_harvester::{HarvestError, WorkerState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const T1: &str = "2024-05-01T10:00:00Z";

#[tokio::test]
async fn test_supervised_crawl_of_two_categories() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = harvest_config(&server.uri(), dir.path(), &["ongoing", "completed"]);

    mount_category(&server, "ongoing", &slugs("ongoing", 3), T1).await;
    mount_category(&server, "completed", &slugs("completed", 2), T1).await;

    let progress = open_progress_store(&config.storage).unwrap();
    open_catalog_store(Path::new(&config.storage.database_path)).unwrap();
    let categories = config.enabled_categories();
    let supervisor_config = config.supervisor.clone();
    let database_path = config.storage.database_path.clone();
    let launcher = Arc::new(PipelineLauncher::new(Arc::new(config), Some("hash".to_string())));

    let (supervisor, crawler) =
        WorkerSupervisor::new(supervisor_config, categories, launcher, Some(progress));
    let task = tokio::spawn(supervisor.run());

    let mut finished = false;
    for _ in 0..300 {
        let statuses = crawler.status().await.unwrap();
        if statuses.iter().all(|s| s.state == WorkerState::Completed) {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(finished, "workers did not complete");

    let failures = crawler.error_log("ongoing").await.unwrap();
    assert!(failures.errors.is_empty());
    assert!(matches!(
        crawler.error_log("unknown").await,
        Err(HarvestError::UnknownCategory(_))
    ));

    let statuses = crawler.shutdown().await.unwrap();
    task.await.unwrap();

    let ongoing = statuses.iter().find(|s| s.category == "ongoing").unwrap();
    assert_eq!(ongoing.counters.new_items, 3);
    assert_eq!(ongoing.restart_count, 0);
    let progress = ongoing.progress.as_ref().unwrap();
    assert_eq!(
        progress.final_stats.as_ref().and_then(|s| s.config_hash.as_deref()),
        Some("hash")
    );

    let store = open_catalog_store(Path::new(&database_path)).unwrap();
    assert_eq!(store.count_records(Some("ongoing")).unwrap(), 3);
    assert_eq!(store.count_records(Some("completed")).unwrap(), 2);
}

#[tokio::test]
async fn test_failing_category_is_restarted() {
    let server = MockServer::start().await;
    // A persistent outage escalates every session
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let config = harvest_config(&server.uri(), dir.path(), &["ongoing"]);

    let supervisor_config = config.supervisor.clone();
    let launcher = Arc::new(PipelineLauncher::new(Arc::new(config), None));
    let (supervisor, crawler) =
        WorkerSupervisor::new(supervisor_config, vec!["ongoing".to_string()], launcher, None);
    let task = tokio::spawn(supervisor.run());

    let mut restarted = false;
    for _ in 0..600 {
        let statuses = crawler.status().await.unwrap();
        if statuses[0].restart_count >= 2 {
            restarted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(restarted, "worker was not restarted");

    let statuses = crawler.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(statuses[0].last_error.is_some());
}
