//! End-to-end crawl sessions against a mock catalog

use crate::common::{
    build_pipeline, detail, harvest_config, listing, mount_category, mount_details,
    mount_listing, slugs,
};
use catalog_harvester::progress::ProgressStatus;
use catalog_harvester::SessionOutcome;
use tempfile::TempDir;
use wiremock::matchers::{method, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const T1: &str = "2024-05-01T10:00:00Z";
const T2: &str = "2024-06-01T10:00:00Z";

#[tokio::test]
async fn test_unchanged_listing_is_not_fetched_twice() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = harvest_config(&server.uri(), dir.path(), &["ongoing"]);

    let titles = slugs("ongoing", 5);
    mount_listing(&server, "ongoing", 1, listing(&titles, T1)).await;
    mount_listing(&server, "ongoing", 2, listing(&[], T1)).await;
    // Every detail is requested exactly once across both sessions
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/item/ongoing-\d+$"))
        .respond_with(|request: &wiremock::Request| {
            let slug = request.url.path().rsplit('/').next().unwrap_or_default().to_string();
            ResponseTemplate::new(200).set_body_json(detail(&slug, T1))
        })
        .expect(5)
        .mount(&server)
        .await;

    let mut first = build_pipeline(&config, "ongoing");
    assert_eq!(first.run_session().await.unwrap(), SessionOutcome::Completed);
    assert_eq!(first.counters().snapshot().new_items, 5);
    drop(first);

    // A fresh pipeline, as after a worker restart
    let mut second = build_pipeline(&config, "ongoing");
    assert_eq!(second.run_session().await.unwrap(), SessionOutcome::Completed);

    let counters = second.counters().snapshot();
    assert_eq!(counters.new_items, 0);
    assert_eq!(counters.updated_items, 0);
    assert_eq!(counters.skipped_duplicates, 5);
    assert_eq!(second.store().count_records(Some("ongoing")).unwrap(), 5);
}

#[tokio::test]
async fn test_updated_item_is_refreshed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = harvest_config(&server.uri(), dir.path(), &["ongoing"]);

    let titles = slugs("ongoing", 3);
    mount_category(&server, "ongoing", &titles, T1).await;

    let mut first = build_pipeline(&config, "ongoing");
    first.run_session().await.unwrap();
    drop(first);

    // The source now reports a newer modification time for one title
    server.reset().await;
    let mut relisted = listing(&titles, T1);
    relisted["data"]["items"][1]["modified"]["time"] = T2.into();
    mount_listing(&server, "ongoing", 1, relisted).await;
    mount_listing(&server, "ongoing", 2, listing(&[], T1)).await;
    mount_details(&server, &titles[1..2], T2).await;

    let mut second = build_pipeline(&config, "ongoing");
    assert_eq!(second.run_session().await.unwrap(), SessionOutcome::Completed);

    let counters = second.counters().snapshot();
    assert_eq!(counters.updated_items, 1);
    assert_eq!(counters.skipped_duplicates, 2);

    let record = second.store().get_record(&titles[1]).unwrap().unwrap();
    assert_eq!(record.source_updated_at.unwrap().to_rfc3339(), "2024-06-01T10:00:00+00:00");
    assert_eq!(second.store().count_records(None).unwrap(), 3);
}

#[tokio::test]
async fn test_paused_session_resumes_from_cursor() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = harvest_config(&server.uri(), dir.path(), &["ongoing"]);
    config.crawler.max_pages = Some(1);

    let page_one = slugs("first", 2);
    let page_two = slugs("second", 2);
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/list/ongoing$"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&page_one, T1)))
        .expect(1)
        .mount(&server)
        .await;
    mount_listing(&server, "ongoing", 2, listing(&page_two, T1)).await;
    mount_listing(&server, "ongoing", 3, listing(&[], T1)).await;
    mount_details(&server, &page_one, T1).await;
    mount_details(&server, &page_two, T1).await;

    let mut first = build_pipeline(&config, "ongoing");
    assert_eq!(first.run_session().await.unwrap(), SessionOutcome::Paused);
    let progress = first.progress().get_progress("ongoing");
    assert_eq!(progress.current_page, 2);
    assert_eq!(progress.status, ProgressStatus::Running);
    drop(first);

    let mut second = build_pipeline(&config, "ongoing");
    assert_eq!(second.run_session().await.unwrap(), SessionOutcome::Paused);
    assert_eq!(second.progress().get_progress("ongoing").current_page, 3);
    drop(second);

    let mut third = build_pipeline(&config, "ongoing");
    assert_eq!(third.run_session().await.unwrap(), SessionOutcome::Completed);

    let progress = third.progress().get_progress("ongoing");
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(third.store().count_records(Some("ongoing")).unwrap(), 4);
}
