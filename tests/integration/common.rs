//! Shared fixtures for the integration tests

use catalog_harvester::config::{parse_config, Config};
use catalog_harvester::crawler::{CrawlPipeline, PipelineContext, SourceClient};
use catalog_harvester::progress::open_progress_store;
use catalog_harvester::state::CrawlCounters;
use catalog_harvester::storage::open_catalog_store;
use catalog_harvester::RateAdaptiveController;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a validated configuration pointing at the mock server
///
/// Delays are lowered after validation so requests pace at the delay floor.
pub fn harvest_config(base_url: &str, dir: &Path, categories: &[&str]) -> Config {
    let mut toml = format!(
        r#"
[api]
base-url = "{}"

[user-agent]
crawler-name = "TestHarvester"
crawler-version = "1.0.0"
contact-url = "https://example.com/about"

[crawler]
max-empty-pages = 1
page-attempts = 2

[supervisor]
restart-base-delay = 0
max-restart-delay = 0
health-interval = 3600
shutdown-timeout = 5

[storage]
database-path = "{}"
cache-path = "{}"
"#,
        base_url,
        dir.join("catalog.db").display(),
        dir.join("progress.db").display()
    );
    for category in categories {
        toml.push_str(&format!("\n[[category]]\nname = \"{}\"\n", category));
    }

    let mut config = parse_config(&toml).expect("test config should be valid");
    config.rate.base_delay = 1;
    config.rate.max_delay = 600;
    config
}

/// Creates a pipeline with file-backed stores, as a worker would
pub fn build_pipeline(config: &Config, category: &str) -> CrawlPipeline {
    let context = PipelineContext {
        client: SourceClient::new(config.api.clone(), &config.user_agent).unwrap(),
        store: Box::new(open_catalog_store(Path::new(&config.storage.database_path)).unwrap()),
        progress: open_progress_store(&config.storage).unwrap(),
        rate: Arc::new(Mutex::new(RateAdaptiveController::new(config.rate.clone()))),
        running: Arc::new(AtomicBool::new(true)),
        counters: Arc::new(CrawlCounters::new()),
    };
    CrawlPipeline::new(category, config.crawler.clone(), context)
}

pub fn slugs(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}-{}", prefix, i)).collect()
}

pub fn listing(slugs: &[String], modified: &str) -> Value {
    let items: Vec<Value> = slugs
        .iter()
        .map(|slug| {
            json!({
                "_id": format!("id-{}", slug),
                "slug": slug,
                "modified": {"time": modified}
            })
        })
        .collect();
    json!({"status": "success", "data": {"items": items}})
}

pub fn detail(slug: &str, modified: &str) -> Value {
    json!({
        "status": "success",
        "data": {"item": {
            "_id": format!("id-{}", slug),
            "slug": slug,
            "name": format!("Title {}", slug),
            "year": 2023,
            "modified": {"time": modified},
            "sub_records": [{"group_name": "Main", "entries": []}]
        }}
    })
}

pub async fn mount_listing(server: &MockServer, category: &str, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/list/{}", category)))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_details(server: &MockServer, slugs: &[String], modified: &str) {
    for slug in slugs {
        Mock::given(method("GET"))
            .and(path(format!("/api/item/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_json(detail(slug, modified)))
            .mount(server)
            .await;
    }
}

/// Mounts a one-page category: `slugs` on page 1, then an empty page
pub async fn mount_category(server: &MockServer, category: &str, slugs: &[String], modified: &str) {
    mount_listing(server, category, 1, listing(slugs, modified)).await;
    mount_listing(server, category, 2, listing(&[], modified)).await;
    mount_details(server, slugs, modified).await;
}
