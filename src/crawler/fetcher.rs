//! HTTP fetcher for the source API
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Expanding listing, detail and sub-record URL templates
//! - Capturing status, headers and body for the rate controller
//! - Classifying transport failures into crawl errors
//!
//! HTTP error statuses are not errors at this layer. The rate controller needs
//! to see the full response (headers included) before the pipeline decides
//! what the status means.

use crate::config::{ApiConfig, UserAgentConfig};
use crate::rate::ResponseSnapshot;
use crate::CrawlError;
use reqwest::Client;
use std::time::{Duration, Instant};

/// One request against the source, successful or not
#[derive(Debug)]
pub struct Exchange {
    pub url: String,
    /// The response, or the transport failure that prevented one
    pub outcome: Result<ResponseSnapshot, CrawlError>,
    /// Wall time from send to fully read body
    pub elapsed: Duration,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Fixed timeout applied to every request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL)
    let user_agent = format!(
        "{}/{} (+{})",
        config.crawler_name, config.crawler_version, config.contact_url
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Client for the catalog source API
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: Client,
    api: ApiConfig,
}

impl SourceClient {
    /// Creates a source client with its own connection pool
    pub fn new(api: ApiConfig, user_agent: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(user_agent, api.request_timeout())?;
        Ok(Self { client, api })
    }

    /// URL of one listing page
    pub fn listing_url(&self, category: &str, page: u32) -> String {
        self.expand(
            &self
                .api
                .listing_path
                .replace("{category}", category)
                .replace("{page}", &page.to_string()),
        )
    }

    /// URL of an item's detail payload
    pub fn detail_url(&self, slug: &str) -> String {
        self.expand(&self.api.detail_path.replace("{slug}", slug))
    }

    /// URL of a sub-record's detail payload
    ///
    /// An absolute `api_url` supplied by the source wins over the template.
    pub fn sub_record_url(&self, parent: &str, sub: &str, api_url: Option<&str>) -> String {
        match api_url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                url.to_string()
            }
            _ => self.expand(
                &self
                    .api
                    .sub_record_path
                    .replace("{parent}", parent)
                    .replace("{sub}", sub),
            ),
        }
    }

    pub async fn fetch_listing(&self, category: &str, page: u32) -> Exchange {
        self.get(self.listing_url(category, page)).await
    }

    pub async fn fetch_detail(&self, slug: &str) -> Exchange {
        self.get(self.detail_url(slug)).await
    }

    pub async fn fetch_sub_record(&self, parent: &str, sub: &str, api_url: Option<&str>) -> Exchange {
        self.get(self.sub_record_url(parent, sub, api_url)).await
    }

    fn expand(&self, path: &str) -> String {
        format!("{}{}", self.api.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, url: String) -> Exchange {
        tracing::debug!("GET {}", url);
        let start = Instant::now();

        let outcome = match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                match response.text().await {
                    Ok(body) => Ok(ResponseSnapshot::new(url.clone(), status, headers, body)),
                    Err(e) => Err(CrawlError::from_reqwest(&url, &e)),
                }
            }
            Err(e) => Err(CrawlError::from_reqwest(&url, &e)),
        };

        let elapsed = start.elapsed();
        if let Err(e) = &outcome {
            tracing::debug!("Request to {} failed after {:?}: {}", url, elapsed, e);
        }

        Exchange {
            url,
            outcome,
            elapsed,
        }
    }
}
