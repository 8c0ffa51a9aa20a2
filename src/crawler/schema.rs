//! Source API payload schemas
//!
//! Payloads are decoded into explicit structs at the boundary. Everything the
//! source may omit is optional here; the few fields a record cannot exist
//! without are checked when a payload is turned into a [`CatalogRecord`].

use crate::crawler::metrics;
use crate::storage::CatalogRecord;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Identifier that the source sends either as a string or a number
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SourceId {
    Text(String),
    Number(i64),
}

impl SourceId {
    pub fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Modified {
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// `{status, data: {items: [...]}}`
#[derive(Debug, Deserialize)]
pub struct ListingResponse {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub data: Option<ListingData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub items: Vec<ListingItem>,
}

#[derive(Debug, Deserialize)]
pub struct ListingItem {
    #[serde(rename = "_id", default)]
    pub id: Option<SourceId>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub modified: Option<Modified>,
}

/// Lightweight reference to a catalog item, as seen on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItemRef {
    pub source_id: String,
    pub slug: String,
    pub last_known_update_time: Option<DateTime<Utc>>,
}

/// Decodes a listing page into item references
///
/// Items without a slug cannot be deduplicated or fetched and are dropped.
pub fn parse_listing(body: &str, context: &str) -> Result<Vec<CatalogItemRef>, CrawlError> {
    let response: ListingResponse =
        serde_json::from_str(body).map_err(|e| CrawlError::Validation {
            context: context.to_string(),
            message: e.to_string(),
        })?;

    let items = response.data.map(|d| d.items).unwrap_or_default();
    let total = items.len();

    let refs: Vec<CatalogItemRef> = items
        .into_iter()
        .filter_map(|item| {
            let slug = item.slug.filter(|s| !s.trim().is_empty())?;
            Some(CatalogItemRef {
                source_id: item
                    .id
                    .map(SourceId::into_string)
                    .unwrap_or_else(|| slug.clone()),
                last_known_update_time: item.modified.and_then(|m| m.time),
                slug,
            })
        })
        .collect();

    if refs.len() < total {
        tracing::debug!(
            "Dropped {} listing items without a slug from {}",
            total - refs.len(),
            context
        );
    }

    Ok(refs)
}

/// `{status, data: {item: {...}}}`
#[derive(Debug, Deserialize)]
pub struct DetailResponse {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub data: Option<DetailData>,
}

#[derive(Debug, Deserialize)]
pub struct DetailData {
    #[serde(default)]
    pub item: Option<DetailItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryTag {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailItem {
    #[serde(rename = "_id", default)]
    pub id: Option<SourceId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub origin_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub category: Vec<CategoryTag>,
    #[serde(default)]
    pub view: Option<u64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub modified: Option<Modified>,
    #[serde(default)]
    pub sub_records: Vec<SubRecordGroup>,
}

/// One source-side group of sub-records
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubRecordGroup {
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub entries: Vec<SubRecordEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubRecordEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

/// A sub-record entry after flattening, with its group attached
#[derive(Debug, Clone, PartialEq)]
pub struct FlatSubRecord {
    /// 1-based position in the flattened list
    pub sequence: u32,
    pub slug: String,
    pub name: String,
    pub title: Option<String>,
    pub group_name: Option<String>,
    pub api_url: Option<String>,
}

/// Decodes a detail payload
pub fn parse_detail(body: &str, context: &str) -> Result<DetailItem, CrawlError> {
    let response: DetailResponse =
        serde_json::from_str(body).map_err(|e| CrawlError::Validation {
            context: context.to_string(),
            message: e.to_string(),
        })?;

    response
        .data
        .and_then(|d| d.item)
        .ok_or_else(|| CrawlError::Validation {
            context: context.to_string(),
            message: "response has no item".to_string(),
        })
}

fn required(value: Option<String>, field: &str, context: &str) -> Result<String, CrawlError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CrawlError::Validation {
            context: context.to_string(),
            message: format!("missing required field '{}'", field),
        }),
    }
}

impl DetailItem {
    /// Turns the payload into a record and its sub-record groups
    ///
    /// Missing view counts and ratings are synthesized.
    ///
    /// # Returns
    ///
    /// * `Ok((CatalogRecord, Vec<SubRecordGroup>))` - The record and its groups
    /// * `Err(CrawlError::Validation)` - `slug` or `name` is missing
    pub fn into_record(
        self,
        category: &str,
        context: &str,
    ) -> Result<(CatalogRecord, Vec<SubRecordGroup>), CrawlError> {
        let slug = required(self.slug, "slug", context)?;
        let name = required(self.name, "name", context)?;

        let mut rng = rand::thread_rng();
        let view_count = self
            .view
            .filter(|v| *v > 0)
            .unwrap_or_else(|| metrics::synthesize_view_count(self.year, metrics::current_year(), &mut rng));
        let rating = self
            .rating
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or_else(|| metrics::synthesize_rating(&mut rng));

        let genres = self
            .category
            .into_iter()
            .filter_map(|tag| tag.slug.or(tag.name))
            .filter(|g| !g.is_empty())
            .collect();

        let record = CatalogRecord {
            source_id: self
                .id
                .map(SourceId::into_string)
                .unwrap_or_else(|| slug.clone()),
            category: category.to_string(),
            name,
            origin_name: self.origin_name,
            description: self.content,
            thumb_url: self.thumb_url,
            status: self.status,
            year: self.year,
            genres,
            view_count,
            rating,
            source_updated_at: self.modified.and_then(|m| m.time),
            sub_record_count: 0,
            slug,
        };

        Ok((record, self.sub_records))
    }
}

/// Flattens per-group entries into one ordered list
///
/// Sequence numbers follow position across all groups. Entries with neither
/// a name nor a slug are dropped; a missing slug is derived from the name.
pub fn flatten_sub_records(groups: &[SubRecordGroup]) -> Vec<FlatSubRecord> {
    let mut flat = Vec::new();

    for group in groups {
        for entry in &group.entries {
            let name = entry.name.clone().filter(|n| !n.trim().is_empty());
            let slug = entry
                .slug
                .clone()
                .filter(|s| !s.trim().is_empty())
                .or_else(|| name.as_deref().map(slugify));

            let (Some(slug), Some(name)) = (slug.clone(), name.or(slug)) else {
                continue;
            };

            flat.push(FlatSubRecord {
                sequence: flat.len() as u32 + 1,
                slug,
                name,
                title: entry.title.clone(),
                group_name: group.group_name.clone(),
                api_url: entry.api_url.clone(),
            });
        }
    }

    flat
}

/// Lowercases and replaces anything but ASCII alphanumerics with dashes
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Extracts the useful part of a sub-record detail payload as JSON text
pub fn sub_record_content(body: &str, context: &str) -> Result<String, CrawlError> {
    let value: Value = serde_json::from_str(body).map_err(|e| CrawlError::Validation {
        context: context.to_string(),
        message: e.to_string(),
    })?;

    let content = match value.get("data") {
        Some(data) if !data.is_null() => data.clone(),
        _ => value,
    };
    Ok(content.to_string())
}
