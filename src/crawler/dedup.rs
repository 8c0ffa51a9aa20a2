//! Session-scoped deduplication against already stored records

use crate::crawler::schema::CatalogItemRef;
use crate::storage::{CatalogStore, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// How a listing item relates to what is already known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Never seen; fetch and insert
    New,
    /// Known, but the source reports a newer update time; fetch again
    Updated,
    /// Known and not newer, or already queued this session
    Duplicate,
}

/// Natural key → last known source update time
///
/// Loaded once per session. Update times are only compared against what the
/// store held at load time; every key queued afterwards is claimed, and a
/// claimed key is a duplicate for the rest of the session.
#[derive(Debug, Default)]
pub struct ExistingIdCache {
    known: HashMap<String, Option<DateTime<Utc>>>,
    claimed: HashSet<String>,
}

impl ExistingIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every stored key from the document store
    pub fn load(store: &dyn CatalogStore) -> StorageResult<Self> {
        let known = store.load_known_keys()?;
        tracing::debug!("Loaded {} known keys", known.len());
        Ok(Self::from_known(known))
    }

    fn from_known(known: HashMap<String, Option<DateTime<Utc>>>) -> Self {
        Self {
            known,
            claimed: HashSet::new(),
        }
    }

    /// Classifies a listing item and claims it when it needs fetching
    pub fn classify(&mut self, item: &CatalogItemRef) -> Freshness {
        if self.claimed.contains(&item.slug) {
            return Freshness::Duplicate;
        }

        let freshness = match self.known.get(&item.slug) {
            None => Freshness::New,
            Some(stored) => match (stored, item.last_known_update_time) {
                (Some(stored), Some(reported)) if reported > *stored => Freshness::Updated,
                (None, Some(_)) => Freshness::Updated,
                _ => Freshness::Duplicate,
            },
        };

        if freshness != Freshness::Duplicate {
            self.claimed.insert(item.slug.clone());
        }
        freshness
    }

    /// Number of distinct keys, stored or claimed
    pub fn len(&self) -> usize {
        self.known.len()
            + self
                .claimed
                .iter()
                .filter(|key| !self.known.contains_key(*key))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.claimed.is_empty()
    }

    pub fn clear(&mut self) {
        self.known.clear();
        self.known.shrink_to_fit();
        self.claimed.clear();
        self.claimed.shrink_to_fit();
    }
}
