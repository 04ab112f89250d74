use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::collaborators::RemoteCache;
use crate::document::{attribute_key, parse_document, StickyAssignmentsDocument};
use crate::store::{SaveAck, StickyBucketStore};

/// Store backed by a shared remote cache. Keys carry no prefix.
pub struct RemoteCacheStore {
    cache: Arc<dyn RemoteCache>,
}

impl RemoteCacheStore {
    pub fn new(cache: Arc<dyn RemoteCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl StickyBucketStore for RemoteCacheStore {
    async fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<StickyAssignmentsDocument> {
        let key = attribute_key(attribute_name, attribute_value);
        match self.cache.mget(std::slice::from_ref(&key)).await {
            Ok(values) => values
                .into_iter()
                .next()
                .flatten()
                .as_deref()
                .and_then(parse_document),
            Err(err) => {
                debug!(%key, error = %err, "remote cache read failed");
                None
            }
        }
    }

    async fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> SaveAck {
        let key = doc.key();
        let result = match doc.to_json() {
            Ok(json) => self.cache.set(&key, &json).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => SaveAck::Stored,
            Err(err) => {
                warn!(%key, error = %err, "remote cache write failed");
                SaveAck::Unavailable
            }
        }
    }

    /// One batched `mget` for every pair. Entries are keyed by the fields of
    /// the parsed document; unparseable values are skipped.
    async fn get_all_assignments(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> BTreeMap<String, StickyAssignmentsDocument> {
        if attributes.is_empty() {
            return BTreeMap::new();
        }
        let keys: Vec<String> = attributes
            .iter()
            .map(|(name, value)| attribute_key(name, value))
            .collect();
        let values = match self.cache.mget(&keys).await {
            Ok(values) => values,
            Err(err) => {
                debug!(keys = keys.len(), error = %err, "remote cache batch read failed");
                return BTreeMap::new();
            }
        };
        values
            .into_iter()
            .flatten()
            .filter_map(|raw| parse_document(&raw))
            .map(|doc| (doc.key(), doc))
            .collect()
    }
}
