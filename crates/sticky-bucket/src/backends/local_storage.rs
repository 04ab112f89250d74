use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::collaborators::LocalStorage;
use crate::document::{attribute_key, parse_document, StickyAssignmentsDocument, DEFAULT_PREFIX};
use crate::store::{SaveAck, StickyBucketStore};

/// Store backed by a durable client-side key/value storage.
///
/// Documents live under `<prefix><name>||<value>`. A store built without a
/// storage reads nothing and reports every save as unavailable.
pub struct LocalStorageStore {
    prefix: String,
    storage: Option<Arc<dyn LocalStorage>>,
}

impl LocalStorageStore {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            storage: Some(storage),
        }
    }

    pub fn detached() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            storage: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn storage_key(&self, attribute_name: &str, attribute_value: &str) -> String {
        format!("{}{}", self.prefix, attribute_key(attribute_name, attribute_value))
    }
}

#[async_trait]
impl StickyBucketStore for LocalStorageStore {
    async fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<StickyAssignmentsDocument> {
        let storage = self.storage.as_ref()?;
        let key = self.storage_key(attribute_name, attribute_value);
        match storage.get_item(&key).await {
            Ok(raw) => raw.as_deref().and_then(parse_document),
            Err(err) => {
                debug!(%key, error = %err, "local storage read failed");
                None
            }
        }
    }

    async fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> SaveAck {
        let Some(storage) = self.storage.as_ref() else {
            return SaveAck::Unavailable;
        };
        let key = self.storage_key(&doc.attribute_name, &doc.attribute_value);
        let result = match doc.to_json() {
            Ok(json) => storage.set_item(&key, &json).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => SaveAck::Stored,
            Err(err) => {
                warn!(%key, error = %err, "local storage write failed");
                SaveAck::Unavailable
            }
        }
    }
}
