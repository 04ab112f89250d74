//! Static segment/dimension catalog and feature list.
//!
//! Lookups are not scoped by organization; one catalog serves one tenant.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Dimension, Segment};
use crate::integration::{DimensionCatalog, EntitlementPolicy, SegmentCatalog};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub segments: BTreeMap<String, Segment>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Dimension>,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.insert(segment.id.clone(), segment);
        self
    }

    /// Register `dimension` under the id that settings refer to.
    pub fn with_dimension(mut self, id: impl Into<String>, dimension: Dimension) -> Self {
        self.dimensions.insert(id.into(), dimension);
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }
}

#[async_trait]
impl SegmentCatalog for StaticCatalog {
    async fn find_segment(&self, _organization: &str, id: &str) -> Option<Segment> {
        self.segments.get(id).cloned()
    }
}

#[async_trait]
impl DimensionCatalog for StaticCatalog {
    async fn resolve_dimension(&self, _organization: &str, id: &str) -> Option<Dimension> {
        self.dimensions.get(id).cloned()
    }
}

#[async_trait]
impl EntitlementPolicy for StaticCatalog {
    async fn org_has_feature(&self, _organization: &str, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::PIPELINE_MODE_FEATURE;

    #[tokio::test]
    async fn lookups_return_registered_entries() {
        let catalog = StaticCatalog::new()
            .with_segment(Segment {
                id: "seg_1".into(),
                name: "Paying".into(),
            })
            .with_dimension("dim_country", Dimension::user("country"))
            .with_feature(PIPELINE_MODE_FEATURE);

        assert_eq!(
            catalog.find_segment("org", "seg_1").await.map(|s| s.name),
            Some("Paying".to_string())
        );
        assert!(catalog.find_segment("org", "seg_2").await.is_none());
        assert_eq!(
            catalog.resolve_dimension("org", "dim_country").await,
            Some(Dimension::user("country"))
        );
        assert!(catalog.org_has_feature("org", PIPELINE_MODE_FEATURE).await);
        assert!(!catalog.org_has_feature("org", "sso").await);
    }
}
