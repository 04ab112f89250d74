//! Sticky assignment documents and their storage keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key prefix used by the browser-style backends unless overridden.
pub const DEFAULT_PREFIX: &str = "gbStickyBuckets::";

/// Separator between attribute name and value in a document key.
pub const KEY_SEPARATOR: &str = "||";

/// Durable assignment record for one `(attribute name, attribute value)` pair.
///
/// `assignments` maps an experiment bucketing key to the variation the pair
/// was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyAssignmentsDocument {
    pub attribute_name: String,
    pub attribute_value: String,
    pub assignments: BTreeMap<String, String>,
}

impl StickyAssignmentsDocument {
    pub fn new(attribute_name: impl Into<String>, attribute_value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            attribute_value: attribute_value.into(),
            assignments: BTreeMap::new(),
        }
    }

    pub fn with_assignment(mut self, key: impl Into<String>, variation: impl Into<String>) -> Self {
        self.assignments.insert(key.into(), variation.into());
        self
    }

    /// The `name||value` key this document is stored and returned under.
    pub fn key(&self) -> String {
        attribute_key(&self.attribute_name, &self.attribute_value)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn attribute_key(attribute_name: &str, attribute_value: &str) -> String {
    format!("{attribute_name}{KEY_SEPARATOR}{attribute_value}")
}

/// Parse a stored value into a document.
///
/// Returns `None` unless the payload is a JSON object with non-empty string
/// `attributeName` and `attributeValue` and an `assignments` object whose
/// values are all strings.
pub fn parse_document(raw: &str) -> Option<StickyAssignmentsDocument> {
    let doc: StickyAssignmentsDocument = serde_json::from_str(raw).ok()?;
    if doc.attribute_name.is_empty() || doc.attribute_value.is_empty() {
        return None;
    }
    Some(doc)
}
