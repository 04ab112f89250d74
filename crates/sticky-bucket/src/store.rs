//! The sticky-bucket store capability and the read-modify-write merge helper.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::document::StickyAssignmentsDocument;

/// Outcome of a save. Write failures are reported here, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAck {
    /// The document was handed to the backend successfully.
    Stored,
    /// The backend was missing or rejected the write.
    Unavailable,
}

impl SaveAck {
    pub fn is_stored(self) -> bool {
        matches!(self, SaveAck::Stored)
    }
}

/// Read/write access to sticky assignment documents.
///
/// Implementations swallow storage and parse failures: a document that cannot
/// be read or validated is absent.
#[async_trait]
pub trait StickyBucketStore: Send + Sync {
    async fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<StickyAssignmentsDocument>;

    async fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> SaveAck;

    /// Look up every `(name, value)` pair and key the found documents by
    /// `name||value`.
    ///
    /// The default fans out one `get_assignments` per pair concurrently.
    /// Backends with a native multi-key read override this.
    async fn get_all_assignments(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> BTreeMap<String, StickyAssignmentsDocument> {
        let lookups = attributes
            .iter()
            .map(|(name, value)| self.get_assignments(name, value));
        join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .map(|doc| (doc.key(), doc))
            .collect()
    }
}

/// A new assignment that disagreed with the stored one and was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentConflict {
    pub key: String,
    pub kept: String,
    pub rejected: String,
}

/// Result of [`persist_assignments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// The merged document as it should now be stored.
    pub document: StickyAssignmentsDocument,
    pub changed: bool,
    pub conflicts: Vec<AssignmentConflict>,
    /// `None` when nothing changed and no write was attempted.
    pub ack: Option<SaveAck>,
}

/// Merge `new_assignments` into the stored document for the pair and save it.
///
/// Existing assignments are never overwritten with a different variation;
/// such keys are reported as conflicts. The store is written only when at
/// least one key was added.
pub async fn persist_assignments<S>(
    store: &S,
    attribute_name: &str,
    attribute_value: &str,
    new_assignments: &BTreeMap<String, String>,
) -> MergeReport
where
    S: StickyBucketStore + ?Sized,
{
    let mut document = store
        .get_assignments(attribute_name, attribute_value)
        .await
        .unwrap_or_else(|| StickyAssignmentsDocument::new(attribute_name, attribute_value));

    let mut changed = false;
    let mut conflicts = Vec::new();
    for (key, variation) in new_assignments {
        match document.assignments.get(key) {
            Some(existing) if existing == variation => {}
            Some(existing) => conflicts.push(AssignmentConflict {
                key: key.clone(),
                kept: existing.clone(),
                rejected: variation.clone(),
            }),
            None => {
                document.assignments.insert(key.clone(), variation.clone());
                changed = true;
            }
        }
    }

    if !conflicts.is_empty() {
        warn!(
            attribute = %document.key(),
            conflicts = conflicts.len(),
            "sticky assignment conflict; keeping stored variations"
        );
    }

    let ack = if changed {
        let ack = store.save_assignments(&document).await;
        debug!(attribute = %document.key(), ?ack, "sticky assignments saved");
        Some(ack)
    } else {
        None
    };

    MergeReport {
        document,
        changed,
        conflicts,
        ack,
    }
}
