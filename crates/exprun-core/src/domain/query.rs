//! Dispatched queries and the map of their outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::legacy::LegacyResults;

/// Lifecycle of one dispatched query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryStatus::Succeeded | QueryStatus::Failed)
    }
}

/// A variation identifier as it arrives from the warehouse: text or number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VariationKey {
    Text(String),
    Number(serde_json::Number),
}

impl VariationKey {
    /// String form used to match against variation ids.
    ///
    /// Integral numbers render without a fractional part, so `1` and `1.0`
    /// both match the variation id `"1"`.
    pub fn as_key(&self) -> String {
        match self {
            VariationKey::Text(s) => s.clone(),
            VariationKey::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.to_string()
                } else if let Some(u) = n.as_u64() {
                    u.to_string()
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                            format!("{}", f as i64)
                        }
                        Some(f) => f.to_string(),
                        None => n.to_string(),
                    }
                }
            }
        }
    }
}

impl From<&str> for VariationKey {
    fn from(s: &str) -> Self {
        VariationKey::Text(s.to_string())
    }
}

/// One row of the traffic (aggregate units) query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficRow {
    pub variation: VariationKey,
    pub dimension_name: String,
    pub dimension_value: String,
    #[serde(default)]
    pub units: f64,
}

impl TrafficRow {
    pub fn new(variation: &str, dimension_name: &str, dimension_value: &str, units: f64) -> Self {
        Self {
            variation: variation.into(),
            dimension_name: dimension_name.to_string(),
            dimension_value: dimension_value.to_string(),
            units,
        }
    }
}

/// Processed result of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPayload {
    /// Rows passed through untouched (units and metric queries).
    Rows(Vec<Value>),
    Traffic(Vec<TrafficRow>),
    Legacy(LegacyResults),
}

/// A dispatched query and everything known about it so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryPointer {
    pub name: String,
    pub query: String,
    pub status: QueryStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Kept in memory only; snapshots persist the pointer metadata.
    #[serde(skip)]
    pub result: Option<QueryPayload>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueryPointer {
    pub fn queued(name: impl Into<String>, query: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            status: QueryStatus::Queued,
            dependencies,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == QueryStatus::Succeeded
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}

/// Terminal query pointers keyed by name. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMap {
    entries: BTreeMap<String, QueryPointer>,
}

impl QueryMap {
    /// Build from pointers, keeping only those in a terminal state.
    pub fn from_terminal(pointers: impl IntoIterator<Item = QueryPointer>) -> Self {
        let entries = pointers
            .into_iter()
            .filter(|p| p.status.is_terminal())
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&QueryPointer> {
        self.entries.get(name)
    }

    /// Payload of `name`, only if that query succeeded.
    pub fn result(&self, name: &str) -> Option<&QueryPayload> {
        self.entries
            .get(name)
            .filter(|p| p.succeeded())
            .and_then(|p| p.result.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryPointer> {
        self.entries.values()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &QueryPointer> {
        self.entries.values().filter(|p| p.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &QueryPointer> {
        self.entries
            .values()
            .filter(|p| p.status == QueryStatus::Failed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
