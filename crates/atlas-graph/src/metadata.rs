// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node metadata bags and field extraction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error raised while extracting named fields from a metadata bag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The requested field (or a segment of its dotted path) is absent.
    #[error("field not found: {0}")]
    Missing(String),
}

/// Key/value bag attached to every node.
///
/// Values are arbitrary JSON. Nested objects are addressable with dotted
/// paths (`"labels.role"`); a literal key containing a dot wins over path
/// descent. Key order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a top-level entry, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`Metadata::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Removes a top-level entry, returning its value when present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Resolves `path` to a value, descending dotted segments through
    /// nested objects. A literal key equal to the full path takes priority.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Returns `true` when `path` resolves to a value.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Number of top-level entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the bag has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the top-level entries in key order.
    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }

    /// Returns `true` when every entry of `filter` resolves to an equal
    /// value in this bag. Filter keys may be dotted paths.
    #[must_use]
    pub fn matches_subset(&self, filter: &Metadata) -> bool {
        filter.0.iter().all(|(key, value)| self.get(key) == Some(value))
    }

    /// Extracts `fields` as parallel value rows.
    ///
    /// A scalar field contributes its value to every row. An array-valued
    /// field is multi-valued: it fans out one row per element, combined
    /// cartesian-style across fields, so a bag with `ip: ["a", "b"]`
    /// extracted on `["ip"]` yields two rows. An empty array yields zero
    /// rows. Any field that does not resolve is [`FieldError::Missing`].
    pub fn field_rows(&self, fields: &[String]) -> Result<Vec<Vec<Value>>, FieldError> {
        let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(fields.len())];
        for field in fields {
            let value = self
                .get(field)
                .ok_or_else(|| FieldError::Missing(field.clone()))?;
            match value {
                Value::Array(items) => {
                    let mut fanned = Vec::with_capacity(rows.len() * items.len());
                    for row in &rows {
                        for item in items {
                            let mut row = row.clone();
                            row.push(item.clone());
                            fanned.push(row);
                        }
                    }
                    rows = fanned;
                }
                scalar => {
                    for row in &mut rows {
                        row.push(scalar.clone());
                    }
                }
            }
        }
        Ok(rows)
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
