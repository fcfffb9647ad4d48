// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Metadata-projection indexer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use atlas_graph::{
    ElementMatcher, Graph, GraphEventListener, ListenerRegistry, Node,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::hash::{index_hash, IndexHash};
use crate::indexer::{IndexMode, Indexer, IndexerStats};

/// Error returned when an indexer is misconfigured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexerError {
    /// A metadata indexer was constructed with no fields to key on.
    #[error("metadata indexer requires at least one field")]
    NoFields,
}

/// Stored value of a metadata index row: the projected field-value tuple,
/// in field order.
pub type FieldTuple = Vec<Value>;

/// Indexer keyed by the values of named metadata fields.
///
/// Nodes pass through the matcher first (`None` admits every node). The
/// named fields are then extracted as rows (a multi-valued field fans out
/// one row per value combination) and each row whose length matches the
/// field count is indexed under the digest of its tuple, with the tuple
/// itself as the stored value. Extraction failures are swallowed: the node
/// simply yields no rows for that pass, observable through
/// [`MetadataIndexer::projection_failures`].
///
/// Always maintains the index in [`IndexMode::Replace`]: a metadata-derived
/// index must reflect the node's current attribute values.
pub struct MetadataIndexer {
    indexer: Arc<Indexer<FieldTuple>>,
    matcher: Option<Arc<dyn ElementMatcher>>,
    failures: Arc<AtomicU64>,
}

impl std::fmt::Debug for MetadataIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataIndexer")
            .field("matcher", &self.matcher.is_some())
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MetadataIndexer {
    /// Creates a metadata indexer over `graph`, subscribing to `source`
    /// once started.
    ///
    /// # Errors
    ///
    /// [`IndexerError::NoFields`] when `fields` is empty: an index with no
    /// key material is a configuration bug, caught at construction.
    pub fn new(
        name: impl Into<String>,
        graph: Arc<Graph>,
        source: Option<Arc<dyn ListenerRegistry>>,
        matcher: Option<Arc<dyn ElementMatcher>>,
        fields: Vec<String>,
    ) -> Result<Self, IndexerError> {
        if fields.is_empty() {
            return Err(IndexerError::NoFields);
        }
        let name: String = name.into();
        let failures = Arc::new(AtomicU64::new(0));
        let projection = {
            let name = name.clone();
            let matcher = matcher.clone();
            let failures = Arc::clone(&failures);
            move |node: &Node| project_fields(&name, matcher.as_deref(), &fields, &failures, node)
        };
        let indexer = Indexer::new(name, graph, source, IndexMode::Replace, projection);
        Ok(Self {
            indexer,
            matcher,
            failures,
        })
    }

    /// Discards the index and rebuilds it from the graph's current content.
    ///
    /// Covers initial population when the indexer is constructed against a
    /// graph that already holds nodes, and recovery after bulk mutations
    /// that bypassed per-node events. Not safe against concurrent live
    /// events on the same instance: run it before [`MetadataIndexer::start`]
    /// or pause the feed first.
    pub fn sync(&self) {
        self.indexer.reset();
        for node in self.indexer.graph().nodes(self.matcher.as_deref()) {
            self.indexer.reindex_node(&node);
        }
    }

    /// See [`Indexer::get`].
    #[must_use]
    pub fn get(&self, values: &[Value]) -> Vec<(Arc<Node>, FieldTuple)> {
        self.indexer.get(values)
    }

    /// See [`Indexer::get_node`].
    #[must_use]
    pub fn get_node(&self, values: &[Value]) -> Option<(Arc<Node>, FieldTuple)> {
        self.indexer.get_node(values)
    }

    /// See [`Indexer::from_hash`].
    #[must_use]
    pub fn from_hash(&self, hash: &str) -> Vec<(Arc<Node>, FieldTuple)> {
        self.indexer.from_hash(hash)
    }

    /// Subscribes to the upstream feed. Idempotent.
    pub fn start(&self) {
        self.indexer.start();
    }

    /// Unsubscribes from the upstream feed. Idempotent.
    pub fn stop(&self) {
        self.indexer.stop();
    }

    /// Number of nodes dropped because field extraction failed.
    #[must_use]
    pub fn projection_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Current map sizes.
    #[must_use]
    pub fn stats(&self) -> IndexerStats {
        self.indexer.stats()
    }

    /// The index as a subscribable feed, e.g. to chain another indexer off
    /// this one's add/update/delete events.
    #[must_use]
    pub fn as_source(&self) -> Arc<dyn ListenerRegistry> {
        Arc::clone(&self.indexer) as Arc<dyn ListenerRegistry>
    }
}

impl ListenerRegistry for MetadataIndexer {
    fn add_listener(&self, listener: Arc<dyn GraphEventListener>) {
        self.indexer.add_listener(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn GraphEventListener>) {
        self.indexer.remove_listener(listener);
    }
}

fn project_fields(
    name: &str,
    matcher: Option<&dyn ElementMatcher>,
    fields: &[String],
    failures: &AtomicU64,
    node: &Node,
) -> FxHashMap<IndexHash, FieldTuple> {
    let mut rows = FxHashMap::default();
    if let Some(matcher) = matcher {
        if !matcher.matches(&node.metadata) {
            return rows;
        }
    }
    match node.metadata.field_rows(fields) {
        Ok(tuples) => {
            for tuple in tuples {
                if tuple.len() == fields.len() {
                    rows.insert(index_hash(&tuple), tuple);
                }
            }
        }
        Err(err) => {
            failures.fetch_add(1, Ordering::Relaxed);
            debug!(indexer = name, node = %node.id, %err, "field extraction failed, node not indexed");
        }
    }
    rows
}
