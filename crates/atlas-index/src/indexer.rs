// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Generic hash-keyed node indexer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use atlas_graph::{
    EventHub, Graph, GraphEvent, GraphEventListener, ListenerRegistry, Node, NodeId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::debug;

use crate::hash::{index_hash, IndexHash};

/// Projection mapping a node to the hash→value rows it should be indexed
/// under.
///
/// An empty map means "not indexed by this instance". The projection runs
/// outside the index lock and must not call back into the indexer that
/// drives it.
pub type NodeProjection<V> = dyn Fn(&Node) -> FxHashMap<IndexHash, V> + Send + Sync;

/// Maintenance policy applied when an already-indexed node is re-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// The node's hash set always equals its latest projection: hashes
    /// absent from the new projection are removed first.
    #[default]
    Replace,
    /// Historical hashes persist across updates and are removed only when
    /// the node itself is unindexed. Use when rows must stay queryable
    /// after the underlying attribute changes.
    AppendOnly,
}

/// Point-in-time size of the index maps, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerStats {
    /// Distinct hashes in the forward map.
    pub hashes: usize,
    /// Nodes in the reverse map.
    pub nodes: usize,
}

struct IndexState<V> {
    /// hash → (node id → stored value). At most one value per (hash, id).
    hash_to_values: FxHashMap<IndexHash, FxHashMap<NodeId, V>>,
    /// node id → hashes currently attributed to that node.
    node_to_hashes: FxHashMap<NodeId, FxHashSet<IndexHash>>,
}

impl<V> IndexState<V> {
    fn insert_row(&mut self, id: &NodeId, hash: IndexHash, value: V) {
        self.hash_to_values
            .entry(hash.clone())
            .or_default()
            .insert(id.clone(), value);
        self.node_to_hashes.entry(id.clone()).or_default().insert(hash);
    }

    /// Removes one (hash, id) row, pruning the forward bucket when it
    /// empties so no empty buckets linger.
    fn remove_row(&mut self, id: &NodeId, hash: &str) {
        let bucket_is_empty = self.hash_to_values.get_mut(hash).is_some_and(|bucket| {
            bucket.remove(id);
            bucket.is_empty()
        });
        if bucket_is_empty {
            self.hash_to_values.remove(hash);
        }
        if let Some(hashes) = self.node_to_hashes.get_mut(id) {
            hashes.remove(hash);
        }
    }
}

/// Bidirectional secondary index between graph nodes and projected hashes.
///
/// The indexer listens on a node feed (the graph's, or another indexer's),
/// runs its projection on every added or updated node, and keeps the
/// forward (hash→nodes) and reverse (node→hashes) maps mutually consistent
/// under one read/write lock. It re-emits index-level add/update/delete
/// events on its own hub, always after the lock is released, so downstream
/// listeners may query or even re-enter the indexer from their callbacks.
pub struct Indexer<V> {
    name: String,
    graph: Arc<Graph>,
    source: Option<Arc<dyn ListenerRegistry>>,
    project: Box<NodeProjection<V>>,
    mode: IndexMode,
    state: RwLock<IndexState<V>>,
    hub: EventHub,
    started: AtomicBool,
    this: Weak<Indexer<V>>,
}

impl<V> Indexer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an indexer over `graph`.
    ///
    /// `name` only labels diagnostics. `source` is the feed [`Indexer::start`]
    /// subscribes to; pass `None` for an unmanaged index fed by direct
    /// [`Indexer::index`]/[`Indexer::unindex`] calls.
    pub fn new(
        name: impl Into<String>,
        graph: Arc<Graph>,
        source: Option<Arc<dyn ListenerRegistry>>,
        mode: IndexMode,
        project: impl Fn(&Node) -> FxHashMap<IndexHash, V> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            graph,
            source,
            project: Box::new(project),
            mode,
            state: RwLock::new(IndexState {
                hash_to_values: FxHashMap::default(),
                node_to_hashes: FxHashMap::default(),
            }),
            hub: EventHub::default(),
            started: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Integrates `projection` as the node's current rows.
    ///
    /// A node seen for the first time gets every projected hash and an
    /// index-added event. A known node is re-indexed under the maintenance
    /// mode ([`IndexMode::Replace`] removes hashes absent from the new
    /// projection first) and emits index-updated, even when the projection
    /// content is unchanged.
    pub fn index(&self, id: &NodeId, node: &Arc<Node>, projection: FxHashMap<IndexHash, V>) {
        let event = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.node_to_hashes.contains_key(id) {
                if self.mode == IndexMode::Replace {
                    let stale: Vec<IndexHash> =
                        state.node_to_hashes.get(id).map_or_else(Vec::new, |hashes| {
                            hashes
                                .iter()
                                .filter(|hash| !projection.contains_key(hash.as_str()))
                                .cloned()
                                .collect()
                        });
                    for hash in &stale {
                        state.remove_row(id, hash);
                    }
                }
                for (hash, value) in projection {
                    state.insert_row(id, hash, value);
                }
                GraphEvent::NodeUpdated(Arc::clone(node))
            } else {
                state.node_to_hashes.insert(id.clone(), FxHashSet::default());
                for (hash, value) in projection {
                    state.insert_row(id, hash, value);
                }
                GraphEvent::NodeAdded(Arc::clone(node))
            }
        };
        debug!(indexer = %self.name, node = %id, "node indexed");
        self.hub.notify(event);
    }

    /// Removes every hash association owned by the node.
    ///
    /// Emits an index-deleted event only when the node actually had indexed
    /// hashes; otherwise this is a silent no-op.
    pub fn unindex(&self, id: &NodeId, node: &Arc<Node>) {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match state.node_to_hashes.remove(id) {
                Some(hashes) => {
                    for hash in &hashes {
                        state.remove_row(id, hash);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!(indexer = %self.name, node = %id, "node unindexed");
            self.hub.notify(GraphEvent::NodeDeleted(Arc::clone(node)));
        }
    }

    /// Hashes the value tuple with the projection hashing rule and returns
    /// every indexed node with its stored value, in unspecified order.
    #[must_use]
    pub fn get(&self, values: &[Value]) -> Vec<(Arc<Node>, V)> {
        self.from_hash(&index_hash(values))
    }

    /// Like [`Indexer::get`], returning one arbitrary match.
    #[must_use]
    pub fn get_node(&self, values: &[Value]) -> Option<(Arc<Node>, V)> {
        self.get(values).into_iter().next()
    }

    /// Returns every node indexed under a precomputed hash.
    ///
    /// Stored identifiers are re-resolved through the graph; an identifier
    /// that no longer resolves (a delete raced the query) is skipped, so
    /// the result only ever contains live nodes. An unknown hash yields an
    /// empty result, never an error.
    #[must_use]
    pub fn from_hash(&self, hash: &str) -> Vec<(Arc<Node>, V)> {
        let rows: Vec<(NodeId, V)> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.hash_to_values.get(hash).map_or_else(Vec::new, |bucket| {
                bucket
                    .iter()
                    .map(|(id, value)| (id.clone(), value.clone()))
                    .collect()
            })
        };
        rows.into_iter()
            .filter_map(|(id, value)| self.graph.get_node(&id).map(|node| (node, value)))
            .collect()
    }

    /// Subscribes the indexer to its upstream feed. Idempotent; a no-op
    /// when the indexer was built without a source.
    pub fn start(&self) {
        let Some(source) = &self.source else { return };
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            source.add_listener(this);
        }
    }

    /// Removes the indexer from its upstream feed. Idempotent.
    pub fn stop(&self) {
        let Some(source) = &self.source else { return };
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            let listener: Arc<dyn GraphEventListener> = this;
            source.remove_listener(&listener);
        }
    }

    /// Current map sizes.
    #[must_use]
    pub fn stats(&self) -> IndexerStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        IndexerStats {
            hashes: state.hash_to_values.len(),
            nodes: state.node_to_hashes.len(),
        }
    }

    /// The graph this indexer resolves identifiers against.
    #[must_use]
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Discards both maps. The caller is expected to re-populate the index
    /// right away (see `MetadataIndexer::sync`).
    pub(crate) fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.hash_to_values.clear();
        state.node_to_hashes.clear();
    }

    /// Runs the stored projection for `node` and applies the result: a
    /// non-empty projection indexes, an empty one unindexes when
    /// `unindex_on_empty` is set (the node stopped matching) and is
    /// otherwise ignored.
    fn apply_projection(&self, node: &Arc<Node>, unindex_on_empty: bool) {
        let projection = (self.project)(node);
        if projection.is_empty() {
            if unindex_on_empty {
                self.unindex(&node.id, node);
            }
        } else {
            self.index(&node.id, node, projection);
        }
    }

    pub(crate) fn reindex_node(&self, node: &Arc<Node>) {
        self.apply_projection(node, false);
    }
}

impl<V> GraphEventListener for Indexer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn on_node_added(&self, node: &Arc<Node>) {
        self.apply_projection(node, false);
    }

    fn on_node_updated(&self, node: &Arc<Node>) {
        self.apply_projection(node, true);
    }

    fn on_node_deleted(&self, node: &Arc<Node>) {
        self.unindex(&node.id, node);
    }
}

impl<V> ListenerRegistry for Indexer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn add_listener(&self, listener: Arc<dyn GraphEventListener>) {
        self.hub.add_listener(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn GraphEventListener>) {
        self.hub.remove_listener(listener);
    }
}
