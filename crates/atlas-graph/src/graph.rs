// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory topology graph store.

use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::events::{EventHub, GraphEvent, GraphEventListener, ListenerRegistry};
use crate::ident::NodeId;
use crate::matcher::ElementMatcher;
use crate::metadata::Metadata;
use crate::node::Node;

/// Error returned by graph mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// `add_node` targeting an identifier already present.
    #[error("node already exists: {0}")]
    AlreadyExists(NodeId),
    /// A mutation targeting an identifier not present.
    #[error("node not found: {0}")]
    NotFound(NodeId),
}

/// Live in-memory topology graph.
///
/// Stores immutable node snapshots behind one read/write lock and publishes
/// every mutation on its own [`EventHub`]. Events are emitted after the
/// store lock is released, so a listener is free to query the graph (or
/// mutate it again) from inside its callback.
pub struct Graph {
    nodes: RwLock<FxHashMap<NodeId, Arc<Node>>>,
    hub: EventHub,
}

impl Graph {
    /// Creates an empty graph with the default event-hub capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(FxHashMap::default()),
            hub: EventHub::default(),
        }
    }

    /// Adds a node with `metadata` at revision 1.
    ///
    /// # Errors
    ///
    /// [`GraphError::AlreadyExists`] when `id` is already present.
    pub fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<Arc<Node>, GraphError> {
        let node = Arc::new(Node {
            id: id.clone(),
            metadata,
            revision: 1,
        });
        {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            if nodes.contains_key(&id) {
                return Err(GraphError::AlreadyExists(id));
            }
            nodes.insert(id, Arc::clone(&node));
        }
        debug!(node = %node.id, "node added");
        self.hub.notify(GraphEvent::NodeAdded(Arc::clone(&node)));
        Ok(node)
    }

    /// Sets one metadata entry on a node, bumping its revision.
    ///
    /// # Errors
    ///
    /// [`GraphError::NotFound`] when `id` is not present.
    pub fn add_metadata(
        &self,
        id: &NodeId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Arc<Node>, GraphError> {
        let (key, value): (String, Value) = (key.into(), value.into());
        self.mutate(id, move |metadata| metadata.set(key, value))
    }

    /// Removes one metadata entry from a node, bumping its revision.
    ///
    /// # Errors
    ///
    /// [`GraphError::NotFound`] when `id` is not present.
    pub fn del_metadata(&self, id: &NodeId, key: &str) -> Result<Arc<Node>, GraphError> {
        self.mutate(id, |metadata| {
            metadata.remove(key);
        })
    }

    /// Replaces a node's whole metadata bag, bumping its revision.
    ///
    /// # Errors
    ///
    /// [`GraphError::NotFound`] when `id` is not present.
    pub fn set_metadata(&self, id: &NodeId, metadata: Metadata) -> Result<Arc<Node>, GraphError> {
        self.mutate(id, move |current| *current = metadata)
    }

    fn mutate(
        &self,
        id: &NodeId,
        apply: impl FnOnce(&mut Metadata),
    ) -> Result<Arc<Node>, GraphError> {
        let node = {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            let current = nodes
                .get(id)
                .ok_or_else(|| GraphError::NotFound(id.clone()))?;
            let mut metadata = current.metadata.clone();
            let revision = current.revision + 1;
            apply(&mut metadata);
            let next = Arc::new(Node {
                id: id.clone(),
                metadata,
                revision,
            });
            nodes.insert(id.clone(), Arc::clone(&next));
            next
        };
        debug!(node = %node.id, revision = node.revision, "node updated");
        self.hub.notify(GraphEvent::NodeUpdated(Arc::clone(&node)));
        Ok(node)
    }

    /// Deletes a node, returning its last snapshot.
    ///
    /// # Errors
    ///
    /// [`GraphError::NotFound`] when `id` is not present.
    pub fn del_node(&self, id: &NodeId) -> Result<Arc<Node>, GraphError> {
        let node = {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            nodes
                .remove(id)
                .ok_or_else(|| GraphError::NotFound(id.clone()))?
        };
        debug!(node = %node.id, "node deleted");
        self.hub.notify(GraphEvent::NodeDeleted(Arc::clone(&node)));
        Ok(node)
    }

    /// Looks up a node by identifier.
    #[must_use]
    pub fn get_node(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of every node satisfying `matcher` (`None` matches all), in
    /// unspecified order.
    #[must_use]
    pub fn nodes(&self, matcher: Option<&dyn ElementMatcher>) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|node| matcher.is_none_or(|m| m.matches(&node.metadata)))
            .cloned()
            .collect()
    }

    /// Number of nodes currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when the graph holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry for Graph {
    fn add_listener(&self, listener: Arc<dyn GraphEventListener>) {
        self.hub.add_listener(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn GraphEventListener>) {
        self.hub.remove_listener(listener);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn add_update_delete_round_trip() {
        let graph = Graph::new();
        let id = NodeId::from("host-1");

        let node = graph
            .add_node(id.clone(), Metadata::new().with("type", "host"))
            .expect("add");
        assert_eq!(node.revision, 1);
        assert_eq!(graph.len(), 1);

        let node = graph.add_metadata(&id, "name", "host-1").expect("update");
        assert_eq!(node.revision, 2);
        assert_eq!(
            graph.get_node(&id).expect("get").metadata.get("name"),
            Some(&serde_json::json!("host-1"))
        );

        let node = graph.del_node(&id).expect("delete");
        assert_eq!(node.revision, 2);
        assert!(graph.get_node(&id).is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let graph = Graph::new();
        let id = NodeId::from("host-1");
        graph.add_node(id.clone(), Metadata::new()).expect("add");
        assert_eq!(
            graph.add_node(id.clone(), Metadata::new()),
            Err(GraphError::AlreadyExists(id))
        );
    }

    #[test]
    fn mutating_missing_node_is_rejected() {
        let graph = Graph::new();
        let id = NodeId::from("ghost");
        assert_eq!(
            graph.add_metadata(&id, "k", "v"),
            Err(GraphError::NotFound(id.clone()))
        );
        assert_eq!(graph.del_node(&id), Err(GraphError::NotFound(id)));
    }

    #[test]
    fn nodes_filters_through_matcher() {
        let graph = Graph::new();
        graph
            .add_node("h1".into(), Metadata::new().with("type", "host"))
            .expect("add");
        graph
            .add_node("c1".into(), Metadata::new().with("type", "container"))
            .expect("add");

        let filter = Metadata::new().with("type", "host");
        let hosts = graph.nodes(Some(&filter));
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, NodeId::from("h1"));
        assert_eq!(graph.nodes(None).len(), 2);
    }

    /// Listener asserting it can re-enter the graph during a callback.
    struct Reentrant {
        graph: Arc<Graph>,
        observed: Mutex<Vec<u64>>,
    }

    impl GraphEventListener for Reentrant {
        fn on_node_added(&self, node: &Arc<Node>) {
            // The store lock is already released: lookups work from here.
            let live = self.graph.get_node(&node.id).expect("node visible");
            self.observed.lock().unwrap().push(live.revision);
        }
    }

    #[test]
    fn events_fire_after_lock_release() {
        let graph = Arc::new(Graph::new());
        let listener = Arc::new(Reentrant {
            graph: Arc::clone(&graph),
            observed: Mutex::new(Vec::new()),
        });
        graph.add_listener(listener.clone());

        graph
            .add_node("h1".into(), Metadata::new())
            .expect("add");

        assert_eq!(listener.observed.lock().unwrap().clone(), vec![1]);
    }
}
