// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph mutation events and the bounded notification hub.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::error;

use crate::node::Node;

/// Default bound on a hub's pending-event queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 50;

/// A mutation observed on a node feed.
///
/// The same three kinds describe both primary graph mutations and the
/// index-level add/update/delete notifications an indexer re-emits to its
/// own subscribers.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A node appeared on the feed.
    NodeAdded(Arc<Node>),
    /// A node's metadata changed.
    NodeUpdated(Arc<Node>),
    /// A node left the feed.
    NodeDeleted(Arc<Node>),
}

impl GraphEvent {
    /// The node the event is about.
    #[must_use]
    pub fn node(&self) -> &Arc<Node> {
        match self {
            Self::NodeAdded(node) | Self::NodeUpdated(node) | Self::NodeDeleted(node) => node,
        }
    }

    fn deliver(&self, listener: &dyn GraphEventListener) {
        match self {
            Self::NodeAdded(node) => listener.on_node_added(node),
            Self::NodeUpdated(node) => listener.on_node_updated(node),
            Self::NodeDeleted(node) => listener.on_node_deleted(node),
        }
    }
}

/// Listener over a node feed.
///
/// Every callback defaults to a no-op so implementations override only the
/// events they care about.
pub trait GraphEventListener: Send + Sync {
    /// Called after a node is added.
    fn on_node_added(&self, _node: &Arc<Node>) {}
    /// Called after a node's metadata changes.
    fn on_node_updated(&self, _node: &Arc<Node>) {}
    /// Called after a node is deleted.
    fn on_node_deleted(&self, _node: &Arc<Node>) {}
}

/// Capability to (un)subscribe listeners on a node feed.
///
/// Implemented by [`crate::Graph`] and by the indexers built on top of it,
/// so downstream consumers chain off either the same way.
pub trait ListenerRegistry: Send + Sync {
    /// Subscribes `listener` to the feed.
    fn add_listener(&self, listener: Arc<dyn GraphEventListener>);
    /// Removes a previously subscribed listener, matched by `Arc` identity.
    fn remove_listener(&self, listener: &Arc<dyn GraphEventListener>);
}

struct PendingQueue {
    events: VecDeque<GraphEvent>,
    draining: bool,
    capacity: usize,
}

/// Bounded publish/subscribe hub delivering [`GraphEvent`]s in emission
/// order.
///
/// Dispatch is queued: the first notifier drains the queue, and a listener
/// that emits further events from inside its callback appends to the queue
/// instead of recursing. Delivery order therefore equals emission order and
/// re-entrant emission cannot overflow the stack.
pub struct EventHub {
    listeners: RwLock<Vec<Arc<dyn GraphEventListener>>>,
    pending: Mutex<PendingQueue>,
}

impl EventHub {
    /// Creates a hub whose pending queue holds at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            pending: Mutex::new(PendingQueue {
                events: VecDeque::new(),
                draining: false,
                capacity,
            }),
        }
    }

    /// Subscribes a listener.
    pub fn add_listener(&self, listener: Arc<dyn GraphEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Removes every subscription matching `listener` by `Arc` identity.
    pub fn remove_listener(&self, listener: &Arc<dyn GraphEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|candidate| !Arc::ptr_eq(candidate, listener));
    }

    /// Number of current subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Publishes `event` to every subscriber.
    ///
    /// When the pending queue is saturated the event is dropped with an
    /// error record; that only happens when a listener cascade loops.
    pub fn notify(&self, event: GraphEvent) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.events.len() >= pending.capacity {
                error!(
                    capacity = pending.capacity,
                    node = %event.node().id,
                    "event queue saturated, dropping event"
                );
                return;
            }
            pending.events.push_back(event);
            if pending.draining {
                return;
            }
            pending.draining = true;
        }
        loop {
            let event = {
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                match pending.events.pop_front() {
                    Some(event) => event,
                    None => {
                        pending.draining = false;
                        return;
                    }
                }
            };
            let listeners: Vec<_> = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in &listeners {
                event.deliver(listener.as_ref());
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::NodeId;
    use crate::metadata::Metadata;

    fn node(id: &str) -> Arc<Node> {
        Arc::new(Node {
            id: NodeId::from(id),
            metadata: Metadata::new(),
            revision: 1,
        })
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn record(&self, kind: &str, node: &Arc<Node>) {
            self.seen.lock().unwrap().push(format!("{kind}:{}", node.id));
        }
    }

    impl GraphEventListener for Recorder {
        fn on_node_added(&self, node: &Arc<Node>) {
            self.record("add", node);
        }

        fn on_node_updated(&self, node: &Arc<Node>) {
            self.record("upd", node);
        }

        fn on_node_deleted(&self, node: &Arc<Node>) {
            self.record("del", node);
        }
    }

    #[test]
    fn delivers_in_emission_order() {
        let hub = EventHub::default();
        let recorder = Recorder::new();
        hub.add_listener(recorder.clone());

        hub.notify(GraphEvent::NodeAdded(node("a")));
        hub.notify(GraphEvent::NodeUpdated(node("a")));
        hub.notify(GraphEvent::NodeDeleted(node("a")));

        assert_eq!(recorder.seen(), vec!["add:a", "upd:a", "del:a"]);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let hub = EventHub::default();
        let recorder = Recorder::new();
        let listener: Arc<dyn GraphEventListener> = recorder.clone();
        hub.add_listener(Arc::clone(&listener));
        hub.notify(GraphEvent::NodeAdded(node("a")));

        hub.remove_listener(&listener);
        hub.notify(GraphEvent::NodeAdded(node("b")));

        assert_eq!(recorder.seen(), vec!["add:a"]);
        assert_eq!(hub.listener_count(), 0);
    }

    /// A listener that re-enters the hub while handling an event.
    struct Chainer {
        hub: Arc<EventHub>,
        recorder: Arc<Recorder>,
    }

    impl GraphEventListener for Chainer {
        fn on_node_added(&self, added: &Arc<Node>) {
            self.recorder.record("add", added);
            if added.id.as_str() == "first" {
                self.hub.notify(GraphEvent::NodeAdded(node("second")));
            }
        }
    }

    #[test]
    fn reentrant_notify_keeps_emission_order() {
        let hub = Arc::new(EventHub::default());
        let recorder = Recorder::new();
        let chainer = Arc::new(Chainer {
            hub: Arc::clone(&hub),
            recorder: recorder.clone(),
        });
        hub.add_listener(chainer);
        let tail = Recorder::new();
        hub.add_listener(tail.clone());

        hub.notify(GraphEvent::NodeAdded(node("first")));

        // The re-entrant "second" event queued behind "first" for every
        // listener instead of preempting it.
        assert_eq!(recorder.seen(), vec!["add:first", "add:second"]);
        assert_eq!(tail.seen(), vec!["add:first", "add:second"]);
    }

    /// Floods the hub from inside a callback so the pending queue fills
    /// while the hub is still draining.
    struct Flooder {
        hub: Arc<EventHub>,
    }

    impl GraphEventListener for Flooder {
        fn on_node_added(&self, added: &Arc<Node>) {
            if added.id.as_str() == "seed" {
                for i in 0..8 {
                    self.hub
                        .notify(GraphEvent::NodeAdded(node(&format!("n{i}"))));
                }
            }
        }
    }

    #[test]
    fn saturated_queue_drops_events() {
        let hub = Arc::new(EventHub::new(2));
        let recorder = Recorder::new();

        hub.add_listener(Arc::new(Flooder {
            hub: Arc::clone(&hub),
        }));
        hub.add_listener(recorder.clone());

        hub.notify(GraphEvent::NodeAdded(node("seed")));

        // Capacity 2: "seed" occupied one slot while draining started, so
        // only part of the flood survived.
        let seen = recorder.seen();
        assert!(seen.len() < 9, "flood should have been clipped: {seen:?}");
        assert_eq!(seen[0], "add:seed");
    }
}
