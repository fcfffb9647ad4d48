// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node snapshots.

use serde::{Deserialize, Serialize};

use crate::ident::NodeId;
use crate::metadata::Metadata;

/// Immutable snapshot of a topology node.
///
/// The graph replaces the whole snapshot on every metadata mutation and
/// bumps `revision`, so a listener holding an `Arc<Node>` never observes a
/// half-applied update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier, stable across the node's lifetime.
    pub id: NodeId,
    /// Metadata bag as of this revision.
    pub metadata: Metadata,
    /// Monotonic per-node revision, starting at 1.
    pub revision: u64,
}
