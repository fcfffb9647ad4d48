// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! atlas-index: secondary indexing engine for the live topology graph.
//!
//! The [`Indexer`] maintains a bidirectional map between nodes and the
//! hashes a pluggable projection derives from them, reacting to graph
//! mutation events without ever re-scanning the graph. [`MetadataIndexer`]
//! builds that projection from named metadata fields behind a matcher and
//! adds a full [`MetadataIndexer::sync`] rebuild. Any number of indexers
//! with different projections can observe the same graph, and an indexer's
//! own event feed can drive further indexers downstream.

mod hash;
mod indexer;
mod metadata;

pub use hash::{index_hash, IndexHash};
pub use indexer::{IndexMode, Indexer, IndexerStats, NodeProjection};
pub use metadata::{FieldTuple, IndexerError, MetadataIndexer};
