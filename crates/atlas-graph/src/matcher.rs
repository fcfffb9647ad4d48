// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Predicates over node metadata.

use crate::metadata::Metadata;

/// Predicate gating which nodes an indexer or query considers.
///
/// Where an API takes `Option<&dyn ElementMatcher>`, `None` admits every
/// node.
pub trait ElementMatcher: Send + Sync {
    /// Returns `true` when a node carrying `metadata` participates.
    fn matches(&self, metadata: &Metadata) -> bool;
}

/// A metadata bag used as a filter matches any node whose metadata contains
/// every one of its entries (dotted filter keys resolve through nested
/// objects).
impl ElementMatcher for Metadata {
    fn matches(&self, metadata: &Metadata) -> bool {
        metadata.matches_subset(self)
    }
}

/// Adapts a plain closure into an [`ElementMatcher`].
pub struct FnMatcher<F>(pub F);

impl<F> ElementMatcher for FnMatcher<F>
where
    F: Fn(&Metadata) -> bool + Send + Sync,
{
    fn matches(&self, metadata: &Metadata) -> bool {
        (self.0)(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_filter_is_subset_match() {
        let meta = Metadata::new().with("type", "host").with("name", "host-1");
        let filter = Metadata::new().with("type", "host");
        assert!(filter.matches(&meta));
        assert!(!Metadata::new().with("type", "container").matches(&meta));
    }

    #[test]
    fn closures_adapt_through_fn_matcher() {
        let meta = Metadata::new().with("type", "host");
        let matcher = FnMatcher(|m: &Metadata| m.contains("type"));
        assert!(matcher.matches(&meta));
        assert!(!FnMatcher(|m: &Metadata| m.contains("ip")).matches(&meta));
    }
}
