//! Capability descriptors a backend declares.

use std::collections::BTreeSet;
use std::fmt;

/// Optional feature a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    /// Native batch publish and batch subscribe.
    BatchOperations,
    /// Per-message time-to-live via the `ttlInSeconds` metadata key.
    MessageTtl,
    /// Wildcard and hierarchical topic filters on subscribe.
    SubscribeWildcards,
}

impl Feature {
    /// Stable tag for logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::BatchOperations => "BATCH_OPERATIONS",
            Feature::MessageTtl => "MESSAGE_TTL",
            Feature::SubscribeWildcards => "SUBSCRIBE_WILDCARDS",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of features supported by a backend instance.
///
/// Only membership is meaningful; iteration order carries no information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    pub fn insert(&mut self, feature: Feature) -> bool {
        self.0.insert(feature)
    }

    pub fn remove(&mut self, feature: Feature) -> bool {
        self.0.remove(&feature)
    }

    /// Copy of this set without `feature`.
    pub fn without(mut self, feature: Feature) -> Self {
        self.0.remove(&feature);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Feature; N]> for FeatureSet {
    fn from(features: [Feature; N]) -> Self {
        features.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_ignores_insertion_order() {
        let a = FeatureSet::from([Feature::MessageTtl, Feature::BatchOperations]);
        let b = FeatureSet::from([Feature::BatchOperations, Feature::MessageTtl]);
        assert_eq!(a, b);
        assert!(a.contains(Feature::BatchOperations));
        assert!(!a.contains(Feature::SubscribeWildcards));
    }

    #[test]
    fn test_duplicates_collapse() {
        let set = FeatureSet::from([Feature::MessageTtl, Feature::MessageTtl]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_without_removes_feature() {
        let set = FeatureSet::from([Feature::BatchOperations, Feature::MessageTtl])
            .without(Feature::BatchOperations);
        assert!(!set.contains(Feature::BatchOperations));
        assert!(set.contains(Feature::MessageTtl));
    }

    #[test]
    fn test_tags() {
        assert_eq!(Feature::BatchOperations.to_string(), "BATCH_OPERATIONS");
        assert_eq!(Feature::SubscribeWildcards.as_str(), "SUBSCRIBE_WILDCARDS");
    }
}
