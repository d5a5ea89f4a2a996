//! Allowed-type filter for incoming transfers.

use std::collections::BTreeSet;

/// Set of accepted item types; empty accepts everything.
///
/// Membership is exact: listing a supertype does not admit its subtypes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTypes {
    types: BTreeSet<String>,
}

impl AllowedTypes {
    /// Filter that accepts everything
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns true if the filter accepts everything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Number of listed types
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Add a type
    pub fn insert(&mut self, item_type: impl Into<String>) -> bool {
        self.types.insert(item_type.into())
    }

    /// Returns true if the type is listed
    #[must_use]
    pub fn contains(&self, item_type: &str) -> bool {
        self.types.contains(item_type)
    }

    /// Listed types, sorted
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }

    /// Returns true if an item of `item_type` may be received
    #[must_use]
    pub fn allows(&self, item_type: &str) -> bool {
        self.is_empty() || self.types.contains(item_type)
    }
}

impl<S: Into<String>> FromIterator<S> for AllowedTypes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allows_everything() {
        let filter = AllowedTypes::allow_all();
        assert!(filter.allows("image/png"));
        assert!(filter.allows("x-unknown/thing"));
    }

    #[test]
    fn test_membership_is_exact() {
        let filter: AllowedTypes = ["text/plain"].into_iter().collect();
        assert!(filter.allows("text/plain"));
        assert!(!filter.allows("image/png"));
        assert!(!filter.allows("text/html"));

        let images: AllowedTypes = ["public.image"].into_iter().collect();
        assert!(images.allows("public.image"));
        assert!(!images.allows("image/png"));

        let data: AllowedTypes = ["public.data"].into_iter().collect();
        assert!(!data.allows("image/png"));
    }

    #[test]
    fn test_iter_sorted() {
        let filter: AllowedTypes = ["b", "a", "b"].into_iter().collect();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(filter.contains("a"));
    }
}
