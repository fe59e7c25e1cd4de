//! Compound-key helpers for single-namespace backends.
//!
//! Backends without a native container per collection (caches, object
//! stores) scope keys by joining collection and key with
//! [`COMPOUND_SEPARATOR`]. Enumeration reverses the join by stripping the
//! collection prefix.

/// Separator between collection and key in a compound key.
pub const COMPOUND_SEPARATOR: &str = "::";

/// Joins a collection and key into a single namespaced key.
#[must_use]
pub fn compound_key(collection: &str, key: &str) -> String {
    format!("{collection}{COMPOUND_SEPARATOR}{key}")
}

/// The compound-key prefix matching every key in a collection.
#[must_use]
pub fn compound_prefix(collection: &str) -> String {
    format!("{collection}{COMPOUND_SEPARATOR}")
}

/// Recovers the key portion of a compound key, if it belongs to the
/// given collection.
#[must_use]
pub fn key_from_compound_key(compound: &str, collection: &str) -> Option<String> {
    compound
        .strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix(COMPOUND_SEPARATOR))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let compound = compound_key("users", "alice");
        assert_eq!(compound, "users::alice");
        assert_eq!(
            key_from_compound_key(&compound, "users"),
            Some("alice".to_string())
        );
    }

    #[test]
    fn wrong_collection_is_rejected() {
        let compound = compound_key("users", "alice");
        assert_eq!(key_from_compound_key(&compound, "orders"), None);
        // A collection that is a prefix of another must not match.
        assert_eq!(key_from_compound_key(&compound, "user"), None);
    }

    #[test]
    fn key_may_contain_the_separator() {
        let compound = compound_key("users", "a::b");
        assert_eq!(
            key_from_compound_key(&compound, "users"),
            Some("a::b".to_string())
        );
    }
}
