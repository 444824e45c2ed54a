//! Key layout
//!
//! ```text
//! {namespace}:{category}::{id}                   registry entry
//! {namespace}:{category}::metadata::{name}       metadata slot
//! lock::{namespace}:{category}::metadata::{name} metadata slot lock
//! ```
//!
//! Categories, ids and slot names may not contain `::` nor start or end
//! with `:`. A `:` at a segment edge would merge with the separator next
//! to it, so `("media:", "x")` and `("media", ":x")` would share a key.

use crate::error::ValidationError;
use crate::store::LOCK_PREFIX;

const SEPARATOR: &str = "::";
const SEPARATOR_CHAR: char = ':';
const METADATA_SEGMENT: &str = "metadata";

/// Reject empty segments and segments that would break the key layout
pub(crate) fn validate_segment(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.contains(SEPARATOR)
        || value.starts_with(SEPARATOR_CHAR)
        || value.ends_with(SEPARATOR_CHAR)
    {
        return Err(ValidationError::ReservedSeparator {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Builds store keys under one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    /// Create a keyspace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix shared by every key of a category
    pub fn category_prefix(&self, category: &str) -> String {
        format!("{}:{}{}", self.namespace, category, SEPARATOR)
    }

    /// Key of a registry entry
    pub fn service_key(&self, category: &str, id: &str) -> String {
        format!("{}{}", self.category_prefix(category), id)
    }

    /// Prefix shared by every metadata slot of a category
    pub fn metadata_prefix(&self, category: &str) -> String {
        format!(
            "{}{}{}",
            self.category_prefix(category),
            METADATA_SEGMENT,
            SEPARATOR
        )
    }

    /// Key of a metadata slot
    pub fn metadata_key(&self, category: &str, name: &str) -> String {
        format!("{}{}", self.metadata_prefix(category), name)
    }

    /// Lock guarding a metadata slot
    pub fn metadata_lock_key(&self, category: &str, name: &str) -> String {
        format!("{}{}", LOCK_PREFIX, self.metadata_key(category, name))
    }

    /// Extract the service id from a registry key, if it is one
    ///
    /// Returns `None` for metadata slots and keys outside the category.
    pub fn service_id<'a>(&self, category: &str, key: &'a str) -> Option<&'a str> {
        let id = key.strip_prefix(&self.category_prefix(category))?;
        if validate_segment("service id", id).is_err() {
            None
        } else {
            Some(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keyspace::new("services");

        assert_eq!(keys.service_key("media", "relay-1"), "services:media::relay-1");
        assert_eq!(
            keys.metadata_key("media", "room_of_7"),
            "services:media::metadata::room_of_7"
        );
        assert_eq!(
            keys.metadata_lock_key("media", "room_of_7"),
            "lock::services:media::metadata::room_of_7"
        );
    }

    #[test]
    fn test_service_id_excludes_metadata() {
        let keys = Keyspace::new("services");

        assert_eq!(
            keys.service_id("media", "services:media::relay-1"),
            Some("relay-1")
        );
        assert_eq!(
            keys.service_id("media", "services:media::metadata::room_of_7"),
            None
        );
        assert_eq!(keys.service_id("media", "services:chat::relay-1"), None);
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("id", "relay-1").is_ok());
        assert_eq!(
            validate_segment("id", ""),
            Err(ValidationError::Empty { field: "id" })
        );
        assert!(matches!(
            validate_segment("id", "metadata::x"),
            Err(ValidationError::ReservedSeparator { field: "id", .. })
        ));
        assert!(validate_segment("id", "eu:relay:1").is_ok());
    }

    #[test]
    fn test_edge_colons_rejected() {
        for value in [":x", "x:", ":", "media:"] {
            assert!(
                matches!(
                    validate_segment("category", value),
                    Err(ValidationError::ReservedSeparator { .. })
                ),
                "{value:?} accepted"
            );
        }

        // Both would have been services:media:::x
        let keys = Keyspace::new("services");
        assert_eq!(keys.service_id("media", "services:media:::x"), None);
    }
}
