//! Identifier types and reserved field names
//!
//! This module defines the foundational identifiers:
//! - Ref: unique document identifier
//! - ClassId: class (or mixin) identifier
//! - Domain: physical partition a class's documents are stored in
//!
//! Reserved document field names live in [`fields`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier string
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the raw identifier
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique document identifier
    Ref
);

string_id!(
    /// Class or mixin identifier, e.g. `tracker:class:Issue`
    ///
    /// Class identifiers never contain `.`: a mixin identifier is used verbatim
    /// as the first segment of a dotted storage path.
    ClassId
);

string_id!(
    /// Physical partition of the backend store
    Domain
);

impl Ref {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Ref(Uuid::new_v4().simple().to_string())
    }
}

/// Universal root class. Queries against it add no class constraint.
pub const DOC_CLASS: &str = "core:class:Doc";

/// In-memory model partition. Classes living here are never fetched from the backend.
pub const DOMAIN_MODEL: &str = "model";

/// Default attribute a reverse lookup matches against
pub const DEFAULT_REVERSE_ATTRIBUTE: &str = fields::ATTACHED_TO;

/// Reserved document field names
pub mod fields {
    /// Document identifier
    pub const ID: &str = "_id";
    /// Concrete class of the document
    pub const CLASS: &str = "_class";
    /// Owning space
    pub const SPACE: &str = "space";
    /// Last modification time
    pub const MODIFIED_ON: &str = "modifiedOn";
    /// Last modifier
    pub const MODIFIED_BY: &str = "modifiedBy";
    /// Creation time
    pub const CREATED_ON: &str = "createdOn";
    /// Creator
    pub const CREATED_BY: &str = "createdBy";
    /// Owning document of an attached document
    pub const ATTACHED_TO: &str = "attachedTo";
    /// Class of the owning document
    pub const ATTACHED_TO_CLASS: &str = "attachedToClass";
    /// Collection attribute on the owner that holds the attached document
    pub const COLLECTION: &str = "collection";
    /// Cached `(contentHash, size)` metadata
    pub const HASH: &str = "%hash%";
    /// Namespace lookups are attached under
    pub const LOOKUP: &str = "$lookup";
    /// Sentinel written to materialize an empty mixin namespace
    pub const MIXIN_SENTINEL: &str = "__mixin";
}

/// Returns true for fields that are never qualified with a mixin prefix
pub fn is_reserved_field(name: &str) -> bool {
    matches!(
        name,
        fields::ID
            | fields::CLASS
            | fields::SPACE
            | fields::MODIFIED_ON
            | fields::MODIFIED_BY
            | fields::CREATED_ON
            | fields::CREATED_BY
            | fields::HASH
            | fields::LOOKUP
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_generate_unique() {
        let a = Ref::generate();
        let b = Ref::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_ids_serialize_transparent() {
        let class = ClassId::new("tracker:class:Issue");
        let json = serde_json::to_string(&class).unwrap();
        assert_eq!(json, "\"tracker:class:Issue\"");
        let back: ClassId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, class);
    }

    #[test]
    fn test_reserved_fields() {
        assert!(is_reserved_field("_id"));
        assert!(is_reserved_field("%hash%"));
        assert!(!is_reserved_field("title"));
    }
}
