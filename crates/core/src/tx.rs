//! Transaction records
//!
//! A [`Tx`] is an immutable, timestamped mutation of one document. The
//! adapter receives them as an ordered batch that has already been validated
//! and authorized.
//!
//! ## Kinds
//!
//! | Kind | Payload |
//! |------|---------|
//! | `Create` | full initial attributes |
//! | `Update` | flat field-set or operator list, optional read-back |
//! | `Mixin` | delta scoped to one mixin namespace |
//! | `Remove` | identifier only |
//! | `Collection` | one of the above, attached to an owning document |

use crate::clock::Timestamp;
use crate::types::{fields, ClassId, Ref};
use crate::update::DocumentUpdate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transaction envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    /// Transaction identifier
    pub id: Ref,
    /// Time of the mutation
    pub modified_on: Timestamp,
    /// Author of the mutation
    pub modified_by: Ref,
    /// Space of the affected document
    pub object_space: Ref,
    /// Mutation
    pub kind: TxKind,
}

/// Mutation carried by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxKind {
    /// Create a document
    Create {
        /// New document identifier
        object_id: Ref,
        /// Concrete class
        object_class: ClassId,
        /// Initial attribute values
        attributes: Map<String, Value>,
    },
    /// Modify a document
    Update {
        /// Target document
        object_id: Ref,
        /// Target class
        object_class: ClassId,
        /// Delta
        operations: DocumentUpdate,
        /// Return the post-update document
        retrieve: bool,
    },
    /// Apply or modify a mixin facet
    Mixin {
        /// Target document
        object_id: Ref,
        /// Target class
        object_class: ClassId,
        /// Mixin whose namespace the delta is scoped to
        mixin: ClassId,
        /// Delta, paths relative to the mixin namespace
        attributes: DocumentUpdate,
    },
    /// Remove a document
    Remove {
        /// Target document
        object_id: Ref,
        /// Target class
        object_class: ClassId,
    },
    /// Mutation of a document attached to an owner's collection
    Collection {
        /// Owning document
        owner_id: Ref,
        /// Owning document's class
        owner_class: ClassId,
        /// Collection attribute on the owner
        collection: String,
        /// Wrapped mutation of the attached document
        inner: Box<Tx>,
    },
}

impl Tx {
    /// Envelope with the given kind
    pub fn new(modified_by: Ref, modified_on: Timestamp, object_space: Ref, kind: TxKind) -> Self {
        Tx {
            id: Ref::generate(),
            modified_on,
            modified_by,
            object_space,
            kind,
        }
    }

    /// Identifier of the document this transaction ultimately targets
    pub fn object_id(&self) -> &Ref {
        match &self.kind {
            TxKind::Create { object_id, .. }
            | TxKind::Update { object_id, .. }
            | TxKind::Mixin { object_id, .. }
            | TxKind::Remove { object_id, .. } => object_id,
            TxKind::Collection { inner, .. } => inner.object_id(),
        }
    }

    /// Class of the document this transaction ultimately targets
    pub fn object_class(&self) -> &ClassId {
        match &self.kind {
            TxKind::Create { object_class, .. }
            | TxKind::Update { object_class, .. }
            | TxKind::Mixin { object_class, .. }
            | TxKind::Remove { object_class, .. } => object_class,
            TxKind::Collection { inner, .. } => inner.object_class(),
        }
    }

    /// Unwrap collection attachment
    ///
    /// Wrapped creates are re-homed: the created document receives
    /// `attachedTo`, `attachedToClass` and `collection` pointing at the owner.
    /// Other wrapped kinds are returned unchanged. Nested wrappers unwrap to
    /// the innermost mutation, re-homed to the innermost owner.
    pub fn unwrap_collection(self) -> Tx {
        match self.kind {
            TxKind::Collection {
                owner_id,
                owner_class,
                collection,
                inner,
            } => {
                let mut inner = inner.unwrap_collection();
                if let TxKind::Create { attributes, .. } = &mut inner.kind {
                    attributes
                        .entry(fields::ATTACHED_TO.to_string())
                        .or_insert_with(|| Value::from(owner_id.as_str()));
                    attributes
                        .entry(fields::ATTACHED_TO_CLASS.to_string())
                        .or_insert_with(|| Value::from(owner_class.as_str()));
                    attributes
                        .entry(fields::COLLECTION.to_string())
                        .or_insert_with(|| Value::from(collection));
                }
                inner
            }
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(id: &str) -> Tx {
        Tx::new(
            Ref::new("user"),
            Timestamp::from_millis(1),
            Ref::new("space"),
            TxKind::Create {
                object_id: Ref::new(id),
                object_class: ClassId::new("test:class:Comment"),
                attributes: Map::new(),
            },
        )
    }

    #[test]
    fn test_collection_create_rehomed() {
        let wrapped = Tx::new(
            Ref::new("user"),
            Timestamp::from_millis(1),
            Ref::new("space"),
            TxKind::Collection {
                owner_id: Ref::new("issue-1"),
                owner_class: ClassId::new("test:class:Issue"),
                collection: "comments".into(),
                inner: Box::new(create("c1")),
            },
        );
        assert_eq!(wrapped.object_id(), &Ref::new("c1"));
        let tx = wrapped.unwrap_collection();
        let TxKind::Create { attributes, .. } = &tx.kind else {
            panic!("expected create");
        };
        assert_eq!(attributes.get("attachedTo"), Some(&json!("issue-1")));
        assert_eq!(attributes.get("attachedToClass"), Some(&json!("test:class:Issue")));
        assert_eq!(attributes.get("collection"), Some(&json!("comments")));
    }

    #[test]
    fn test_unwrap_plain_is_identity() {
        let tx = create("c1");
        assert_eq!(tx.clone().unwrap_collection(), tx);
    }
}
