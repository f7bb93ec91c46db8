//! Hierarchy Resolver
//!
//! Wraps an immutable model snapshot (class definitions plus the documents of
//! the in-memory model partition) and answers structural questions about it:
//!
//! - [`Hierarchy::domain_of`]: physical partition of a class
//! - [`Hierarchy::descendants_of`]: reflexive descendant set
//! - [`Hierarchy::is_mixin`]: whether a class is a mixin facet
//! - [`Hierarchy::owning_mixin_of`]: which mixin declares an attribute
//!
//! Everything is precomputed at build time; queries are read-only and the
//! resolver is `Send + Sync`.
//!
//! ## Domains
//!
//! A class lives in the domain declared by itself or its nearest ancestor
//! that declares one. A mixin lives in the domain of its base class (the
//! nearest non-mixin ancestor): mixin facets are stored inside the base
//! document, never as documents of their own.
//!
//! # Example
//!
//! ```
//! use facetdb_core::hierarchy::{AttrType, ClassDef, ModelBuilder};
//! use facetdb_core::types::{ClassId, Domain, DOC_CLASS};
//!
//! let h = ModelBuilder::new()
//!     .class(ClassDef::class("t:class:Task", DOC_CLASS).domain("task"))
//!     .class(ClassDef::class("t:class:Bug", "t:class:Task"))
//!     .class(
//!         ClassDef::mixin("t:mixin:Estimated", "t:class:Task")
//!             .attribute("estimate", AttrType::Number),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let bug = ClassId::new("t:class:Bug");
//! assert_eq!(h.domain_of(&bug).unwrap(), Domain::new("task"));
//! assert_eq!(
//!     h.owning_mixin_of(&bug, "estimate"),
//!     Some(ClassId::new("t:mixin:Estimated"))
//! );
//! ```

use crate::document::Document;
use crate::error::ModelError;
use crate::types::{ClassId, Domain, DOC_CLASS};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Kind of class definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    /// Concrete or abstract document class
    Class,
    /// Optional facet attached to documents of its base class
    Mixin,
}

/// Declared attribute type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrType {
    /// Text
    String,
    /// Numeric
    Number,
    /// Boolean
    Boolean,
    /// Millisecond timestamp; may be null
    Date,
    /// Closed set of values in declared order
    Enum(Vec<String>),
    /// Reference to a document of the class
    Ref(ClassId),
    /// Array of values of the element type
    Array(Box<AttrType>),
    /// Counter of attached documents of the class
    Collection(ClassId),
    /// Anything else
    Any,
}

/// Attribute declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name
    pub name: String,
    /// Declared type
    pub ty: AttrType,
}

/// Class declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Class identifier
    pub id: ClassId,
    /// Class or mixin
    pub kind: ClassKind,
    /// Base class; `None` only for the universal root
    pub extends: Option<ClassId>,
    /// Domain declared by this class
    pub domain: Option<Domain>,
    /// Attributes declared by this class
    pub attributes: Vec<AttributeDef>,
}

impl ClassDef {
    /// Document class extending `extends`
    pub fn class(id: impl Into<ClassId>, extends: impl Into<ClassId>) -> Self {
        ClassDef {
            id: id.into(),
            kind: ClassKind::Class,
            extends: Some(extends.into()),
            domain: None,
            attributes: Vec::new(),
        }
    }

    /// Mixin applicable to documents of `extends`
    pub fn mixin(id: impl Into<ClassId>, extends: impl Into<ClassId>) -> Self {
        ClassDef {
            kind: ClassKind::Mixin,
            ..ClassDef::class(id, extends)
        }
    }

    /// Declare the domain
    pub fn domain(mut self, domain: impl Into<Domain>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Declare an attribute
    pub fn attribute(mut self, name: impl Into<String>, ty: AttrType) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            ty,
        });
        self
    }
}

/// Builds and validates a [`Hierarchy`]
///
/// The universal root [`DOC_CLASS`] is predeclared; declaring it again
/// replaces the default definition.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    classes: Vec<ClassDef>,
    documents: Vec<Document>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    /// Builder holding only the root class
    pub fn new() -> Self {
        ModelBuilder {
            classes: vec![ClassDef {
                id: ClassId::new(DOC_CLASS),
                kind: ClassKind::Class,
                extends: None,
                domain: None,
                attributes: Vec::new(),
            }],
            documents: Vec::new(),
        }
    }

    /// Add a class definition
    pub fn class(mut self, def: ClassDef) -> Self {
        if def.id.as_str() == DOC_CLASS {
            self.classes[0] = def;
        } else {
            self.classes.push(def);
        }
        self
    }

    /// Add a document of the in-memory model partition
    pub fn document(mut self, doc: Document) -> Self {
        self.documents.push(doc);
        self
    }

    /// Validate and precompute
    ///
    /// # Errors
    ///
    /// - [`ModelError::Duplicate`] for a class declared twice
    /// - [`ModelError::UnknownBase`] when `extends` names an undeclared class
    /// - [`ModelError::Cycle`] when an extends chain loops
    pub fn build(self) -> Result<Hierarchy, ModelError> {
        let mut classes: FxHashMap<ClassId, ClassDef> = FxHashMap::default();
        let mut order = Vec::with_capacity(self.classes.len());
        for def in self.classes {
            if classes.contains_key(&def.id) {
                return Err(ModelError::Duplicate(def.id));
            }
            order.push(def.id.clone());
            classes.insert(def.id.clone(), def);
        }

        for def in classes.values() {
            if let Some(base) = &def.extends {
                if !classes.contains_key(base) {
                    return Err(ModelError::UnknownBase {
                        class: def.id.clone(),
                        base: base.clone(),
                    });
                }
            }
        }

        let mut ancestors: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        for id in &order {
            let mut chain = vec![id.clone()];
            let mut seen: FxHashSet<&ClassId> = FxHashSet::default();
            seen.insert(id);
            let mut current = &classes[id];
            while let Some(base) = &current.extends {
                if !seen.insert(base) {
                    return Err(ModelError::Cycle(id.clone()));
                }
                chain.push(base.clone());
                current = &classes[base];
            }
            ancestors.insert(id.clone(), chain);
        }

        let mut descendants: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        let mut mixins_of: FxHashMap<ClassId, Vec<ClassId>> = FxHashMap::default();
        let mut domains: FxHashMap<ClassId, Domain> = FxHashMap::default();
        for id in &order {
            let chain = &ancestors[id];
            for ancestor in chain {
                descendants.entry(ancestor.clone()).or_default().push(id.clone());
            }
            let def = &classes[id];
            if def.kind == ClassKind::Mixin {
                if let Some(base) = &def.extends {
                    mixins_of.entry(base.clone()).or_default().push(id.clone());
                }
            }
            if let Some(domain) = chain
                .iter()
                .filter(|c| classes[*c].kind == ClassKind::Class)
                .find_map(|c| classes[c].domain.clone())
            {
                domains.insert(id.clone(), domain);
            }
        }

        Ok(Hierarchy {
            classes,
            order,
            ancestors,
            descendants,
            mixins_of,
            domains,
            model_docs: self.documents,
        })
    }
}

/// Read-only resolver over a validated model snapshot
#[derive(Debug, Clone)]
pub struct Hierarchy {
    classes: FxHashMap<ClassId, ClassDef>,
    order: Vec<ClassId>,
    /// Self first, then base, up to the root
    ancestors: FxHashMap<ClassId, Vec<ClassId>>,
    /// Reflexive, declaration order
    descendants: FxHashMap<ClassId, Vec<ClassId>>,
    /// Mixins declared directly on a class
    mixins_of: FxHashMap<ClassId, Vec<ClassId>>,
    domains: FxHashMap<ClassId, Domain>,
    model_docs: Vec<Document>,
}

impl Hierarchy {
    /// Whether the class is declared
    pub fn contains(&self, class: &ClassId) -> bool {
        self.classes.contains_key(class)
    }

    /// Class definition
    pub fn class(&self, class: &ClassId) -> Result<&ClassDef, ModelError> {
        self.classes
            .get(class)
            .ok_or_else(|| ModelError::UnknownClass(class.clone()))
    }

    /// All classes in declaration order
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.order.iter().map(move |id| &self.classes[id])
    }

    /// Physical partition of the class
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownClass`] or [`ModelError::NoDomain`]; both are
    /// programming errors.
    pub fn domain_of(&self, class: &ClassId) -> Result<Domain, ModelError> {
        self.class(class)?;
        self.domains
            .get(class)
            .cloned()
            .ok_or_else(|| ModelError::NoDomain(class.clone()))
    }

    /// Reflexive descendant set, including mixins
    pub fn descendants_of(&self, class: &ClassId) -> Result<&[ClassId], ModelError> {
        self.descendants
            .get(class)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::UnknownClass(class.clone()))
    }

    /// Descendants that are addressable documents (mixins excluded)
    pub fn document_descendants_of(&self, class: &ClassId) -> Result<Vec<ClassId>, ModelError> {
        Ok(self
            .descendants_of(class)?
            .iter()
            .filter(|c| !self.is_mixin(c))
            .cloned()
            .collect())
    }

    /// Self, base, ..., root
    pub fn ancestors_of(&self, class: &ClassId) -> Result<&[ClassId], ModelError> {
        self.ancestors
            .get(class)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::UnknownClass(class.clone()))
    }

    /// Whether `class` is `ancestor` or derives from it
    pub fn is_derived(&self, class: &ClassId, ancestor: &ClassId) -> bool {
        self.ancestors
            .get(class)
            .map_or(false, |chain| chain.contains(ancestor))
    }

    /// Whether the class is a mixin. Unknown classes are not mixins.
    pub fn is_mixin(&self, class: &ClassId) -> bool {
        self.classes
            .get(class)
            .map_or(false, |d| d.kind == ClassKind::Mixin)
    }

    /// Nearest non-mixin ancestor (the class itself for document classes)
    pub fn base_class_of(&self, class: &ClassId) -> Result<ClassId, ModelError> {
        self.ancestors_of(class)?
            .iter()
            .find(|c| !self.is_mixin(c))
            .cloned()
            .ok_or_else(|| ModelError::UnknownClass(class.clone()))
    }

    /// Attribute declaration and its declaring class
    ///
    /// Walks the ancestor chain first, then the mixins applicable to any
    /// ancestor (mixins of mixins included).
    pub fn find_attribute(&self, class: &ClassId, name: &str) -> Option<(&ClassId, &AttributeDef)> {
        let chain = self.ancestors.get(class)?;
        for c in chain {
            let def = &self.classes[c];
            if let Some(attr) = def.attributes.iter().find(|a| a.name == name) {
                return Some((&def.id, attr));
            }
        }
        for c in chain {
            for mixin in self.mixins_of.get(c).into_iter().flatten() {
                for m in &self.descendants[mixin] {
                    let def = &self.classes[m];
                    if let Some(attr) = def.attributes.iter().find(|a| a.name == name) {
                        return Some((&def.id, attr));
                    }
                }
            }
        }
        None
    }

    /// Mixin that declares `attribute` for documents of `class`, if any
    pub fn owning_mixin_of(&self, class: &ClassId, attribute: &str) -> Option<ClassId> {
        self.find_attribute(class, attribute)
            .filter(|(owner, _)| self.is_mixin(owner))
            .map(|(owner, _)| owner.clone())
    }

    /// Document classes stored in `domain`
    pub fn classes_in_domain(&self, domain: &Domain) -> Vec<ClassId> {
        self.order
            .iter()
            .filter(|c| !self.is_mixin(c) && self.domains.get(*c) == Some(domain))
            .cloned()
            .collect()
    }

    /// Documents of the in-memory model partition
    pub fn model_documents(&self) -> &[Document] {
        &self.model_docs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DOMAIN_MODEL;

    fn model() -> Hierarchy {
        ModelBuilder::new()
            .class(ClassDef::class("t:class:Space", DOC_CLASS).domain("space"))
            .class(
                ClassDef::class("t:class:Task", DOC_CLASS)
                    .domain("task")
                    .attribute("title", AttrType::String),
            )
            .class(ClassDef::class("t:class:Issue", "t:class:Task"))
            .class(ClassDef::class("t:class:Bug", "t:class:Issue"))
            .class(ClassDef::class("t:class:Doc", "t:class:Task"))
            .class(
                ClassDef::mixin("t:mixin:Estimated", "t:class:Issue")
                    .attribute("estimate", AttrType::Number),
            )
            .class(
                ClassDef::mixin("t:mixin:Deep", "t:mixin:Estimated")
                    .attribute("depth", AttrType::Number),
            )
            .class(ClassDef::class("t:class:Status", DOC_CLASS).domain(DOMAIN_MODEL))
            .build()
            .unwrap()
    }

    #[test]
    fn test_descendants_are_reflexive() {
        let h = model();
        let d = h.descendants_of(&ClassId::new("t:class:Issue")).unwrap();
        assert_eq!(
            d,
            &[
                ClassId::new("t:class:Issue"),
                ClassId::new("t:class:Bug"),
                ClassId::new("t:mixin:Estimated"),
                ClassId::new("t:mixin:Deep"),
            ]
        );
        let docs = h.document_descendants_of(&ClassId::new("t:class:Issue")).unwrap();
        assert_eq!(docs, vec![ClassId::new("t:class:Issue"), ClassId::new("t:class:Bug")]);
    }

    #[test]
    fn test_domain_inherited_and_mixins_use_base_domain() {
        let h = model();
        assert_eq!(h.domain_of(&ClassId::new("t:class:Bug")).unwrap(), Domain::new("task"));
        assert_eq!(h.domain_of(&ClassId::new("t:mixin:Deep")).unwrap(), Domain::new("task"));
        assert_eq!(
            h.domain_of(&ClassId::new(DOC_CLASS)),
            Err(ModelError::NoDomain(ClassId::new(DOC_CLASS)))
        );
    }

    #[test]
    fn test_unknown_class_is_model_error() {
        let h = model();
        let missing = ClassId::new("t:class:Nope");
        assert_eq!(h.domain_of(&missing), Err(ModelError::UnknownClass(missing.clone())));
        assert!(h.descendants_of(&missing).is_err());
        assert!(!h.is_mixin(&missing));
    }

    #[test]
    fn test_owning_mixin() {
        let h = model();
        let bug = ClassId::new("t:class:Bug");
        assert_eq!(h.owning_mixin_of(&bug, "estimate"), Some(ClassId::new("t:mixin:Estimated")));
        assert_eq!(h.owning_mixin_of(&bug, "depth"), Some(ClassId::new("t:mixin:Deep")));
        assert_eq!(h.owning_mixin_of(&bug, "title"), None);
        // Sibling branch does not see Issue's mixins
        assert_eq!(h.owning_mixin_of(&ClassId::new("t:class:Doc"), "estimate"), None);
    }

    #[test]
    fn test_base_class_of_mixin() {
        let h = model();
        assert_eq!(
            h.base_class_of(&ClassId::new("t:mixin:Deep")).unwrap(),
            ClassId::new("t:class:Issue")
        );
        assert_eq!(
            h.base_class_of(&ClassId::new("t:class:Bug")).unwrap(),
            ClassId::new("t:class:Bug")
        );
    }

    #[test]
    fn test_classes_in_domain() {
        let h = model();
        assert_eq!(
            h.classes_in_domain(&Domain::new("task")),
            vec![
                ClassId::new("t:class:Task"),
                ClassId::new("t:class:Issue"),
                ClassId::new("t:class:Bug"),
                ClassId::new("t:class:Doc"),
            ]
        );
    }

    #[test]
    fn test_build_rejects_unknown_base() {
        let err = ModelBuilder::new()
            .class(ClassDef::class("a", "missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownBase { .. }));
    }

    #[test]
    fn test_build_rejects_cycle() {
        let err = ModelBuilder::new()
            .class(ClassDef::class("a", "b"))
            .class(ClassDef::class("b", "a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::Cycle(_)));
    }

    #[test]
    fn test_build_rejects_duplicate() {
        let err = ModelBuilder::new()
            .class(ClassDef::class("a", DOC_CLASS))
            .class(ClassDef::class("a", DOC_CLASS))
            .build()
            .unwrap_err();
        assert_eq!(err, ModelError::Duplicate(ClassId::new("a")));
    }
}
