//! Read options: lookups, sorting, projection
//!
//! ```
//! use facetdb_core::options::{FindOptions, Lookup, SortOrder};
//! use facetdb_core::types::ClassId;
//!
//! let opts = FindOptions::default()
//!     .sort_by("modifiedOn", SortOrder::Desc)
//!     .lookup(Lookup::new().forward("space", ClassId::new("core:class:Space")))
//!     .limit(20);
//! assert_eq!(opts.limit, Some(20));
//! ```

use crate::query::Condition;
use crate::types::{ClassId, Domain, DEFAULT_REVERSE_ATTRIBUTE};
use serde::{Deserialize, Serialize};

/// Forward reference expansion: the field named by the lookup key holds
/// identifier(s) of documents of `class`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardLookup {
    /// Target class
    pub class: ClassId,
    /// Lookups applied to the looked-up documents
    pub nested: Option<Box<Lookup>>,
}

/// Inverse reference expansion: documents of `class` whose `attribute`
/// references the current document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseLookup {
    /// Referencing class
    pub class: ClassId,
    /// Referencing attribute
    pub attribute: String,
}

/// Declarative relation expansion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    /// Forward lookups, keyed by local field
    pub forward: Vec<(String, ForwardLookup)>,
    /// Reverse lookups, keyed by result name
    pub reverse: Vec<(String, ReverseLookup)>,
}

impl Lookup {
    /// Empty lookup
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a forward lookup on `field`
    pub fn forward(mut self, field: impl Into<String>, class: ClassId) -> Self {
        self.forward.push((field.into(), ForwardLookup { class, nested: None }));
        self
    }

    /// Add a chained forward lookup
    pub fn forward_nested(
        mut self,
        field: impl Into<String>,
        class: ClassId,
        nested: Lookup,
    ) -> Self {
        self.forward.push((
            field.into(),
            ForwardLookup {
                class,
                nested: Some(Box::new(nested)),
            },
        ));
        self
    }

    /// Add a reverse lookup matching the conventional owner attribute
    pub fn reverse(self, key: impl Into<String>, class: ClassId) -> Self {
        self.reverse_on(key, class, DEFAULT_REVERSE_ATTRIBUTE)
    }

    /// Add a reverse lookup matching `attribute`
    pub fn reverse_on(
        mut self,
        key: impl Into<String>,
        class: ClassId,
        attribute: impl Into<String>,
    ) -> Self {
        self.reverse.push((
            key.into(),
            ReverseLookup {
                class,
                attribute: attribute.into(),
            },
        ));
        self
    }

    /// Whether the lookup expands nothing
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// Explicit case → rank ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingRules {
    /// Direction applied to the computed rank
    pub order: Direction,
    /// Rank for values matching no case; defaults to the number of cases
    pub default: Option<i64>,
    /// Ordered cases; the first matching one wins
    pub cases: Vec<SortCase>,
}

/// One case of a rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortCase {
    /// Conditions on the sorted field
    pub query: Vec<Condition>,
    /// Rank assigned on match
    pub rank: i64,
}

/// Ordering of one sort key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Natural ascending
    Asc,
    /// Natural descending
    Desc,
    /// Rule-derived rank
    Rules(SortingRules),
}

/// Ordered sort keys; earlier keys take precedence
pub type SortSpec = Vec<(String, SortOrder)>;

/// Field inclusion/exclusion; `true` includes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Ordered `(path, include)` pairs
    pub fields: Vec<(String, bool)>,
}

impl Projection {
    /// Include `path`
    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.fields.push((path.into(), true));
        self
    }

    /// Exclude `path`
    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.fields.push((path.into(), false));
        self
    }

    /// Whether any field is included (inclusion mode)
    pub fn is_inclusion(&self) -> bool {
        self.fields.iter().any(|(_, inc)| *inc)
    }
}

/// Options of a find request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Ordering
    pub sort: Option<SortSpec>,
    /// Field selection
    pub projection: Option<Projection>,
    /// Relation expansion
    pub lookup: Option<Lookup>,
    /// Maximum number of documents
    pub limit: Option<usize>,
    /// Query this domain instead of the class's own
    pub domain: Option<Domain>,
    /// Also count all matches ignoring `limit`
    pub total: bool,
}

impl FindOptions {
    /// Append a sort key
    pub fn sort_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.get_or_insert_with(Vec::new).push((path.into(), order));
        self
    }

    /// Set the projection
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the lookup
    pub fn lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Set the limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the domain
    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Request the total count
    pub fn with_total(mut self) -> Self {
        self.total = true;
        self
    }
}
