//! Sort & projection planning
//!
//! Each sort key becomes one or two backend sort keys, in caller order:
//!
//! | Key | Derived field | Backend keys |
//! |-----|---------------|--------------|
//! | rule set | rank of first matching case, else case count | rank, rule direction |
//! | enum attribute | declared index, else value count | index, requested direction |
//! | date attribute | "is null or missing" flag | flag asc, then value |
//! | anything else | none | mixin-qualified path, requested direction |
//!
//! The enum rule is literal: an unset value ranks after every declared
//! value, so it sorts last ascending and first descending.
//!
//! Derived fields live under `__sort_<n>` and are stripped before results
//! are returned.

use crate::query::qualify_path;
use facetdb_core::backend::Expr;
use facetdb_core::hierarchy::AttrType;
use facetdb_core::{fields, ClassId, Direction, Filter, Hierarchy, Projection, SortOrder};
use serde_json::Value;

/// Prefix of derived sort fields
pub const DERIVED_PREFIX: &str = "__sort_";

/// Backend realization of a sort request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortPlan {
    /// Fields computed before sorting
    pub derived: Vec<(String, Expr)>,
    /// Backend sort keys in precedence order
    pub keys: Vec<(String, Direction)>,
}

impl SortPlan {
    /// Whether the plan needs a derived-field stage
    pub fn needs_pipeline(&self) -> bool {
        !self.derived.is_empty()
    }

    /// Names of derived fields, for stripping
    pub fn derived_fields(&self) -> impl Iterator<Item = &str> {
        self.derived.iter().map(|(name, _)| name.as_str())
    }
}

fn declared_type<'a>(
    hierarchy: &'a Hierarchy,
    class: &ClassId,
    qualified: &str,
) -> Option<&'a AttrType> {
    let mut parts = qualified.split('.');
    let head = parts.next()?;
    let attr = if hierarchy.is_mixin(&ClassId::new(head)) {
        let name = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        name
    } else if parts.next().is_none() {
        head
    } else {
        return None;
    };
    hierarchy.find_attribute(class, attr).map(|(_, def)| &def.ty)
}

/// Plan the sort of `class` documents
pub fn plan_sort(hierarchy: &Hierarchy, class: &ClassId, spec: &[(String, SortOrder)]) -> SortPlan {
    let mut plan = SortPlan::default();
    for (n, (path, order)) in spec.iter().enumerate() {
        let field = qualify_path(hierarchy, class, path);
        let derived = format!("{}{}", DERIVED_PREFIX, n);
        let direction = match order {
            SortOrder::Asc => Direction::Asc,
            SortOrder::Desc => Direction::Desc,
            SortOrder::Rules(rules) => {
                let cases: Vec<_> = rules.cases.iter().map(|c| (c.query.clone(), c.rank)).collect();
                let default = rules.default.unwrap_or(cases.len() as i64);
                plan.derived.push((derived.clone(), Expr::Rank { field, cases, default }));
                plan.keys.push((derived, rules.order));
                continue;
            }
        };
        match declared_type(hierarchy, class, &field) {
            Some(AttrType::Enum(values)) => {
                plan.derived.push((
                    derived.clone(),
                    Expr::IndexOf {
                        field,
                        values: values.iter().map(|v| Value::from(v.as_str())).collect(),
                        missing: values.len() as i64,
                    },
                ));
                plan.keys.push((derived, direction));
            }
            Some(AttrType::Date) => {
                plan.derived
                    .push((derived.clone(), Expr::IsNullOrMissing { field: field.clone() }));
                plan.keys.push((derived, Direction::Asc));
                plan.keys.push((field, direction));
            }
            _ => plan.keys.push((field, direction)),
        }
    }
    plan
}

/// Plan the projection of `class` documents
///
/// No projection excludes the hash field. Inclusion projections always carry
/// `_id`, `_class` and the `required` paths (join keys of lookups).
pub fn plan_projection(
    hierarchy: &Hierarchy,
    class: &ClassId,
    projection: Option<&Projection>,
    required: &[String],
) -> Projection {
    let Some(requested) = projection else {
        return Projection::default().exclude(fields::HASH);
    };
    let mut out = Projection::default();
    for (path, include) in &requested.fields {
        out.fields.push((qualify_path(hierarchy, class, path), *include));
    }
    if out.is_inclusion() {
        let forced_fields = [fields::ID, fields::CLASS]
            .into_iter()
            .chain(required.iter().map(String::as_str));
        for forced in forced_fields {
            if !out.fields.iter().any(|(p, inc)| *inc && p == forced) {
                out.fields.push((forced.to_string(), true));
            }
        }
        out.fields.retain(|(_, include)| *include);
    }
    out
}

/// Whether a read can bypass sort, projection and lookup machinery
pub fn is_id_fast_path(filter: &Filter, limit: Option<usize>) -> bool {
    limit == Some(1) && filter.single_id().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_core::hierarchy::{ClassDef, ModelBuilder};
    use facetdb_core::options::{SortCase, SortingRules};
    use facetdb_core::{Condition, Ref, DOC_CLASS};
    use serde_json::json;

    fn model() -> Hierarchy {
        ModelBuilder::new()
            .class(
                ClassDef::class("t:class:Issue", DOC_CLASS)
                    .domain("task")
                    .attribute(
                        "priority",
                        AttrType::Enum(vec!["LOW".into(), "MEDIUM".into(), "HIGH".into()]),
                    )
                    .attribute("dueDate", AttrType::Date)
                    .attribute("title", AttrType::String),
            )
            .class(
                ClassDef::mixin("t:mixin:Est", "t:class:Issue")
                    .attribute("estimate", AttrType::Number),
            )
            .build()
            .unwrap()
    }

    fn issue() -> ClassId {
        ClassId::new("t:class:Issue")
    }

    #[test]
    fn test_plain_keys_keep_declaration_order() {
        let h = model();
        let plan = plan_sort(
            &h,
            &issue(),
            &[("title".into(), SortOrder::Desc), ("estimate".into(), SortOrder::Asc)],
        );
        assert!(!plan.needs_pipeline());
        assert_eq!(
            plan.keys,
            vec![
                ("title".to_string(), Direction::Desc),
                ("t:mixin:Est.estimate".to_string(), Direction::Asc)
            ]
        );
    }

    #[test]
    fn test_enum_key() {
        let h = model();
        let plan = plan_sort(&h, &issue(), &[("priority".into(), SortOrder::Desc)]);
        assert_eq!(
            plan.derived,
            vec![(
                "__sort_0".to_string(),
                Expr::IndexOf {
                    field: "priority".into(),
                    values: vec![json!("LOW"), json!("MEDIUM"), json!("HIGH")],
                    missing: 3,
                }
            )]
        );
        assert_eq!(plan.keys, vec![("__sort_0".to_string(), Direction::Desc)]);
    }

    #[test]
    fn test_date_key_nulls_last_both_directions() {
        let h = model();
        for dir in [SortOrder::Asc, SortOrder::Desc] {
            let plan = plan_sort(&h, &issue(), &[("dueDate".into(), dir.clone())]);
            assert_eq!(plan.keys[0], ("__sort_0".to_string(), Direction::Asc));
            assert_eq!(plan.keys[1].0, "dueDate");
        }
    }

    #[test]
    fn test_rules_default_is_case_count() {
        let h = model();
        let rules = SortingRules {
            order: Direction::Asc,
            default: None,
            cases: vec![
                SortCase {
                    query: vec![Condition::Eq(json!("open"))],
                    rank: 0,
                },
                SortCase {
                    query: vec![Condition::Eq(json!("done"))],
                    rank: 1,
                },
            ],
        };
        let plan = plan_sort(&h, &issue(), &[("status".into(), SortOrder::Rules(rules))]);
        assert!(matches!(&plan.derived[0].1, Expr::Rank { default: 2, .. }));
    }

    #[test]
    fn test_projection_defaults_exclude_hash() {
        let h = model();
        let p = plan_projection(&h, &issue(), None, &[]);
        assert_eq!(p.fields, vec![("%hash%".to_string(), false)]);
    }

    #[test]
    fn test_inclusion_forces_identity_and_join_keys() {
        let h = model();
        let p = plan_projection(
            &h,
            &issue(),
            Some(&Projection::default().include("estimate")),
            &["space".to_string()],
        );
        let paths: Vec<_> = p.fields.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["t:mixin:Est.estimate", "_id", "_class", "space"]);
    }

    #[test]
    fn test_fast_path_detection() {
        let id = Filter::by_id(&Ref::new("x"));
        assert!(is_id_fast_path(&id, Some(1)));
        assert!(!is_id_fast_path(&id, None));
        assert!(!is_id_fast_path(&Filter::new(), Some(1)));
    }
}
