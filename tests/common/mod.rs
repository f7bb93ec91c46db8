//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::Arc;

use facetdb::{
    AdapterConfig, AttrType, ClassDef, ClassId, Document, DocumentAdapter, DocumentUpdate, Domain,
    FixedClock, Hierarchy, MemoryBackend, ModelBuilder, Ref, Timestamp, Tx, TxKind, UpdateOp,
    DOC_CLASS,
};
use serde_json::{Map, Value};

// ============================================================================
// Model
// ============================================================================

pub const ISSUE: &str = "tracker:class:Issue";
pub const SUB_ISSUE: &str = "tracker:class:SubIssue";
pub const ESTIMATED: &str = "tracker:mixin:Estimated";
pub const PROJECT: &str = "tracker:class:Project";
pub const COMMENT: &str = "chunter:class:Comment";
pub const STATUS: &str = "tracker:class:Status";

pub const PRIORITIES: [&str; 4] = ["urgent", "high", "medium", "low"];

/// Tracker-like model used by every suite
pub fn model() -> Hierarchy {
    ModelBuilder::new()
        .class(ClassDef::class(PROJECT, DOC_CLASS).domain("project"))
        .class(
            ClassDef::class(ISSUE, DOC_CLASS)
                .domain("tracker")
                .attribute("project", AttrType::Ref(ClassId::new(PROJECT)))
                .attribute("status", AttrType::Ref(ClassId::new(STATUS)))
                .attribute(
                    "priority",
                    AttrType::Enum(PRIORITIES.iter().map(|p| p.to_string()).collect()),
                ),
        )
        .class(ClassDef::class(SUB_ISSUE, ISSUE))
        .class(ClassDef::mixin(ESTIMATED, ISSUE).attribute("estimate", AttrType::Number))
        .class(ClassDef::class(COMMENT, DOC_CLASS).domain("chunter"))
        .class(ClassDef::class(STATUS, DOC_CLASS).domain("model"))
        .document(status("status-open", "Open"))
        .document(status("status-done", "Done"))
        .build()
        .expect("test model is valid")
}

fn status(id: &str, name: &str) -> Document {
    let mut doc = Document::new(&Ref::new(id), &ClassId::new(STATUS), &Ref::new("model"));
    doc.insert("name".to_string(), Value::from(name));
    doc
}

// ============================================================================
// TestAdapter
// ============================================================================

/// Adapter over a fresh memory backend with a fixed clock
pub struct TestAdapter {
    pub adapter: Arc<DocumentAdapter>,
    pub backend: Arc<MemoryBackend>,
}

impl TestAdapter {
    pub fn new() -> Self {
        Self::with_config(AdapterConfig::default())
    }

    pub fn with_config(config: AdapterConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = DocumentAdapter::open(
            backend.clone(),
            Arc::new(model()),
            config,
            Arc::new(FixedClock::new(Timestamp::from_millis(10_000))),
        )
        .expect("adapter opens");
        TestAdapter {
            adapter: Arc::new(adapter),
            backend,
        }
    }

    pub fn tracker(&self) -> Domain {
        Domain::new("tracker")
    }
}

impl std::ops::Deref for TestAdapter {
    type Target = DocumentAdapter;

    fn deref(&self) -> &DocumentAdapter {
        &self.adapter
    }
}

// ============================================================================
// Transaction builders
// ============================================================================

pub fn tx(kind: TxKind) -> Tx {
    Tx::new(Ref::new("user"), Timestamp::from_millis(100), Ref::new("space"), kind)
}

pub fn object(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

pub fn create(id: &str, class: &str, attributes: Value) -> Tx {
    tx(TxKind::Create {
        object_id: Ref::new(id),
        object_class: ClassId::new(class),
        attributes: object(attributes),
    })
}

pub fn update_ops(id: &str, ops: Vec<UpdateOp>) -> Tx {
    tx(TxKind::Update {
        object_id: Ref::new(id),
        object_class: ClassId::new(ISSUE),
        operations: DocumentUpdate::Ops(ops),
        retrieve: false,
    })
}

pub fn update_fields(id: &str, fields: Value) -> Tx {
    tx(TxKind::Update {
        object_id: Ref::new(id),
        object_class: ClassId::new(ISSUE),
        operations: DocumentUpdate::Fields(object(fields)),
        retrieve: false,
    })
}

pub fn apply_mixin(id: &str, attributes: DocumentUpdate) -> Tx {
    tx(TxKind::Mixin {
        object_id: Ref::new(id),
        object_class: ClassId::new(ISSUE),
        mixin: ClassId::new(ESTIMATED),
        attributes,
    })
}

pub fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter().filter_map(Document::id).map(str::to_string).collect()
}
