//! State tree.
//!
//! The authoritative world is a schema-less nested mapping:
//! category (`players`, `units`, `vehicles`, ...) -> entity id -> entity record.
//! Records are themselves nested mappings of scalars, lists and sub-mappings.
//!
//! Nothing here validates the shape of a record. The codec diffs and merges
//! by key, and downstream consumers pick out the fields they understand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Ordered mapping of keys to values. Iteration order is stable.
pub type StateTree = BTreeMap<String, Value>;

/// A node of the state tree.
///
/// Serialized untagged, so the wire form is plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Ordered list. Treated opaquely by the codec (never merged element-wise).
    List(Vec<Value>),
    Map(StateTree),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&StateTree> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Mutable mapping access, replacing any non-mapping value with an empty one.
    pub fn ensure_map(&mut self) -> &mut StateTree {
        if !self.is_map() {
            *self = Value::Map(StateTree::new());
        }
        match self {
            Value::Map(m) => m,
            _ => unreachable!("value was just made a mapping"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<StateTree> for Value {
    fn from(m: StateTree) -> Self {
        Value::Map(m)
    }
}

/// Key injected into flattened entity records.
pub const ID_FIELD: &str = "id";

/// An entity record with its id merged in.
///
/// Category membership is not carried: downstream only sees id + fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub fields: StateTree,
}

impl Entity {
    /// Numeric field lookup.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }
}

/// Flattens category mappings into an ordered entity list.
///
/// Categories are visited in key order, entities in id order. Non-mapping
/// categories and records are skipped so one bad record can't take down
/// the rest of the world.
pub fn flatten_entities(tree: &StateTree) -> Vec<Entity> {
    let mut out = Vec::new();
    for (category, members) in tree {
        let Some(members) = members.as_map() else {
            warn!(category = %category, "Skipping non-mapping category");
            continue;
        };
        for (id, record) in members {
            let Some(record) = record.as_map() else {
                warn!(category = %category, id = %id, "Skipping malformed entity record");
                continue;
            };
            let mut fields = record.clone();
            fields.insert(ID_FIELD.to_string(), Value::Text(id.clone()));
            out.push(Entity {
                id: id.clone(),
                fields,
            });
        }
    }
    out
}

/// Looks up one entity record by category and id.
pub fn entity_record<'a>(tree: &'a StateTree, category: &str, id: &str) -> Option<&'a StateTree> {
    tree.get(category)
        .and_then(Value::as_map)
        .and_then(|members| members.get(id))
        .and_then(Value::as_map)
}

/// Finds an entity record by id in any category.
pub fn find_record<'a>(tree: &'a StateTree, id: &str) -> Option<&'a StateTree> {
    tree.values()
        .filter_map(Value::as_map)
        .find_map(|members| members.get(id).and_then(Value::as_map))
}

/// Builds a tree from a JSON value. Non-object input yields an empty tree.
pub fn tree_from_json(json: serde_json::Value) -> StateTree {
    match serde_json::from_value::<Value>(json) {
        Ok(Value::Map(m)) => m,
        _ => StateTree::new(),
    }
}
