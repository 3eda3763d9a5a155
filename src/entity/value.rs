use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique identifier of an entity. Attribute ids and singleton
/// (enum choice) ids are EntityIds too, in the URI-like form
/// `<namespace>/<entity>.<field>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId(s)
    }
}

/// Tagged-union attribute value.
///
/// `Duration` is carried as milliseconds. Enum choices are `Id` values
/// referencing a singleton entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int64(i64),
    Bool(bool),
    Duration(i64),
    Time(DateTime<Utc>),
    Bytes(Vec<u8>),
    Id(EntityId),
    Label { key: String, value: String },
    Component(Vec<Attribute>),
}

/// Declared kind of an attribute, mirrored in the schema registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Int64,
    Bool,
    Duration,
    Time,
    Bytes,
    Id,
    Label,
    Component,
}

impl Value {
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Int64(_) => ValueKind::Int64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Duration(_) => ValueKind::Duration,
            Value::Time(_) => ValueKind::Time,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Id(_) => ValueKind::Id,
            Value::Label { .. } => ValueKind::Label,
            Value::Component(_) => ValueKind::Component,
        }
    }

    /// Key this value contributes to the inverted index, when its attribute
    /// is declared indexed. Only strings and id refs are indexable.
    pub fn index_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Id(id) => Some(id.0.clone()),
            _ => None,
        }
    }
}

/// One `(attribute_id, value)` pair on an entity. Multiplicity is carried by
/// the schema, not the attribute itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: EntityId,
    pub value: Value,
}

impl Attribute {
    pub fn new(id: impl Into<EntityId>, value: Value) -> Self {
        Attribute {
            id: id.into(),
            value,
        }
    }

    pub fn string(id: impl Into<EntityId>, value: impl Into<String>) -> Self {
        Attribute::new(id, Value::String(value.into()))
    }

    pub fn int64(id: impl Into<EntityId>, value: i64) -> Self {
        Attribute::new(id, Value::Int64(value))
    }

    pub fn boolean(id: impl Into<EntityId>, value: bool) -> Self {
        Attribute::new(id, Value::Bool(value))
    }

    pub fn id_ref(id: impl Into<EntityId>, target: impl Into<EntityId>) -> Self {
        Attribute::new(id, Value::Id(target.into()))
    }

    pub fn time(id: impl Into<EntityId>, value: DateTime<Utc>) -> Self {
        Attribute::new(id, Value::Time(value))
    }

    pub fn duration_ms(id: impl Into<EntityId>, millis: i64) -> Self {
        Attribute::new(id, Value::Duration(millis))
    }

    pub fn label(id: impl Into<EntityId>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute::new(
            id,
            Value::Label {
                key: key.into(),
                value: value.into(),
            },
        )
    }

    pub fn component(id: impl Into<EntityId>, attrs: Vec<Attribute>) -> Self {
        Attribute::new(id, Value::Component(attrs))
    }
}

/// Read-only view over an attribute list used by record decoders.
///
/// Decoding is optimistic: getters return None (and typed getters drop the
/// attribute) when the stored kind does not match, so records tolerate
/// schema drift in both directions.
pub struct AttrView<'a> {
    attrs: &'a [Attribute],
}

impl<'a> AttrView<'a> {
    pub fn new(attrs: &'a [Attribute]) -> Self {
        AttrView { attrs }
    }

    pub fn get(&self, id: &str) -> Option<&'a Value> {
        self.attrs.iter().find(|a| a.id.as_str() == id).map(|a| &a.value)
    }

    pub fn all(&self, id: &str) -> impl Iterator<Item = &'a Value> + '_ {
        let id = id.to_string();
        self.attrs
            .iter()
            .filter(move |a| a.id.as_str() == id)
            .map(|a| &a.value)
    }

    pub fn string(&self, id: &str) -> String {
        match self.get(id) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    pub fn int64(&self, id: &str) -> i64 {
        match self.get(id) {
            Some(Value::Int64(n)) => *n,
            _ => 0,
        }
    }

    pub fn boolean(&self, id: &str) -> bool {
        matches!(self.get(id), Some(Value::Bool(true)))
    }

    pub fn duration_ms(&self, id: &str) -> i64 {
        match self.get(id) {
            Some(Value::Duration(ms)) => *ms,
            _ => 0,
        }
    }

    pub fn time(&self, id: &str) -> Option<DateTime<Utc>> {
        match self.get(id) {
            Some(Value::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn bytes(&self, id: &str) -> Vec<u8> {
        match self.get(id) {
            Some(Value::Bytes(b)) => b.clone(),
            _ => Vec::new(),
        }
    }

    pub fn id_ref(&self, id: &str) -> Option<EntityId> {
        match self.get(id) {
            Some(Value::Id(target)) => Some(target.clone()),
            _ => None,
        }
    }

    pub fn component(&self, id: &str) -> Option<AttrView<'a>> {
        match self.get(id) {
            Some(Value::Component(attrs)) => Some(AttrView::new(attrs)),
            _ => None,
        }
    }

    pub fn components(&self, id: &str) -> Vec<AttrView<'a>> {
        self.all(id)
            .filter_map(|v| match v {
                Value::Component(attrs) => Some(AttrView::new(attrs)),
                _ => None,
            })
            .collect()
    }

    pub fn labels(&self, id: &str) -> Vec<(String, String)> {
        self.all(id)
            .filter_map(|v| match v {
                Value::Label { key, value } => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn strings(&self, id: &str) -> Vec<String> {
        self.all(id)
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn view_drops_kind_mismatches() {
        let attrs = vec![
            Attribute::string("ns/x.name", "web"),
            Attribute::int64("ns/x.port", 8080),
        ];
        let view = AttrView::new(&attrs);

        assert_eq!(view.string("ns/x.name"), "web");
        // name is a string; reading it as an int drops it to the zero value
        assert_eq!(view.int64("ns/x.name"), 0);
        assert_eq!(view.int64("ns/x.port"), 8080);
        assert!(view.id_ref("ns/x.port").is_none());
    }

    #[test]
    fn index_key_only_for_strings_and_ids() {
        assert_eq!(
            Value::String("a".to_string()).index_key(),
            Some("a".to_string())
        );
        assert_eq!(
            Value::Id(EntityId::from("e1")).index_key(),
            Some("e1".to_string())
        );
        assert_eq!(Value::Int64(1).index_key(), None);
        assert_eq!(Value::Bool(true).index_key(), None);
    }

    #[test]
    fn value_json_round_trip() {
        let original = Value::Component(vec![
            Attribute::string("ns/c.name", "web"),
            Attribute::duration_ms("ns/c.delay", 120_000),
        ]);
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }
}
