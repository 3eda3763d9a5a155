use crate::entity::value::{EntityId, Value, ValueKind};
use crate::error::{AppError, AppResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::RwLock;

/// Declaration of a single attribute: id, value kind, docstring and flags.
///
/// `choices` restricts an Id-valued attribute to a set of singletons.
/// `component` names the specs of a nested attribute set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrSpec {
    pub id: EntityId,
    pub kind: ValueKind,
    pub doc: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub many: bool,
    #[serde(default)]
    pub choices: Vec<EntityId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub component: Vec<AttrSpec>,
}

impl AttrSpec {
    pub fn new(id: &str, kind: ValueKind, doc: &str) -> Self {
        AttrSpec {
            id: EntityId::from(id),
            kind,
            doc: doc.to_string(),
            indexed: false,
            required: false,
            many: false,
            choices: Vec::new(),
            tags: Vec::new(),
            component: Vec::new(),
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    pub fn choices(mut self, ids: &[&str]) -> Self {
        self.choices = ids.iter().map(|s| EntityId::from(*s)).collect();
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn nested(mut self, specs: Vec<AttrSpec>) -> Self {
        self.component = specs;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamespaceSchema {
    namespace: String,
    version: u32,
    attrs: Vec<AttrSpec>,
}

struct Registered {
    schema: NamespaceSchema,
    /// gzip-compressed JSON encoding, shipped for cross-process verification
    encoded: Vec<u8>,
    /// flat lookup including nested component specs
    by_id: HashMap<String, AttrSpec>,
}

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<String, Registered>> = RwLock::new(HashMap::new());
}

fn encode_schema(schema: &NamespaceSchema) -> AppResult<Vec<u8>> {
    let json = serde_json::to_vec(schema)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn flatten<'a>(specs: &'a [AttrSpec], out: &mut HashMap<String, AttrSpec>) {
    for spec in specs {
        out.insert(spec.id.0.clone(), spec.clone());
        if !spec.component.is_empty() {
            flatten(&spec.component, out);
        }
    }
}

/// Registers a namespace schema. One-shot at process start: registering two
/// different schemas for the same `(namespace, version)` fails with Conflict;
/// registering the identical schema again is a no-op.
pub fn register_schema(namespace: &str, version: u32, attrs: Vec<AttrSpec>) -> AppResult<()> {
    let schema = NamespaceSchema {
        namespace: namespace.to_string(),
        version,
        attrs,
    };
    let encoded = encode_schema(&schema)?;

    let mut registry = REGISTRY
        .write()
        .map_err(|_| AppError::Internal("schema registry lock poisoned".to_string()))?;

    if let Some(existing) = registry.get(namespace) {
        if existing.schema.version == version {
            if existing.encoded == encoded {
                return Ok(());
            }
            return Err(AppError::conflict(
                "schema",
                format!(
                    "namespace {} v{} already registered with a different schema",
                    namespace, version
                ),
            ));
        }
    }

    let mut by_id = HashMap::new();
    flatten(&schema.attrs, &mut by_id);

    log::info!(
        "Registered schema {} v{} ({} attributes)",
        namespace,
        version,
        by_id.len()
    );

    registry.insert(
        namespace.to_string(),
        Registered {
            schema,
            encoded,
            by_id,
        },
    );

    Ok(())
}

/// Looks up the declaration for an attribute id across all namespaces.
pub fn lookup(attr_id: &str) -> Option<AttrSpec> {
    let namespace = attr_id.split('/').next()?;
    let registry = REGISTRY.read().ok()?;
    registry.get(namespace)?.by_id.get(attr_id).cloned()
}

/// All declarations in one attribute group, e.g. `dev.miren.core/deployment`.
pub fn specs_in_group(group: &str) -> Vec<AttrSpec> {
    let registry = match REGISTRY.read() {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    let prefix = format!("{}.", group);
    registry
        .values()
        .flat_map(|r| r.by_id.values())
        .filter(|s| s.id.as_str().starts_with(&prefix))
        .cloned()
        .collect()
}

/// All schema entries carrying the given tag.
pub fn attributes_by_tag(tag: &str) -> Vec<AttrSpec> {
    let registry = match REGISTRY.read() {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    let mut specs: Vec<AttrSpec> = registry
        .values()
        .flat_map(|r| r.by_id.values())
        .filter(|s| s.tags.iter().any(|t| t == tag))
        .cloned()
        .collect();
    specs.sort_by(|a, b| a.id.cmp(&b.id));
    specs
}

/// The gzip-compressed encoded schema for a namespace, as shipped with the
/// binary.
pub fn encoded_schema(namespace: &str) -> AppResult<Vec<u8>> {
    let registry = REGISTRY
        .read()
        .map_err(|_| AppError::Internal("schema registry lock poisoned".to_string()))?;
    registry
        .get(namespace)
        .map(|r| r.encoded.clone())
        .ok_or_else(|| AppError::not_found("schema", namespace))
}

/// Verifies a peer's encoded schema is byte-identical to ours before
/// accepting its writes.
pub fn verify_encoded(namespace: &str, bytes: &[u8]) -> AppResult<()> {
    let ours = encoded_schema(namespace)?;
    if ours == bytes {
        return Ok(());
    }
    // Decompress for a legible error; mismatched bytes alone say nothing.
    let mut theirs = String::new();
    GzDecoder::new(bytes).read_to_string(&mut theirs).ok();
    Err(AppError::conflict(
        "schema",
        format!("encoded schema for {} does not match", namespace),
    ))
}

/// Validates one attribute against its declaration. Returns the declaration
/// so callers can consult flags without a second lookup.
pub fn validate_attribute(attr_id: &EntityId, value: &Value) -> AppResult<AttrSpec> {
    let spec = lookup(attr_id.as_str())
        .ok_or_else(|| AppError::Schema(format!("attribute {} is not declared", attr_id)))?;

    if value.value_kind() != spec.kind {
        return Err(AppError::Schema(format!(
            "attribute {} declared {:?}, got {:?}",
            attr_id,
            spec.kind,
            value.value_kind()
        )));
    }

    if !spec.choices.is_empty() {
        match value {
            Value::Id(chosen) if spec.choices.contains(chosen) => {}
            _ => {
                return Err(AppError::validation(
                    "invalid-choice",
                    format!("attribute {} value is not one of its choices", attr_id),
                ))
            }
        }
    }

    if let Value::Component(nested) = value {
        for attr in nested {
            validate_attribute(&attr.id, &attr.value)?;
        }
    }

    Ok(spec)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_specs(ns: &str) -> Vec<AttrSpec> {
        vec![
            AttrSpec::new(&format!("{}/thing.name", ns), ValueKind::String, "name").indexed(),
            AttrSpec::new(&format!("{}/thing.size", ns), ValueKind::Int64, "size"),
        ]
    }

    #[test]
    fn duplicate_registration_same_bytes_is_noop() {
        register_schema("test.reg", 1, test_specs("test.reg")).unwrap();
        register_schema("test.reg", 1, test_specs("test.reg")).unwrap();
    }

    #[test]
    fn duplicate_registration_different_schema_conflicts() {
        register_schema("test.reg2", 1, test_specs("test.reg2")).unwrap();
        let different =
            vec![AttrSpec::new("test.reg2/thing.other", ValueKind::Bool, "other")];
        let err = register_schema("test.reg2", 1, different).unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[test]
    fn encoded_schema_round_trips_verification() {
        register_schema("test.reg3", 1, test_specs("test.reg3")).unwrap();
        let encoded = encoded_schema("test.reg3").unwrap();
        verify_encoded("test.reg3", &encoded).unwrap();
        assert!(verify_encoded("test.reg3", b"not-gzip").is_err());
    }

    #[test]
    fn kind_mismatch_is_schema_error() {
        register_schema("test.reg4", 1, test_specs("test.reg4")).unwrap();
        let err = validate_attribute(
            &EntityId::from("test.reg4/thing.size"),
            &Value::String("big".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));
    }
}
