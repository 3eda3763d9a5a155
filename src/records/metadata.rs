use crate::entity::value::{AttrView, Attribute, EntityId};
use crate::schema::core::{METADATA_LABELS, METADATA_NAME, METADATA_PROJECT};

/// Name and labels attached to any nameable entity. Not a kind of its own:
/// these attributes ride on the entity they describe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub project: Option<EntityId>,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Metadata {
            name: name.into(),
            labels: Vec::new(),
            project: None,
        }
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.name.is_empty() {
            attrs.push(Attribute::string(METADATA_NAME, self.name.clone()));
        }
        for (key, value) in &self.labels {
            attrs.push(Attribute::label(METADATA_LABELS, key.clone(), value.clone()));
        }
        if let Some(project) = &self.project {
            attrs.push(Attribute::id_ref(METADATA_PROJECT, project.clone()));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        Metadata {
            name: view.string(METADATA_NAME),
            labels: view.labels(METADATA_LABELS),
            project: view.id_ref(METADATA_PROJECT),
        }
    }
}
