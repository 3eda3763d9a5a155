use crate::entity::value::{AttrView, Attribute, EntityId};
use crate::records::Record;
use crate::schema::core::{ARTIFACT_APP, ARTIFACT_MANIFEST, ARTIFACT_MANIFEST_DIGEST, KIND_ARTIFACT};

/// An OCI image built from a source tree, addressed by its manifest digest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifact {
    pub id: Option<EntityId>,
    pub app: Option<EntityId>,
    pub manifest: String,
    pub manifest_digest: String,
}

impl Record for Artifact {
    const SHORT_KIND: &'static str = "artifact";
    const KIND: &'static str = KIND_ARTIFACT;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if let Some(app) = &self.app {
            attrs.push(Attribute::id_ref(ARTIFACT_APP, app.clone()));
        }
        if !self.manifest.is_empty() {
            attrs.push(Attribute::string(ARTIFACT_MANIFEST, self.manifest.clone()));
        }
        if !self.manifest_digest.is_empty() {
            attrs.push(Attribute::string(
                ARTIFACT_MANIFEST_DIGEST,
                self.manifest_digest.clone(),
            ));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        Artifact {
            id: None,
            app: view.id_ref(ARTIFACT_APP),
            manifest: view.string(ARTIFACT_MANIFEST),
            manifest_digest: view.string(ARTIFACT_MANIFEST_DIGEST),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
