use crate::entity::value::{AttrView, Attribute, EntityId};
use crate::records::Record;
use crate::schema::core::{APP_ACTIVE_VERSION, APP_PROJECT, KIND_APP};

/// An application. Versions reference it back via `app_version.app`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct App {
    pub id: Option<EntityId>,
    pub active_version: Option<EntityId>,
    pub project: Option<EntityId>,
}

impl Record for App {
    const SHORT_KIND: &'static str = "app";
    const KIND: &'static str = KIND_APP;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if let Some(active_version) = &self.active_version {
            attrs.push(Attribute::id_ref(APP_ACTIVE_VERSION, active_version.clone()));
        }
        if let Some(project) = &self.project {
            attrs.push(Attribute::id_ref(APP_PROJECT, project.clone()));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        App {
            id: None,
            active_version: view.id_ref(APP_ACTIVE_VERSION),
            project: view.id_ref(APP_PROJECT),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
