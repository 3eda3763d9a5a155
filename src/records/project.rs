use crate::entity::value::{AttrView, Attribute, EntityId};
use crate::records::Record;
use crate::schema::core::{KIND_PROJECT, PROJECT_OWNER};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Project {
    pub id: Option<EntityId>,
    pub owner: String,
}

impl Record for Project {
    const SHORT_KIND: &'static str = "project";
    const KIND: &'static str = KIND_PROJECT;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.owner.is_empty() {
            attrs.push(Attribute::string(PROJECT_OWNER, self.owner.clone()));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        Project {
            id: None,
            owner: view.string(PROJECT_OWNER),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
