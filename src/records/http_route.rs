use crate::entity::value::{AttrView, Attribute, EntityId};
use crate::records::Record;
use crate::schema::core::{HTTP_ROUTE_APP, HTTP_ROUTE_HOST, KIND_HTTP_ROUTE};

/// Ingress mapping from a host name to the app serving it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRoute {
    pub id: Option<EntityId>,
    pub host: String,
    pub app: Option<EntityId>,
}

impl Record for HttpRoute {
    const SHORT_KIND: &'static str = "http_route";
    const KIND: &'static str = KIND_HTTP_ROUTE;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.host.is_empty() {
            attrs.push(Attribute::string(HTTP_ROUTE_HOST, self.host.clone()));
        }
        if let Some(app) = &self.app {
            attrs.push(Attribute::id_ref(HTTP_ROUTE_APP, app.clone()));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        HttpRoute {
            id: None,
            host: view.string(HTTP_ROUTE_HOST),
            app: view.id_ref(HTTP_ROUTE_APP),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
