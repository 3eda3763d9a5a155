//! Typed records over raw attribute lists.
//!
//! One file per entity kind, the way the store sees them. Business logic
//! works exclusively with these types through the entity client; raw
//! attributes never leak past this layer.

use crate::entity::value::{AttrView, Attribute, EntityId, Value};

pub mod app;
pub mod app_version;
pub mod artifact;
pub mod deployment;
pub mod disk;
pub mod http_route;
pub mod metadata;
pub mod project;

pub use app::App;
pub use app_version::{AppConfig, AppVersion, Command, EnvVar, Service, ServiceConcurrency};
pub use artifact::Artifact;
pub use deployment::{DeployedBy, Deployment, DeploymentPhase, DeploymentStatus, GitInfo};
pub use disk::{Disk, DiskLease, Filesystem, Mount};
pub use http_route::HttpRoute;
pub use metadata::Metadata;
pub use project::Project;

/// A typed record that encodes to and decodes from an attribute list.
///
/// Encoding emits attributes in declaration order and omits fields equal to
/// their zero value unless the schema marks them required; booleans are
/// always emitted so "false" stays distinguishable from "absent". Decoding
/// is optimistic: kind mismatches and unknown attributes are dropped and
/// missing fields default to zero.
pub trait Record: Default + Clone {
    /// Short kind used in idents, e.g. `app` in `app/hello`.
    const SHORT_KIND: &'static str;
    /// Kind singleton id, e.g. `dev.miren.core/kind.app`.
    const KIND: &'static str;

    fn encode(&self) -> Vec<Attribute>;
    fn decode(view: &AttrView<'_>) -> Self;

    fn entity_id(&self) -> Option<&EntityId>;
    fn set_entity_id(&mut self, id: EntityId);

    fn kind() -> EntityId {
        EntityId::from(Self::KIND)
    }

    fn short_kind() -> &'static str {
        Self::SHORT_KIND
    }

    /// True when the record carries nothing but mandatory booleans.
    fn is_empty(&self) -> bool {
        self.encode()
            .iter()
            .all(|a| matches!(a.value, Value::Bool(_)))
    }
}
