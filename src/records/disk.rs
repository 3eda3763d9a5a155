use crate::entity::value::{AttrView, Attribute, EntityId, Value};
use crate::records::Record;
use crate::schema::storage::{
    DISK_FILESYSTEM, DISK_LEASE_APP, DISK_LEASE_DISK, DISK_LEASE_MOUNT, DISK_LEASE_SESSION,
    DISK_PROJECT, DISK_SIZE_BYTES, DISK_STATUS, FILESYSTEM_KIND, FILESYSTEM_OPTIONS, KIND_DISK,
    KIND_DISK_LEASE, MOUNT_PATH, MOUNT_READ_ONLY, STATUS_FAILED, STATUS_PROVISIONING,
    STATUS_READY,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filesystem {
    pub kind: String,
    pub options: Vec<String>,
}

impl Filesystem {
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.options.is_empty()
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.kind.is_empty() {
            attrs.push(Attribute::string(FILESYSTEM_KIND, self.kind.clone()));
        }
        for option in &self.options {
            attrs.push(Attribute::string(FILESYSTEM_OPTIONS, option.clone()));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        Filesystem {
            kind: view.string(FILESYSTEM_KIND),
            options: view.strings(FILESYSTEM_OPTIONS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiskStatus {
    #[default]
    Provisioning,
    Ready,
    Failed,
}

impl DiskStatus {
    pub fn singleton(&self) -> &'static str {
        match self {
            DiskStatus::Provisioning => STATUS_PROVISIONING,
            DiskStatus::Ready => STATUS_READY,
            DiskStatus::Failed => STATUS_FAILED,
        }
    }

    pub fn from_singleton(id: &str) -> Option<Self> {
        match id {
            STATUS_PROVISIONING => Some(DiskStatus::Provisioning),
            STATUS_READY => Some(DiskStatus::Ready),
            STATUS_FAILED => Some(DiskStatus::Failed),
            _ => None,
        }
    }
}

/// A persistent volume belonging to a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Disk {
    pub id: Option<EntityId>,
    pub project: Option<EntityId>,
    pub size_bytes: i64,
    pub filesystem: Filesystem,
    pub status: DiskStatus,
}

impl Record for Disk {
    const SHORT_KIND: &'static str = "disk";
    const KIND: &'static str = KIND_DISK;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if let Some(project) = &self.project {
            attrs.push(Attribute::id_ref(DISK_PROJECT, project.clone()));
        }
        if self.size_bytes != 0 {
            attrs.push(Attribute::int64(DISK_SIZE_BYTES, self.size_bytes));
        }
        if !self.filesystem.is_empty() {
            attrs.push(Attribute::component(DISK_FILESYSTEM, self.filesystem.encode()));
        }
        attrs.push(Attribute::id_ref(DISK_STATUS, self.status.singleton()));
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        let status = match view.get(DISK_STATUS) {
            Some(Value::Id(id)) => DiskStatus::from_singleton(id.as_str()).unwrap_or_default(),
            _ => DiskStatus::default(),
        };
        Disk {
            id: None,
            project: view.id_ref(DISK_PROJECT),
            size_bytes: view.int64(DISK_SIZE_BYTES),
            filesystem: view
                .component(DISK_FILESYSTEM)
                .map(|v| Filesystem::decode(&v))
                .unwrap_or_default(),
            status,
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mount {
    pub path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && !self.read_only
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.path.is_empty() {
            attrs.push(Attribute::string(MOUNT_PATH, self.path.clone()));
        }
        attrs.push(Attribute::boolean(MOUNT_READ_ONLY, self.read_only));
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        Mount {
            path: view.string(MOUNT_PATH),
            read_only: view.boolean(MOUNT_READ_ONLY),
        }
    }
}

/// An app's claim on a disk, optionally scoped to a session so the claim
/// lapses with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskLease {
    pub id: Option<EntityId>,
    pub disk: Option<EntityId>,
    pub app: Option<EntityId>,
    pub mount: Mount,
    pub session: String,
}

impl Record for DiskLease {
    const SHORT_KIND: &'static str = "disk_lease";
    const KIND: &'static str = KIND_DISK_LEASE;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if let Some(disk) = &self.disk {
            attrs.push(Attribute::id_ref(DISK_LEASE_DISK, disk.clone()));
        }
        if let Some(app) = &self.app {
            attrs.push(Attribute::id_ref(DISK_LEASE_APP, app.clone()));
        }
        if !self.mount.is_empty() {
            attrs.push(Attribute::component(DISK_LEASE_MOUNT, self.mount.encode()));
        }
        if !self.session.is_empty() {
            attrs.push(Attribute::string(DISK_LEASE_SESSION, self.session.clone()));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        DiskLease {
            id: None,
            disk: view.id_ref(DISK_LEASE_DISK),
            app: view.id_ref(DISK_LEASE_APP),
            mount: view
                .component(DISK_LEASE_MOUNT)
                .map(|v| Mount::decode(&v))
                .unwrap_or_default(),
            session: view.string(DISK_LEASE_SESSION),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
