//! Attribute declarations for the `dev.miren.storage` namespace.

use crate::entity::schema::{register_schema, AttrSpec};
use crate::entity::value::ValueKind;
use crate::error::AppResult;
use crate::schema::core::TAG_APP_REF;

pub const NS_STORAGE: &str = "dev.miren.storage";
pub const STORAGE_SCHEMA_VERSION: u32 = 1;

// kinds
pub const KIND_DISK: &str = "dev.miren.storage/kind.disk";
pub const KIND_DISK_LEASE: &str = "dev.miren.storage/kind.disk_lease";

// disk
pub const DISK_PROJECT: &str = "dev.miren.storage/disk.project";
pub const DISK_SIZE_BYTES: &str = "dev.miren.storage/disk.size_bytes";
pub const DISK_FILESYSTEM: &str = "dev.miren.storage/disk.filesystem";
pub const DISK_STATUS: &str = "dev.miren.storage/disk.status";

// disk_lease
pub const DISK_LEASE_DISK: &str = "dev.miren.storage/disk_lease.disk";
pub const DISK_LEASE_APP: &str = "dev.miren.storage/disk_lease.app";
pub const DISK_LEASE_MOUNT: &str = "dev.miren.storage/disk_lease.mount";
pub const DISK_LEASE_SESSION: &str = "dev.miren.storage/disk_lease.session";

// mount component
pub const MOUNT_PATH: &str = "dev.miren.storage/mount.path";
pub const MOUNT_READ_ONLY: &str = "dev.miren.storage/mount.read_only";

// filesystem component
pub const FILESYSTEM_KIND: &str = "dev.miren.storage/filesystem.kind";
pub const FILESYSTEM_OPTIONS: &str = "dev.miren.storage/filesystem.options";

// disk status singletons
pub const STATUS_PROVISIONING: &str = "dev.miren.storage/status.provisioning";
pub const STATUS_READY: &str = "dev.miren.storage/status.ready";
pub const STATUS_FAILED: &str = "dev.miren.storage/status.failed";

/// Registers `dev.miren.storage`.
pub fn register() -> AppResult<()> {
    register_schema(
        NS_STORAGE,
        STORAGE_SCHEMA_VERSION,
        vec![
            AttrSpec::new(DISK_PROJECT, ValueKind::Id, "Owning project").indexed(),
            AttrSpec::new(DISK_SIZE_BYTES, ValueKind::Int64, "Provisioned size"),
            AttrSpec::new(DISK_FILESYSTEM, ValueKind::Component, "Filesystem to format with")
                .nested(vec![
                    AttrSpec::new(FILESYSTEM_KIND, ValueKind::String, "Filesystem kind"),
                    AttrSpec::new(FILESYSTEM_OPTIONS, ValueKind::String, "mkfs options").many(),
                ]),
            AttrSpec::new(DISK_STATUS, ValueKind::Id, "Provisioning status").choices(&[
                STATUS_PROVISIONING,
                STATUS_READY,
                STATUS_FAILED,
            ]),
            AttrSpec::new(DISK_LEASE_DISK, ValueKind::Id, "Claimed disk").indexed(),
            AttrSpec::new(DISK_LEASE_APP, ValueKind::Id, "App holding the claim")
                .indexed()
                .tag(TAG_APP_REF),
            AttrSpec::new(DISK_LEASE_MOUNT, ValueKind::Component, "Where to mount it")
                .nested(vec![
                    AttrSpec::new(MOUNT_PATH, ValueKind::String, "Mount path"),
                    AttrSpec::new(MOUNT_READ_ONLY, ValueKind::Bool, "Read-only mount"),
                ]),
            AttrSpec::new(
                DISK_LEASE_SESSION,
                ValueKind::String,
                "Session the claim is scoped to",
            ),
        ],
    )
}
