//! Attribute declarations for the `dev.miren.core` namespace.
//!
//! Attribute ids are URI-like: `<namespace>/<entity>.<field>`. Singletons
//! (enum choices) follow `<namespace>/<group>.<name>`.

use crate::entity::schema::{register_schema, AttrSpec};
use crate::entity::value::ValueKind;
use crate::error::AppResult;

pub const NS_CORE: &str = "dev.miren.core";
pub const CORE_SCHEMA_VERSION: u32 = 1;

/// Tag carried by every indexed attribute that references an `app`; the
/// deployment coordinator walks these on transitive delete.
pub const TAG_APP_REF: &str = "dev.miren.app_ref";

// entity
pub const ENTITY_KIND: &str = "dev.miren.core/entity.kind";
pub const ENTITY_IDENT: &str = "dev.miren.core/entity.ident";

// kinds
pub const KIND_APP: &str = "dev.miren.core/kind.app";
pub const KIND_APP_VERSION: &str = "dev.miren.core/kind.app_version";
pub const KIND_ARTIFACT: &str = "dev.miren.core/kind.artifact";
pub const KIND_DEPLOYMENT: &str = "dev.miren.core/kind.deployment";
pub const KIND_PROJECT: &str = "dev.miren.core/kind.project";
pub const KIND_HTTP_ROUTE: &str = "dev.miren.core/kind.http_route";

// app
pub const APP_ACTIVE_VERSION: &str = "dev.miren.core/app.active_version";
pub const APP_PROJECT: &str = "dev.miren.core/app.project";

// app_version
pub const APP_VERSION_APP: &str = "dev.miren.core/app_version.app";
pub const APP_VERSION_ARTIFACT: &str = "dev.miren.core/app_version.artifact";
pub const APP_VERSION_CONFIG: &str = "dev.miren.core/app_version.config";
pub const APP_VERSION_MANIFEST_DIGEST: &str = "dev.miren.core/app_version.manifest_digest";
pub const APP_VERSION_VERSION: &str = "dev.miren.core/app_version.version";

// config component
pub const CONFIG_ENTRYPOINT: &str = "dev.miren.core/config.entrypoint";
pub const CONFIG_PORT: &str = "dev.miren.core/config.port";
pub const CONFIG_COMMANDS: &str = "dev.miren.core/config.commands";
pub const CONFIG_SERVICES: &str = "dev.miren.core/config.services";
pub const CONFIG_VARIABLES: &str = "dev.miren.core/config.variable";

// commands component
pub const COMMANDS_NAME: &str = "dev.miren.core/commands.name";
pub const COMMANDS_COMMAND: &str = "dev.miren.core/commands.command";

// services component
pub const SERVICES_NAME: &str = "dev.miren.core/services.name";
pub const SERVICES_CONCURRENCY: &str = "dev.miren.core/services.service_concurrency";

// service_concurrency component
pub const CONCURRENCY_MODE: &str = "dev.miren.core/service_concurrency.mode";
pub const CONCURRENCY_REQUESTS_PER_INSTANCE: &str =
    "dev.miren.core/service_concurrency.requests_per_instance";
pub const CONCURRENCY_SCALE_DOWN_DELAY: &str =
    "dev.miren.core/service_concurrency.scale_down_delay";
pub const CONCURRENCY_NUM_INSTANCES: &str = "dev.miren.core/service_concurrency.num_instances";

// variable component
pub const VARIABLE_NAME: &str = "dev.miren.core/variable.name";
pub const VARIABLE_VALUE: &str = "dev.miren.core/variable.value";
pub const VARIABLE_SECRET: &str = "dev.miren.core/variable.secret";

// env component (runtime environment entries)
pub const ENV_NAME: &str = "dev.miren.core/env.name";
pub const ENV_VALUE: &str = "dev.miren.core/env.value";

// artifact
pub const ARTIFACT_APP: &str = "dev.miren.core/artifact.app";
pub const ARTIFACT_MANIFEST: &str = "dev.miren.core/artifact.manifest";
pub const ARTIFACT_MANIFEST_DIGEST: &str = "dev.miren.core/artifact.manifest_digest";

// deployment
pub const DEPLOYMENT_APP_NAME: &str = "dev.miren.core/deployment.app_name";
pub const DEPLOYMENT_CLUSTER_ID: &str = "dev.miren.core/deployment.cluster_id";
pub const DEPLOYMENT_APP_VERSION: &str = "dev.miren.core/deployment.app_version";
pub const DEPLOYMENT_STATUS: &str = "dev.miren.core/deployment.status";
pub const DEPLOYMENT_PHASE: &str = "dev.miren.core/deployment.phase";
pub const DEPLOYMENT_DEPLOYED_BY: &str = "dev.miren.core/deployment.deployed_by";
pub const DEPLOYMENT_GIT_INFO: &str = "dev.miren.core/deployment.git_info";
pub const DEPLOYMENT_COMPLETED_AT: &str = "dev.miren.core/deployment.completed_at";
pub const DEPLOYMENT_ERROR_MESSAGE: &str = "dev.miren.core/deployment.error_message";
pub const DEPLOYMENT_BUILD_LOGS: &str = "dev.miren.core/deployment.build_logs";

// deployment status singletons
pub const STATUS_IN_PROGRESS: &str = "dev.miren.core/deployment_status.in_progress";
pub const STATUS_ACTIVE: &str = "dev.miren.core/deployment_status.active";
pub const STATUS_FAILED: &str = "dev.miren.core/deployment_status.failed";
pub const STATUS_ROLLED_BACK: &str = "dev.miren.core/deployment_status.rolled_back";

// deployment phase singletons
pub const PHASE_PREPARING: &str = "dev.miren.core/deployment_phase.preparing";
pub const PHASE_BUILDING: &str = "dev.miren.core/deployment_phase.building";
pub const PHASE_PUSHING: &str = "dev.miren.core/deployment_phase.pushing";
pub const PHASE_ACTIVATING: &str = "dev.miren.core/deployment_phase.activating";

// deployed_by component
pub const DEPLOYED_BY_USER_ID: &str = "dev.miren.core/deployed_by.user_id";
pub const DEPLOYED_BY_USER_EMAIL: &str = "dev.miren.core/deployed_by.user_email";
pub const DEPLOYED_BY_TIMESTAMP: &str = "dev.miren.core/deployed_by.timestamp";

// git_info component
pub const GIT_INFO_SHA: &str = "dev.miren.core/git_info.sha";
pub const GIT_INFO_BRANCH: &str = "dev.miren.core/git_info.branch";
pub const GIT_INFO_MESSAGE: &str = "dev.miren.core/git_info.message";
pub const GIT_INFO_AUTHOR: &str = "dev.miren.core/git_info.author";
pub const GIT_INFO_IS_DIRTY: &str = "dev.miren.core/git_info.is_dirty";
pub const GIT_INFO_WORKING_TREE_HASH: &str = "dev.miren.core/git_info.working_tree_hash";
pub const GIT_INFO_COMMIT_AUTHOR_EMAIL: &str = "dev.miren.core/git_info.commit_author_email";
pub const GIT_INFO_COMMIT_TIMESTAMP: &str = "dev.miren.core/git_info.commit_timestamp";
pub const GIT_INFO_REPOSITORY: &str = "dev.miren.core/git_info.repository";

// metadata
pub const METADATA_NAME: &str = "dev.miren.core/metadata.name";
pub const METADATA_LABELS: &str = "dev.miren.core/metadata.labels";
pub const METADATA_PROJECT: &str = "dev.miren.core/metadata.project";

// project
pub const PROJECT_OWNER: &str = "dev.miren.core/project.owner";

// http_route
pub const HTTP_ROUTE_HOST: &str = "dev.miren.core/http_route.host";
pub const HTTP_ROUTE_APP: &str = "dev.miren.core/http_route.app";

fn concurrency_component() -> Vec<AttrSpec> {
    vec![
        AttrSpec::new(CONCURRENCY_MODE, ValueKind::String, "Scaling mode"),
        AttrSpec::new(
            CONCURRENCY_REQUESTS_PER_INSTANCE,
            ValueKind::Int64,
            "Target in-flight requests per instance",
        ),
        AttrSpec::new(
            CONCURRENCY_SCALE_DOWN_DELAY,
            ValueKind::Duration,
            "Idle time before scaling an instance down",
        ),
        AttrSpec::new(
            CONCURRENCY_NUM_INSTANCES,
            ValueKind::Int64,
            "Instance count for fixed-mode services",
        ),
    ]
}

fn config_component() -> Vec<AttrSpec> {
    vec![
        AttrSpec::new(CONFIG_ENTRYPOINT, ValueKind::String, "Exec prefix for all commands"),
        AttrSpec::new(CONFIG_PORT, ValueKind::Int64, "Port the web process listens on"),
        AttrSpec::new(CONFIG_COMMANDS, ValueKind::Component, "Named auxiliary commands")
            .many()
            .nested(vec![
                AttrSpec::new(COMMANDS_NAME, ValueKind::String, "Command name"),
                AttrSpec::new(COMMANDS_COMMAND, ValueKind::String, "Shell command line"),
            ]),
        AttrSpec::new(CONFIG_SERVICES, ValueKind::Component, "Long-running services")
            .many()
            .nested(vec![
                AttrSpec::new(SERVICES_NAME, ValueKind::String, "Service name"),
                AttrSpec::new(
                    SERVICES_CONCURRENCY,
                    ValueKind::Component,
                    "Service concurrency settings",
                )
                .nested(concurrency_component()),
            ]),
        AttrSpec::new(CONFIG_VARIABLES, ValueKind::Component, "Environment variables")
            .many()
            .nested(vec![
                AttrSpec::new(VARIABLE_NAME, ValueKind::String, "Variable name"),
                AttrSpec::new(VARIABLE_VALUE, ValueKind::String, "Variable value"),
                AttrSpec::new(VARIABLE_SECRET, ValueKind::Bool, "Redact in logs and UI"),
            ]),
    ]
}

/// Registers `dev.miren.core`.
pub fn register() -> AppResult<()> {
    register_schema(
        NS_CORE,
        CORE_SCHEMA_VERSION,
        vec![
            AttrSpec::new(ENTITY_KIND, ValueKind::Id, "Kind ref carried by every entity")
                .indexed(),
            AttrSpec::new(ENTITY_IDENT, ValueKind::String, "Logical name, shortKind/name"),
            // app
            AttrSpec::new(APP_ACTIVE_VERSION, ValueKind::Id, "Currently served app_version"),
            AttrSpec::new(APP_PROJECT, ValueKind::Id, "Owning project").indexed(),
            // app_version
            AttrSpec::new(APP_VERSION_APP, ValueKind::Id, "App this version belongs to")
                .indexed()
                .required()
                .tag(TAG_APP_REF),
            AttrSpec::new(APP_VERSION_ARTIFACT, ValueKind::Id, "Built artifact"),
            AttrSpec::new(APP_VERSION_CONFIG, ValueKind::Component, "Runtime configuration")
                .nested(config_component()),
            AttrSpec::new(
                APP_VERSION_MANIFEST_DIGEST,
                ValueKind::String,
                "Digest of the image manifest this version runs",
            )
            .indexed(),
            AttrSpec::new(APP_VERSION_VERSION, ValueKind::String, "Human-readable version"),
            // env
            AttrSpec::new(ENV_NAME, ValueKind::String, "Environment entry name"),
            AttrSpec::new(ENV_VALUE, ValueKind::String, "Environment entry value"),
            // artifact
            AttrSpec::new(ARTIFACT_APP, ValueKind::Id, "App the image was built for")
                .indexed()
                .tag(TAG_APP_REF),
            AttrSpec::new(ARTIFACT_MANIFEST, ValueKind::String, "OCI manifest JSON"),
            AttrSpec::new(
                ARTIFACT_MANIFEST_DIGEST,
                ValueKind::String,
                "sha256:<hex> digest of the manifest bytes",
            )
            .indexed(),
            // deployment
            AttrSpec::new(DEPLOYMENT_APP_NAME, ValueKind::String, "Deployed app name")
                .indexed()
                .required(),
            AttrSpec::new(DEPLOYMENT_CLUSTER_ID, ValueKind::String, "Target cluster")
                .indexed()
                .required(),
            AttrSpec::new(
                DEPLOYMENT_APP_VERSION,
                ValueKind::String,
                "app_version id, or a sentinel while the build is pending",
            ),
            AttrSpec::new(DEPLOYMENT_STATUS, ValueKind::Id, "Deployment status")
                .indexed()
                .choices(&[
                    STATUS_IN_PROGRESS,
                    STATUS_ACTIVE,
                    STATUS_FAILED,
                    STATUS_ROLLED_BACK,
                ]),
            AttrSpec::new(DEPLOYMENT_PHASE, ValueKind::Id, "In-progress phase").choices(&[
                PHASE_PREPARING,
                PHASE_BUILDING,
                PHASE_PUSHING,
                PHASE_ACTIVATING,
            ]),
            AttrSpec::new(DEPLOYMENT_DEPLOYED_BY, ValueKind::Component, "Who started it")
                .nested(vec![
                    AttrSpec::new(DEPLOYED_BY_USER_ID, ValueKind::String, "User id"),
                    AttrSpec::new(DEPLOYED_BY_USER_EMAIL, ValueKind::String, "User email"),
                    AttrSpec::new(
                        DEPLOYED_BY_TIMESTAMP,
                        ValueKind::String,
                        "RFC3339 start time; sorts lexicographically",
                    ),
                ]),
            AttrSpec::new(DEPLOYMENT_GIT_INFO, ValueKind::Component, "Source revision info")
                .nested(vec![
                    AttrSpec::new(GIT_INFO_SHA, ValueKind::String, "Commit sha"),
                    AttrSpec::new(GIT_INFO_BRANCH, ValueKind::String, "Branch"),
                    AttrSpec::new(GIT_INFO_MESSAGE, ValueKind::String, "Commit message"),
                    AttrSpec::new(GIT_INFO_AUTHOR, ValueKind::String, "Commit author"),
                    AttrSpec::new(GIT_INFO_IS_DIRTY, ValueKind::Bool, "Working tree was dirty"),
                    AttrSpec::new(
                        GIT_INFO_WORKING_TREE_HASH,
                        ValueKind::String,
                        "Hash of the dirty working tree, set only when dirty",
                    ),
                    AttrSpec::new(
                        GIT_INFO_COMMIT_AUTHOR_EMAIL,
                        ValueKind::String,
                        "Author email",
                    ),
                    AttrSpec::new(
                        GIT_INFO_COMMIT_TIMESTAMP,
                        ValueKind::String,
                        "RFC3339 commit time",
                    ),
                    AttrSpec::new(GIT_INFO_REPOSITORY, ValueKind::String, "Repository URL"),
                ]),
            AttrSpec::new(DEPLOYMENT_COMPLETED_AT, ValueKind::Time, "Terminal-state time"),
            AttrSpec::new(DEPLOYMENT_ERROR_MESSAGE, ValueKind::String, "Failure detail"),
            AttrSpec::new(DEPLOYMENT_BUILD_LOGS, ValueKind::String, "Captured build output"),
            // metadata
            AttrSpec::new(METADATA_NAME, ValueKind::String, "Display name"),
            AttrSpec::new(METADATA_LABELS, ValueKind::Label, "Free-form labels").many(),
            AttrSpec::new(METADATA_PROJECT, ValueKind::Id, "Owning project").indexed(),
            // project
            AttrSpec::new(PROJECT_OWNER, ValueKind::String, "Owner email"),
            // http_route
            AttrSpec::new(HTTP_ROUTE_HOST, ValueKind::String, "Ingress host").indexed(),
            AttrSpec::new(HTTP_ROUTE_APP, ValueKind::Id, "App serving the host")
                .indexed()
                .tag(TAG_APP_REF),
        ],
    )
}
