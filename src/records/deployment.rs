use crate::entity::value::{AttrView, Attribute, EntityId, Value};
use crate::prelude::*;
use chrono::SecondsFormat;
use crate::records::Record;
use crate::schema::core::{
    DEPLOYED_BY_TIMESTAMP, DEPLOYED_BY_USER_EMAIL, DEPLOYED_BY_USER_ID, DEPLOYMENT_APP_NAME,
    DEPLOYMENT_APP_VERSION, DEPLOYMENT_BUILD_LOGS, DEPLOYMENT_CLUSTER_ID, DEPLOYMENT_COMPLETED_AT,
    DEPLOYMENT_DEPLOYED_BY, DEPLOYMENT_ERROR_MESSAGE, DEPLOYMENT_GIT_INFO, DEPLOYMENT_PHASE,
    DEPLOYMENT_STATUS, GIT_INFO_AUTHOR, GIT_INFO_BRANCH, GIT_INFO_COMMIT_AUTHOR_EMAIL,
    GIT_INFO_COMMIT_TIMESTAMP, GIT_INFO_IS_DIRTY, GIT_INFO_MESSAGE, GIT_INFO_REPOSITORY,
    GIT_INFO_SHA, GIT_INFO_WORKING_TREE_HASH, KIND_DEPLOYMENT, PHASE_ACTIVATING, PHASE_BUILDING,
    PHASE_PREPARING, PHASE_PUSHING, STATUS_ACTIVE, STATUS_FAILED, STATUS_IN_PROGRESS,
    STATUS_ROLLED_BACK,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    InProgress,
    Active,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn singleton(&self) -> &'static str {
        match self {
            DeploymentStatus::InProgress => STATUS_IN_PROGRESS,
            DeploymentStatus::Active => STATUS_ACTIVE,
            DeploymentStatus::Failed => STATUS_FAILED,
            DeploymentStatus::RolledBack => STATUS_ROLLED_BACK,
        }
    }

    pub fn from_singleton(id: &str) -> Option<Self> {
        match id {
            STATUS_IN_PROGRESS => Some(DeploymentStatus::InProgress),
            STATUS_ACTIVE => Some(DeploymentStatus::Active),
            STATUS_FAILED => Some(DeploymentStatus::Failed),
            STATUS_ROLLED_BACK => Some(DeploymentStatus::RolledBack),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(DeploymentStatus::InProgress),
            "active" => Some(DeploymentStatus::Active),
            "failed" => Some(DeploymentStatus::Failed),
            "rolled_back" => Some(DeploymentStatus::RolledBack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    #[default]
    Preparing,
    Building,
    Pushing,
    Activating,
}

impl DeploymentPhase {
    pub fn singleton(&self) -> &'static str {
        match self {
            DeploymentPhase::Preparing => PHASE_PREPARING,
            DeploymentPhase::Building => PHASE_BUILDING,
            DeploymentPhase::Pushing => PHASE_PUSHING,
            DeploymentPhase::Activating => PHASE_ACTIVATING,
        }
    }

    pub fn from_singleton(id: &str) -> Option<Self> {
        match id {
            PHASE_PREPARING => Some(DeploymentPhase::Preparing),
            PHASE_BUILDING => Some(DeploymentPhase::Building),
            PHASE_PUSHING => Some(DeploymentPhase::Pushing),
            PHASE_ACTIVATING => Some(DeploymentPhase::Activating),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preparing" => Some(DeploymentPhase::Preparing),
            "building" => Some(DeploymentPhase::Building),
            "pushing" => Some(DeploymentPhase::Pushing),
            "activating" => Some(DeploymentPhase::Activating),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPhase::Preparing => "preparing",
            DeploymentPhase::Building => "building",
            DeploymentPhase::Pushing => "pushing",
            DeploymentPhase::Activating => "activating",
        }
    }
}

/// Who started a deployment and when. The timestamp is RFC3339 so string
/// order is time order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployedBy {
    pub user_id: String,
    pub user_email: String,
    pub timestamp: String,
}

impl DeployedBy {
    pub fn now(user_id: &str, user_email: &str) -> Self {
        DeployedBy {
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_empty() && self.user_email.is_empty() && self.timestamp.is_empty()
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.user_id.is_empty() {
            attrs.push(Attribute::string(DEPLOYED_BY_USER_ID, self.user_id.clone()));
        }
        if !self.user_email.is_empty() {
            attrs.push(Attribute::string(
                DEPLOYED_BY_USER_EMAIL,
                self.user_email.clone(),
            ));
        }
        if !self.timestamp.is_empty() {
            attrs.push(Attribute::string(
                DEPLOYED_BY_TIMESTAMP,
                self.timestamp.clone(),
            ));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        DeployedBy {
            user_id: view.string(DEPLOYED_BY_USER_ID),
            user_email: view.string(DEPLOYED_BY_USER_EMAIL),
            timestamp: view.string(DEPLOYED_BY_TIMESTAMP),
        }
    }
}

/// Source revision a deployment was cut from. `working_tree_hash` is
/// populated only when the tree was dirty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitInfo {
    pub sha: String,
    pub branch: String,
    pub message: String,
    pub author: String,
    pub is_dirty: bool,
    pub working_tree_hash: String,
    pub commit_author_email: String,
    pub commit_timestamp: String,
    pub repository: String,
}

impl GitInfo {
    pub fn is_empty(&self) -> bool {
        self.sha.is_empty()
            && self.branch.is_empty()
            && self.message.is_empty()
            && self.author.is_empty()
            && !self.is_dirty
            && self.working_tree_hash.is_empty()
            && self.commit_author_email.is_empty()
            && self.commit_timestamp.is_empty()
            && self.repository.is_empty()
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.sha.is_empty() {
            attrs.push(Attribute::string(GIT_INFO_SHA, self.sha.clone()));
        }
        if !self.branch.is_empty() {
            attrs.push(Attribute::string(GIT_INFO_BRANCH, self.branch.clone()));
        }
        if !self.message.is_empty() {
            attrs.push(Attribute::string(GIT_INFO_MESSAGE, self.message.clone()));
        }
        if !self.author.is_empty() {
            attrs.push(Attribute::string(GIT_INFO_AUTHOR, self.author.clone()));
        }
        attrs.push(Attribute::boolean(GIT_INFO_IS_DIRTY, self.is_dirty));
        if !self.working_tree_hash.is_empty() {
            attrs.push(Attribute::string(
                GIT_INFO_WORKING_TREE_HASH,
                self.working_tree_hash.clone(),
            ));
        }
        if !self.commit_author_email.is_empty() {
            attrs.push(Attribute::string(
                GIT_INFO_COMMIT_AUTHOR_EMAIL,
                self.commit_author_email.clone(),
            ));
        }
        if !self.commit_timestamp.is_empty() {
            attrs.push(Attribute::string(
                GIT_INFO_COMMIT_TIMESTAMP,
                self.commit_timestamp.clone(),
            ));
        }
        if !self.repository.is_empty() {
            attrs.push(Attribute::string(GIT_INFO_REPOSITORY, self.repository.clone()));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        GitInfo {
            sha: view.string(GIT_INFO_SHA),
            branch: view.string(GIT_INFO_BRANCH),
            message: view.string(GIT_INFO_MESSAGE),
            author: view.string(GIT_INFO_AUTHOR),
            is_dirty: view.boolean(GIT_INFO_IS_DIRTY),
            working_tree_hash: view.string(GIT_INFO_WORKING_TREE_HASH),
            commit_author_email: view.string(GIT_INFO_COMMIT_AUTHOR_EMAIL),
            commit_timestamp: view.string(GIT_INFO_COMMIT_TIMESTAMP),
            repository: view.string(GIT_INFO_REPOSITORY),
        }
    }
}

/// One attempt to promote an app_version on a cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deployment {
    pub id: Option<EntityId>,
    pub app_name: String,
    pub cluster_id: String,
    pub app_version: String,
    pub status: DeploymentStatus,
    pub phase: DeploymentPhase,
    pub deployed_by: DeployedBy,
    pub git_info: GitInfo,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub build_logs: String,
}

impl Record for Deployment {
    const SHORT_KIND: &'static str = "deployment";
    const KIND: &'static str = KIND_DEPLOYMENT;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        // app_name and cluster_id are required: emitted even when empty so
        // the store can reject the write instead of silently dropping them
        attrs.push(Attribute::string(DEPLOYMENT_APP_NAME, self.app_name.clone()));
        attrs.push(Attribute::string(DEPLOYMENT_CLUSTER_ID, self.cluster_id.clone()));
        if !self.app_version.is_empty() {
            attrs.push(Attribute::string(
                DEPLOYMENT_APP_VERSION,
                self.app_version.clone(),
            ));
        }
        attrs.push(Attribute::id_ref(DEPLOYMENT_STATUS, self.status.singleton()));
        attrs.push(Attribute::id_ref(DEPLOYMENT_PHASE, self.phase.singleton()));
        if !self.deployed_by.is_empty() {
            attrs.push(Attribute::component(
                DEPLOYMENT_DEPLOYED_BY,
                self.deployed_by.encode(),
            ));
        }
        if !self.git_info.is_empty() {
            attrs.push(Attribute::component(
                DEPLOYMENT_GIT_INFO,
                self.git_info.encode(),
            ));
        }
        if let Some(completed_at) = self.completed_at {
            attrs.push(Attribute::time(DEPLOYMENT_COMPLETED_AT, completed_at));
        }
        if !self.error_message.is_empty() {
            attrs.push(Attribute::string(
                DEPLOYMENT_ERROR_MESSAGE,
                self.error_message.clone(),
            ));
        }
        if !self.build_logs.is_empty() {
            attrs.push(Attribute::string(DEPLOYMENT_BUILD_LOGS, self.build_logs.clone()));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        let status = match view.get(DEPLOYMENT_STATUS) {
            Some(Value::Id(id)) => {
                DeploymentStatus::from_singleton(id.as_str()).unwrap_or_default()
            }
            _ => DeploymentStatus::default(),
        };
        let phase = match view.get(DEPLOYMENT_PHASE) {
            Some(Value::Id(id)) => DeploymentPhase::from_singleton(id.as_str()).unwrap_or_default(),
            _ => DeploymentPhase::default(),
        };
        Deployment {
            id: None,
            app_name: view.string(DEPLOYMENT_APP_NAME),
            cluster_id: view.string(DEPLOYMENT_CLUSTER_ID),
            app_version: view.string(DEPLOYMENT_APP_VERSION),
            status,
            phase,
            deployed_by: view
                .component(DEPLOYMENT_DEPLOYED_BY)
                .map(|v| DeployedBy::decode(&v))
                .unwrap_or_default(),
            git_info: view
                .component(DEPLOYMENT_GIT_INFO)
                .map(|v| GitInfo::decode(&v))
                .unwrap_or_default(),
            completed_at: view.time(DEPLOYMENT_COMPLETED_AT),
            error_message: view.string(DEPLOYMENT_ERROR_MESSAGE),
            build_logs: view.string(DEPLOYMENT_BUILD_LOGS),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
