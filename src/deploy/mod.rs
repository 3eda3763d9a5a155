//! Deployment coordination: single-writer per `(app_name, cluster_id)`
//! through the implicit lock a non-expired in_progress deployment holds.

use crate::client::EntityClient;
use crate::entity::value::{EntityId, Value};
use crate::prelude::*;
use crate::records::{
    DeployedBy, Deployment, DeploymentPhase, DeploymentStatus, GitInfo, Record,
};
use crate::schema::core::{
    DEPLOYMENT_APP_NAME, DEPLOYMENT_CLUSTER_ID, DEPLOYMENT_STATUS, ENTITY_KIND, TAG_APP_REF,
};
use chrono::Duration;
use futures_util::future::join_all;
use itertools::Itertools;

/// Absolute deployment lock lifetime, measured from `deployed_by.timestamp`.
pub const LOCK_TTL_MINUTES: i64 = 30;

/// `deployment.app_version` value while the build has not produced a
/// version yet.
pub const PENDING_BUILD_SENTINEL: &str = "pending-build";

const TIMEOUT_MESSAGE: &str = "Deployment timed out after 30 minutes";
const DEFAULT_LIST_LIMIT: usize = 100;

pub struct CreateDeploymentRequest {
    pub app_name: String,
    pub cluster_id: String,
    pub app_version_id: String,
    pub user_id: String,
    pub user_email: String,
    pub git_info: Option<GitInfo>,
}

/// Lock contention is reported here rather than as a failure so callers
/// keep the surrounding deployment context when presenting it.
#[derive(Debug, Default)]
pub struct CreateDeploymentResults {
    pub id: Option<EntityId>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ListDeploymentsFilter {
    pub app_name: Option<String>,
    pub cluster_id: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct DeploymentCoordinator {
    client: EntityClient,
}

impl DeploymentCoordinator {
    pub fn new(client: EntityClient) -> Self {
        DeploymentCoordinator { client }
    }

    /// Claims the `(app_name, cluster_id)` lock and creates a deployment in
    /// `preparing`. An unexpired in-progress deployment turns into a
    /// user-facing error in the results; an expired one is marked failed
    /// and taken over.
    pub async fn create_deployment(
        &self,
        request: CreateDeploymentRequest,
    ) -> AppResult<CreateDeploymentResults> {
        for (field, value) in [
            ("app_name", &request.app_name),
            ("cluster_id", &request.cluster_id),
            ("app_version_id", &request.app_version_id),
        ] {
            if value.is_empty() {
                return Err(AppError::validation(
                    "missing-field",
                    format!("{} must not be empty", field),
                ));
            }
        }

        if let Some(mut holder) = self
            .in_progress_for(&request.app_name, &request.cluster_id)
            .await?
        {
            let age = lock_age(&holder);
            match age {
                Some(age) if age < Duration::minutes(LOCK_TTL_MINUTES) => {
                    let email = if holder.deployed_by.user_email.is_empty() {
                        "-".to_string()
                    } else {
                        holder.deployed_by.user_email.clone()
                    };
                    let remaining = Duration::minutes(LOCK_TTL_MINUTES) - age;
                    return Ok(CreateDeploymentResults {
                        id: None,
                        error: Some(format!(
                            "Another deployment is already in progress by {} (started {} ago, phase: {}, lock expires in {})",
                            email,
                            fmt_duration(age),
                            holder.phase.as_str(),
                            fmt_duration(remaining),
                        )),
                    });
                }
                _ => {
                    // lock expired (or its timestamp is unreadable): fail
                    // the stale deployment and take over
                    log::info!(
                        "Taking over expired deployment lock for {}/{}",
                        request.app_name,
                        request.cluster_id
                    );
                    holder.status = DeploymentStatus::Failed;
                    holder.error_message = TIMEOUT_MESSAGE.to_string();
                    holder.completed_at = Some(Utc::now());
                    self.client.update(&holder).await?;
                }
            }
        }

        let deployment = Deployment {
            id: None,
            app_name: request.app_name,
            cluster_id: request.cluster_id,
            app_version: request.app_version_id,
            status: DeploymentStatus::InProgress,
            phase: DeploymentPhase::Preparing,
            deployed_by: DeployedBy::now(&request.user_id, &request.user_email),
            git_info: request.git_info.unwrap_or_default(),
            completed_at: None,
            error_message: String::new(),
            build_logs: String::new(),
        };

        let id = self.client.create_unnamed(&deployment).await?;
        Ok(CreateDeploymentResults {
            id: Some(id),
            error: None,
        })
    }

    /// Moves an in-progress deployment to another phase. Terminal
    /// deployments refuse phase changes.
    pub async fn update_deployment_phase(&self, id: &str, phase: &str) -> AppResult<()> {
        let phase = DeploymentPhase::parse(phase).ok_or_else(|| {
            AppError::validation("invalid-phase", format!("unknown phase {:?}", phase))
        })?;

        let mut deployment: Deployment = self.client.get(id).await?;
        if deployment.status != DeploymentStatus::InProgress {
            return Err(AppError::validation(
                "invalid-state",
                format!(
                    "deployment {} is {}, phase changes need in_progress",
                    id,
                    deployment.status.as_str()
                ),
            ));
        }

        deployment.phase = phase;
        self.client.update(&deployment).await
    }

    /// Moves an in-progress deployment to a new status. Any status other
    /// than in_progress is terminal and stamps `completed_at`.
    pub async fn update_deployment_status(&self, id: &str, status: &str) -> AppResult<()> {
        let status = DeploymentStatus::parse(status).ok_or_else(|| {
            AppError::validation("invalid-status", format!("unknown status {:?}", status))
        })?;

        let mut deployment: Deployment = self.client.get(id).await?;
        if deployment.status != DeploymentStatus::InProgress {
            return Err(AppError::validation(
                "invalid-state",
                format!(
                    "deployment {} is already {}",
                    id,
                    deployment.status.as_str()
                ),
            ));
        }

        deployment.status = status;
        if status != DeploymentStatus::InProgress {
            deployment.completed_at = Some(Utc::now());
        }
        self.client.update(&deployment).await
    }

    /// Marks a deployment failed with its error and build logs. A version
    /// still carrying the pending-build sentinel is rewritten so the
    /// failure stays attributable.
    pub async fn update_failed_deployment(
        &self,
        id: &str,
        error_message: &str,
        build_logs: &str,
    ) -> AppResult<()> {
        let mut deployment: Deployment = self.client.get(id).await?;

        deployment.status = DeploymentStatus::Failed;
        deployment.error_message = error_message.to_string();
        deployment.build_logs = build_logs.to_string();
        deployment.completed_at = Some(Utc::now());
        if deployment.app_version == PENDING_BUILD_SENTINEL {
            let deployment_id = deployment
                .id
                .as_ref()
                .map(|id| id.0.clone())
                .unwrap_or_default();
            deployment.app_version = format!("failed-{}", deployment_id);
        }

        self.client.update(&deployment).await
    }

    /// Lists deployments filtered by app, cluster and status, newest
    /// first.
    pub async fn list_deployments(
        &self,
        filter: ListDeploymentsFilter,
    ) -> AppResult<Vec<Deployment>> {
        let deployments: Vec<Deployment> = if let Some(app_name) = &filter.app_name {
            self.client
                .list(DEPLOYMENT_APP_NAME, &Value::String(app_name.clone()))
                .await?
        } else if let Some(cluster_id) = &filter.cluster_id {
            self.client
                .list(DEPLOYMENT_CLUSTER_ID, &Value::String(cluster_id.clone()))
                .await?
        } else if let Some(status) = &filter.status {
            self.client
                .list(DEPLOYMENT_STATUS, &Value::Id(EntityId::from(status.singleton())))
                .await?
        } else {
            self.client
                .list(ENTITY_KIND, &Value::Id(Deployment::kind()))
                .await?
        };

        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let deployments = deployments
            .into_iter()
            .filter(|d| {
                filter
                    .app_name
                    .as_ref()
                    .map(|app| &d.app_name == app)
                    .unwrap_or(true)
                    && filter
                        .cluster_id
                        .as_ref()
                        .map(|cluster| &d.cluster_id == cluster)
                        .unwrap_or(true)
                    && filter.status.map(|status| d.status == status).unwrap_or(true)
            })
            // RFC3339 sorts lexicographically, so string order is time order
            .sorted_by(|a, b| b.deployed_by.timestamp.cmp(&a.deployed_by.timestamp))
            .take(limit)
            .collect();

        Ok(deployments)
    }

    /// Deletes an app and every entity whose schema-tagged app reference
    /// points at it: versions, artifacts, routes, disk leases. Sandboxes
    /// reference app_versions, not the app, and are left to their own
    /// controller.
    pub async fn delete_app_transitive(&self, app_id: &str) -> AppResult<()> {
        let app = self.client.store().get(app_id).await?;

        let mut deleted = 0usize;
        for spec in self.client.store().get_attributes_by_tag(TAG_APP_REF) {
            if !spec.indexed {
                continue;
            }
            let referrers = self
                .client
                .store()
                .list(spec.id.as_str(), &Value::Id(app.id.clone()))
                .await?;
            deleted += referrers.len();
            let deletions = referrers
                .iter()
                .map(|referrer| self.client.delete(referrer.id.as_str()));
            for result in join_all(deletions).await {
                result?;
            }
        }

        self.client.delete(app.id.as_str()).await?;
        log::info!(
            "Deleted app {} and {} dependent entities",
            app.id,
            deleted
        );
        Ok(())
    }

    async fn in_progress_for(
        &self,
        app_name: &str,
        cluster_id: &str,
    ) -> AppResult<Option<Deployment>> {
        let deployments: Vec<Deployment> = self
            .client
            .list(DEPLOYMENT_APP_NAME, &Value::String(app_name.to_string()))
            .await?;
        // at most one by the lock invariant; take the first either way
        Ok(deployments
            .into_iter()
            .find(|d| d.cluster_id == cluster_id && d.status == DeploymentStatus::InProgress))
    }
}

fn lock_age(deployment: &Deployment) -> Option<Duration> {
    let started = DateTime::parse_from_rfc3339(&deployment.deployed_by.timestamp).ok()?;
    Some(Utc::now().signed_duration_since(started.with_timezone(&Utc)))
}

fn fmt_duration(d: Duration) -> String {
    let total_seconds = d.num_seconds().max(0);
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
