//! HTTP surface for deployments. The registry routes live in
//! `crate::registry`; everything here is the control-plane API the CLI
//! talks to.

use crate::deploy::{
    CreateDeploymentRequest, CreateDeploymentResults, DeploymentCoordinator,
    ListDeploymentsFilter,
};
use crate::prelude::*;
use crate::records::{Deployment, DeploymentStatus, GitInfo};
use actix_web::{delete, get, post, web, HttpResponse};

#[derive(Deserialize)]
pub struct CreateDeploymentBody {
    pub app_name: String,
    pub cluster_id: String,
    pub app_version_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub git_info: Option<GitInfo>,
}

#[derive(Serialize)]
pub struct CreateDeploymentResponse {
    pub id: Option<String>,
    pub error: Option<String>,
}

impl From<CreateDeploymentResults> for CreateDeploymentResponse {
    fn from(results: CreateDeploymentResults) -> Self {
        CreateDeploymentResponse {
            id: results.id.map(|id| id.0),
            error: results.error,
        }
    }
}

#[derive(Serialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub app_name: String,
    pub cluster_id: String,
    pub app_version: String,
    pub status: String,
    pub phase: String,
    pub deployed_by: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub error_message: String,
}

impl From<Deployment> for DeploymentResponse {
    fn from(deployment: Deployment) -> Self {
        DeploymentResponse {
            id: deployment.id.map(|id| id.0).unwrap_or_default(),
            app_name: deployment.app_name,
            cluster_id: deployment.cluster_id,
            app_version: deployment.app_version,
            status: deployment.status.as_str().to_string(),
            phase: deployment.phase.as_str().to_string(),
            deployed_by: deployment.deployed_by.user_email,
            started_at: deployment.deployed_by.timestamp,
            completed_at: deployment.completed_at.map(|t| t.to_rfc3339()),
            error_message: deployment.error_message,
        }
    }
}

#[post("/api/deployments")]
pub async fn create_deployment(
    coordinator: web::Data<DeploymentCoordinator>,
    body: web::Json<CreateDeploymentBody>,
) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    let results = coordinator
        .create_deployment(CreateDeploymentRequest {
            app_name: body.app_name,
            cluster_id: body.cluster_id,
            app_version_id: body.app_version_id,
            user_id: body.user_id,
            user_email: body.user_email,
            git_info: body.git_info,
        })
        .await?;
    Ok(HttpResponse::Ok().json(CreateDeploymentResponse::from(results)))
}

#[derive(Deserialize)]
pub struct ListDeploymentsQuery {
    pub app_name: Option<String>,
    pub cluster_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[get("/api/deployments")]
pub async fn list_deployments(
    coordinator: web::Data<DeploymentCoordinator>,
    query: web::Query<ListDeploymentsQuery>,
) -> AppResult<HttpResponse> {
    let query = query.into_inner();
    let status = match &query.status {
        Some(status) => Some(DeploymentStatus::parse(status).ok_or_else(|| {
            AppError::validation("invalid-status", format!("unknown status {:?}", status))
        })?),
        None => None,
    };

    let deployments = coordinator
        .list_deployments(ListDeploymentsFilter {
            app_name: query.app_name,
            cluster_id: query.cluster_id,
            status,
            limit: query.limit,
        })
        .await?;

    let response: Vec<DeploymentResponse> =
        deployments.into_iter().map(DeploymentResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Deserialize)]
pub struct UpdatePhaseBody {
    pub phase: String,
}

#[post("/api/deployments/{id}/phase")]
pub async fn update_deployment_phase(
    coordinator: web::Data<DeploymentCoordinator>,
    path: web::Path<String>,
    body: web::Json<UpdatePhaseBody>,
) -> AppResult<HttpResponse> {
    coordinator
        .update_deployment_phase(&path.into_inner(), &body.phase)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: String,
}

#[post("/api/deployments/{id}/status")]
pub async fn update_deployment_status(
    coordinator: web::Data<DeploymentCoordinator>,
    path: web::Path<String>,
    body: web::Json<UpdateStatusBody>,
) -> AppResult<HttpResponse> {
    coordinator
        .update_deployment_status(&path.into_inner(), &body.status)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

#[delete("/api/apps/{id}")]
pub async fn delete_app(
    coordinator: web::Data<DeploymentCoordinator>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    coordinator.delete_app_transitive(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
