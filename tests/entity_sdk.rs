//! End-to-end behavior of the entity store through the typed client.

use miren::client::EntityClient;
use miren::deploy::{CreateDeploymentRequest, DeploymentCoordinator};
use miren::entity::defaults_migration::{hydrate_service_concurrency, ServiceDefaults};
use miren::entity::migrations::migrate;
use miren::entity::store::EntityStore;
use miren::prelude::*;
use miren::records::{
    App, AppConfig, AppVersion, Artifact, DiskLease, EnvVar, HttpRoute, Project, Record, Service,
    ServiceConcurrency,
};
use miren::schema;
use std::collections::HashMap;
use std::sync::Arc;

fn client() -> EntityClient {
    schema::register_all().expect("schemas");
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("pool");
    migrate(pool.get().expect("conn")).expect("migrations");
    EntityClient::new(Arc::new(EntityStore::new(pool)))
}

async fn app_with_version(client: &EntityClient, name: &str, config: AppConfig) -> (String, String) {
    let app_id = client
        .create(name, &App::default(), &[])
        .await
        .expect("create app");
    let version = AppVersion {
        id: None,
        app: Some(app_id.clone()),
        artifact: None,
        config,
        manifest_digest: String::new(),
        version: "v1".to_string(),
    };
    let version_id = client
        .create(&format!("{}-v1", name), &version, &[])
        .await
        .expect("create version");
    (app_id.0, version_id.0)
}

#[tokio::test]
async fn record_round_trip_through_the_store() {
    let client = client();

    let project = Project {
        id: None,
        owner: "owner@example.com".to_string(),
    };
    let id = client
        .create("acme", &project, &[("env".to_string(), "prod".to_string())])
        .await
        .expect("create");

    let fetched: Project = client.get("project/acme").await.expect("get");
    assert_eq!(fetched.owner, project.owner);
    assert_eq!(fetched.id.as_ref().map(|i| i.as_str()), Some(id.as_str()));
}

#[tokio::test]
async fn create_or_update_is_idempotent() {
    let client = client();

    let route = HttpRoute {
        id: None,
        host: "acme.example.com".to_string(),
        app: None,
    };
    let first = client
        .create_or_update("acme", &route, &[])
        .await
        .expect("first");
    let second = client
        .create_or_update("acme", &route, &[])
        .await
        .expect("second");
    assert_eq!(first, second);

    let fetched: HttpRoute = client.get("http_route/acme").await.expect("get");
    assert_eq!(fetched.host, route.host);
}

#[tokio::test]
async fn concurrency_defaults_migration_hydrates_empty_components() {
    let client = client();

    // a pre-migration version: one service with an empty concurrency
    let (_, version_id) = app_with_version(
        &client,
        "legacy",
        AppConfig {
            services: vec![Service {
                name: "web".to_string(),
                concurrency: ServiceConcurrency::default(),
            }],
            ..Default::default()
        },
    )
    .await;

    let provider: HashMap<String, ServiceDefaults> = HashMap::from([(
        "web".to_string(),
        ServiceDefaults {
            mode: "auto".to_string(),
            requests_per_instance: 10,
            scale_down_delay_ms: 120_000,
            num_instances: 1,
        },
    )]);

    let migrated = hydrate_service_concurrency(&client, &provider)
        .await
        .expect("migration");
    assert_eq!(migrated, 1);

    let version: AppVersion = client.get(&version_id).await.expect("get");
    let concurrency = &version.config.services[0].concurrency;
    assert_eq!(concurrency.mode, "auto");
    assert_eq!(concurrency.requests_per_instance, 10);
    assert_eq!(concurrency.scale_down_delay_ms, 120_000);
    assert_eq!(concurrency.num_instances, 1);

    // a second run has nothing left to do
    let migrated = hydrate_service_concurrency(&client, &provider)
        .await
        .expect("second run");
    assert_eq!(migrated, 0);
}

#[tokio::test]
async fn env_var_list_replacement() {
    let client = client();

    let (_, version_id) = app_with_version(
        &client,
        "webapp",
        AppConfig {
            variables: vec![
                EnvVar::new("FOO", "bar", false),
                EnvVar::new("SECRET", "hidden", true),
            ],
            ..Default::default()
        },
    )
    .await;

    // replacing the full list dedups: one var remains, updated in place
    let mut version: AppVersion = client.get(&version_id).await.expect("get");
    version.config.variables = vec![EnvVar::new("FOO", "secret-bar", true)];
    client.update(&version).await.expect("update");

    let version: AppVersion = client.get(&version_id).await.expect("get");
    assert_eq!(version.config.variables.len(), 1);
    assert_eq!(version.config.variables[0], EnvVar::new("FOO", "secret-bar", true));
}

#[tokio::test]
async fn env_var_deletion_by_omission() {
    let client = client();

    let (_, version_id) = app_with_version(
        &client,
        "webapp",
        AppConfig {
            variables: vec![
                EnvVar::new("VAR1", "a", false),
                EnvVar::new("VAR2", "b", false),
                EnvVar::new("VAR3", "c", false),
            ],
            ..Default::default()
        },
    )
    .await;

    let mut version: AppVersion = client.get(&version_id).await.expect("get");
    version.config.variables = vec![
        EnvVar::new("VAR1", "a", false),
        EnvVar::new("VAR3", "c", false),
    ];
    client.update(&version).await.expect("update");

    let version: AppVersion = client.get(&version_id).await.expect("get");
    let names: Vec<&str> = version
        .config
        .variables
        .iter()
        .map(|v| v.name.as_str())
        .collect();
    assert_eq!(names, vec!["VAR1", "VAR3"]);

    // an empty list clears everything
    let mut version: AppVersion = client.get(&version_id).await.expect("get");
    version.config.variables = Vec::new();
    client.update(&version).await.expect("update");

    let version: AppVersion = client.get(&version_id).await.expect("get");
    assert!(version.config.variables.is_empty());
}

#[tokio::test]
async fn transitive_delete_follows_tagged_references_only() {
    let client = client();
    let coordinator = DeploymentCoordinator::new(client.clone());

    let (app_id, version_id) = app_with_version(&client, "doomed", AppConfig::default()).await;
    let app_ref = miren::entity::value::EntityId::from(app_id.as_str());

    let artifact_id = client
        .create(
            "doomed-artifact",
            &Artifact {
                id: None,
                app: Some(app_ref.clone()),
                manifest: "{}".to_string(),
                manifest_digest: "sha256:aa".to_string(),
            },
            &[],
        )
        .await
        .expect("artifact");
    let route_id = client
        .create(
            "doomed-route",
            &HttpRoute {
                id: None,
                host: "doomed.example.com".to_string(),
                app: Some(app_ref.clone()),
            },
            &[],
        )
        .await
        .expect("route");
    let lease_id = client
        .create(
            "doomed-lease",
            &DiskLease {
                id: None,
                disk: None,
                app: Some(app_ref.clone()),
                mount: Default::default(),
                session: String::new(),
            },
            &[],
        )
        .await
        .expect("lease");

    // a deployment names the app but carries no tagged reference
    let deployment = coordinator
        .create_deployment(CreateDeploymentRequest {
            app_name: "doomed".to_string(),
            cluster_id: "c1".to_string(),
            app_version_id: version_id.clone(),
            user_id: "u1".to_string(),
            user_email: "dev@example.com".to_string(),
            git_info: None,
        })
        .await
        .expect("deployment")
        .id
        .expect("deployment id");

    coordinator
        .delete_app_transitive(&app_id)
        .await
        .expect("transitive delete");

    for gone in [&app_id, &version_id, &artifact_id.0, &route_id.0, &lease_id.0] {
        assert!(
            client.store().get(gone).await.is_err(),
            "{} should be deleted",
            gone
        );
    }
    // untagged referrers survive; their owner cleans them up
    assert!(client.store().get(deployment.as_str()).await.is_ok());
}

#[tokio::test]
async fn watch_entity_streams_snapshots_until_delete() {
    let client = client();

    let id = client
        .create(
            "watched",
            &Project {
                id: None,
                owner: "owner@example.com".to_string(),
            },
            &[],
        )
        .await
        .expect("create");

    let mut watch = client.watch_entity(id.as_str()).await.expect("watch");

    let mut project: Project = client.get(id.as_str()).await.expect("get");
    project.owner = "new-owner@example.com".to_string();
    client.update(&project).await.expect("update");

    let snapshot = watch.recv().await.expect("update op");
    let updated = Project::decode(&snapshot.view());
    assert_eq!(updated.owner, "new-owner@example.com");

    client.delete(id.as_str()).await.expect("delete");
    // tombstone: the channel closes
    assert!(watch.recv().await.is_none());
}
