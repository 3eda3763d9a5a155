use actix_web::{middleware, web::Data, web::get as web_get, App, HttpServer};
use actix_web_opentelemetry::{PrometheusMetricsHandler, RequestMetrics, RequestTracing};
use miren::client::EntityClient;
use miren::config::Config;
use miren::deploy::DeploymentCoordinator;
use miren::entity::defaults_migration::{self, ServiceDefaults};
use miren::entity::migrations::migrate;
use miren::entity::session::start_session_sweeper;
use miren::entity::store::EntityStore;
use miren::registry::RegistryState;
use miren::schema;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;

#[actix_web::main]
#[allow(clippy::expect_used)]
async fn main() -> std::io::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .filter_module("actix_web::middleware::logger", log::LevelFilter::Warn)
        .filter_module("miren::entity", log::LevelFilter::Info)
        .filter_module("miren::deploy", log::LevelFilter::Info)
        .filter_module("miren::registry", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = Config::from_env().expect("Invalid MIREN_ environment");

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .expect("Failed to build OpenTelemetry Prometheus exporter");
    let provider = MeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(provider);

    schema::register_all().expect("Failed to register entity schemas");

    // connect to SQLite DB
    let manager = SqliteConnectionManager::file(&config.database_path);
    let pool = Pool::new(manager).expect("Failed to create database pool");
    {
        let conn = pool.get().expect("Failed to get database connection");
        migrate(conn).expect("Failed to run database migrations");
    }

    let store = Arc::new(EntityStore::new(pool));
    let client = EntityClient::new(store.clone());

    // backfill concurrency defaults on app versions written before the
    // component existed
    let defaults: HashMap<String, ServiceDefaults> = HashMap::from([(
        "web".to_string(),
        ServiceDefaults {
            mode: "auto".to_string(),
            requests_per_instance: 10,
            scale_down_delay_ms: 120_000,
            num_instances: 1,
        },
    )]);
    defaults_migration::hydrate_service_concurrency(&client, &defaults)
        .await
        .expect("Failed to run concurrency defaults migration");

    start_session_sweeper(store.clone());

    let coordinator = DeploymentCoordinator::new(client.clone());
    let registry_state = Data::new(
        RegistryState::new(client.clone(), config.storage_root.clone())
            .expect("Failed to prepare storage root"),
    );

    log::info!("Starting HTTP server at http://{}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(RequestTracing::new())
            .wrap(RequestMetrics::default())
            .route(
                "/api/metrics",
                web_get().to(PrometheusMetricsHandler::new(registry.clone())),
            )
            .wrap(middleware::Logger::default())
            .app_data(registry_state.clone())
            .app_data(Data::new(coordinator.clone()))
            .configure(miren::registry::configure)
            .service(miren::web::create_deployment)
            .service(miren::web::list_deployments)
            .service(miren::web::update_deployment_phase)
            .service(miren::web::update_deployment_status)
            .service(miren::web::delete_app)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
