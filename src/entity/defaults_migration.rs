use crate::client::EntityClient;
use crate::entity::value::Value;
use crate::prelude::*;
use crate::records::{AppVersion, Record, ServiceConcurrency};
use crate::schema::core::ENTITY_KIND;
use std::collections::HashMap;

/// Per-service concurrency defaults, supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ServiceDefaults {
    pub mode: String,
    pub requests_per_instance: i64,
    pub scale_down_delay_ms: i64,
    pub num_instances: i64,
}

pub trait ServiceDefaultsProvider: Send + Sync {
    fn defaults_for(&self, service_name: &str) -> Option<ServiceDefaults>;
}

impl ServiceDefaultsProvider for HashMap<String, ServiceDefaults> {
    fn defaults_for(&self, service_name: &str) -> Option<ServiceDefaults> {
        self.get(service_name).cloned()
    }
}

/// One-shot migration run at store startup: walks every app_version and
/// hydrates services whose `service_concurrency` component is still empty.
/// Returns the number of versions rewritten.
pub async fn hydrate_service_concurrency(
    client: &EntityClient,
    provider: &dyn ServiceDefaultsProvider,
) -> AppResult<usize> {
    let versions: Vec<AppVersion> = client
        .list(ENTITY_KIND, &Value::Id(AppVersion::kind()))
        .await?;

    let mut migrated = 0;
    for mut version in versions {
        let mut changed = false;
        for service in &mut version.config.services {
            if !service.concurrency.is_empty() {
                continue;
            }
            if let Some(defaults) = provider.defaults_for(&service.name) {
                service.concurrency = ServiceConcurrency {
                    mode: defaults.mode,
                    requests_per_instance: defaults.requests_per_instance,
                    scale_down_delay_ms: defaults.scale_down_delay_ms,
                    num_instances: defaults.num_instances,
                };
                changed = true;
            }
        }
        if changed {
            client.update(&version).await?;
            migrated += 1;
        }
    }

    if migrated > 0 {
        log::info!(
            "Hydrated service concurrency defaults on {} app versions",
            migrated
        );
    }
    Ok(migrated)
}
