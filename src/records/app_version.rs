use crate::entity::value::{AttrView, Attribute, EntityId};
use crate::records::Record;
use crate::schema::core::{
    APP_VERSION_APP, APP_VERSION_ARTIFACT, APP_VERSION_CONFIG, APP_VERSION_MANIFEST_DIGEST,
    APP_VERSION_VERSION, COMMANDS_COMMAND, COMMANDS_NAME, CONCURRENCY_MODE,
    CONCURRENCY_NUM_INSTANCES, CONCURRENCY_REQUESTS_PER_INSTANCE, CONCURRENCY_SCALE_DOWN_DELAY,
    CONFIG_COMMANDS, CONFIG_ENTRYPOINT, CONFIG_PORT, CONFIG_SERVICES, CONFIG_VARIABLES,
    KIND_APP_VERSION, SERVICES_CONCURRENCY, SERVICES_NAME, VARIABLE_NAME, VARIABLE_SECRET,
    VARIABLE_VALUE,
};

/// Concurrency settings for one service. An all-zero value means "not yet
/// hydrated"; the startup migration fills defaults in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceConcurrency {
    pub mode: String,
    pub requests_per_instance: i64,
    pub scale_down_delay_ms: i64,
    pub num_instances: i64,
}

impl ServiceConcurrency {
    pub fn is_empty(&self) -> bool {
        self.mode.is_empty()
            && self.requests_per_instance == 0
            && self.scale_down_delay_ms == 0
            && self.num_instances == 0
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.mode.is_empty() {
            attrs.push(Attribute::string(CONCURRENCY_MODE, self.mode.clone()));
        }
        if self.requests_per_instance != 0 {
            attrs.push(Attribute::int64(
                CONCURRENCY_REQUESTS_PER_INSTANCE,
                self.requests_per_instance,
            ));
        }
        if self.scale_down_delay_ms != 0 {
            attrs.push(Attribute::duration_ms(
                CONCURRENCY_SCALE_DOWN_DELAY,
                self.scale_down_delay_ms,
            ));
        }
        if self.num_instances != 0 {
            attrs.push(Attribute::int64(CONCURRENCY_NUM_INSTANCES, self.num_instances));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        ServiceConcurrency {
            mode: view.string(CONCURRENCY_MODE),
            requests_per_instance: view.int64(CONCURRENCY_REQUESTS_PER_INSTANCE),
            scale_down_delay_ms: view.duration_ms(CONCURRENCY_SCALE_DOWN_DELAY),
            num_instances: view.int64(CONCURRENCY_NUM_INSTANCES),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Service {
    pub name: String,
    pub concurrency: ServiceConcurrency,
}

impl Service {
    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.name.is_empty() {
            attrs.push(Attribute::string(SERVICES_NAME, self.name.clone()));
        }
        attrs.push(Attribute::component(
            SERVICES_CONCURRENCY,
            self.concurrency.encode(),
        ));
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        Service {
            name: view.string(SERVICES_NAME),
            concurrency: view
                .component(SERVICES_CONCURRENCY)
                .map(|v| ServiceConcurrency::decode(&v))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub name: String,
    pub command: String,
}

impl Command {
    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.name.is_empty() {
            attrs.push(Attribute::string(COMMANDS_NAME, self.name.clone()));
        }
        if !self.command.is_empty() {
            attrs.push(Attribute::string(COMMANDS_COMMAND, self.command.clone()));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        Command {
            name: view.string(COMMANDS_NAME),
            command: view.string(COMMANDS_COMMAND),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    pub secret: bool,
}

impl EnvVar {
    pub fn new(name: &str, value: &str, secret: bool) -> Self {
        EnvVar {
            name: name.to_string(),
            value: value.to_string(),
            secret,
        }
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.name.is_empty() {
            attrs.push(Attribute::string(VARIABLE_NAME, self.name.clone()));
        }
        if !self.value.is_empty() {
            attrs.push(Attribute::string(VARIABLE_VALUE, self.value.clone()));
        }
        attrs.push(Attribute::boolean(VARIABLE_SECRET, self.secret));
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        EnvVar {
            name: view.string(VARIABLE_NAME),
            value: view.string(VARIABLE_VALUE),
            secret: view.boolean(VARIABLE_SECRET),
        }
    }
}

/// Runtime configuration component of an app_version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub entrypoint: String,
    pub port: i64,
    pub commands: Vec<Command>,
    pub services: Vec<Service>,
    pub variables: Vec<EnvVar>,
}

impl AppConfig {
    pub fn is_empty(&self) -> bool {
        self.entrypoint.is_empty()
            && self.port == 0
            && self.commands.is_empty()
            && self.services.is_empty()
            && self.variables.is_empty()
    }

    pub fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if !self.entrypoint.is_empty() {
            attrs.push(Attribute::string(CONFIG_ENTRYPOINT, self.entrypoint.clone()));
        }
        if self.port != 0 {
            attrs.push(Attribute::int64(CONFIG_PORT, self.port));
        }
        for command in &self.commands {
            attrs.push(Attribute::component(CONFIG_COMMANDS, command.encode()));
        }
        for service in &self.services {
            attrs.push(Attribute::component(CONFIG_SERVICES, service.encode()));
        }
        for variable in &self.variables {
            attrs.push(Attribute::component(CONFIG_VARIABLES, variable.encode()));
        }
        attrs
    }

    pub fn decode(view: &AttrView<'_>) -> Self {
        AppConfig {
            entrypoint: view.string(CONFIG_ENTRYPOINT),
            port: view.int64(CONFIG_PORT),
            commands: view
                .components(CONFIG_COMMANDS)
                .iter()
                .map(Command::decode)
                .collect(),
            services: view
                .components(CONFIG_SERVICES)
                .iter()
                .map(Service::decode)
                .collect(),
            variables: view
                .components(CONFIG_VARIABLES)
                .iter()
                .map(EnvVar::decode)
                .collect(),
        }
    }
}

/// A concrete, built version of an app.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppVersion {
    pub id: Option<EntityId>,
    pub app: Option<EntityId>,
    pub artifact: Option<EntityId>,
    pub config: AppConfig,
    pub manifest_digest: String,
    pub version: String,
}

impl Record for AppVersion {
    const SHORT_KIND: &'static str = "app_version";
    const KIND: &'static str = KIND_APP_VERSION;

    fn encode(&self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        if let Some(app) = &self.app {
            attrs.push(Attribute::id_ref(APP_VERSION_APP, app.clone()));
        }
        if let Some(artifact) = &self.artifact {
            attrs.push(Attribute::id_ref(APP_VERSION_ARTIFACT, artifact.clone()));
        }
        if !self.config.is_empty() {
            attrs.push(Attribute::component(APP_VERSION_CONFIG, self.config.encode()));
        }
        if !self.manifest_digest.is_empty() {
            attrs.push(Attribute::string(
                APP_VERSION_MANIFEST_DIGEST,
                self.manifest_digest.clone(),
            ));
        }
        if !self.version.is_empty() {
            attrs.push(Attribute::string(APP_VERSION_VERSION, self.version.clone()));
        }
        attrs
    }

    fn decode(view: &AttrView<'_>) -> Self {
        AppVersion {
            id: None,
            app: view.id_ref(APP_VERSION_APP),
            artifact: view.id_ref(APP_VERSION_ARTIFACT),
            config: view
                .component(APP_VERSION_CONFIG)
                .map(|v| AppConfig::decode(&v))
                .unwrap_or_default(),
            manifest_digest: view.string(APP_VERSION_MANIFEST_DIGEST),
            version: view.string(APP_VERSION_VERSION),
        }
    }

    fn entity_id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}
