use crate::prelude::*;
use std::path::PathBuf;

/// Process configuration, read once at startup from `MIREN_`-prefixed
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub storage_root: PathBuf,
    pub bind_addr: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> AppResult<Config> {
        let config = Config {
            database_path: env_or("MIREN_DATABASE_PATH", "miren.db"),
            storage_root: PathBuf::from(env_or("MIREN_STORAGE_ROOT", "./storage")),
            bind_addr: env_or("MIREN_BIND_ADDR", "0.0.0.0:8080"),
        };

        if config.database_path.is_empty() {
            return Err(AppError::validation(
                "invalid-env",
                "MIREN_DATABASE_PATH must not be empty",
            ));
        }
        if config.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(AppError::validation(
                "invalid-env",
                format!("MIREN_BIND_ADDR {:?} is not host:port", config.bind_addr),
            ));
        }

        Ok(config)
    }
}
