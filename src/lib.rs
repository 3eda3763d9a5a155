pub mod prelude {
    pub use chrono::prelude::*;

    pub use r2d2::{Pool, PooledConnection};
    pub use r2d2_sqlite::SqliteConnectionManager;
    pub use rusqlite::{params, Connection, OptionalExtension};
    pub use rusqlite_migration::{Migrations, M};
    pub use serde::{Deserialize, Serialize};

    // Error handling
    pub use crate::error::{AppError, AppResult};
}

pub mod build;
pub mod client;
pub mod config;
pub mod deploy;
pub mod entity;
pub mod error;
pub mod pack;
pub mod records;
pub mod registry;
pub mod schema;
pub mod stack;
pub mod web;
