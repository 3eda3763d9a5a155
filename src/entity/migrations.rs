use crate::prelude::*;
use indoc::indoc;

pub fn migrate(mut conn: PooledConnection<SqliteConnectionManager>) -> AppResult<()> {
    let migrations: Migrations = Migrations::new(vec![
        M::up(indoc! { r#"
          CREATE TABLE entity (
              id TEXT PRIMARY KEY NOT NULL,
              kind TEXT NOT NULL,
              revision INTEGER NOT NULL DEFAULT 1,
              created_at INTEGER NOT NULL
          );
          CREATE INDEX idx_entity_kind ON entity(kind);

          CREATE TABLE attribute (
              entity_id TEXT NOT NULL,
              attr_id TEXT NOT NULL,
              position INTEGER NOT NULL,
              value_json TEXT NOT NULL,
              index_ref TEXT,
              FOREIGN KEY(entity_id) REFERENCES entity(id)
          );
          CREATE INDEX idx_attribute_entity ON attribute(entity_id);
          CREATE INDEX idx_attribute_ref ON attribute(attr_id, index_ref);

          CREATE TABLE ident (
              ident TEXT PRIMARY KEY NOT NULL,
              entity_id TEXT NOT NULL,
              FOREIGN KEY(entity_id) REFERENCES entity(id)
          );

          CREATE TABLE session (
              id TEXT PRIMARY KEY NOT NULL,
              usage TEXT NOT NULL,
              ttl_seconds INTEGER NOT NULL,
              expires_at INTEGER NOT NULL,
              created_at INTEGER NOT NULL
          );

          CREATE TABLE session_write (
              session_id TEXT NOT NULL,
              entity_id TEXT NOT NULL,
              PRIMARY KEY(session_id, entity_id),
              FOREIGN KEY(session_id) REFERENCES session(id)
          );
      "#}),
        // M::up( indoc! { r#"
        //     SQL GOES HERE
        // "#}),
    ]);

    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    migrations
        .to_latest(&mut conn)
        .map_err(|e| AppError::DatabaseMigration(e.to_string()))?;
    Ok(())
}
