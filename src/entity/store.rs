use crate::entity::schema;
use crate::entity::value::{AttrView, Attribute, EntityId, Value};
use crate::prelude::*;
use crate::schema::core::{ENTITY_IDENT, ENTITY_KIND};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Point-in-time view of one entity: id, revision, attribute list and
/// creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub attrs: Vec<Attribute>,
}

impl EntitySnapshot {
    pub fn view(&self) -> AttrView<'_> {
        AttrView::new(&self.attrs)
    }

    pub fn kind(&self) -> Option<EntityId> {
        self.view().id_ref(ENTITY_KIND)
    }
}

/// One operation observed on a watched entity. Channel close signals
/// end-of-stream.
#[derive(Debug, Clone)]
pub enum EntityOp {
    Updated(EntitySnapshot),
    Deleted(EntityId),
}

/// Write request. `id: None` creates (the server assigns an id unless the
/// attribute list carries an `ident`). A revision, when given, must match
/// the stored one. A session id scopes the write to that session's lease.
#[derive(Debug, Default)]
pub struct PutEntity {
    pub id: Option<EntityId>,
    pub revision: Option<i64>,
    pub session: Option<String>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutResult {
    pub id: EntityId,
    pub revision: i64,
}

type WatcherMap = HashMap<String, Vec<mpsc::Sender<EntityOp>>>;

/// Transactional store of attribute sets keyed by entity id.
///
/// Writes are serialized through one async mutex so that watchers observe
/// ops in commit order without duplicates.
pub struct EntityStore {
    pool: Pool<SqliteConnectionManager>,
    write_lock: tokio::sync::Mutex<()>,
    watchers: Arc<StdMutex<WatcherMap>>,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl EntityStore {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        EntityStore {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
            watchers: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub(crate) fn conn(&self) -> AppResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Fetches an entity snapshot by its id or its logical `ident`.
    pub async fn get(&self, id_or_ident: &str) -> AppResult<EntitySnapshot> {
        let conn = self.conn()?;
        let id = resolve_id(&conn, id_or_ident)?
            .ok_or_else(|| AppError::not_found("entity", id_or_ident))?;
        load_snapshot(&conn, &id)?.ok_or_else(|| AppError::not_found("entity", id_or_ident))
    }

    /// Lists entities by an indexed attribute. Non-indexed attributes are
    /// not queryable. Misses yield an empty list, never an error.
    pub async fn list(&self, attr_id: &str, value: &Value) -> AppResult<Vec<EntitySnapshot>> {
        let spec = schema::lookup(attr_id)
            .ok_or_else(|| AppError::Schema(format!("attribute {} is not declared", attr_id)))?;
        if !spec.indexed {
            return Err(AppError::Schema(format!(
                "attribute {} is not indexed",
                attr_id
            )));
        }
        let key = match value.index_key() {
            Some(k) => k,
            None => return Ok(Vec::new()),
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT entity_id FROM attribute WHERE attr_id = ?1 AND index_ref = ?2",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![attr_id, key], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        let mut results = Vec::new();
        for id in ids {
            // only live entities; index rows die with their owner
            if let Some(snapshot) = load_snapshot(&conn, &id)? {
                results.push(snapshot);
            }
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    /// Creates or updates an entity. Returns the assigned id and the new
    /// revision (monotonically increasing per entity).
    pub async fn put(&self, put: PutEntity) -> AppResult<PutResult> {
        validate_attrs(&put.attrs)?;

        let _guard = self.write_lock.lock().await;
        let mut conn = self.conn()?;

        if let Some(session_id) = &put.session {
            check_session_live(&conn, session_id)?;
        }

        let tx = conn.transaction()?;

        let ident = put.attrs.iter().find_map(|a| match (&a.id, &a.value) {
            (id, Value::String(s)) if id.as_str() == ENTITY_IDENT => Some(s.clone()),
            _ => None,
        });

        let kind = put
            .attrs
            .iter()
            .find_map(|a| match (&a.id, &a.value) {
                (id, Value::Id(k)) if id.as_str() == ENTITY_KIND => Some(k.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                AppError::validation("missing-kind", "entity must carry exactly one kind ref")
            })?;

        let (id, revision) = match &put.id {
            Some(id) => {
                let current: Option<i64> = tx
                    .prepare("SELECT revision FROM entity WHERE id = ?1")?
                    .query_row(params![id.as_str()], |row| row.get(0))
                    .optional()?;
                let current =
                    current.ok_or_else(|| AppError::not_found("entity", id.as_str()))?;

                if let Some(expected) = put.revision {
                    if expected != current {
                        return Err(AppError::conflict(
                            "entity",
                            format!(
                                "revision mismatch for {}: expected {}, have {}",
                                id, expected, current
                            ),
                        ));
                    }
                }

                if let Some(ident) = &ident {
                    let owner: Option<String> = tx
                        .prepare("SELECT entity_id FROM ident WHERE ident = ?1")?
                        .query_row(params![ident], |row| row.get(0))
                        .optional()?;
                    match owner {
                        Some(owner) if owner != id.0 => {
                            return Err(AppError::conflict(
                                "entity",
                                format!("ident {} already taken", ident),
                            ))
                        }
                        Some(_) => {}
                        None => {
                            tx.prepare(
                                "INSERT INTO ident (ident, entity_id) VALUES (?1, ?2)",
                            )?
                            .execute(params![ident, id.as_str()])?;
                        }
                    }
                }

                let next = current + 1;
                tx.prepare("UPDATE entity SET revision = ?2, kind = ?3 WHERE id = ?1")?
                    .execute(params![id.as_str(), next, kind.as_str()])?;
                tx.prepare("DELETE FROM attribute WHERE entity_id = ?1")?
                    .execute(params![id.as_str()])?;
                (id.clone(), next)
            }
            None => {
                let id = EntityId(Uuid::new_v4().simple().to_string());

                tx.prepare(
                    "INSERT INTO entity (id, kind, revision, created_at) VALUES (?1, ?2, 1, ?3)",
                )?
                .execute(params![id.as_str(), kind.as_str(), now_millis()])?;

                if let Some(ident) = &ident {
                    let taken: Option<String> = tx
                        .prepare("SELECT entity_id FROM ident WHERE ident = ?1")?
                        .query_row(params![ident], |row| row.get(0))
                        .optional()?;
                    if taken.is_some() {
                        return Err(AppError::conflict(
                            "entity",
                            format!("ident {} already taken", ident),
                        ));
                    }
                    tx.prepare("INSERT INTO ident (ident, entity_id) VALUES (?1, ?2)")?
                        .execute(params![ident, id.as_str()])?;
                }

                (id, 1)
            }
        };

        for (position, attr) in put.attrs.iter().enumerate() {
            let spec = schema::lookup(attr.id.as_str());
            let index_ref = match spec {
                Some(spec) if spec.indexed => attr.value.index_key(),
                _ => None,
            };
            tx.prepare(
                "INSERT INTO attribute (entity_id, attr_id, position, value_json, index_ref) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                id.as_str(),
                attr.id.as_str(),
                position as i64,
                serde_json::to_string(&attr.value)?,
                index_ref
            ])?;
        }

        if let Some(session_id) = &put.session {
            tx.prepare(
                "INSERT OR REPLACE INTO session_write (session_id, entity_id) VALUES (?1, ?2)",
            )?
            .execute(params![session_id, id.as_str()])?;
        }

        tx.commit()?;

        let snapshot = load_snapshot(&conn, id.as_str())?;
        drop(conn);

        if let Some(snapshot) = snapshot {
            self.notify(id.as_str(), EntityOp::Updated(snapshot)).await;
        }

        Ok(PutResult { id, revision })
    }

    /// Deletes an entity. Watchers receive a final delete op and their
    /// streams end.
    pub async fn delete(&self, id_or_ident: &str) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let id = {
            let mut conn = self.conn()?;
            let id = resolve_id(&conn, id_or_ident)?
                .ok_or_else(|| AppError::not_found("entity", id_or_ident))?;

            let tx = conn.transaction()?;
            tx.prepare("DELETE FROM attribute WHERE entity_id = ?1")?
                .execute(params![id])?;
            tx.prepare("DELETE FROM ident WHERE entity_id = ?1")?
                .execute(params![id])?;
            tx.prepare("DELETE FROM session_write WHERE entity_id = ?1")?
                .execute(params![id])?;
            tx.prepare("DELETE FROM entity WHERE id = ?1")?
                .execute(params![id])?;
            tx.commit()?;
            id
        };

        self.notify(&id, EntityOp::Deleted(EntityId(id.clone())))
            .await;
        self.close_watchers(&id);
        Ok(())
    }

    /// Subscribes to ops on one entity. The returned receiver sees updates
    /// in commit order from the moment of attachment; the channel closes
    /// after a delete.
    pub async fn watch_entity(&self, id_or_ident: &str) -> AppResult<mpsc::Receiver<EntityOp>> {
        let conn = self.conn()?;
        let id = resolve_id(&conn, id_or_ident)?
            .ok_or_else(|| AppError::not_found("entity", id_or_ident))?;

        let (tx, rx) = mpsc::channel(1);
        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| AppError::Internal("watcher lock poisoned".to_string()))?;
        watchers.entry(id).or_default().push(tx);
        Ok(rx)
    }

    /// Schema entries carrying the given tag.
    pub fn get_attributes_by_tag(&self, tag: &str) -> Vec<schema::AttrSpec> {
        schema::attributes_by_tag(tag)
    }

    async fn notify(&self, id: &str, op: EntityOp) {
        let senders: Vec<mpsc::Sender<EntityOp>> = match self.watchers.lock() {
            Ok(watchers) => watchers.get(id).cloned().unwrap_or_default(),
            Err(_) => return,
        };
        if senders.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for (i, sender) in senders.iter().enumerate() {
            if sender.send(op.clone()).await.is_err() {
                dead.push(i);
            }
        }

        if !dead.is_empty() {
            if let Ok(mut watchers) = self.watchers.lock() {
                if let Some(list) = watchers.get_mut(id) {
                    let mut i = 0;
                    list.retain(|_| {
                        let keep = !dead.contains(&i);
                        i += 1;
                        keep
                    });
                    if list.is_empty() {
                        watchers.remove(id);
                    }
                }
            }
        }
    }

    fn close_watchers(&self, id: &str) {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.remove(id);
        }
    }
}

/// Resolves an id-or-ident to a stored entity id, if any.
fn resolve_id(
    conn: &PooledConnection<SqliteConnectionManager>,
    id_or_ident: &str,
) -> AppResult<Option<String>> {
    let by_id: Option<String> = conn
        .prepare("SELECT id FROM entity WHERE id = ?1")?
        .query_row(params![id_or_ident], |row| row.get(0))
        .optional()?;
    if by_id.is_some() {
        return Ok(by_id);
    }
    let by_ident: Option<String> = conn
        .prepare("SELECT entity_id FROM ident WHERE ident = ?1")?
        .query_row(params![id_or_ident], |row| row.get(0))
        .optional()?;
    Ok(by_ident)
}

fn load_snapshot(
    conn: &PooledConnection<SqliteConnectionManager>,
    id: &str,
) -> AppResult<Option<EntitySnapshot>> {
    let header: Option<(i64, i64)> = conn
        .prepare("SELECT revision, created_at FROM entity WHERE id = ?1")?
        .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    let Some((revision, created_at)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT attr_id, value_json FROM attribute WHERE entity_id = ?1 ORDER BY position",
    )?;
    let rows: Vec<(String, String)> = stmt
        .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut attrs = Vec::with_capacity(rows.len());
    for (attr_id, value_json) in rows {
        let value: Value = serde_json::from_str(&value_json)?;
        attrs.push(Attribute::new(EntityId(attr_id), value));
    }

    Ok(Some(EntitySnapshot {
        id: EntityId(id.to_string()),
        revision,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at).unwrap_or_default(),
        attrs,
    }))
}

fn check_session_live(
    conn: &PooledConnection<SqliteConnectionManager>,
    session_id: &str,
) -> AppResult<()> {
    let expires_at: Option<i64> = conn
        .prepare("SELECT expires_at FROM session WHERE id = ?1")?
        .query_row(params![session_id], |row| row.get(0))
        .optional()?;
    match expires_at {
        None => Err(AppError::not_found("session", session_id)),
        Some(expires_at) if expires_at < now_millis() => Err(AppError::Expired(format!(
            "session {} has expired",
            session_id
        ))),
        Some(_) => Ok(()),
    }
}

fn validate_attrs(attrs: &[Attribute]) -> AppResult<()> {
    let mut seen: HashMap<&str, u32> = HashMap::new();
    for attr in attrs {
        let spec = schema::validate_attribute(&attr.id, &attr.value)?;
        let count = seen.entry(attr.id.as_str()).or_insert(0);
        *count += 1;
        if *count > 1 && !spec.many {
            return Err(AppError::validation(
                "duplicate-attribute",
                format!("attribute {} does not allow multiple values", attr.id),
            ));
        }
    }

    // required attributes are checked per attribute group present on the
    // entity, so records only answer for their own fields
    let groups: HashSet<&str> = attrs
        .iter()
        .filter_map(|a| a.id.as_str().rsplit_once('.').map(|(g, _)| g))
        .collect();
    for group in groups {
        for spec in schema::specs_in_group(group) {
            if spec.required && !attrs.iter().any(|a| a.id == spec.id) {
                return Err(AppError::validation(
                    "missing-field",
                    format!("required attribute {} is missing", spec.id),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema;
    use crate::schema::core::{
        ARTIFACT_APP, ARTIFACT_MANIFEST_DIGEST, ENTITY_IDENT, ENTITY_KIND, KIND_ARTIFACT,
        PROJECT_OWNER,
    };

    fn store() -> EntityStore {
        schema::register_all().unwrap();
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        crate::entity::migrations::migrate(pool.get().unwrap()).unwrap();
        EntityStore::new(pool)
    }

    fn project_attrs(ident: Option<&str>) -> Vec<Attribute> {
        let mut attrs = vec![Attribute::id_ref(
            ENTITY_KIND,
            "dev.miren.core/kind.project",
        )];
        if let Some(ident) = ident {
            attrs.push(Attribute::string(ENTITY_IDENT, ident));
        }
        attrs.push(Attribute::string(PROJECT_OWNER, "owner@example.com"));
        attrs
    }

    #[tokio::test]
    async fn put_get_and_revisions() {
        let store = store();
        let created = store
            .put(PutEntity {
                attrs: project_attrs(Some("project/alpha")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.revision, 1);

        // get by id and by ident see the same entity
        let by_id = store.get(created.id.as_str()).await.unwrap();
        let by_ident = store.get("project/alpha").await.unwrap();
        assert_eq!(by_id.id, by_ident.id);
        assert_eq!(by_id.view().string(PROJECT_OWNER), "owner@example.com");

        // matching revision succeeds and bumps
        let updated = store
            .put(PutEntity {
                id: Some(created.id.clone()),
                revision: Some(1),
                session: None,
                attrs: project_attrs(Some("project/alpha")),
            })
            .await
            .unwrap();
        assert_eq!(updated.revision, 2);

        // stale revision conflicts
        let err = store
            .put(PutEntity {
                id: Some(created.id.clone()),
                revision: Some(1),
                session: None,
                attrs: project_attrs(Some("project/alpha")),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        // without a revision the write is unconditional
        let unconditional = store
            .put(PutEntity {
                id: Some(created.id.clone()),
                revision: None,
                session: None,
                attrs: project_attrs(Some("project/alpha")),
            })
            .await
            .unwrap();
        assert_eq!(unconditional.revision, 3);
    }

    #[tokio::test]
    async fn duplicate_ident_conflicts() {
        let store = store();
        store
            .put(PutEntity {
                attrs: project_attrs(Some("project/alpha")),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = store
            .put(PutEntity {
                attrs: project_attrs(Some("project/alpha")),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn missing_kind_is_rejected() {
        let store = store();
        let err = store
            .put(PutEntity {
                attrs: vec![Attribute::string(PROJECT_OWNER, "o@example.com")],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn undeclared_attribute_is_a_schema_error() {
        let store = store();
        let mut attrs = project_attrs(None);
        attrs.push(Attribute::string("dev.miren.core/project.bogus", "x"));
        let err = store
            .put(PutEntity {
                attrs,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));
    }

    #[tokio::test]
    async fn list_only_queries_indexed_attributes() {
        let store = store();
        let app = store
            .put(PutEntity {
                attrs: vec![Attribute::id_ref(ENTITY_KIND, "dev.miren.core/kind.app")],
                ..Default::default()
            })
            .await
            .unwrap();

        for n in 0..2 {
            store
                .put(PutEntity {
                    attrs: vec![
                        Attribute::id_ref(ENTITY_KIND, KIND_ARTIFACT),
                        Attribute::id_ref(ARTIFACT_APP, app.id.clone()),
                        Attribute::string(ARTIFACT_MANIFEST_DIGEST, format!("sha256:{}", n)),
                    ],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let listed = store
            .list(ARTIFACT_APP, &Value::Id(app.id.clone()))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        // project.owner is not indexed
        let err = store
            .list(PROJECT_OWNER, &Value::String("owner@example.com".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));

        // misses are empty, not errors
        let empty = store
            .list(ARTIFACT_MANIFEST_DIGEST, &Value::String("sha256:none".to_string()))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_entity_and_index_rows() {
        let store = store();
        let app = store
            .put(PutEntity {
                attrs: vec![Attribute::id_ref(ENTITY_KIND, "dev.miren.core/kind.app")],
                ..Default::default()
            })
            .await
            .unwrap();
        let artifact = store
            .put(PutEntity {
                attrs: vec![
                    Attribute::id_ref(ENTITY_KIND, KIND_ARTIFACT),
                    Attribute::id_ref(ARTIFACT_APP, app.id.clone()),
                ],
                ..Default::default()
            })
            .await
            .unwrap();

        store.delete(artifact.id.as_str()).await.unwrap();
        assert!(store.get(artifact.id.as_str()).await.is_err());
        assert!(store
            .list(ARTIFACT_APP, &Value::Id(app.id.clone()))
            .await
            .unwrap()
            .is_empty());

        let err = store.delete(artifact.id.as_str()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn dangling_refs_are_allowed() {
        let store = store();
        // artifact referencing an app that was never created
        let ghost = EntityId::from("no-such-app");
        store
            .put(PutEntity {
                attrs: vec![
                    Attribute::id_ref(ENTITY_KIND, KIND_ARTIFACT),
                    Attribute::id_ref(ARTIFACT_APP, ghost.clone()),
                ],
                ..Default::default()
            })
            .await
            .unwrap();

        // listing by the dangling target returns the live referrer
        let listed = store.list(ARTIFACT_APP, &Value::Id(ghost)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn watch_sees_updates_then_delete_closes() {
        let store = store();
        let created = store
            .put(PutEntity {
                attrs: project_attrs(Some("project/watched")),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut watch = store.watch_entity("project/watched").await.unwrap();

        store
            .put(PutEntity {
                id: Some(created.id.clone()),
                revision: None,
                session: None,
                attrs: project_attrs(Some("project/watched")),
            })
            .await
            .unwrap();

        match watch.recv().await.unwrap() {
            EntityOp::Updated(snapshot) => assert_eq!(snapshot.revision, 2),
            other => panic!("expected update, got {:?}", other),
        }

        store.delete(created.id.as_str()).await.unwrap();
        match watch.recv().await.unwrap() {
            EntityOp::Deleted(id) => assert_eq!(id, created.id),
            other => panic!("expected delete, got {:?}", other),
        }
        // end of stream after the delete
        assert!(watch.recv().await.is_none());
    }
}
