//! Typed client over the entity store.
//!
//! This is the only path between business logic and the store: records go
//! in, records come out, and raw attribute lists stay below this line.

pub mod pool;

use crate::entity::store::{EntityOp, EntitySnapshot, EntityStore, PutEntity};
use crate::entity::value::{Attribute, EntityId, Value};
use crate::prelude::*;
use crate::records::{Metadata, Record};
use crate::schema::core::{ENTITY_IDENT, ENTITY_KIND};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct EntityClient {
    store: Arc<EntityStore>,
}

impl EntityClient {
    pub fn new(store: Arc<EntityStore>) -> Self {
        EntityClient { store }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Logical name for a record: `shortKind/name`.
    pub fn ident_for<R: Record>(name: &str) -> String {
        format!("{}/{}", R::short_kind(), name)
    }

    fn compose<R: Record>(name: &str, record: &R, labels: &[(String, String)]) -> Vec<Attribute> {
        let metadata = Metadata {
            name: name.to_string(),
            labels: labels.to_vec(),
            project: None,
        };
        let mut attrs = vec![
            Attribute::id_ref(ENTITY_KIND, R::kind()),
            Attribute::string(ENTITY_IDENT, Self::ident_for::<R>(name)),
        ];
        attrs.extend(metadata.encode());
        attrs.extend(record.encode());
        attrs
    }

    /// Creates a named entity from a record. The ident `shortKind/name`
    /// must not already be taken.
    pub async fn create<R: Record>(
        &self,
        name: &str,
        record: &R,
        labels: &[(String, String)],
    ) -> AppResult<EntityId> {
        let result = self
            .store
            .put(PutEntity {
                id: None,
                revision: None,
                session: None,
                attrs: Self::compose(name, record, labels),
            })
            .await?;
        Ok(result.id)
    }

    /// Creates an entity with a server-assigned id and no logical name.
    /// Used for records that are listed by index rather than looked up by
    /// name, like deployments.
    pub async fn create_unnamed<R: Record>(&self, record: &R) -> AppResult<EntityId> {
        let mut attrs = vec![Attribute::id_ref(ENTITY_KIND, R::kind())];
        attrs.extend(record.encode());
        let result = self
            .store
            .put(PutEntity {
                id: None,
                revision: None,
                session: None,
                attrs,
            })
            .await?;
        Ok(result.id)
    }

    /// Creates the entity if the name is free, otherwise rewrites the
    /// record attributes of the existing one. Yields the same id both
    /// times.
    pub async fn create_or_update<R: Record>(
        &self,
        name: &str,
        record: &R,
        labels: &[(String, String)],
    ) -> AppResult<EntityId> {
        let ident = Self::ident_for::<R>(name);
        match self.store.get(&ident).await {
            Ok(existing) => {
                self.store
                    .put(PutEntity {
                        id: Some(existing.id.clone()),
                        revision: None,
                        session: None,
                        attrs: Self::compose(name, record, labels),
                    })
                    .await?;
                Ok(existing.id)
            }
            Err(e) if e.is_not_found() => self.create(name, record, labels).await,
            Err(e) => Err(e),
        }
    }

    /// Fetches a record by id or logical name.
    pub async fn get<R: Record>(&self, id_or_name: &str) -> AppResult<R> {
        let snapshot = match self.store.get(id_or_name).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() && !id_or_name.contains('/') => {
                // bare names resolve through the record's ident space
                self.store.get(&Self::ident_for::<R>(id_or_name)).await?
            }
            Err(e) => return Err(e),
        };
        Ok(decode_snapshot(&snapshot))
    }

    /// Rewrites an entity from a record that carries its id. Name, labels
    /// and ident are preserved from the stored entity.
    pub async fn update<R: Record>(&self, record: &R) -> AppResult<()> {
        let id = record
            .entity_id()
            .ok_or_else(|| AppError::validation("missing-id", "record does not carry an id"))?;
        let current = self.store.get(id.as_str()).await?;

        let mut attrs = preserved_attrs(&current);
        attrs.extend(record.encode());

        // new revision discarded; callers re-read when they need it
        self.store
            .put(PutEntity {
                id: Some(current.id),
                revision: Some(current.revision),
                session: None,
                attrs,
            })
            .await?;
        Ok(())
    }

    /// Partial write: replaces only the attributes named in `attrs`,
    /// keeping every other attribute of the entity as stored.
    pub async fn update_attrs(&self, id: &str, attrs: Vec<Attribute>) -> AppResult<()> {
        let current = self.store.get(id).await?;
        let replaced: Vec<String> = attrs.iter().map(|a| a.id.0.clone()).collect();

        let mut merged: Vec<Attribute> = current
            .attrs
            .iter()
            .filter(|a| !replaced.contains(&a.id.0))
            .cloned()
            .collect();
        merged.extend(attrs);

        self.store
            .put(PutEntity {
                id: Some(current.id),
                revision: Some(current.revision),
                session: None,
                attrs: merged,
            })
            .await?;
        Ok(())
    }

    /// Lists records by an indexed attribute.
    pub async fn list<R: Record>(&self, attr_id: &str, value: &Value) -> AppResult<Vec<R>> {
        let snapshots = self.store.list(attr_id, value).await?;
        Ok(snapshots.iter().map(decode_snapshot).collect())
    }

    /// Expects exactly one entity at an indexed attribute and decodes it
    /// into `record`. Zero results is NotFound, more than one Conflict.
    pub async fn one_at_index<R: Record>(
        &self,
        attr_id: &str,
        value: &Value,
        record: &mut R,
    ) -> AppResult<()> {
        let snapshots = self.store.list(attr_id, value).await?;
        match snapshots.len() {
            0 => Err(AppError::not_found(
                "index",
                format!("{}={:?}", attr_id, value),
            )),
            1 => {
                *record = decode_snapshot(&snapshots[0]);
                Ok(())
            }
            n => Err(AppError::conflict(
                "index",
                format!("{} entities at {}, expected one", n, attr_id),
            )),
        }
    }

    pub async fn delete(&self, id_or_name: &str) -> AppResult<()> {
        self.store.delete(id_or_name).await
    }

    /// Streams snapshots of one entity until it is deleted or the caller
    /// drops the receiver. The channel closing is the tombstone.
    pub async fn watch_entity(&self, id_or_name: &str) -> AppResult<mpsc::Receiver<EntitySnapshot>> {
        let mut ops = self.store.watch_entity(id_or_name).await?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            while let Some(op) = ops.recv().await {
                match op {
                    EntityOp::Updated(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    EntityOp::Deleted(_) => break,
                }
            }
        });

        Ok(rx)
    }
}

fn decode_snapshot<R: Record>(snapshot: &EntitySnapshot) -> R {
    let mut record = R::decode(&snapshot.view());
    record.set_entity_id(snapshot.id.clone());
    record
}

/// Attributes that survive a record rewrite: kind, ident and metadata.
fn preserved_attrs(snapshot: &EntitySnapshot) -> Vec<Attribute> {
    snapshot
        .attrs
        .iter()
        .filter(|a| {
            let id = a.id.as_str();
            id == ENTITY_KIND
                || id == ENTITY_IDENT
                || id.starts_with("dev.miren.core/metadata.")
        })
        .cloned()
        .collect()
}
