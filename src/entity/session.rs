use crate::entity::store::{now_millis, EntityStore};
use crate::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 60;

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
const CLOSE_REVOKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

impl EntityStore {
    /// Creates a named session with the given TTL. Writes scoped to the
    /// session are rolled back when it is revoked or expires.
    pub async fn create_session(&self, ttl_seconds: i64, usage: &str) -> AppResult<String> {
        let ttl_seconds = if ttl_seconds <= 0 {
            DEFAULT_SESSION_TTL_SECONDS
        } else {
            ttl_seconds
        };
        let id = Uuid::new_v4().simple().to_string();
        let now = now_millis();

        let conn = self.conn()?;
        conn.prepare(
            "INSERT INTO session (id, usage, ttl_seconds, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![id, usage, ttl_seconds, now + ttl_seconds * 1000, now])?;

        log::debug!("Created session {} ({}, ttl {}s)", id, usage, ttl_seconds);
        Ok(id)
    }

    /// Refreshes a session's TTL. Fails with NotFound for unknown sessions
    /// and Expired for sessions past their TTL.
    pub async fn ping_session(&self, id: &str) -> AppResult<()> {
        let conn = self.conn()?;
        let row: Option<(i64, i64)> = conn
            .prepare("SELECT ttl_seconds, expires_at FROM session WHERE id = ?1")?
            .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let (ttl_seconds, expires_at) =
            row.ok_or_else(|| AppError::not_found("session", id))?;
        let now = now_millis();
        if expires_at < now {
            return Err(AppError::Expired(format!("session {} has expired", id)));
        }

        conn.prepare("UPDATE session SET expires_at = ?2 WHERE id = ?1")?
            .execute(params![id, now + ttl_seconds * 1000])?;
        Ok(())
    }

    /// Revokes a session and rolls back every entity written under it.
    pub async fn revoke_session(&self, id: &str) -> AppResult<()> {
        let entity_ids: Vec<String> = {
            let conn = self.conn()?;
            let exists: Option<String> = conn
                .prepare("SELECT id FROM session WHERE id = ?1")?
                .query_row(params![id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(AppError::not_found("session", id));
            }

            let mut stmt =
                conn.prepare("SELECT entity_id FROM session_write WHERE session_id = ?1")?;
            let ids = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<Result<_, _>>()?;
            ids
        };

        for entity_id in &entity_ids {
            match self.delete(entity_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let conn = self.conn()?;
        conn.prepare("DELETE FROM session_write WHERE session_id = ?1")?
            .execute(params![id])?;
        conn.prepare("DELETE FROM session WHERE id = ?1")?
            .execute(params![id])?;

        log::debug!(
            "Revoked session {} ({} scoped writes rolled back)",
            id,
            entity_ids.len()
        );
        Ok(())
    }

    fn expired_sessions(&self) -> AppResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM session WHERE expires_at < ?1")?;
        let ids = stmt
            .query_map(params![now_millis()], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    /// One sweep pass: revokes every session past its TTL.
    pub async fn sweep_expired_sessions(&self) -> AppResult<usize> {
        let expired = self.expired_sessions()?;
        let count = expired.len();
        for id in expired {
            log::info!("Session {} expired, revoking", id);
            if let Err(e) = self.revoke_session(&id).await {
                log::error!("Failed to revoke expired session {}: {}", id, e);
            }
        }
        Ok(count)
    }
}

/// Spawns the background task that auto-revokes expired sessions.
pub fn start_session_sweeper(store: Arc<EntityStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            if let Err(e) = store.sweep_expired_sessions().await {
                log::error!("Session sweep failed: {}", e);
            }
        }
    })
}

/// Client-side handle owning a session's heartbeat.
///
/// One task pings at TTL/2 until the handle is closed or dropped; on
/// termination it runs a best-effort revoke bounded to five seconds.
/// `close` is safe to call more than once.
pub struct SessionHandle {
    id: String,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SessionHandle {
    pub async fn open(
        store: Arc<EntityStore>,
        ttl_seconds: i64,
        usage: &str,
    ) -> AppResult<SessionHandle> {
        let id = store.create_session(ttl_seconds, usage).await?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let ttl_seconds = if ttl_seconds <= 0 {
            DEFAULT_SESSION_TTL_SECONDS
        } else {
            ttl_seconds
        };
        let heartbeat = std::time::Duration::from_millis((ttl_seconds * 1000 / 2) as u64);
        let session_id = id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(heartbeat) => {
                        match store.ping_session(&session_id).await {
                            Ok(()) => log::debug!("Session {} heartbeat", session_id),
                            Err(e) => {
                                log::warn!("Session {} heartbeat failed: {}", session_id, e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            // best-effort revoke on the way out
            let revoke = store.revoke_session(&session_id);
            match tokio::time::timeout(CLOSE_REVOKE_TIMEOUT, revoke).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_not_found() => {}
                Ok(Err(e)) => log::warn!("Failed to revoke session {}: {}", session_id, e),
                Err(_) => log::warn!("Timed out revoking session {}", session_id),
            }
        });

        Ok(SessionHandle {
            id,
            closed: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Signals the heartbeat task to stop and revoke. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send(true).ok();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::store::PutEntity;
    use crate::entity::value::Attribute;
    use crate::schema;
    use crate::schema::core::{ENTITY_KIND, KIND_PROJECT, PROJECT_OWNER};

    fn store() -> Arc<EntityStore> {
        schema::register_all().unwrap();
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        crate::entity::migrations::migrate(pool.get().unwrap()).unwrap();
        Arc::new(EntityStore::new(pool))
    }

    fn expire_now(store: &EntityStore, session_id: &str) {
        let conn = store.conn().unwrap();
        conn.prepare("UPDATE session SET expires_at = ?2 WHERE id = ?1")
            .unwrap()
            .execute(params![session_id, now_millis() - 1000])
            .unwrap();
    }

    async fn scoped_put(store: &EntityStore, session: &str) -> crate::entity::value::EntityId {
        store
            .put(PutEntity {
                id: None,
                revision: None,
                session: Some(session.to_string()),
                attrs: vec![
                    Attribute::id_ref(ENTITY_KIND, KIND_PROJECT),
                    Attribute::string(PROJECT_OWNER, "owner@example.com"),
                ],
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn ping_refreshes_and_expiry_errors() {
        let store = store();
        let session = store.create_session(60, "test").await.unwrap();
        store.ping_session(&session).await.unwrap();

        expire_now(&store, &session);
        let err = store.ping_session(&session).await.unwrap_err();
        assert!(matches!(err, AppError::Expired(_)));

        let err = store.ping_session("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn revoke_rolls_back_scoped_writes() {
        let store = store();
        let session = store.create_session(60, "test").await.unwrap();
        let entity = scoped_put(&store, &session).await;

        // visible while the session lives
        assert!(store.get(entity.as_str()).await.is_ok());

        store.revoke_session(&session).await.unwrap();
        assert!(store.get(entity.as_str()).await.is_err());

        let err = store.revoke_session(&session).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_against_expired_session_is_rejected() {
        let store = store();
        let session = store.create_session(60, "test").await.unwrap();
        expire_now(&store, &session);

        let err = store
            .put(PutEntity {
                id: None,
                revision: None,
                session: Some(session),
                attrs: vec![Attribute::id_ref(ENTITY_KIND, KIND_PROJECT)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Expired(_)));
    }

    #[tokio::test]
    async fn sweep_auto_revokes_expired_sessions() {
        let store = store();
        let session = store.create_session(60, "test").await.unwrap();
        let entity = scoped_put(&store, &session).await;

        expire_now(&store, &session);
        let swept = store.sweep_expired_sessions().await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.get(entity.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn handle_close_is_idempotent_and_revokes() {
        let store = store();
        let handle = SessionHandle::open(store.clone(), 60, "test").await.unwrap();
        let session_id = handle.id().to_string();
        let entity = scoped_put(&store, &session_id).await;

        handle.close();
        handle.close();

        // the heartbeat task revokes on its way out
        for _ in 0..50 {
            if store.get(entity.as_str()).await.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(store.get(entity.as_str()).await.is_err());
    }
}
