//! SQLite-backed store implementation.
//!
//! One row per transaction in `fate_tx`, stack entries in `fate_stack`,
//! keyed info in `fate_info`. Reservations are columns on the transaction
//! row, so acquiring and releasing a lease is a single compare-and-swap
//! `UPDATE`. Deferral comparisons happen in Rust after decoding, never in
//! SQL, to stay independent of the timestamp encoding.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{FateError, Result};
use crate::id::{FateId, FateInstanceType, FateKey, FateKeyKind};
use crate::ops::TxInfo;
use crate::reservation::LivenessRegistry;
use crate::status::TxStatus;
use crate::step::{SavedStep, Step, StepRegistry};
use crate::store::{FateStore, FateTxHandle, MAX_STACK_DEPTH, ReadOnlyFateTx, RunnableSink};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const RUNNABLE_STATUSES: &str = "'SUBMITTED', 'IN_PROGRESS', 'FAILED_IN_PROGRESS'";

/// SQLite-backed transaction store.
pub struct SqliteFateStore<E> {
    pool: SqlitePool,
    instance_type: FateInstanceType,
    owner: Uuid,
    registry: Arc<StepRegistry<E>>,
}

impl<E> SqliteFateStore<E>
where
    E: Send + Sync + 'static,
{
    /// Create a store from an existing pool. Assumes migrations have run.
    pub fn new(
        pool: SqlitePool,
        instance_type: FateInstanceType,
        registry: Arc<StepRegistry<E>>,
    ) -> Self {
        Self {
            pool,
            instance_type,
            owner: Uuid::new_v4(),
            registry,
        }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file as needed, connects
    /// with sensible defaults, and runs migrations.
    pub async fn from_path(
        path: impl AsRef<Path>,
        instance_type: FateInstanceType,
        registry: Arc<StepRegistry<E>>,
    ) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| FateError::Store {
                operation: "create_dir",
                details: format!("failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| FateError::Store {
                operation: "connect",
                details: format!("failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| FateError::Store {
            operation: "migrate",
            details: format!("failed to run migrations: {}", e),
        })?;

        Ok(Self::new(pool, instance_type, registry))
    }

    /// A store over the same pool under a different process identity.
    pub fn with_owner(&self, owner: Uuid) -> Self {
        Self {
            pool: self.pool.clone(),
            instance_type: self.instance_type,
            owner,
            registry: self.registry.clone(),
        }
    }

    /// The process id reservations taken through this store belong to.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    fn handle_for(&self, id: FateId, reserved: bool) -> SqliteTxHandle<E> {
        SqliteTxHandle {
            id,
            owner: self.owner.to_string(),
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            reserved,
            deleted: false,
        }
    }
}

fn parse_status(id: FateId, raw: &str) -> Result<TxStatus> {
    TxStatus::parse(raw).ok_or_else(|| FateError::Store {
        operation: "status",
        details: format!("transaction {id} carries unrecognized status '{raw}'"),
    })
}

async fn status_of(pool: &SqlitePool, id: FateId) -> Result<TxStatus> {
    let row: Option<(String,)> = sqlx::query_as("SELECT status FROM fate_tx WHERE tx_id = ?")
        .bind(id.uuid.to_string())
        .fetch_optional(pool)
        .await?;
    match row {
        Some((raw,)) => parse_status(id, &raw),
        None => Ok(TxStatus::Unknown),
    }
}

async fn top_of<E>(
    pool: &SqlitePool,
    registry: &StepRegistry<E>,
    id: FateId,
) -> Result<Option<Box<dyn Step<E>>>>
where
    E: Send + Sync + 'static,
{
    let row: Option<(String, i64, String)> = sqlx::query_as(
        "SELECT tag, version, payload FROM fate_stack WHERE tx_id = ? ORDER BY pos DESC LIMIT 1",
    )
    .bind(id.uuid.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some((tag, version, payload)) => {
            let saved = SavedStep {
                tag,
                version: version as u32,
                payload: serde_json::from_str(&payload)?,
            };
            Ok(Some(registry.decode(&saved)?))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl<E> FateStore<E> for SqliteFateStore<E>
where
    E: Send + Sync + 'static,
{
    fn instance_type(&self) -> FateInstanceType {
        self.instance_type
    }

    async fn create(&self) -> Result<FateId> {
        let id = FateId::new_random(self.instance_type);
        sqlx::query(
            r#"
            INSERT INTO fate_tx (tx_id, instance_type, status, created_at)
            VALUES (?, ?, 'NEW', ?)
            "#,
        )
        .bind(id.uuid.to_string())
        .bind(self.instance_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn create_keyed(&self, key: &FateKey) -> Result<Option<FateId>> {
        let id = FateId::new_random(self.instance_type);
        let result = sqlx::query(
            r#"
            INSERT INTO fate_tx
                (tx_id, instance_type, status, fate_key_kind, fate_key_payload, created_at)
            VALUES (?, ?, 'NEW', ?, ?, ?)
            "#,
        )
        .bind(id.uuid.to_string())
        .bind(self.instance_type.as_str())
        .bind(key.kind.as_str())
        .bind(&key.payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Some(id)),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: Option<FateKeyKind>) -> Result<Vec<(FateId, Option<FateKey>)>> {
        let rows: Vec<(String, Option<String>, Option<Vec<u8>>)> = match kind {
            Some(kind) => {
                sqlx::query_as(
                    r#"
                    SELECT tx_id, fate_key_kind, fate_key_payload
                    FROM fate_tx
                    WHERE instance_type = ? AND fate_key_kind = ?
                    "#,
                )
                .bind(self.instance_type.as_str())
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT tx_id, fate_key_kind, fate_key_payload
                    FROM fate_tx
                    WHERE instance_type = ?
                    "#,
                )
                .bind(self.instance_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for (tx_id, key_kind, key_payload) in rows {
            let uuid = Uuid::parse_str(&tx_id).map_err(|e| FateError::Store {
                operation: "list",
                details: format!("corrupt tx_id '{tx_id}': {e}"),
            })?;
            let key = match (key_kind, key_payload) {
                (Some(kind), Some(payload)) => FateKeyKind::parse(&kind)
                    .map(|kind| FateKey::new(kind, payload)),
                _ => None,
            };
            out.push((FateId::from_parts(self.instance_type, uuid), key));
        }
        Ok(out)
    }

    async fn runnable(&self, stop: CancellationToken, sink: Arc<dyn RunnableSink>) -> Result<()> {
        let query = format!(
            "SELECT tx_id, not_before FROM fate_tx \
             WHERE instance_type = ? AND reservation_owner IS NULL \
             AND status IN ({RUNNABLE_STATUSES})"
        );

        while !stop.is_cancelled() {
            let rows: Vec<(String, Option<DateTime<Utc>>)> = sqlx::query_as(&query)
                .bind(self.instance_type.as_str())
                .fetch_all(&self.pool)
                .await?;

            let now = Utc::now();
            for (tx_id, not_before) in rows {
                if stop.is_cancelled() {
                    return Ok(());
                }
                if not_before.is_some_and(|t| t > now) {
                    continue;
                }
                let Ok(uuid) = Uuid::parse_str(&tx_id) else {
                    continue;
                };
                sink.accept(FateId::from_parts(self.instance_type, uuid)).await;
            }

            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        Ok(())
    }

    async fn try_reserve(&self, id: FateId) -> Result<Option<Box<dyn FateTxHandle<E>>>> {
        let updated = sqlx::query(
            r#"
            UPDATE fate_tx
            SET reservation_owner = ?, reserved_at = ?
            WHERE tx_id = ? AND reservation_owner IS NULL
            "#,
        )
        .bind(self.owner.to_string())
        .bind(Utc::now())
        .bind(id.uuid.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(Some(Box::new(self.handle_for(id, true))));
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM fate_tx WHERE tx_id = ?")
            .bind(id.uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_some() {
            // Held by someone else.
            Ok(None)
        } else {
            // Unknown ids yield a handle that reports UNKNOWN.
            Ok(Some(Box::new(self.handle_for(id, false))))
        }
    }

    async fn read(&self, id: FateId) -> Result<Box<dyn ReadOnlyFateTx<E>>> {
        Ok(Box::new(SqliteReadView {
            id,
            pool: self.pool.clone(),
            registry: self.registry.clone(),
        }))
    }

    async fn delete_dead_reservations(&self, liveness: &dyn LivenessRegistry) -> Result<()> {
        let held: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT tx_id, reservation_owner
            FROM fate_tx
            WHERE instance_type = ? AND reservation_owner IS NOT NULL
            "#,
        )
        .bind(self.instance_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut cleared = 0u64;
        for (tx_id, owner_raw) in held {
            let Ok(owner) = Uuid::parse_str(&owner_raw) else {
                continue;
            };
            if liveness.is_alive(owner).await {
                continue;
            }
            // CAS on the owner so a concurrent legitimate re-reserve wins.
            let updated = sqlx::query(
                r#"
                UPDATE fate_tx
                SET reservation_owner = NULL, reserved_at = NULL
                WHERE tx_id = ? AND reservation_owner = ?
                "#,
            )
            .bind(&tx_id)
            .bind(&owner_raw)
            .execute(&self.pool)
            .await?
            .rows_affected();
            if updated == 1 {
                debug!(tx_id = %tx_id, dead_owner = %owner, "cleared dead reservation");
                cleared += 1;
            }
        }

        if cleared > 0 {
            info!(
                store = %self.instance_type,
                cleared,
                "dead reservation sweep reclaimed leases"
            );
        }
        Ok(())
    }
}

struct SqliteTxHandle<E> {
    id: FateId,
    owner: String,
    pool: SqlitePool,
    registry: Arc<StepRegistry<E>>,
    reserved: bool,
    deleted: bool,
}

impl<E> SqliteTxHandle<E>
where
    E: Send + Sync + 'static,
{
    /// Confirm the lease is still ours. The sweep only clears leases whose
    /// owner's liveness record is gone, so a live holder passing this check
    /// cannot lose the lease before its next statement.
    async fn verify_owner(&self) -> Result<()> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT reservation_owner FROM fate_tx WHERE tx_id = ?")
                .bind(self.id.uuid.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((Some(owner),)) if owner == self.owner => Ok(()),
            Some(_) => Err(FateError::ReservationLost { id: self.id }),
            None => Err(FateError::UnknownTransaction { id: self.id }),
        }
    }
}

#[async_trait]
impl<E> FateTxHandle<E> for SqliteTxHandle<E>
where
    E: Send + Sync + 'static,
{
    fn id(&self) -> FateId {
        self.id
    }

    async fn status(&self) -> Result<TxStatus> {
        status_of(&self.pool, self.id).await
    }

    async fn set_status(&mut self, new: TxStatus) -> Result<()> {
        if !self.reserved {
            return Err(FateError::InvalidTransition {
                id: self.id,
                from: TxStatus::Unknown,
                to: new,
            });
        }
        let current = self.status().await?;
        if current == new {
            return Ok(());
        }
        if !current.can_transition_to(new) {
            return Err(FateError::InvalidTransition {
                id: self.id,
                from: current,
                to: new,
            });
        }

        let updated = sqlx::query(
            "UPDATE fate_tx SET status = ? WHERE tx_id = ? AND reservation_owner = ?",
        )
        .bind(new.as_str())
        .bind(self.id.uuid.to_string())
        .bind(&self.owner)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            Ok(())
        } else {
            self.verify_owner().await?;
            Err(FateError::ReservationLost { id: self.id })
        }
    }

    async fn top(&self) -> Result<Option<Box<dyn Step<E>>>> {
        if !self.reserved {
            return Ok(None);
        }
        top_of(&self.pool, &self.registry, self.id).await
    }

    async fn push(&mut self, step: &dyn Step<E>) -> Result<()> {
        if !self.reserved {
            return Err(FateError::UnknownTransaction { id: self.id });
        }
        self.verify_owner().await?;

        let depth: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fate_stack WHERE tx_id = ?")
            .bind(self.id.uuid.to_string())
            .fetch_one(&self.pool)
            .await?;
        if depth.0 as usize >= MAX_STACK_DEPTH {
            return Err(FateError::StackOverflow { id: self.id });
        }

        let saved = step.save()?;
        sqlx::query(
            r#"
            INSERT INTO fate_stack (tx_id, pos, tag, version, payload)
            SELECT ?, COALESCE(MAX(pos), -1) + 1, ?, ?, ?
            FROM fate_stack WHERE tx_id = ?
            "#,
        )
        .bind(self.id.uuid.to_string())
        .bind(&saved.tag)
        .bind(saved.version as i64)
        .bind(serde_json::to_string(&saved.payload)?)
        .bind(self.id.uuid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pop(&mut self) -> Result<()> {
        if !self.reserved {
            return Err(FateError::UnknownTransaction { id: self.id });
        }
        self.verify_owner().await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM fate_stack
            WHERE tx_id = ?
              AND pos = (SELECT MAX(pos) FROM fate_stack WHERE tx_id = ?)
            "#,
        )
        .bind(self.id.uuid.to_string())
        .bind(self.id.uuid.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if removed == 1 {
            Ok(())
        } else {
            Err(FateError::Store {
                operation: "pop",
                details: "step stack is empty".to_string(),
            })
        }
    }

    async fn get_info(&self, key: TxInfo) -> Result<Option<serde_json::Value>> {
        if !self.reserved {
            return Ok(None);
        }
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM fate_info WHERE tx_id = ? AND key = ?")
                .bind(self.id.uuid.to_string())
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_info(&mut self, key: TxInfo, value: serde_json::Value) -> Result<()> {
        if !self.reserved {
            return Err(FateError::UnknownTransaction { id: self.id });
        }
        self.verify_owner().await?;

        sqlx::query(
            r#"
            INSERT INTO fate_info (tx_id, key, value) VALUES (?, ?, ?)
            ON CONFLICT (tx_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(self.id.uuid.to_string())
        .bind(key.as_str())
        .bind(serde_json::to_string(&value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        if !self.reserved || self.deleted {
            self.deleted = true;
            return Ok(());
        }

        let removed = sqlx::query("DELETE FROM fate_tx WHERE tx_id = ? AND reservation_owner = ?")
            .bind(self.id.uuid.to_string())
            .bind(&self.owner)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed != 1 {
            self.verify_owner().await?;
            return Err(FateError::ReservationLost { id: self.id });
        }

        sqlx::query("DELETE FROM fate_stack WHERE tx_id = ?")
            .bind(self.id.uuid.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM fate_info WHERE tx_id = ?")
            .bind(self.id.uuid.to_string())
            .execute(&self.pool)
            .await?;

        self.deleted = true;
        Ok(())
    }

    async fn unreserve(self: Box<Self>, defer: Duration) -> Result<()> {
        if !self.reserved || self.deleted {
            return Ok(());
        }
        let not_before = if defer.is_zero() {
            None
        } else {
            Some(Utc::now() + defer)
        };
        // No rows_affected check: if the sweep reclaimed the lease there is
        // nothing left to release.
        sqlx::query(
            r#"
            UPDATE fate_tx
            SET reservation_owner = NULL, reserved_at = NULL, not_before = ?
            WHERE tx_id = ? AND reservation_owner = ?
            "#,
        )
        .bind(not_before)
        .bind(self.id.uuid.to_string())
        .bind(&self.owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

struct SqliteReadView<E> {
    id: FateId,
    pool: SqlitePool,
    registry: Arc<StepRegistry<E>>,
}

#[async_trait]
impl<E> ReadOnlyFateTx<E> for SqliteReadView<E>
where
    E: Send + Sync + 'static,
{
    fn id(&self) -> FateId {
        self.id
    }

    async fn status(&self) -> Result<TxStatus> {
        status_of(&self.pool, self.id).await
    }

    async fn top(&self) -> Result<Option<Box<dyn Step<E>>>> {
        top_of(&self.pool, &self.registry, self.id).await
    }

    async fn wait_for_status_change(
        &self,
        targets: &[TxStatus],
        timeout: Option<Duration>,
    ) -> Result<TxStatus> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut backoff = Duration::from_millis(25);
        loop {
            let status = self.status().await?;
            if targets.contains(&status) {
                return Ok(status);
            }
            if let Some(deadline) = deadline
                && tokio::time::Instant::now() >= deadline
            {
                return Ok(status);
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_millis(250));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::FateOperation;
    use crate::reservation::InMemoryLiveness;
    use crate::step::StepError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct NoopStep {
        label: String,
    }

    #[async_trait]
    impl Step<()> for NoopStep {
        fn name(&self) -> &str {
            &self.label
        }

        fn save(&self) -> std::result::Result<SavedStep, serde_json::Error> {
            SavedStep::of("noop", 1, self)
        }

        async fn call(
            &self,
            _id: FateId,
            _env: &(),
        ) -> std::result::Result<Option<Box<dyn Step<()>>>, StepError> {
            Ok(None)
        }
    }

    fn registry() -> Arc<StepRegistry<()>> {
        let mut registry = StepRegistry::new();
        registry.register::<NoopStep>("noop");
        Arc::new(registry)
    }

    async fn store_at(dir: &tempfile::TempDir) -> SqliteFateStore<()> {
        SqliteFateStore::from_path(dir.path().join("fate.db"), FateInstanceType::User, registry())
            .await
            .expect("store opens")
    }

    #[tokio::test]
    async fn test_create_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir).await;

        let id = store.create().await.unwrap();
        let view = store.read(id).await.unwrap();
        assert_eq!(view.status().await.unwrap(), TxStatus::New);
        assert!(view.top().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stack_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = store_at(&dir).await;
            let id = store.create().await.unwrap();
            let mut handle = store.try_reserve(id).await.unwrap().unwrap();
            handle.set_status(TxStatus::Submitted).await.unwrap();
            handle
                .push(&NoopStep {
                    label: "first".to_string(),
                })
                .await
                .unwrap();
            handle
                .push(&NoopStep {
                    label: "second".to_string(),
                })
                .await
                .unwrap();
            handle.unreserve(Duration::ZERO).await.unwrap();
            id
        };

        // Fresh pool over the same file: the stack top is intact.
        let store = store_at(&dir).await;
        let view = store.read(id).await.unwrap();
        assert_eq!(view.status().await.unwrap(), TxStatus::Submitted);
        let top = view.top().await.unwrap().expect("stack persisted");
        assert_eq!(top.name(), "second");
    }

    #[tokio::test]
    async fn test_reservation_cas_across_owners() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir).await;
        let other = store.with_owner(Uuid::new_v4());

        let id = store.create().await.unwrap();
        let handle = store.try_reserve(id).await.unwrap().unwrap();
        assert!(other.try_reserve(id).await.unwrap().is_none());

        handle.unreserve(Duration::ZERO).await.unwrap();
        let handle = other.try_reserve(id).await.unwrap().unwrap();
        handle.unreserve(Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreserve_defer_hides_from_runnable_scan() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir).await;

        let id = store.create().await.unwrap();
        store
            .seed(
                FateOperation::TableCreate,
                id,
                &NoopStep {
                    label: "only".to_string(),
                },
                false,
            )
            .await
            .unwrap();

        let handle = store.try_reserve(id).await.unwrap().unwrap();
        handle.unreserve(Duration::from_secs(3600)).await.unwrap();

        // The row is runnable by status but deferred far into the future.
        let rows: Vec<(String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT tx_id, not_before FROM fate_tx WHERE reservation_owner IS NULL",
        )
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].1.expect("deferral recorded") > Utc::now());
    }

    #[tokio::test]
    async fn test_keyed_create_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir).await;
        let key = FateKey::new(FateKeyKind::CompactionCommit, b"ecid-1".to_vec());

        assert!(store.create_keyed(&key).await.unwrap().is_some());
        assert!(store.create_keyed(&key).await.unwrap().is_none());

        let listed = store.list(Some(FateKeyKind::CompactionCommit)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_dead_reservation_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir).await;
        let id = store.create().await.unwrap();

        // Reserve, then "die" without unreserving.
        let handle = store.try_reserve(id).await.unwrap().unwrap();
        drop(handle);

        let liveness = InMemoryLiveness::new();
        let survivor = store.with_owner(Uuid::new_v4());
        liveness.register(survivor.owner());

        survivor.delete_dead_reservations(&liveness).await.unwrap();
        assert!(survivor.try_reserve(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_info_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir).await;
        let id = store.create().await.unwrap();

        let mut handle = store.try_reserve(id).await.unwrap().unwrap();
        handle
            .set_info(TxInfo::ReturnValue, serde_json::json!("table 12 created"))
            .await
            .unwrap();
        assert_eq!(
            handle.get_info(TxInfo::ReturnValue).await.unwrap(),
            Some(serde_json::json!("table 12 created"))
        );
        assert_eq!(handle.get_info(TxInfo::Exception).await.unwrap(), None);

        handle.delete().await.unwrap();
        handle.unreserve(Duration::ZERO).await.unwrap();

        let view = store.read(id).await.unwrap();
        assert_eq!(view.status().await.unwrap(), TxStatus::Unknown);
    }
}
