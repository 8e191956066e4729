// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process store backend.
//!
//! Keeps every record in a shared map. Used for embedded deployments and as
//! the default test backend; [`MemoryFateStore::with_owner`] shares the
//! underlying state under a different process identity, which is how tests
//! exercise failover without spawning processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FateError, Result};
use crate::id::{FateId, FateInstanceType, FateKey, FateKeyKind};
use crate::ops::TxInfo;
use crate::reservation::LivenessRegistry;
use crate::status::TxStatus;
use crate::step::{SavedStep, Step, StepRegistry};
use crate::store::{FateStore, FateTxHandle, MAX_STACK_DEPTH, ReadOnlyFateTx, RunnableSink};

#[derive(Clone)]
struct TxRecord {
    status: TxStatus,
    stack: Vec<SavedStep>,
    info: HashMap<&'static str, serde_json::Value>,
    key: Option<FateKey>,
    reservation: Option<(Uuid, DateTime<Utc>)>,
    not_before: Option<DateTime<Utc>>,
}

impl TxRecord {
    fn new(key: Option<FateKey>) -> Self {
        Self {
            status: TxStatus::New,
            stack: Vec::new(),
            info: HashMap::new(),
            key,
            reservation: None,
            not_before: None,
        }
    }

    fn runnable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_runnable()
            && self.reservation.is_none()
            && self.not_before.is_none_or(|t| t <= now)
    }
}

struct Inner {
    txs: Mutex<HashMap<FateId, TxRecord>>,
    changed: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<FateId, TxRecord>> {
        self.txs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process transaction store.
pub struct MemoryFateStore<E> {
    instance_type: FateInstanceType,
    owner: Uuid,
    registry: Arc<StepRegistry<E>>,
    inner: Arc<Inner>,
}

impl<E> MemoryFateStore<E>
where
    E: Send + Sync + 'static,
{
    /// Create an empty store owned by a fresh random process id.
    pub fn new(instance_type: FateInstanceType, registry: Arc<StepRegistry<E>>) -> Self {
        Self {
            instance_type,
            owner: Uuid::new_v4(),
            registry,
            inner: Arc::new(Inner {
                txs: Mutex::new(HashMap::new()),
                changed: Notify::new(),
            }),
        }
    }

    /// A view of the same underlying state under a different process
    /// identity. Reservations taken through the clone belong to `owner`.
    pub fn with_owner(&self, owner: Uuid) -> Self {
        Self {
            instance_type: self.instance_type,
            owner,
            registry: self.registry.clone(),
            inner: self.inner.clone(),
        }
    }

    /// The process id reservations taken through this store belong to.
    pub fn owner(&self) -> Uuid {
        self.owner
    }
}

#[async_trait]
impl<E> FateStore<E> for MemoryFateStore<E>
where
    E: Send + Sync + 'static,
{
    fn instance_type(&self) -> FateInstanceType {
        self.instance_type
    }

    async fn create(&self) -> Result<FateId> {
        let id = FateId::new_random(self.instance_type);
        self.inner.lock().insert(id, TxRecord::new(None));
        Ok(id)
    }

    async fn create_keyed(&self, key: &FateKey) -> Result<Option<FateId>> {
        let mut txs = self.inner.lock();
        if txs.values().any(|r| r.key.as_ref() == Some(key)) {
            return Ok(None);
        }
        let id = FateId::new_random(self.instance_type);
        txs.insert(id, TxRecord::new(Some(key.clone())));
        Ok(Some(id))
    }

    async fn list(&self, kind: Option<FateKeyKind>) -> Result<Vec<(FateId, Option<FateKey>)>> {
        let txs = self.inner.lock();
        Ok(txs
            .iter()
            .filter(|(_, r)| match kind {
                Some(k) => r.key.as_ref().is_some_and(|key| key.kind == k),
                None => true,
            })
            .map(|(id, r)| (*id, r.key.clone()))
            .collect())
    }

    async fn runnable(&self, stop: CancellationToken, sink: Arc<dyn RunnableSink>) -> Result<()> {
        while !stop.is_cancelled() {
            let now = Utc::now();
            let ids: Vec<FateId> = {
                let txs = self.inner.lock();
                txs.iter()
                    .filter(|(_, r)| r.runnable_at(now))
                    .map(|(id, _)| *id)
                    .collect()
            };

            for id in ids {
                if stop.is_cancelled() {
                    return Ok(());
                }
                sink.accept(id).await;
            }

            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = self.inner.changed.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        Ok(())
    }

    async fn try_reserve(&self, id: FateId) -> Result<Option<Box<dyn FateTxHandle<E>>>> {
        let reserved = {
            let mut txs = self.inner.lock();
            match txs.get_mut(&id) {
                Some(record) => {
                    if record.reservation.is_some() {
                        return Ok(None);
                    }
                    record.reservation = Some((self.owner, Utc::now()));
                    true
                }
                // Unknown ids yield a handle that reports UNKNOWN; nothing
                // to lease.
                None => false,
            }
        };

        Ok(Some(Box::new(MemoryTxHandle {
            id,
            owner: self.owner,
            registry: self.registry.clone(),
            inner: self.inner.clone(),
            reserved,
            deleted: false,
        })))
    }

    async fn read(&self, id: FateId) -> Result<Box<dyn ReadOnlyFateTx<E>>> {
        Ok(Box::new(MemoryReadView {
            id,
            registry: self.registry.clone(),
            inner: self.inner.clone(),
        }))
    }

    async fn delete_dead_reservations(&self, liveness: &dyn LivenessRegistry) -> Result<()> {
        let held: Vec<(FateId, Uuid)> = {
            let txs = self.inner.lock();
            txs.iter()
                .filter_map(|(id, r)| r.reservation.map(|(owner, _)| (*id, owner)))
                .collect()
        };

        let mut cleared = 0usize;
        for (id, owner) in held {
            if liveness.is_alive(owner).await {
                continue;
            }
            let mut txs = self.inner.lock();
            if let Some(record) = txs.get_mut(&id)
                && record.reservation.map(|(o, _)| o) == Some(owner)
            {
                record.reservation = None;
                cleared += 1;
                debug!(fate_id = %id, dead_owner = %owner, "cleared dead reservation");
            }
        }

        if cleared > 0 {
            self.inner.changed.notify_waiters();
        }
        Ok(())
    }
}

struct MemoryTxHandle<E> {
    id: FateId,
    owner: Uuid,
    registry: Arc<StepRegistry<E>>,
    inner: Arc<Inner>,
    reserved: bool,
    deleted: bool,
}

impl<E> MemoryTxHandle<E>
where
    E: Send + Sync + 'static,
{
    /// Run `f` against the record, verifying the lease is still ours.
    fn with_record<R>(&self, f: impl FnOnce(&mut TxRecord) -> Result<R>) -> Result<R> {
        let mut txs = self.inner.lock();
        let record = txs
            .get_mut(&self.id)
            .ok_or(FateError::UnknownTransaction { id: self.id })?;
        match record.reservation {
            Some((owner, _)) if owner == self.owner => f(record),
            _ => Err(FateError::ReservationLost { id: self.id }),
        }
    }
}

#[async_trait]
impl<E> FateTxHandle<E> for MemoryTxHandle<E>
where
    E: Send + Sync + 'static,
{
    fn id(&self) -> FateId {
        self.id
    }

    async fn status(&self) -> Result<TxStatus> {
        let txs = self.inner.lock();
        Ok(txs
            .get(&self.id)
            .map(|r| r.status)
            .unwrap_or(TxStatus::Unknown))
    }

    async fn set_status(&mut self, new: TxStatus) -> Result<()> {
        if !self.reserved {
            return Err(FateError::InvalidTransition {
                id: self.id,
                from: TxStatus::Unknown,
                to: new,
            });
        }
        let id = self.id;
        let changed = self.with_record(|record| {
            if record.status == new {
                return Ok(false);
            }
            if !record.status.can_transition_to(new) {
                return Err(FateError::InvalidTransition {
                    id,
                    from: record.status,
                    to: new,
                });
            }
            record.status = new;
            Ok(true)
        })?;
        if changed {
            self.inner.changed.notify_waiters();
        }
        Ok(())
    }

    async fn top(&self) -> Result<Option<Box<dyn Step<E>>>> {
        if !self.reserved {
            return Ok(None);
        }
        let saved = self.with_record(|record| Ok(record.stack.last().cloned()))?;
        match saved {
            Some(saved) => Ok(Some(self.registry.decode(&saved)?)),
            None => Ok(None),
        }
    }

    async fn push(&mut self, step: &dyn Step<E>) -> Result<()> {
        if !self.reserved {
            return Err(FateError::UnknownTransaction { id: self.id });
        }
        let id = self.id;
        let saved = step.save()?;
        self.with_record(|record| {
            if record.stack.len() >= MAX_STACK_DEPTH {
                return Err(FateError::StackOverflow { id });
            }
            record.stack.push(saved);
            Ok(())
        })
    }

    async fn pop(&mut self) -> Result<()> {
        if !self.reserved {
            return Err(FateError::UnknownTransaction { id: self.id });
        }
        self.with_record(|record| match record.stack.pop() {
            Some(_) => Ok(()),
            None => Err(FateError::Store {
                operation: "pop",
                details: "step stack is empty".to_string(),
            }),
        })
    }

    async fn get_info(&self, key: TxInfo) -> Result<Option<serde_json::Value>> {
        if !self.reserved {
            return Ok(None);
        }
        self.with_record(|record| Ok(record.info.get(key.as_str()).cloned()))
    }

    async fn set_info(&mut self, key: TxInfo, value: serde_json::Value) -> Result<()> {
        if !self.reserved {
            return Err(FateError::UnknownTransaction { id: self.id });
        }
        self.with_record(|record| {
            record.info.insert(key.as_str(), value);
            Ok(())
        })
    }

    async fn delete(&mut self) -> Result<()> {
        if self.reserved && !self.deleted {
            let mut txs = self.inner.lock();
            txs.remove(&self.id);
        }
        self.deleted = true;
        self.inner.changed.notify_waiters();
        Ok(())
    }

    async fn unreserve(self: Box<Self>, defer: Duration) -> Result<()> {
        if !self.reserved || self.deleted {
            return Ok(());
        }
        let mut txs = self.inner.lock();
        if let Some(record) = txs.get_mut(&self.id)
            && record.reservation.map(|(o, _)| o) == Some(self.owner)
        {
            record.reservation = None;
            record.not_before = if defer.is_zero() {
                None
            } else {
                Some(Utc::now() + defer)
            };
        }
        drop(txs);
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

struct MemoryReadView<E> {
    id: FateId,
    registry: Arc<StepRegistry<E>>,
    inner: Arc<Inner>,
}

#[async_trait]
impl<E> ReadOnlyFateTx<E> for MemoryReadView<E>
where
    E: Send + Sync + 'static,
{
    fn id(&self) -> FateId {
        self.id
    }

    async fn status(&self) -> Result<TxStatus> {
        let txs = self.inner.lock();
        Ok(txs
            .get(&self.id)
            .map(|r| r.status)
            .unwrap_or(TxStatus::Unknown))
    }

    async fn top(&self) -> Result<Option<Box<dyn Step<E>>>> {
        let saved = {
            let txs = self.inner.lock();
            txs.get(&self.id).and_then(|r| r.stack.last().cloned())
        };
        match saved {
            Some(saved) => Ok(Some(self.registry.decode(&saved)?)),
            None => Ok(None),
        }
    }

    async fn wait_for_status_change(
        &self,
        targets: &[TxStatus],
        timeout: Option<Duration>,
    ) -> Result<TxStatus> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
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
            tokio::time::sleep(Duration::from_millis(25)).await;
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
    struct NoopStep;

    #[async_trait]
    impl Step<()> for NoopStep {
        fn name(&self) -> &str {
            "noop"
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

    fn store() -> MemoryFateStore<()> {
        let mut registry = StepRegistry::new();
        registry.register::<NoopStep>("noop");
        MemoryFateStore::new(FateInstanceType::User, Arc::new(registry))
    }

    #[tokio::test]
    async fn test_create_starts_new_and_empty() {
        let store = store();
        let id = store.create().await.unwrap();

        let view = store.read(id).await.unwrap();
        assert_eq!(view.status().await.unwrap(), TxStatus::New);
        assert!(view.top().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_id_reads_unknown() {
        let store = store();
        let id = FateId::new_random(FateInstanceType::User);
        let view = store.read(id).await.unwrap();
        assert_eq!(view.status().await.unwrap(), TxStatus::Unknown);
    }

    #[tokio::test]
    async fn test_reservation_is_exclusive() {
        let store = store();
        let id = store.create().await.unwrap();

        let first = store.try_reserve(id).await.unwrap();
        assert!(first.is_some());
        assert!(store.try_reserve(id).await.unwrap().is_none());

        first.unwrap().unreserve(Duration::ZERO).await.unwrap();
        assert!(store.try_reserve(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_seed_is_idempotent_and_conflicts_on_op() {
        let store = store();
        let id = store.create().await.unwrap();

        let seeded = store
            .seed(FateOperation::TableCreate, id, &NoopStep, true)
            .await
            .unwrap();
        assert!(seeded);
        assert_eq!(
            store.read(id).await.unwrap().status().await.unwrap(),
            TxStatus::Submitted
        );

        // Same op again: accepted, no change.
        let again = store
            .seed(FateOperation::TableCreate, id, &NoopStep, true)
            .await
            .unwrap();
        assert!(!again);

        // Different op: conflict.
        let conflict = store
            .seed(FateOperation::TableDelete, id, &NoopStep, true)
            .await;
        assert!(matches!(conflict, Err(FateError::ConflictingSeed { .. })));
    }

    #[tokio::test]
    async fn test_keyed_seeding_dedupes() {
        let store = store();
        let key = FateKey::new(FateKeyKind::Split, b"table-7;row-m".to_vec());

        let first = store
            .seed_keyed(FateOperation::SystemSplit, key.clone(), &NoopStep, true)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .seed_keyed(FateOperation::SystemSplit, key.clone(), &NoopStep, true)
            .await
            .unwrap();
        assert!(second.is_none());

        let listed = store.list(Some(FateKeyKind::Split)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.as_ref(), Some(&key));
    }

    #[tokio::test]
    async fn test_push_respects_depth_cap() {
        let store = store();
        let id = store.create().await.unwrap();
        let mut handle = store.try_reserve(id).await.unwrap().unwrap();

        for _ in 0..MAX_STACK_DEPTH {
            handle.push(&NoopStep).await.unwrap();
        }
        assert!(matches!(
            handle.push(&NoopStep).await,
            Err(FateError::StackOverflow { .. })
        ));
        handle.unreserve(Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_status_enforces_state_machine() {
        let store = store();
        let id = store.create().await.unwrap();
        let mut handle = store.try_reserve(id).await.unwrap().unwrap();

        assert!(matches!(
            handle.set_status(TxStatus::Successful).await,
            Err(FateError::InvalidTransition { .. })
        ));
        handle.set_status(TxStatus::Submitted).await.unwrap();
        // idempotent repeat
        handle.set_status(TxStatus::Submitted).await.unwrap();
        handle.unreserve(Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_clears_only_dead_owners() {
        let store = store();
        let live_store = store.with_owner(Uuid::new_v4());

        let dead_id = store.create().await.unwrap();
        let live_id = store.create().await.unwrap();

        let dead_handle = store.try_reserve(dead_id).await.unwrap().unwrap();
        let live_handle = live_store.try_reserve(live_id).await.unwrap().unwrap();

        let liveness = InMemoryLiveness::new();
        liveness.register(live_store.owner());
        // store.owner() intentionally not registered: it is "dead"

        store.delete_dead_reservations(&liveness).await.unwrap();

        // Dead owner's lease was reclaimed; live owner's was not.
        assert!(store.try_reserve(dead_id).await.unwrap().is_some());
        assert!(store.try_reserve(live_id).await.unwrap().is_none());

        drop(dead_handle);
        live_handle.unreserve(Duration::ZERO).await.unwrap();
    }
}
