// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction store interfaces and backends.
//!
//! A store owns the durable record of every transaction: status, step stack,
//! keyed info, and the reservation lease. Two backends are provided:
//!
//! - [`SqliteFateStore`]: sqlx/SQLite, for durable deployments
//! - [`MemoryFateStore`]: in-process, for embedding and tests
//!
//! Every mutation made through a reserved handle is durable before the call
//! returns, and is guarded by a compare-and-swap on the reservation owner so
//! that only the holder can mutate (readers may observe concurrently).

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryFateStore;
pub use self::sqlite::SqliteFateStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{FateError, Result};
use crate::id::{FateId, FateInstanceType, FateKey, FateKeyKind};
use crate::ops::{FateOperation, TxInfo};
use crate::reservation::LivenessRegistry;
use crate::status::TxStatus;
use crate::step::{Step, StepError};

/// Maximum number of persisted stack entries per transaction. A push past
/// this cap fails with [`FateError::StackOverflow`].
pub const MAX_STACK_DEPTH: usize = 50;

/// Category of a failure recorded on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Handled business failure reported by a step.
    Acceptable,
    /// Step bug or external failure.
    Unexpected,
    /// The step chain exceeded the stack depth cap.
    StackOverflow,
    /// The transaction was cancelled before it started running.
    Cancelled,
}

/// The failure persisted under [`TxInfo::Exception`] and surfaced through
/// the admin interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFailure {
    /// What category of failure occurred.
    pub kind: FailureKind,
    /// Operator-facing description.
    pub message: String,
}

impl StoredFailure {
    /// Record a step failure.
    pub fn from_step_error(err: &StepError) -> Self {
        let kind = match err {
            StepError::Acceptable { .. } => FailureKind::Acceptable,
            StepError::Unexpected(_) | StepError::ShuttingDown => FailureKind::Unexpected,
            StepError::StackOverflow => FailureKind::StackOverflow,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }

    /// Record a stack overflow detected by the store.
    pub fn stack_overflow() -> Self {
        Self {
            kind: FailureKind::StackOverflow,
            message: format!("step stack exceeded {MAX_STACK_DEPTH} entries"),
        }
    }

    /// Record a user-requested cancellation.
    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "transaction cancelled by user".to_string(),
        }
    }
}

impl fmt::Display for StoredFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Consumer of runnable transaction ids discovered by
/// [`FateStore::runnable`]. `accept` may block; that is how back-pressure
/// reaches the scan loop.
#[async_trait]
pub trait RunnableSink: Send + Sync {
    /// Hand one runnable id to the consumer.
    async fn accept(&self, id: FateId);
}

/// Read-only view of a transaction. Available without a reservation.
#[async_trait]
pub trait ReadOnlyFateTx<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// The viewed transaction id.
    fn id(&self) -> FateId;

    /// Current status; [`TxStatus::Unknown`] when the id is not in the
    /// store.
    async fn status(&self) -> Result<TxStatus>;

    /// Rehydrate the top of the step stack, if any.
    async fn top(&self) -> Result<Option<Box<dyn Step<E>>>>;

    /// Block until the status is one of `targets` or `timeout` elapses.
    /// Returns the last observed status either way.
    async fn wait_for_status_change(
        &self,
        targets: &[TxStatus],
        timeout: Option<Duration>,
    ) -> Result<TxStatus>;
}

/// Exclusive handle to a reserved transaction.
///
/// Every mutation is durable before the call returns, and fails with
/// [`FateError::ReservationLost`] if the lease was cleared underneath us
/// (for example by the dead-reservation sweep after a liveness glitch).
#[async_trait]
pub trait FateTxHandle<E>: Send
where
    E: Send + Sync + 'static,
{
    /// The reserved transaction id.
    fn id(&self) -> FateId;

    /// Current status.
    async fn status(&self) -> Result<TxStatus>;

    /// Transition the status, enforcing the state machine. Setting the
    /// current status again is a no-op.
    async fn set_status(&mut self, new: TxStatus) -> Result<()>;

    /// Rehydrate the top of the step stack, if any.
    async fn top(&self) -> Result<Option<Box<dyn Step<E>>>>;

    /// Persist a new top-of-stack entry.
    async fn push(&mut self, step: &dyn Step<E>) -> Result<()>;

    /// Remove the top-of-stack entry.
    async fn pop(&mut self) -> Result<()>;

    /// Read one keyed info value.
    async fn get_info(&self, key: TxInfo) -> Result<Option<serde_json::Value>>;

    /// Write one keyed info value.
    async fn set_info(&mut self, key: TxInfo, value: serde_json::Value) -> Result<()>;

    /// Delete the whole transaction record. Subsequent `unreserve` is a
    /// no-op.
    async fn delete(&mut self) -> Result<()>;

    /// Release the lease. The transaction will not be offered as runnable
    /// again for at least `defer`.
    async fn unreserve(self: Box<Self>, defer: Duration) -> Result<()>;
}

/// Durable, crash-safe storage of all transaction records.
#[async_trait]
pub trait FateStore<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Which store family this is.
    fn instance_type(&self) -> FateInstanceType;

    /// Allocate an id and persist a `NEW` transaction with an empty stack.
    async fn create(&self) -> Result<FateId>;

    /// Allocate a `NEW` transaction tagged with a deduplication key, or
    /// return `None` when a transaction for the key already exists.
    async fn create_keyed(&self, key: &FateKey) -> Result<Option<FateId>>;

    /// Enumerate `(id, key)` pairs, optionally restricted to one key kind.
    /// Finite and unordered; consistent per item but not globally.
    async fn list(&self, kind: Option<FateKeyKind>) -> Result<Vec<(FateId, Option<FateKey>)>>;

    /// Repeatedly scan for runnable transactions (status permits progress,
    /// no reservation held, deferral elapsed), feeding each id to `sink`.
    /// Returns when `stop` fires.
    async fn runnable(&self, stop: CancellationToken, sink: Arc<dyn RunnableSink>) -> Result<()>;

    /// Non-blocking lease acquisition. Returns `None` when another owner
    /// holds the lease. An id the store does not know yields a handle whose
    /// status is [`TxStatus::Unknown`].
    async fn try_reserve(&self, id: FateId) -> Result<Option<Box<dyn FateTxHandle<E>>>>;

    /// Blocking lease acquisition. Only the admin surface uses this; the
    /// worker hot path always uses [`try_reserve`](Self::try_reserve).
    async fn reserve(&self, id: FateId) -> Result<Box<dyn FateTxHandle<E>>> {
        loop {
            if let Some(handle) = self.try_reserve(id).await? {
                return Ok(handle);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Read-only view of a transaction.
    async fn read(&self, id: FateId) -> Result<Box<dyn ReadOnlyFateTx<E>>>;

    /// Clear reservations whose owner is no longer alive. Touches only the
    /// reservation, never the transaction state.
    async fn delete_dead_reservations(&self, liveness: &dyn LivenessRegistry) -> Result<()>;

    /// Attach the initial step and operation to a transaction, moving it
    /// from `NEW` to `SUBMITTED`.
    ///
    /// Idempotent: repeating the seed with the same operation returns
    /// `Ok(false)`; a different operation fails with
    /// [`FateError::ConflictingSeed`]. Returns `Ok(true)` when this call
    /// performed the seed.
    async fn seed(
        &self,
        op: FateOperation,
        id: FateId,
        step: &dyn Step<E>,
        auto_clean: bool,
    ) -> Result<bool> {
        let mut handle = self.reserve(id).await?;

        let seeded = async {
            match handle.status().await? {
                TxStatus::New => {
                    handle
                        .set_info(TxInfo::FateOp, serde_json::to_value(op)?)
                        .await?;
                    handle
                        .set_info(TxInfo::AutoClean, serde_json::Value::Bool(auto_clean))
                        .await?;
                    handle.push(step).await?;
                    handle.set_status(TxStatus::Submitted).await?;
                    Ok(true)
                }
                TxStatus::Submitted => {
                    let existing = match handle.get_info(TxInfo::FateOp).await? {
                        Some(value) => serde_json::from_value::<FateOperation>(value)?,
                        None => return Ok(false),
                    };
                    if existing == op {
                        Ok(false)
                    } else {
                        Err(FateError::ConflictingSeed {
                            id,
                            existing,
                            requested: op,
                        })
                    }
                }
                // Already past seeding; nothing to do.
                _ => Ok(false),
            }
        }
        .await;

        let released = handle.unreserve(Duration::ZERO).await;
        let seeded = seeded?;
        released?;
        Ok(seeded)
    }

    /// Create and seed a transaction deduplicated by `key`. Returns the new
    /// id, or `None` when a transaction for the key already exists.
    async fn seed_keyed(
        &self,
        op: FateOperation,
        key: FateKey,
        step: &dyn Step<E>,
        auto_clean: bool,
    ) -> Result<Option<FateId>> {
        match self.create_keyed(&key).await? {
            Some(id) => {
                self.seed(op, id, step, auto_clean).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }
}
