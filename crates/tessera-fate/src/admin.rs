// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Administrative operations on transactions: list, cancel, wait, delete,
//! and fetching results of finished transactions.
//!
//! These only need a store handle, so the CLI can run them against a
//! database directly, without a live executor.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{FateError, Result};
use crate::id::{FateId, FateKey, FateKeyKind};
use crate::ops::TxInfo;
use crate::status::{FINISHED_STATES, TxStatus};
use crate::store::{FateStore, StoredFailure};

/// How many times `cancel` retries reservation acquisition.
const CANCEL_RESERVE_ATTEMPTS: u32 = 5;

/// Backoff between `cancel` reservation attempts.
const CANCEL_RESERVE_BACKOFF: Duration = Duration::from_millis(500);

/// Admin surface over a transaction store.
pub struct FateAdmin<E>
where
    E: Send + Sync + 'static,
{
    store: Arc<dyn FateStore<E>>,
}

impl<E> Clone for FateAdmin<E>
where
    E: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<E> FateAdmin<E>
where
    E: Send + Sync + 'static,
{
    /// Wrap a store.
    pub fn new(store: Arc<dyn FateStore<E>>) -> Self {
        Self { store }
    }

    /// Enumerate `(id, key)` pairs, optionally restricted to one key kind.
    pub async fn list(&self, kind: Option<FateKeyKind>) -> Result<Vec<(FateId, Option<FateKey>)>> {
        self.store.list(kind).await
    }

    /// Current status of a transaction; `UNKNOWN` for ids the store does
    /// not know.
    pub async fn status(&self, id: FateId) -> Result<TxStatus> {
        self.store.read(id).await?.status().await
    }

    /// Block until the transaction reaches a terminal status or `timeout`
    /// elapses. Returns the last observed status.
    pub async fn wait_for_completion(
        &self,
        id: FateId,
        timeout: Option<Duration>,
    ) -> Result<TxStatus> {
        self.store
            .read(id)
            .await?
            .wait_for_status_change(&FINISHED_STATES, timeout)
            .await
    }

    /// Attempt to cancel a transaction that has not started running.
    ///
    /// Succeeds only from `NEW` or `SUBMITTED`: the transaction transitions
    /// to `FAILED_IN_PROGRESS` with a "cancelled by user" failure recorded,
    /// and the next worker to pick it up runs the undo path. In-flight or
    /// finished transactions return `false`. Reservation acquisition is
    /// retried up to 5 times with 500 ms backoff.
    pub async fn cancel(&self, id: FateId) -> Result<bool> {
        for _ in 0..CANCEL_RESERVE_ATTEMPTS {
            let Some(mut handle) = self.store.try_reserve(id).await? else {
                // Reserved by a worker; give it a moment and retry.
                tokio::time::sleep(CANCEL_RESERVE_BACKOFF).await;
                continue;
            };

            let cancelled: Result<bool> = async {
                let status = handle.status().await?;
                match status {
                    TxStatus::New | TxStatus::Submitted => {
                        handle
                            .set_info(
                                TxInfo::Exception,
                                serde_json::to_value(StoredFailure::cancelled())?,
                            )
                            .await?;
                        handle.set_status(TxStatus::FailedInProgress).await?;
                        info!(fate_id = %id, "transaction cancelled by user");
                        Ok(true)
                    }
                    _ => {
                        info!(
                            fate_id = %id,
                            status = %status,
                            "cancel requested but transaction is already in progress or finished"
                        );
                        Ok(false)
                    }
                }
            }
            .await;

            let released = handle.unreserve(Duration::ZERO).await;
            let cancelled = cancelled?;
            released?;
            return Ok(cancelled);
        }

        info!(fate_id = %id, "unable to reserve transaction to cancel it");
        Ok(false)
    }

    /// Delete a transaction record.
    ///
    /// Permitted from `NEW`, `SUBMITTED`, `FAILED`, and `SUCCESSFUL`; a
    /// no-op for `UNKNOWN`; an error while the transaction is in flight.
    pub async fn delete(&self, id: FateId) -> Result<()> {
        let mut handle = self.store.reserve(id).await?;

        let deleted = async {
            let status = handle.status().await?;
            match status {
                TxStatus::New | TxStatus::Submitted | TxStatus::Failed | TxStatus::Successful => {
                    handle.delete().await?;
                    info!(fate_id = %id, "transaction deleted");
                    Ok(())
                }
                TxStatus::InProgress | TxStatus::FailedInProgress => Err(FateError::IllegalState {
                    id,
                    actual: status,
                    operation: "delete",
                }),
                // Does not exist; nothing to do.
                TxStatus::Unknown => Ok(()),
            }
        }
        .await;

        let released = handle.unreserve(Duration::ZERO).await;
        deleted?;
        released?;
        Ok(())
    }

    /// Fetch the recorded return value of a successful transaction.
    pub async fn get_return(&self, id: FateId) -> Result<Option<String>> {
        let handle = self.store.reserve(id).await?;

        let value = async {
            let status = handle.status().await?;
            if status != TxStatus::Successful {
                return Err(FateError::IllegalState {
                    id,
                    actual: status,
                    operation: "fetch the return value of",
                });
            }
            match handle.get_info(TxInfo::ReturnValue).await? {
                Some(serde_json::Value::String(value)) => Ok(Some(value)),
                _ => Ok(None),
            }
        }
        .await;

        let released = handle.unreserve(Duration::ZERO).await;
        let value = value?;
        released?;
        Ok(value)
    }

    /// Fetch the recorded failure of a failed transaction.
    pub async fn get_exception(&self, id: FateId) -> Result<Option<StoredFailure>> {
        let handle = self.store.reserve(id).await?;

        let failure = async {
            let status = handle.status().await?;
            if status != TxStatus::Failed {
                return Err(FateError::IllegalState {
                    id,
                    actual: status,
                    operation: "fetch the exception of",
                });
            }
            match handle.get_info(TxInfo::Exception).await? {
                Some(value) => Ok(Some(serde_json::from_value::<StoredFailure>(value)?)),
                None => Ok(None),
            }
        }
        .await;

        let released = handle.unreserve(Duration::ZERO).await;
        let failure = failure?;
        released?;
        Ok(failure)
    }
}
