// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction workers.
//!
//! A worker loops: accept an id from the rendezvous channel, try to reserve
//! it, then either execute steps forward or drive the undo path, always
//! releasing the reservation before looping. Workers never exit
//! mid-transaction; the stop flag is only honored between transactions,
//! which is what makes pool shrink graceful.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{FateError, Result};
use crate::fate::ShutdownSignal;
use crate::handoff::WorkQueue;
use crate::id::FateId;
use crate::ops::TxInfo;
use crate::status::TxStatus;
use crate::step::{Step, StepError};
use crate::store::{FailureKind, FateStore, FateTxHandle, StoredFailure};

/// How long a worker waits on the rendezvous channel per attempt, and how
/// long the finder waits per transfer attempt. Short, so stop signals stay
/// responsive.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State shared by every worker, the finder, and the supervisor.
pub(crate) struct WorkerContext<E>
where
    E: Send + Sync + 'static,
{
    pub(crate) store: Arc<dyn FateStore<E>>,
    pub(crate) env: Arc<E>,
    pub(crate) queue: Arc<WorkQueue<FateId>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) shutdown: Arc<dyn ShutdownSignal>,
}

/// One worker. Runs until the executor stops or its own stop flag is set.
pub(crate) struct TransactionRunner<E>
where
    E: Send + Sync + 'static,
{
    ctx: Arc<WorkerContext<E>>,
    stop: Arc<AtomicBool>,
}

impl<E> TransactionRunner<E>
where
    E: Send + Sync + 'static,
{
    pub(crate) async fn run(self) {
        trace!("transaction runner started");
        while !self.ctx.cancel.is_cancelled() && !self.stop.load(Ordering::Relaxed) {
            let Some(id) = self.ctx.queue.accept(POLL_INTERVAL).await else {
                continue;
            };
            let handle = match self.ctx.store.try_reserve(id).await {
                Ok(Some(handle)) => handle,
                // Another worker won the reservation; drop the id.
                Ok(None) => continue,
                Err(e) => {
                    error!(fate_id = %id, error = %e, "failed to reserve offered transaction");
                    continue;
                }
            };
            self.run_transaction(handle).await;
        }
        trace!("transaction runner exiting");
    }

    /// Drive one reserved transaction as far as it will go, then release
    /// the reservation no matter what happened.
    async fn run_transaction(&self, handle: Box<dyn FateTxHandle<E>>) {
        let id = handle.id();
        let mut handle = handle;

        let defer = match self.drive(&mut handle).await {
            Ok(defer) => defer,
            Err(e) => {
                error!(fate_id = %id, error = %e, "uncaught failure in fate worker");
                Duration::ZERO
            }
        };

        if let Err(e) = handle.unreserve(defer).await {
            error!(fate_id = %id, error = %e, "failed to release reservation");
        }
    }

    async fn drive(&self, handle: &mut Box<dyn FateTxHandle<E>>) -> Result<Duration> {
        let status = handle.status().await?;
        match status {
            TxStatus::FailedInProgress => {
                self.process_failed(handle).await?;
                Ok(Duration::ZERO)
            }
            TxStatus::Submitted | TxStatus::InProgress => {
                match self.execute(handle, status).await {
                    Ok(defer) => Ok(defer),
                    // A store failure that surfaced mid-execution fails the
                    // transaction like any other step failure would.
                    Err(e) => {
                        warn!(fate_id = %handle.id(), error = %e, "store failure while executing transaction");
                        self.transition_to_failed(
                            handle,
                            StoredFailure {
                                kind: FailureKind::Unexpected,
                                message: e.to_string(),
                            },
                        )
                        .await?;
                        Ok(Duration::ZERO)
                    }
                }
            }
            // Raced with an admin action (deleted, cancelled to completion,
            // or not yet seeded); nothing to run.
            _ => Ok(Duration::ZERO),
        }
    }

    /// Execute as many steps as possible. Returns the deferral to apply
    /// when releasing the reservation.
    async fn execute(
        &self,
        handle: &mut Box<dyn FateTxHandle<E>>,
        mut status: TxStatus,
    ) -> Result<Duration> {
        let id = handle.id();
        let mut op = handle.top().await?;
        let mut prev: Option<Box<dyn Step<E>>> = None;

        while let Some(step) = op.take() {
            let defer = match self.execute_is_ready(id, step.as_ref()).await {
                Ok(defer) => defer,
                Err(e) => {
                    self.fail_step(handle, e, step.name()).await?;
                    return Ok(Duration::ZERO);
                }
            };
            if !defer.is_zero() {
                return Ok(defer);
            }

            if status == TxStatus::Submitted {
                handle.set_status(TxStatus::InProgress).await?;
                status = TxStatus::InProgress;
            }

            match self.execute_call(id, step.as_ref()).await {
                Err(e) => {
                    self.fail_step(handle, e, step.name()).await?;
                    return Ok(Duration::ZERO);
                }
                Ok(Some(next)) => {
                    // Persist the completion of this step before running the
                    // next, so process death does not rerun completed steps.
                    match handle.push(next.as_ref()).await {
                        Ok(()) => {
                            prev = Some(step);
                            op = Some(next);
                        }
                        Err(FateError::StackOverflow { .. }) => {
                            // The step that failed to push never ran; only
                            // already-pushed steps get undone.
                            warn!(fate_id = %id, "step chain exceeded the stack depth cap");
                            self.transition_to_failed(handle, StoredFailure::stack_overflow())
                                .await?;
                            return Ok(Duration::ZERO);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(None) => {
                    prev = Some(step);
                }
            }
        }

        if let Some(last) = prev.as_ref()
            && let Some(ret) = last.return_value()
        {
            handle
                .set_info(TxInfo::ReturnValue, serde_json::Value::String(ret))
                .await?;
        }
        handle.set_status(TxStatus::Successful).await?;
        info!(fate_id = %id, "transaction successful");
        self.clean_up(handle).await?;
        Ok(Duration::ZERO)
    }

    async fn execute_is_ready(
        &self,
        id: FateId,
        step: &dyn Step<E>,
    ) -> std::result::Result<Duration, StepError> {
        let start = std::time::Instant::now();
        let defer = step.ready(id, self.ctx.env.as_ref()).await?;
        debug!(
            step = step.name(),
            fate_id = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            defer_ms = defer.as_millis() as u64,
            "step readiness checked"
        );
        Ok(defer)
    }

    async fn execute_call(
        &self,
        id: FateId,
        step: &dyn Step<E>,
    ) -> std::result::Result<Option<Box<dyn Step<E>>>, StepError> {
        let start = std::time::Instant::now();
        let next = step.call(id, self.ctx.env.as_ref()).await?;
        debug!(
            step = step.name(),
            fate_id = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            next = next.as_ref().map(|n| n.name().to_string()).unwrap_or_else(|| "none".to_string()),
            "step executed"
        );
        Ok(next)
    }

    /// Record a step failure and transition the transaction onto the undo
    /// path, unless the host process is shutting down, in which case the
    /// worker parks forever so the transaction resumes on the next manager
    /// instead of burning on a transient shutdown-induced error.
    async fn fail_step(
        &self,
        handle: &mut Box<dyn FateTxHandle<E>>,
        err: StepError,
        step_name: &str,
    ) -> Result<()> {
        let id = handle.id();

        if matches!(err, StepError::ShuttingDown) || self.ctx.shutdown.in_progress() {
            self.park_for_shutdown(id, &err).await;
            // not reached
        }

        match &err {
            StepError::Acceptable { detail } => {
                info!(fate_id = %id, step = step_name, detail = %detail, "step reported acceptable failure");
            }
            _ => {
                warn!(fate_id = %id, step = step_name, error = %err, "step failed");
            }
        }

        self.transition_to_failed(handle, StoredFailure::from_step_error(&err))
            .await
    }

    /// Never returns: waits for the process to die while holding the
    /// reservation, preventing this worker from failing the transaction.
    async fn park_for_shutdown(&self, id: FateId, err: &StepError) {
        match err {
            StepError::Acceptable { .. } => {
                debug!(fate_id = %id, error = %err, "ignoring failure during process shutdown");
            }
            e if e.is_io() => {
                info!(fate_id = %id, "ignoring I/O failure likely caused by process shutdown");
            }
            _ => {
                warn!(fate_id = %id, error = %err, "ignoring failure possibly caused by process shutdown");
            }
        }
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    async fn transition_to_failed(
        &self,
        handle: &mut Box<dyn FateTxHandle<E>>,
        failure: StoredFailure,
    ) -> Result<()> {
        let id = handle.id();
        handle
            .set_info(TxInfo::Exception, serde_json::to_value(&failure)?)
            .await?;
        handle.set_status(TxStatus::FailedInProgress).await?;
        info!(fate_id = %id, "transaction marked FAILED_IN_PROGRESS");
        Ok(())
    }

    /// The undo path: unwind every pushed step in reverse, then finish.
    async fn process_failed(&self, handle: &mut Box<dyn FateTxHandle<E>>) -> Result<()> {
        let id = handle.id();
        while let Some(step) = handle.top().await? {
            if let Err(e) = step.undo(id, self.ctx.env.as_ref()).await {
                warn!(fate_id = %id, step = step.name(), error = %e, "failed to undo step");
            }
            // The pop is durable only after the undo returned.
            handle.pop().await?;
        }
        handle.set_status(TxStatus::Failed).await?;
        info!(fate_id = %id, "transaction failed");
        self.clean_up(handle).await
    }

    /// Delete the record when auto-clean is set, otherwise drop the
    /// persisted step payloads and keep the header for later inspection.
    async fn clean_up(&self, handle: &mut Box<dyn FateTxHandle<E>>) -> Result<()> {
        let auto_clean = matches!(
            handle.get_info(TxInfo::AutoClean).await?,
            Some(serde_json::Value::Bool(true))
        );
        if auto_clean {
            handle.delete().await
        } else {
            while handle.top().await?.is_some() {
                handle.pop().await?;
            }
            Ok(())
        }
    }
}

struct WorkerEntry {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Bookkeeping for the set of live workers. Workers register themselves on
/// spawn and deregister on exit; the supervisor is the only caller of
/// [`spawn`](Self::spawn) and [`flag_stop_excess`](Self::flag_stop_excess).
pub(crate) struct WorkerSet {
    inner: Mutex<HashMap<u64, WorkerEntry>>,
    next_id: AtomicU64,
}

impl WorkerSet {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Number of workers currently registered.
    pub(crate) async fn running(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Spawn one worker onto the runtime.
    pub(crate) async fn spawn<E>(self: &Arc<Self>, ctx: Arc<WorkerContext<E>>)
    where
        E: Send + Sync + 'static,
    {
        let worker_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(AtomicBool::new(false));

        self.inner.lock().await.insert(
            worker_id,
            WorkerEntry {
                stop: stop.clone(),
                join: None,
            },
        );

        let set = self.clone();
        let runner = TransactionRunner { ctx, stop };
        let join = tokio::spawn(async move {
            runner.run().await;
            set.inner.lock().await.remove(&worker_id);
        });

        // The worker may already have finished and deregistered; only a
        // still-registered entry keeps the abort handle.
        if let Some(entry) = self.inner.lock().await.get_mut(&worker_id) {
            entry.join = Some(join);
        }
    }

    /// Ensure `excess` workers carry a stop flag, skipping already-flagged
    /// ones.
    pub(crate) async fn flag_stop_excess(&self, excess: usize) {
        let inner = self.inner.lock().await;
        let already = inner
            .values()
            .filter(|e| e.stop.load(Ordering::Relaxed))
            .count();
        let mut to_flag = excess.saturating_sub(already);
        for entry in inner.values() {
            if to_flag == 0 {
                break;
            }
            if entry
                .stop
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                trace!("flagged a transaction runner to stop");
                to_flag -= 1;
            }
        }
    }

    /// Wait until every worker has deregistered or `deadline` passes.
    /// Returns whether the set drained.
    pub(crate) async fn wait_drained(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            if self.running().await == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Abort every remaining worker task.
    pub(crate) async fn abort_all(&self) {
        let mut inner = self.inner.lock().await;
        for (_, entry) in inner.drain() {
            if let Some(join) = entry.join {
                join.abort();
            }
        }
    }
}
