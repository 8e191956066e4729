// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The fault-tolerant executor instance.
//!
//! A [`Fate`] owns everything it needs (store handle, worker pool,
//! background tasks, cancellation token), so multiple executors (for
//! example one per store family) coexist in a process without shared
//! mutable state.
//!
//! Background tasks spawned on start:
//!
//! | Task | Purpose |
//! |------|---------|
//! | work finder | single producer feeding the rendezvous channel |
//! | pool supervisor | reconciles worker count with live configuration |
//! | dead reservation cleaner | optional; reclaims leases of dead owners |
//!
//! Workers themselves are spawned and retired exclusively by the
//! supervisor, so the pool fills on its first tick (after
//! [`INITIAL_DELAY`] by default).

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin::FateAdmin;
use crate::config::LiveConfig;
use crate::error::Result;
use crate::finder::WorkFinder;
use crate::handoff::WorkQueue;
use crate::id::{FateId, FateKey, FateKeyKind};
use crate::ops::FateOperation;
use crate::reservation::{DeadReservationCleaner, LivenessRegistry};
use crate::status::TxStatus;
use crate::step::Step;
use crate::store::{FateStore, StoredFailure};
use crate::supervisor::PoolSupervisor;
use crate::worker::{WorkerContext, WorkerSet};

/// Delay before the first tick of each periodic background task.
pub const INITIAL_DELAY: Duration = Duration::from_secs(3);

/// Cadence of the dead reservation sweep.
pub const DEAD_RES_CLEANUP_DELAY: Duration = Duration::from_secs(3 * 60);

/// Cadence of the pool supervisor.
pub const POOL_WATCHER_DELAY: Duration = Duration::from_secs(30);

/// Predicate asking whether the host process is shutting down.
///
/// Consulted when a step fails: during shutdown the failure is suppressed
/// and the worker parks, so the transaction resumes on the next manager
/// instead of failing on a transient shutdown-induced error.
pub trait ShutdownSignal: Send + Sync {
    /// Whether process shutdown is in progress.
    fn in_progress(&self) -> bool;
}

/// Default [`ShutdownSignal`]: never reports shutdown.
pub struct NeverShuttingDown;

impl ShutdownSignal for NeverShuttingDown {
    fn in_progress(&self) -> bool {
        false
    }
}

/// Builder for a [`Fate`] executor.
pub struct FateBuilder<E>
where
    E: Send + Sync + 'static,
{
    store: Option<Arc<dyn FateStore<E>>>,
    env: Option<Arc<E>>,
    config: Option<LiveConfig>,
    liveness: Option<Arc<dyn LivenessRegistry>>,
    run_dead_reservation_cleaner: bool,
    shutdown: Arc<dyn ShutdownSignal>,
    initial_delay: Duration,
    pool_watcher_delay: Duration,
    dead_res_cleanup_delay: Duration,
}

impl<E> Default for FateBuilder<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            store: None,
            env: None,
            config: None,
            liveness: None,
            run_dead_reservation_cleaner: false,
            shutdown: Arc::new(NeverShuttingDown),
            initial_delay: INITIAL_DELAY,
            pool_watcher_delay: POOL_WATCHER_DELAY,
            dead_res_cleanup_delay: DEAD_RES_CLEANUP_DELAY,
        }
    }
}

impl<E> FateBuilder<E>
where
    E: Send + Sync + 'static,
{
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transaction store (required).
    pub fn store(mut self, store: Arc<dyn FateStore<E>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the step environment (required).
    pub fn env(mut self, env: Arc<E>) -> Self {
        self.env = Some(env);
        self
    }

    /// Set the live configuration handle. Defaults to
    /// [`LiveConfig::default`].
    pub fn config(mut self, config: LiveConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the liveness registry, required when the dead reservation
    /// cleaner is enabled.
    pub fn liveness(mut self, liveness: Arc<dyn LivenessRegistry>) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Whether to run the dead reservation cleaner. Enable it for exactly
    /// one executor per store.
    pub fn run_dead_reservation_cleaner(mut self, run: bool) -> Self {
        self.run_dead_reservation_cleaner = run;
        self
    }

    /// Set the process shutdown predicate. Defaults to
    /// [`NeverShuttingDown`].
    pub fn shutdown_signal(mut self, shutdown: Arc<dyn ShutdownSignal>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Override the initial delay of periodic tasks. Tests shorten this so
    /// the pool fills quickly.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Override the pool supervisor cadence.
    pub fn pool_watcher_delay(mut self, delay: Duration) -> Self {
        self.pool_watcher_delay = delay;
        self
    }

    /// Override the dead reservation sweep cadence.
    pub fn dead_res_cleanup_delay(mut self, delay: Duration) -> Self {
        self.dead_res_cleanup_delay = delay;
        self
    }

    /// Spawn the executor's background tasks and return the running
    /// instance. Must be called within a tokio runtime.
    pub fn start(self) -> anyhow::Result<Fate<E>> {
        let store = self.store.ok_or_else(|| anyhow!("store is required"))?;
        let env = self.env.ok_or_else(|| anyhow!("environment is required"))?;
        let live_config = self.config.unwrap_or_default();

        let cancel = CancellationToken::new();
        let queue = Arc::new(WorkQueue::new());
        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            env,
            queue: queue.clone(),
            cancel: cancel.clone(),
            shutdown: self.shutdown,
        });
        let workers = WorkerSet::new();

        let finder = tokio::spawn(WorkFinder::new(ctx.clone()).run());
        let supervisor = tokio::spawn(
            PoolSupervisor::new(
                ctx.clone(),
                workers.clone(),
                live_config.subscribe(),
                self.initial_delay,
                self.pool_watcher_delay,
            )
            .run(),
        );

        let cleaner = if self.run_dead_reservation_cleaner {
            let liveness = self.liveness.ok_or_else(|| {
                anyhow!("liveness registry is required when the dead reservation cleaner is enabled")
            })?;
            Some(tokio::spawn(
                DeadReservationCleaner::new(
                    store.clone(),
                    liveness,
                    self.initial_delay,
                    self.dead_res_cleanup_delay,
                    cancel.clone(),
                )
                .run(),
            ))
        } else {
            None
        };

        info!(store = %store.instance_type(), "fate executor started");

        Ok(Fate {
            admin: FateAdmin::new(store.clone()),
            store,
            cancel,
            workers,
            live_config,
            finder,
            supervisor,
            cleaner,
        })
    }
}

/// A running fault-tolerant executor.
pub struct Fate<E>
where
    E: Send + Sync + 'static,
{
    store: Arc<dyn FateStore<E>>,
    admin: FateAdmin<E>,
    cancel: CancellationToken,
    workers: Arc<WorkerSet>,
    live_config: LiveConfig,
    finder: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    cleaner: Option<JoinHandle<()>>,
}

impl<E> Fate<E>
where
    E: Send + Sync + 'static,
{
    /// Create a new builder.
    pub fn builder() -> FateBuilder<E> {
        FateBuilder::new()
    }

    /// Allocate a transaction id before doing any work.
    pub async fn start_transaction(&self) -> Result<FateId> {
        self.store.create().await
    }

    /// Attach the initial step and operation to a transaction.
    ///
    /// Safe to call repeatedly for a transaction, but it only seeds once;
    /// returns whether this call performed the seed.
    pub async fn seed_transaction(
        &self,
        op: FateOperation,
        id: FateId,
        step: &dyn Step<E>,
        auto_clean: bool,
        goal_message: &str,
    ) -> Result<bool> {
        info!(fate_id = %id, op = %op, goal = goal_message, "seeding transaction");
        self.store.seed(op, id, step, auto_clean).await
    }

    /// Create and seed a transaction deduplicated by a business key.
    /// Returns the new id, or `None` when a transaction for the key
    /// already exists.
    pub async fn seed_keyed_transaction(
        &self,
        op: FateOperation,
        key: FateKey,
        step: &dyn Step<E>,
        auto_clean: bool,
    ) -> Result<Option<FateId>> {
        self.store.seed_keyed(op, key, step, auto_clean).await
    }

    /// Block until the transaction reaches a terminal status or `timeout`
    /// elapses. Returns the last observed status.
    pub async fn wait_for_completion(
        &self,
        id: FateId,
        timeout: Option<Duration>,
    ) -> Result<TxStatus> {
        self.admin.wait_for_completion(id, timeout).await
    }

    /// Attempt to cancel a transaction that has not started running. See
    /// [`FateAdmin::cancel`].
    pub async fn cancel(&self, id: FateId) -> Result<bool> {
        self.admin.cancel(id).await
    }

    /// Delete a finished (or never-started) transaction record. See
    /// [`FateAdmin::delete`].
    pub async fn delete(&self, id: FateId) -> Result<()> {
        self.admin.delete(id).await
    }

    /// Fetch the recorded return value of a successful transaction.
    pub async fn get_return(&self, id: FateId) -> Result<Option<String>> {
        self.admin.get_return(id).await
    }

    /// Fetch the recorded failure of a failed transaction.
    pub async fn get_exception(&self, id: FateId) -> Result<Option<StoredFailure>> {
        self.admin.get_exception(id).await
    }

    /// Enumerate transactions, optionally restricted to one key kind.
    pub async fn list(&self, kind: Option<FateKeyKind>) -> Result<Vec<(FateId, Option<FateKey>)>> {
        self.admin.list(kind).await
    }

    /// The admin surface bound to this executor's store.
    pub fn admin(&self) -> &FateAdmin<E> {
        &self.admin
    }

    /// The live configuration handle; updates take effect on the next
    /// supervisor tick.
    pub fn live_config(&self) -> &LiveConfig {
        &self.live_config
    }

    /// Number of workers currently running. Exposed for tests and
    /// diagnostics.
    pub async fn tx_runners_active(&self) -> usize {
        self.workers.running().await
    }

    /// Initiate shutdown and wait up to `timeout` for background tasks to
    /// stop; whatever is still running after the deadline is aborted.
    pub async fn shutdown(self, timeout: Duration) {
        info!("fate executor shutting down");
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut tasks: Vec<(&str, JoinHandle<()>)> =
            vec![("work finder", self.finder), ("pool supervisor", self.supervisor)];
        if let Some(cleaner) = self.cleaner {
            tasks.push(("dead reservation cleaner", cleaner));
        }

        for (name, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!(task = name, "background task did not stop in time; aborting it");
                task.abort();
            }
        }

        if !self.workers.wait_drained(deadline).await {
            warn!("fate workers did not drain in time; aborting the remainder");
            self.workers.abort_all().await;
        }

        info!("fate executor shutdown complete");
    }
}
