// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tessera FATE: the fault-tolerant executor behind long-running manager
//! operations (create/clone/delete/compact tables, namespace operations,
//! bulk imports, splits, merges).
//!
//! Every transaction is persisted step by step, so a manager crash or
//! failover resumes in-flight work without loss, duplication, or deadlock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Fate<E> instance                        │
//! │                                                                  │
//! │  ┌─────────────┐   rendezvous    ┌──────────────────────────┐    │
//! │  │ work finder │ ──────────────► │ worker pool              │    │
//! │  │ (1 task)    │    channel      │ (N TransactionRunners)   │    │
//! │  └──────┬──────┘                 └───────────┬──────────────┘    │
//! │         │ runnable scan                      │ reserve / steps   │
//! │         ▼                                    ▼                   │
//! │  ┌──────────────────────────────────────────────────────────┐    │
//! │  │        transaction store  (SQLite / in-process)          │    │
//! │  │   status · step stack · keyed info · reservation lease   │    │
//! │  └──────────────────────────────────────────────────────────┘    │
//! │         ▲                                    ▲                   │
//! │         │ resize / idle sampling             │ dead-owner sweep  │
//! │  ┌──────┴──────────┐                ┌────────┴────────────────┐  │
//! │  │ pool supervisor │                │ dead reservation cleaner│  │
//! │  └─────────────────┘                └─────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Execution model
//!
//! A transaction carries a persisted stack of [`step::Step`]s. A worker
//! reserves the transaction, asks the top step whether it is
//! [`ready`](step::Step::ready), runs its [`call`](step::Step::call), and
//! durably pushes the returned successor before executing it, so after a
//! crash, completed steps are never rerun. A failed step flips the
//! transaction to `FAILED_IN_PROGRESS`, and the next worker unwinds the
//! stack through [`undo`](step::Step::undo) in reverse order.
//!
//! Exactly one worker at a time can hold a transaction: reservations are
//! compare-and-swap leases bound to the owning process's liveness record,
//! and a periodic sweep reclaims leases whose owner died.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_fate::{Fate, FateInstanceType, FateOperation, LiveConfig};
//! use tessera_fate::step::StepRegistry;
//! use tessera_fate::store::SqliteFateStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = StepRegistry::new();
//!     registry.register::<CreateTableStep>("create_table");
//!
//!     let store = Arc::new(
//!         SqliteFateStore::from_path(".data/fate.db", FateInstanceType::User, Arc::new(registry))
//!             .await?,
//!     );
//!
//!     let fate = Fate::builder()
//!         .store(store)
//!         .env(Arc::new(manager_env))
//!         .config(LiveConfig::new(tessera_fate::Config::from_env()?))
//!         .start()?;
//!
//!     let id = fate.start_transaction().await?;
//!     fate.seed_transaction(
//!         FateOperation::TableCreate,
//!         id,
//!         &CreateTableStep::new("orders"),
//!         true,
//!         "create table orders",
//!     )
//!     .await?;
//!     fate.wait_for_completion(id, None).await?;
//!
//!     fate.shutdown(std::time::Duration::from_secs(30)).await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

/// Administrative operations: list, cancel, wait, delete, fetch results.
pub mod admin;

/// Configuration from environment variables plus the hot-reload handle.
pub mod config;

/// Error types.
pub mod error;

/// Transaction ids, instance types, and deduplication keys.
pub mod id;

/// The closed set of manager operations and per-transaction info slots.
pub mod ops;

/// Reservation liveness and the dead-reservation sweep.
pub mod reservation;

/// The transaction status state machine.
pub mod status;

/// The step protocol: `ready` / `call` / `undo`, serialization, registry.
pub mod step;

/// Transaction store interfaces and the SQLite / in-process backends.
pub mod store;

mod fate;
mod finder;
mod handoff;
mod supervisor;
mod worker;

pub use crate::admin::FateAdmin;
pub use crate::config::{Config, ConfigError, LiveConfig};
pub use crate::error::{FateError, Result};
pub use crate::fate::{
    DEAD_RES_CLEANUP_DELAY, Fate, FateBuilder, INITIAL_DELAY, NeverShuttingDown,
    POOL_WATCHER_DELAY, ShutdownSignal,
};
pub use crate::id::{FateId, FateInstanceType, FateKey, FateKeyKind};
pub use crate::ops::{FateOperation, TxInfo, WireOperation};
pub use crate::reservation::{DeadReservationCleaner, InMemoryLiveness, LivenessRegistry};
pub use crate::status::{FINISHED_STATES, TxStatus};
pub use crate::step::{SavedStep, Step, StepError, StepRegistry};
pub use crate::store::{
    FailureKind, FateStore, FateTxHandle, MAX_STACK_DEPTH, MemoryFateStore, ReadOnlyFateTx,
    RunnableSink, SqliteFateStore, StoredFailure,
};
