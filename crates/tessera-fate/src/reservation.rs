// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reservation liveness: the sweep that reclaims leases held by dead
//! processes.
//!
//! A reservation is bound to the owning process's liveness record in the
//! external coordination service. If that process dies mid-transaction, its
//! leases would pin the transactions forever; the cleaner periodically asks
//! the liveness registry about every held reservation and clears the dead
//! ones. Only reservations are touched; transaction state is left intact,
//! so the next reserving worker resumes from the persisted stack.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::store::FateStore;

/// Answers whether a reservation owner's process is still alive.
///
/// Implemented by the manager against its coordination service; tests
/// provide [`InMemoryLiveness`].
#[async_trait]
pub trait LivenessRegistry: Send + Sync {
    /// Whether a liveness record exists for `owner`.
    async fn is_alive(&self, owner: Uuid) -> bool;
}

/// Liveness registry backed by an in-process set. Register a process id at
/// startup, remove it to simulate (or record) death.
#[derive(Default)]
pub struct InMemoryLiveness {
    alive: RwLock<HashSet<Uuid>>,
}

impl InMemoryLiveness {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `owner` alive.
    pub fn register(&self, owner: Uuid) {
        if let Ok(mut alive) = self.alive.write() {
            alive.insert(owner);
        }
    }

    /// Remove `owner`'s liveness record.
    pub fn deregister(&self, owner: Uuid) {
        if let Ok(mut alive) = self.alive.write() {
            alive.remove(&owner);
        }
    }
}

#[async_trait]
impl LivenessRegistry for InMemoryLiveness {
    async fn is_alive(&self, owner: Uuid) -> bool {
        self.alive.read().map(|a| a.contains(&owner)).unwrap_or(false)
    }
}

/// Background task that periodically clears dead reservations.
pub struct DeadReservationCleaner<E>
where
    E: Send + Sync + 'static,
{
    store: Arc<dyn FateStore<E>>,
    liveness: Arc<dyn LivenessRegistry>,
    initial_delay: Duration,
    interval: Duration,
    cancel: CancellationToken,
}

impl<E> DeadReservationCleaner<E>
where
    E: Send + Sync + 'static,
{
    /// Create a cleaner over `store`, checking owners against `liveness`.
    pub fn new(
        store: Arc<dyn FateStore<E>>,
        liveness: Arc<dyn LivenessRegistry>,
        initial_delay: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            liveness,
            initial_delay,
            interval,
            cancel,
        }
    }

    /// Run the sweep loop until cancelled.
    pub async fn run(self) {
        info!(
            store = %self.store.instance_type(),
            interval_secs = self.interval.as_secs(),
            "dead reservation cleaner started"
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("dead reservation cleaner cancelled before first sweep");
                return;
            }
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        loop {
            if let Err(e) = self
                .store
                .delete_dead_reservations(self.liveness.as_ref())
                .await
            {
                error!(error = %e, "dead reservation sweep failed");
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(store = %self.store.instance_type(), "dead reservation cleaner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_liveness() {
        let liveness = InMemoryLiveness::new();
        let owner = Uuid::new_v4();

        assert!(!liveness.is_alive(owner).await);
        liveness.register(owner);
        assert!(liveness.is_alive(owner).await);
        liveness.deregister(owner);
        assert!(!liveness.is_alive(owner).await);
    }
}
