// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The work finder: a single task that discovers runnable transactions and
//! hands them to workers.
//!
//! One producer, not one per worker: N workers independently rescanning the
//! store would multiply load on it for no benefit. The handoff is a
//! rendezvous transfer rather than a queue so that a saturated pool stalls
//! the scan instead of piling up duplicate ids.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handoff::WorkQueue;
use crate::id::FateId;
use crate::store::RunnableSink;
use crate::worker::{POLL_INTERVAL, WorkerContext};

pub(crate) struct WorkFinder<E>
where
    E: Send + Sync + 'static,
{
    ctx: Arc<WorkerContext<E>>,
}

impl<E> WorkFinder<E>
where
    E: Send + Sync + 'static,
{
    pub(crate) fn new(ctx: Arc<WorkerContext<E>>) -> Self {
        Self { ctx }
    }

    pub(crate) async fn run(self) {
        info!("fate work finder started");
        while !self.ctx.cancel.is_cancelled() {
            let sink = Arc::new(QueueSink {
                queue: self.ctx.queue.clone(),
                cancel: self.ctx.cancel.clone(),
            });
            match self
                .ctx
                .store
                .runnable(self.ctx.cancel.clone(), sink)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    if self.ctx.cancel.is_cancelled() {
                        debug!(error = %e, "failure while finding fate work during shutdown");
                    } else {
                        warn!(error = %e, "failure while attempting to find fate work");
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        }
        info!("fate work finder stopped");
    }
}

struct QueueSink {
    queue: Arc<WorkQueue<FateId>>,
    cancel: CancellationToken,
}

#[async_trait]
impl RunnableSink for QueueSink {
    async fn accept(&self, id: FateId) {
        // Retry the same id in bounded windows until a worker takes it, so
        // the stop signal is checked frequently and the store is rescanned
        // only once a worker is actually ready for more work.
        while !self.cancel.is_cancelled() {
            if self.queue.offer(id, POLL_INTERVAL).await {
                break;
            }
        }
    }
}
