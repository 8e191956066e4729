// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The pool supervisor: the only component that spawns or retires workers.
//!
//! On every tick it reconciles the live pool against the configured size,
//! then, when the size is stable, samples how many workers are idle on
//! the rendezvous channel. A sustained stretch with zero idle workers is
//! the signal that the pool is undersized, surfaced as a warning rather
//! than an automatic grow.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::worker::{WorkerContext, WorkerSet};

pub(crate) struct PoolSupervisor<E>
where
    E: Send + Sync + 'static,
{
    ctx: Arc<WorkerContext<E>>,
    workers: Arc<WorkerSet>,
    config: watch::Receiver<Config>,
    initial_delay: Duration,
    interval: Duration,
    idle_history: VecDeque<usize>,
}

impl<E> PoolSupervisor<E>
where
    E: Send + Sync + 'static,
{
    pub(crate) fn new(
        ctx: Arc<WorkerContext<E>>,
        workers: Arc<WorkerSet>,
        config: watch::Receiver<Config>,
        initial_delay: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            ctx,
            workers,
            config,
            initial_delay,
            interval,
            idle_history: VecDeque::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "fate pool supervisor started"
        );

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        loop {
            self.tick().await;

            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("fate pool supervisor stopped");
    }

    async fn tick(&mut self) {
        let config = self.config.borrow().clone();
        let running = self.workers.running().await;
        let target = config.pool_size;

        if target > running {
            info!(running, target, "growing fate worker pool");
            for _ in 0..(target - running) {
                self.workers.spawn(self.ctx.clone()).await;
            }
            self.idle_history.clear();
        } else if target < running {
            info!(running, target, "shrinking fate worker pool");
            self.workers.flag_stop_excess(running - target).await;
        } else {
            self.sample_idle(&config);
        }
    }

    /// Maintain a ring of idle-worker samples covering the configured
    /// window. If ≥95% of a full window saw zero idle workers, suggest a
    /// bigger pool and reset the window so the warning is not repeated
    /// every tick.
    fn sample_idle(&mut self, config: &Config) {
        let window_minutes = std::cmp::min(60, config.idle_check_interval.as_secs() / 60);
        if window_minutes == 0 {
            self.idle_history.clear();
            return;
        }

        // Two samples per minute: this task runs every 30 seconds.
        let window = (window_minutes * 2) as usize;
        if self.idle_history.len() >= window {
            let zeros = self.idle_history.iter().filter(|&&c| c == 0).count();
            if zeros as f64 / self.idle_history.len() as f64 >= 0.95 {
                warn!(
                    window_minutes,
                    "all fate workers appear to have been busy for the whole window; \
                     consider increasing TESSERA_FATE_POOL_SIZE"
                );
                self.idle_history.clear();
            } else {
                while self.idle_history.len() >= window {
                    self.idle_history.pop_front();
                }
            }
        }

        let idle = self.ctx.queue.waiting_acceptors();
        debug!(idle, "sampled idle fate workers");
        self.idle_history.push_back(idle);
    }
}
