// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rendezvous work channel between the work finder and the worker pool.
//!
//! An offer completes only when a worker is actually waiting to accept; the
//! channel holds no buffered items. This is what keeps the finder from
//! enqueueing the same transaction id over and over while all workers are
//! busy: the store is rescanned only when a worker is ready for more work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, oneshot};
use tokio::time::Instant;

/// A rendezvous channel: values transfer directly from an offering task to a
/// waiting acceptor, never through a buffer.
pub struct WorkQueue<T> {
    acceptors: Mutex<VecDeque<oneshot::Sender<T>>>,
    acceptor_arrived: Notify,
    waiting: AtomicUsize,
}

impl<T: Send> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> WorkQueue<T> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            acceptors: Mutex::new(VecDeque::new()),
            acceptor_arrived: Notify::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Number of tasks currently parked in [`accept`](Self::accept).
    ///
    /// Sampled by the pool supervisor for the idle-saturation heuristic.
    pub fn waiting_acceptors(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Try to hand `value` to a waiting acceptor within `timeout`.
    ///
    /// Returns `true` when an acceptor took the value. An acceptor that
    /// times out concurrently with the transfer can drop the value; callers
    /// rediscover lost work on their next store scan, so a `true` here is a
    /// strong hint, not a receipt.
    pub async fn offer(&self, value: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = value;

        loop {
            loop {
                let sender = self.acceptors.lock().await.pop_front();
                match sender {
                    Some(sender) => match sender.send(value) {
                        Ok(()) => return true,
                        // Acceptor gave up while queued; try the next one.
                        Err(returned) => value = returned,
                    },
                    None => break,
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = tokio::time::timeout_at(deadline, self.acceptor_arrived.notified()).await;
        }
    }

    /// Wait up to `timeout` for an offered value.
    pub async fn accept(&self, timeout: Duration) -> Option<T> {
        let (sender, receiver) = oneshot::channel();
        self.acceptors.lock().await.push_back(sender);
        self.waiting.fetch_add(1, Ordering::Relaxed);
        self.acceptor_arrived.notify_one();

        let received = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(value)) => Some(value),
            // Sender dropped without a transfer, or we timed out; a stale
            // sender left in the queue is skipped by the next offer.
            Ok(Err(_)) | Err(_) => None,
        };

        self.waiting.fetch_sub(1, Ordering::Relaxed);
        received
    }
}
