// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for worker pool supervision: hot-reload growth and
//! graceful shrink.

mod common;

use std::time::Duration;

use common::*;
use tessera_fate::Fate;

async fn runners_reach(fate: &Fate<TestEnv>, target: usize, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if fate.tx_runners_active().await == target {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_pool_follows_live_configuration() {
    let env = TestEnv::new();
    let store = memory_store();
    let fate = fast_fate(store, env, config_with_pool(3));

    // The supervisor fills the pool to the configured size.
    assert!(runners_reach(&fate, 3, 3_000).await);

    // Shrinking flags the excess workers; idle workers exit between
    // transactions.
    fate.live_config().set_pool_size(1);
    assert!(runners_reach(&fate, 1, 3_000).await);

    // Growing again spawns fresh workers.
    fate.live_config().set_pool_size(2);
    assert!(runners_reach(&fate, 2, 3_000).await);

    fate.shutdown(Duration::from_secs(2)).await;
}
