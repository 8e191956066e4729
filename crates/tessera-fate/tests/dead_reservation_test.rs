// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end test for the dead-reservation sweep: a lease held by a dead
//! owner is reclaimed and another worker makes progress.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tessera_fate::{Fate, FateOperation, FateStore, InMemoryLiveness, TxStatus};
use uuid::Uuid;

#[tokio::test]
async fn test_sweep_unblocks_transaction_held_by_dead_owner() {
    let env = TestEnv::new();
    let store = memory_store();

    let id = store.create().await.unwrap();
    store
        .seed(
            FateOperation::TableCompact,
            id,
            &SeqStep::chain(&["A"]),
            false,
        )
        .await
        .unwrap();

    // A process reserves the transaction and dies without releasing.
    let dead = store.try_reserve(id).await.unwrap().unwrap();
    drop(dead);

    // The surviving manager runs under a different owner id; only it has a
    // liveness record.
    let survivor = Arc::new(store.with_owner(Uuid::new_v4()));
    let liveness = Arc::new(InMemoryLiveness::new());
    liveness.register(survivor.owner());

    let fate = Fate::builder()
        .store(survivor.clone() as Arc<dyn FateStore<TestEnv>>)
        .env(env.clone())
        .config(config_with_pool(1))
        .liveness(liveness)
        .run_dead_reservation_cleaner(true)
        .initial_delay(Duration::from_millis(10))
        .pool_watcher_delay(Duration::from_millis(50))
        .dead_res_cleanup_delay(Duration::from_millis(100))
        .start()
        .unwrap();

    assert_eq!(
        fate.wait_for_completion(id, Some(Duration::from_secs(5)))
            .await
            .unwrap(),
        TxStatus::Successful
    );
    assert_eq!(env.count("call:A"), 1);

    fate.shutdown(Duration::from_secs(2)).await;
}
