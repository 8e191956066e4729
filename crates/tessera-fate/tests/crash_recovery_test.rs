// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end crash recovery: a new manager process over the same SQLite
//! database resumes in-flight work from the persisted stack, without
//! re-running completed steps.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tessera_fate::store::SqliteFateStore;
use tessera_fate::{
    Fate, FateInstanceType, FateOperation, FateStore, InMemoryLiveness, Step, TxStatus,
};
use uuid::Uuid;

#[tokio::test]
async fn test_restart_resumes_from_stack_top_without_duplicate_effects() {
    let env = TestEnv::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fate.db");

    let store1 = Arc::new(
        SqliteFateStore::from_path(&path, FateInstanceType::User, registry())
            .await
            .unwrap(),
    );

    // Three seeded operations; #2 will crash mid-flight.
    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = store1.create().await.unwrap();
        store1
            .seed(
                FateOperation::TableCreate,
                id,
                &SeqStep::chain(&["A", "B", "C"]),
                false,
            )
            .await
            .unwrap();
        ids.push(id);
    }
    let crashed = ids[1];

    // Advance #2 by hand, exactly as a worker would: mark in progress, run
    // the first step, durably push its successor, then "die" with the
    // reservation still held.
    {
        let mut handle = store1.try_reserve(crashed).await.unwrap().unwrap();
        handle.set_status(TxStatus::InProgress).await.unwrap();
        let first = SeqStep::chain(&["A", "B", "C"]);
        let successor = first
            .call(crashed, &env)
            .await
            .unwrap()
            .expect("A has a successor");
        handle.push(successor.as_ref()).await.unwrap();
        drop(handle); // no unreserve: the owner is gone
    }
    assert_eq!(env.count("call:A"), 1);

    // Restart: a fresh process identity over the same database file. The
    // dead-reservation sweep must reclaim #2's lease before it can resume.
    let store2 = Arc::new(store1.with_owner(Uuid::new_v4()));
    let liveness = Arc::new(InMemoryLiveness::new());
    liveness.register(store2.owner());

    let fate = Fate::builder()
        .store(store2.clone() as Arc<dyn FateStore<TestEnv>>)
        .env(env.clone())
        .config(config_with_pool(2))
        .liveness(liveness)
        .run_dead_reservation_cleaner(true)
        .initial_delay(Duration::from_millis(10))
        .pool_watcher_delay(Duration::from_millis(50))
        .dead_res_cleanup_delay(Duration::from_millis(100))
        .start()
        .unwrap();

    for id in &ids {
        assert_eq!(
            fate.wait_for_completion(*id, Some(Duration::from_secs(10)))
                .await
                .unwrap(),
            TxStatus::Successful,
            "transaction {id} did not complete"
        );
    }

    // One A/B/C call per transaction. In particular #2's A ran exactly once
    // (before the crash) and was not replayed after restart.
    assert_eq!(env.count("call:A"), 3);
    assert_eq!(env.count("call:B"), 3);
    assert_eq!(env.count("call:C"), 3);
    for id in &ids {
        assert!(env.has_effect(&format!("effect:{id}:A")));
        assert!(env.has_effect(&format!("effect:{id}:B")));
        assert!(env.has_effect(&format!("effect:{id}:C")));
    }

    fate.shutdown(Duration::from_secs(2)).await;
}
