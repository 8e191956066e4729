// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end test for step deferral: a step that is not ready releases the
//! reservation and is re-offered only after its deferral elapses.

mod common;

use std::time::Duration;

use common::*;
use tessera_fate::{FateOperation, FateStore, TxStatus};

#[tokio::test]
async fn test_deferred_step_runs_after_the_deferral_window() {
    let env = TestEnv::new();
    let store = memory_store();

    let id = store.create().await.unwrap();
    let step = SeqStep::chain(&["A"]).with_defer_once("A", 300);
    store
        .seed(FateOperation::TableCompact, id, &step, false)
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let fate = fast_fate(store.clone(), env.clone(), config_with_pool(1));

    let status = fate
        .wait_for_completion(id, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(status, TxStatus::Successful);

    // The first readiness check deferred; the call only happened on the
    // second offer, no earlier than the deferral window.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(env.count("ready:A"), 2);
    assert_eq!(env.count("call:A"), 1);

    fate.shutdown(Duration::from_secs(2)).await;
}
