// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the transaction lifecycle happy path.

mod common;

use std::time::Duration;

use common::*;
use tessera_fate::{FateOperation, FateStore, TxStatus};

#[tokio::test]
async fn test_happy_path_two_steps() {
    let env = TestEnv::new();
    let store = memory_store();

    let id = store.create().await.unwrap();
    assert_eq!(
        store.read(id).await.unwrap().status().await.unwrap(),
        TxStatus::New
    );

    let step = SeqStep::chain(&["A", "B"]).with_result("table created");
    let seeded = store
        .seed(FateOperation::TableCreate, id, &step, false)
        .await
        .unwrap();
    assert!(seeded);
    assert_eq!(
        store.read(id).await.unwrap().status().await.unwrap(),
        TxStatus::Submitted
    );

    let fate = fast_fate(store.clone(), env.clone(), config_with_pool(2));
    let status = fate
        .wait_for_completion(id, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(status, TxStatus::Successful);

    // Each step's call ran exactly once; undo never ran.
    assert_eq!(env.count("call:A"), 1);
    assert_eq!(env.count("call:B"), 1);
    assert_eq!(
        env.calls().iter().filter(|c| c.starts_with("undo:")).count(),
        0
    );
    assert!(env.has_effect(&format!("effect:{id}:A")));
    assert!(env.has_effect(&format!("effect:{id}:B")));

    assert_eq!(
        fate.get_return(id).await.unwrap(),
        Some("table created".to_string())
    );

    fate.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_auto_clean_deletes_the_record() {
    let env = TestEnv::new();
    let store = memory_store();

    let id = store.create().await.unwrap();
    store
        .seed(
            FateOperation::TableDelete,
            id,
            &SeqStep::chain(&["only"]),
            true,
        )
        .await
        .unwrap();

    let fate = fast_fate(store.clone(), env.clone(), config_with_pool(1));
    let status = fate
        .wait_for_completion(id, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(status.is_terminal());

    // The record disappears once cleanup runs.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = fate.admin().status(id).await.unwrap();
        if status == TxStatus::Unknown {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "record still present with status {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fate.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_without_auto_clean_header_survives_with_empty_stack() {
    let env = TestEnv::new();
    let store = memory_store();

    let id = store.create().await.unwrap();
    store
        .seed(
            FateOperation::TableOnline,
            id,
            &SeqStep::chain(&["a", "b"]),
            false,
        )
        .await
        .unwrap();

    let fate = fast_fate(store.clone(), env.clone(), config_with_pool(1));
    assert_eq!(
        fate.wait_for_completion(id, Some(Duration::from_secs(5)))
            .await
            .unwrap(),
        TxStatus::Successful
    );

    // Cleanup pops the persisted steps but keeps the header.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let view = store.read(id).await.unwrap();
        if view.top().await.unwrap().is_none() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "stack never emptied"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        store.read(id).await.unwrap().status().await.unwrap(),
        TxStatus::Successful
    );

    fate.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_list_reports_seeded_transactions() {
    let env = TestEnv::new();
    let store = memory_store();

    let id = store.create().await.unwrap();
    store
        .seed(
            FateOperation::TableCompact,
            id,
            &SeqStep::chain(&["only"]),
            false,
        )
        .await
        .unwrap();

    let fate = fast_fate(store.clone(), env, config_with_pool(0));
    let listed = fate.list(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, id);

    fate.shutdown(Duration::from_secs(2)).await;
}
