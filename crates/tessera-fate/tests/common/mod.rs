// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for executor end-to-end tests.
//!
//! Provides a recording step environment and a scriptable step chain, so
//! scenarios can assert exactly which steps ran, in what order, and which
//! durable effects were applied.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tessera_fate::step::{SavedStep, Step, StepError, StepRegistry};
use tessera_fate::store::MemoryFateStore;
use tessera_fate::{Config, Fate, FateId, FateInstanceType, FateStore, LiveConfig};

/// Registry tag for [`SeqStep`].
pub const SEQ_TAG: &str = "seq";

/// Recording step environment: steps log their invocations and register
/// idempotent durable effects here.
#[derive(Default)]
pub struct TestEnv {
    calls: Mutex<Vec<String>>,
    effects: Mutex<HashSet<String>>,
    seen: Mutex<HashSet<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TestEnv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one invocation event, e.g. `call:A`.
    pub fn note(&self, event: impl Into<String>) {
        locked(&self.calls).push(event.into());
    }

    /// All recorded events, in order.
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    /// How many times `event` was recorded.
    pub fn count(&self, event: &str) -> usize {
        locked(&self.calls).iter().filter(|e| *e == event).count()
    }

    /// Apply an idempotent durable effect. Returns whether this call was
    /// the one that applied it.
    pub fn apply_effect(&self, key: impl Into<String>) -> bool {
        locked(&self.effects).insert(key.into())
    }

    /// Whether an effect has been applied.
    pub fn has_effect(&self, key: &str) -> bool {
        locked(&self.effects).contains(key)
    }

    /// One-shot marker: true the first time a key is seen.
    pub fn first_time(&self, key: impl Into<String>) -> bool {
        locked(&self.seen).insert(key.into())
    }
}

/// A scriptable chain of steps. `labels[0]` is this step; its successors
/// follow. Each `call` applies a durable effect keyed by transaction id and
/// label, so replays are observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqStep {
    pub labels: Vec<String>,
    #[serde(default)]
    pub fail_on_call: Option<String>,
    #[serde(default)]
    pub acceptable_fail_on_call: Option<String>,
    #[serde(default)]
    pub defer_once_ms: Option<(String, u64)>,
    #[serde(default)]
    pub result_message: Option<String>,
}

impl SeqStep {
    pub fn chain(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            fail_on_call: None,
            acceptable_fail_on_call: None,
            defer_once_ms: None,
            result_message: None,
        }
    }

    /// Make `label`'s `call` fail with an unexpected error.
    pub fn with_failure(mut self, label: &str) -> Self {
        self.fail_on_call = Some(label.to_string());
        self
    }

    /// Make `label`'s `call` fail with an acceptable error.
    pub fn with_acceptable_failure(mut self, label: &str) -> Self {
        self.acceptable_fail_on_call = Some(label.to_string());
        self
    }

    /// Make `label`'s first `ready` per transaction defer by `ms`.
    pub fn with_defer_once(mut self, label: &str, ms: u64) -> Self {
        self.defer_once_ms = Some((label.to_string(), ms));
        self
    }

    /// Record `message` as the transaction's return value.
    pub fn with_result(mut self, message: &str) -> Self {
        self.result_message = Some(message.to_string());
        self
    }

    fn label(&self) -> &str {
        &self.labels[0]
    }
}

#[async_trait]
impl Step<TestEnv> for SeqStep {
    fn name(&self) -> &str {
        self.label()
    }

    fn save(&self) -> Result<SavedStep, serde_json::Error> {
        SavedStep::of(SEQ_TAG, 1, self)
    }

    async fn ready(&self, id: FateId, env: &TestEnv) -> Result<Duration, StepError> {
        env.note(format!("ready:{}", self.label()));
        if let Some((label, ms)) = &self.defer_once_ms
            && label == self.label()
            && env.first_time(format!("deferred:{id}:{label}"))
        {
            return Ok(Duration::from_millis(*ms));
        }
        Ok(Duration::ZERO)
    }

    async fn call(
        &self,
        id: FateId,
        env: &TestEnv,
    ) -> Result<Option<Box<dyn Step<TestEnv>>>, StepError> {
        env.note(format!("call:{}", self.label()));

        if self.fail_on_call.as_deref() == Some(self.label()) {
            return Err(StepError::Unexpected(anyhow::anyhow!(
                "{} exploded",
                self.label()
            )));
        }
        if self.acceptable_fail_on_call.as_deref() == Some(self.label()) {
            return Err(StepError::acceptable(format!(
                "{} hit a handled condition",
                self.label()
            )));
        }

        env.apply_effect(format!("effect:{id}:{}", self.label()));

        if self.labels.len() > 1 {
            let mut next = self.clone();
            next.labels.remove(0);
            Ok(Some(Box::new(next)))
        } else {
            Ok(None)
        }
    }

    async fn undo(&self, _id: FateId, env: &TestEnv) -> Result<(), StepError> {
        env.note(format!("undo:{}", self.label()));
        Ok(())
    }

    fn return_value(&self) -> Option<String> {
        if self.labels.len() == 1 {
            self.result_message.clone()
        } else {
            None
        }
    }
}

/// Registry with [`SeqStep`] registered.
pub fn registry() -> Arc<StepRegistry<TestEnv>> {
    let mut registry = StepRegistry::new();
    registry.register::<SeqStep>(SEQ_TAG);
    Arc::new(registry)
}

/// Fresh in-process store for user transactions.
pub fn memory_store() -> Arc<MemoryFateStore<TestEnv>> {
    Arc::new(MemoryFateStore::new(FateInstanceType::User, registry()))
}

/// Live configuration with a given pool size.
pub fn config_with_pool(pool_size: usize) -> LiveConfig {
    LiveConfig::new(Config {
        pool_size,
        ..Config::default()
    })
}

/// Executor with test-friendly timings: the pool fills within tens of
/// milliseconds instead of the production three seconds.
pub fn fast_fate(
    store: Arc<dyn FateStore<TestEnv>>,
    env: Arc<TestEnv>,
    config: LiveConfig,
) -> Fate<TestEnv> {
    Fate::builder()
        .store(store)
        .env(env)
        .config(config)
        .initial_delay(Duration::from_millis(10))
        .pool_watcher_delay(Duration::from_millis(50))
        .start()
        .expect("executor starts")
}

/// Poll `predicate` until it holds or `timeout_ms` elapses.
pub async fn eventually(timeout_ms: u64, predicate: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
