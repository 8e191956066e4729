// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The step protocol: the contract every manager operation implements.
//!
//! An operation decomposes into a stack of steps. A step must be retry-safe
//! in `ready`, idempotent in `call` (work it produces is tagged with the
//! transaction id, so a replay observes "already done" and short-circuits),
//! and tolerant of partial completion in `undo`.
//!
//! Steps carry closure state that must survive process restart: every step
//! serializes to a [`SavedStep`] (tag + versioned payload) and is rehydrated
//! from the persisted stack through a [`StepRegistry`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FateError, Result};
use crate::id::FateId;

/// Failure reported by a step's `ready` or `call`.
///
/// The worker's failure policy branches on the variant: acceptable failures
/// are a handled condition logged at info level, unexpected ones are logged
/// at warn level, and both transition the transaction to
/// `FAILED_IN_PROGRESS`.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A normal, handled business failure (e.g. "table already exists").
    #[error("{detail}")]
    Acceptable {
        /// Operator-facing description of the condition.
        detail: String,
    },

    /// A step bug or external failure.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),

    /// The step chain grew past the persisted stack depth cap.
    #[error("step stack depth limit reached")]
    StackOverflow,

    /// The host process is shutting down; the transaction must survive.
    #[error("host process is shutting down")]
    ShuttingDown,
}

impl StepError {
    /// Convenience constructor for [`StepError::Acceptable`].
    pub fn acceptable(detail: impl Into<String>) -> Self {
        Self::Acceptable {
            detail: detail.into(),
        }
    }

    /// Whether an I/O error appears anywhere in the cause chain.
    pub fn is_io(&self) -> bool {
        match self {
            Self::Unexpected(cause) => cause
                .chain()
                .any(|e| e.downcast_ref::<std::io::Error>().is_some()),
            _ => false,
        }
    }
}

/// Serialized form of a step: a registry tag plus a versioned payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedStep {
    /// Registry tag identifying the step variant.
    pub tag: String,
    /// Payload schema version, for forward-compatible decoding.
    pub version: u32,
    /// The step's serialized closure state.
    pub payload: serde_json::Value,
}

impl SavedStep {
    /// Build a saved step from a serializable value.
    pub fn of<T: Serialize>(
        tag: &str,
        version: u32,
        value: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self {
            tag: tag.to_string(),
            version,
            payload: serde_json::to_value(value)?,
        })
    }
}

/// One recoverable unit of work within a transaction.
///
/// `E` is the step environment: the handle through which steps reach the
/// external state service (read/write locks on namespaces and tables), the
/// table-mapping registry, and logging sinks. It is injected when the
/// executor is constructed; tests inject a mock.
#[async_trait]
pub trait Step<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Diagnostic label used in logs.
    fn name(&self) -> &str;

    /// Serialize this step for the persisted stack.
    fn save(&self) -> std::result::Result<SavedStep, serde_json::Error>;

    /// Side-effect-free precondition check. Returns [`Duration::ZERO`] to
    /// proceed immediately, or a positive deferral after which the
    /// transaction should be offered again. May be called any number of
    /// times.
    async fn ready(&self, id: FateId, env: &E) -> std::result::Result<Duration, StepError> {
        let _ = (id, env);
        Ok(Duration::ZERO)
    }

    /// Perform the step's durable work and return the successor step, or
    /// `None` when the transaction is complete. Must be idempotent across
    /// crash-and-replay.
    async fn call(
        &self,
        id: FateId,
        env: &E,
    ) -> std::result::Result<Option<Box<dyn Step<E>>>, StepError>;

    /// Reverse a successful `call` of this step. Runs during the failure
    /// path; must tolerate partial prior completion and repeated invocation.
    async fn undo(&self, id: FateId, env: &E) -> std::result::Result<(), StepError> {
        let _ = (id, env);
        Ok(())
    }

    /// Human-readable return value recorded when this is the final step of a
    /// successful transaction.
    fn return_value(&self) -> Option<String> {
        None
    }
}

type Decoder<E> = Box<dyn Fn(&SavedStep) -> Result<Box<dyn Step<E>>> + Send + Sync>;

/// Maps persisted step tags back to live step objects.
///
/// The registry is shared with the store so that loading a stack rehydrates
/// each entry from its tag. Steps whose tag has no decoder fail loading with
/// [`FateError::UnknownStepTag`].
pub struct StepRegistry<E> {
    decoders: HashMap<String, Decoder<E>>,
}

impl<E> Default for StepRegistry<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> StepRegistry<E>
where
    E: Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a serde-deserializable step type under `tag`.
    pub fn register<S>(&mut self, tag: &str)
    where
        S: Step<E> + DeserializeOwned + 'static,
    {
        self.register_with(tag, |saved| {
            let step: S = serde_json::from_value(saved.payload.clone())?;
            Ok(Box::new(step))
        });
    }

    /// Register a custom decoder under `tag`, for steps that need to branch
    /// on the payload version themselves.
    pub fn register_with<F>(&mut self, tag: &str, decoder: F)
    where
        F: Fn(&SavedStep) -> Result<Box<dyn Step<E>>> + Send + Sync + 'static,
    {
        self.decoders.insert(tag.to_string(), Box::new(decoder));
    }

    /// Rehydrate a step from its saved form.
    pub fn decode(&self, saved: &SavedStep) -> Result<Box<dyn Step<E>>> {
        let decoder = self
            .decoders
            .get(&saved.tag)
            .ok_or_else(|| FateError::UnknownStepTag {
                tag: saved.tag.clone(),
            })?;
        decoder(saved)
    }
}
