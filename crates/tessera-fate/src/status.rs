// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction status state machine.
//!
//! ```text
//!                    ┌─────┐
//!                    │ NEW │
//!                    └──┬──┘
//!                       │ seed
//!                       ▼
//!                 ┌───────────┐
//!          ┌──────│ SUBMITTED │──────┐
//!          │      └─────┬─────┘      │
//!          │            │            │ fail / cancel
//!          │            ▼            ▼
//!          │     ┌─────────────┐ ┌────────────────────┐
//!          │     │ IN_PROGRESS │─│ FAILED_IN_PROGRESS │
//!          │     └──────┬──────┘ └─────────┬──────────┘
//!          │            │                  │ undo complete
//!          │            ▼                  ▼
//!          │     ┌────────────┐       ┌────────┐
//!          └────►│ SUCCESSFUL │       │ FAILED │
//!                └────────────┘       └────────┘
//! ```
//!
//! `UNKNOWN` is the status reported for ids the store does not know; it is
//! terminal and never stored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Created but not yet seeded with an operation.
    New,
    /// Seeded with its initial step, waiting for a worker.
    Submitted,
    /// A worker is (or was) executing steps.
    InProgress,
    /// A step failed; pushed steps are being undone.
    FailedInProgress,
    /// Undo finished; the transaction failed permanently.
    Failed,
    /// All steps completed.
    Successful,
    /// The id is not known to the store.
    Unknown,
}

/// The terminal statuses `wait_for_completion` resolves on.
pub const FINISHED_STATES: [TxStatus; 3] =
    [TxStatus::Failed, TxStatus::Successful, TxStatus::Unknown];

impl TxStatus {
    /// Canonical upper-case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Submitted => "SUBMITTED",
            Self::InProgress => "IN_PROGRESS",
            Self::FailedInProgress => "FAILED_IN_PROGRESS",
            Self::Failed => "FAILED",
            Self::Successful => "SUCCESSFUL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse the canonical name back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "SUBMITTED" => Some(Self::Submitted),
            "IN_PROGRESS" => Some(Self::InProgress),
            "FAILED_IN_PROGRESS" => Some(Self::FailedInProgress),
            "FAILED" => Some(Self::Failed),
            "SUCCESSFUL" => Some(Self::Successful),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Successful | Self::Unknown)
    }

    /// Whether a worker may pick the transaction up.
    pub fn is_runnable(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::InProgress | Self::FailedInProgress
        )
    }

    /// Whether `self -> new` is a permitted transition.
    ///
    /// Setting the current status again is always permitted (idempotent
    /// retry after a partially applied update).
    pub fn can_transition_to(&self, new: TxStatus) -> bool {
        if *self == new {
            return true;
        }
        matches!(
            (*self, new),
            (Self::New, Self::Submitted)
                // cancellation of a transaction that was never seeded
                | (Self::New, Self::FailedInProgress)
                | (Self::Submitted, Self::InProgress)
                | (Self::Submitted, Self::FailedInProgress)
                | (Self::InProgress, Self::Successful)
                | (Self::InProgress, Self::FailedInProgress)
                | (Self::FailedInProgress, Self::Failed)
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
