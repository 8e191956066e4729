// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the fault-tolerant executor.

use thiserror::Error;

use crate::id::FateId;
use crate::ops::FateOperation;
use crate::status::TxStatus;
use crate::store::MAX_STACK_DEPTH;

/// Result type using [`FateError`].
pub type Result<T> = std::result::Result<T, FateError>;

/// Errors surfaced by the executor and its stores.
///
/// Inside a worker none of these propagate to callers; they are logged or
/// recorded on the transaction. [`FateError::InvalidTransition`] indicates
/// caller misuse and is fatal at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FateError {
    /// A status update violated the transition table.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Transaction the update targeted.
        id: FateId,
        /// Status before the update.
        from: TxStatus,
        /// Requested new status.
        to: TxStatus,
    },

    /// A transaction was seeded twice with different operations.
    #[error("transaction {id} already seeded with {existing}, refusing {requested}")]
    ConflictingSeed {
        /// Transaction being seeded.
        id: FateId,
        /// Operation recorded by the first seed.
        existing: FateOperation,
        /// Operation the conflicting seed requested.
        requested: FateOperation,
    },

    /// A push would exceed the step stack depth cap.
    #[error("step stack for {id} exceeded {} entries", MAX_STACK_DEPTH)]
    StackOverflow {
        /// Transaction whose stack overflowed.
        id: FateId,
    },

    /// A reserved-handle mutation found the reservation no longer held.
    #[error("reservation for {id} is no longer held by this process")]
    ReservationLost {
        /// Transaction whose reservation was lost.
        id: FateId,
    },

    /// The id is not known to the store.
    #[error("transaction {id} is not known to the store")]
    UnknownTransaction {
        /// The unknown id.
        id: FateId,
    },

    /// An admin operation was attempted in a status that forbids it.
    #[error("cannot {operation} transaction {id} while {actual}")]
    IllegalState {
        /// Transaction the operation targeted.
        id: FateId,
        /// Its current status.
        actual: TxStatus,
        /// The refused operation, for the message.
        operation: &'static str,
    },

    /// A persisted step carried a tag no decoder was registered for.
    #[error("no step decoder registered for tag '{tag}'")]
    UnknownStepTag {
        /// The unrecognized tag.
        tag: String,
    },

    /// An internal-only operation kind was asked for its wire form.
    #[error("{0} does not have an equivalent wire form")]
    NotAWireOperation(FateOperation),

    /// A step payload or stored value failed to (de)serialize.
    #[error("step payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("store error during {operation}: {details}")]
    Store {
        /// The store operation that failed.
        operation: &'static str,
        /// Backend error details.
        details: String,
    },
}

impl From<sqlx::Error> for FateError {
    fn from(err: sqlx::Error) -> Self {
        FateError::Store {
            operation: "query",
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::FateInstanceType;

    #[test]
    fn test_display_names_the_transaction() {
        let id = FateId::new_random(FateInstanceType::User);
        let err = FateError::InvalidTransition {
            id,
            from: TxStatus::Failed,
            to: TxStatus::Submitted,
        };
        let text = err.to_string();
        assert!(text.contains(&id.to_string()));
        assert!(text.contains("FAILED -> SUBMITTED"));
    }

    #[test]
    fn test_stack_overflow_names_the_cap() {
        let id = FateId::new_random(FateInstanceType::Meta);
        let text = FateError::StackOverflow { id }.to_string();
        assert!(text.contains("50"));
    }
}
