// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The closed set of manager operations a transaction can carry, and the
//! keyed info slots stored alongside a transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FateError;

/// Every operation the manager runs through the executor.
///
/// Most kinds map 1:1 onto a client-visible [`WireOperation`]; the rest are
/// manager-internal and refuse to be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum FateOperation {
    CommitCompaction,
    NamespaceCreate,
    NamespaceDelete,
    NamespaceRename,
    ShutdownTabletServer,
    SystemSplit,
    SystemMerge,
    TableBulkImport,
    TableCancelCompact,
    TableClone,
    TableCompact,
    TableCreate,
    TableDelete,
    TableDeleteRange,
    TableExport,
    TableImport,
    TableMerge,
    TableOffline,
    TableOnline,
    TableRename,
    TableSplit,
    TableTabletAvailability,
}

/// Client-visible operation names carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum WireOperation {
    NamespaceCreate,
    NamespaceDelete,
    NamespaceRename,
    TableBulkImport,
    TableCancelCompact,
    TableClone,
    TableCompact,
    TableCreate,
    TableDelete,
    TableDeleteRange,
    TableExport,
    TableImport,
    TableMerge,
    TableOffline,
    TableOnline,
    TableRename,
    TableSplit,
    TableTabletAvailability,
}

impl FateOperation {
    /// Canonical upper-case name, as persisted and logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommitCompaction => "COMMIT_COMPACTION",
            Self::NamespaceCreate => "NAMESPACE_CREATE",
            Self::NamespaceDelete => "NAMESPACE_DELETE",
            Self::NamespaceRename => "NAMESPACE_RENAME",
            Self::ShutdownTabletServer => "SHUTDOWN_TSERVER",
            Self::SystemSplit => "SYSTEM_SPLIT",
            Self::SystemMerge => "SYSTEM_MERGE",
            Self::TableBulkImport => "TABLE_BULK_IMPORT",
            Self::TableCancelCompact => "TABLE_CANCEL_COMPACT",
            Self::TableClone => "TABLE_CLONE",
            Self::TableCompact => "TABLE_COMPACT",
            Self::TableCreate => "TABLE_CREATE",
            Self::TableDelete => "TABLE_DELETE",
            Self::TableDeleteRange => "TABLE_DELETE_RANGE",
            Self::TableExport => "TABLE_EXPORT",
            Self::TableImport => "TABLE_IMPORT",
            Self::TableMerge => "TABLE_MERGE",
            Self::TableOffline => "TABLE_OFFLINE",
            Self::TableOnline => "TABLE_ONLINE",
            Self::TableRename => "TABLE_RENAME",
            Self::TableSplit => "TABLE_SPLIT",
            Self::TableTabletAvailability => "TABLE_TABLET_AVAILABILITY",
        }
    }

    /// Parse the canonical name back into an operation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMMIT_COMPACTION" => Some(Self::CommitCompaction),
            "NAMESPACE_CREATE" => Some(Self::NamespaceCreate),
            "NAMESPACE_DELETE" => Some(Self::NamespaceDelete),
            "NAMESPACE_RENAME" => Some(Self::NamespaceRename),
            "SHUTDOWN_TSERVER" => Some(Self::ShutdownTabletServer),
            "SYSTEM_SPLIT" => Some(Self::SystemSplit),
            "SYSTEM_MERGE" => Some(Self::SystemMerge),
            "TABLE_BULK_IMPORT" => Some(Self::TableBulkImport),
            "TABLE_CANCEL_COMPACT" => Some(Self::TableCancelCompact),
            "TABLE_CLONE" => Some(Self::TableClone),
            "TABLE_COMPACT" => Some(Self::TableCompact),
            "TABLE_CREATE" => Some(Self::TableCreate),
            "TABLE_DELETE" => Some(Self::TableDelete),
            "TABLE_DELETE_RANGE" => Some(Self::TableDeleteRange),
            "TABLE_EXPORT" => Some(Self::TableExport),
            "TABLE_IMPORT" => Some(Self::TableImport),
            "TABLE_MERGE" => Some(Self::TableMerge),
            "TABLE_OFFLINE" => Some(Self::TableOffline),
            "TABLE_ONLINE" => Some(Self::TableOnline),
            "TABLE_RENAME" => Some(Self::TableRename),
            "TABLE_SPLIT" => Some(Self::TableSplit),
            "TABLE_TABLET_AVAILABILITY" => Some(Self::TableTabletAvailability),
            _ => None,
        }
    }

    /// Whether this kind is manager-internal and has no wire counterpart.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::CommitCompaction
                | Self::ShutdownTabletServer
                | Self::SystemSplit
                | Self::SystemMerge
        )
    }

    /// Map to the client-visible wire operation.
    ///
    /// Fails with [`FateError::NotAWireOperation`] for internal kinds.
    pub fn to_wire(self) -> Result<WireOperation, FateError> {
        let wire = match self {
            Self::NamespaceCreate => WireOperation::NamespaceCreate,
            Self::NamespaceDelete => WireOperation::NamespaceDelete,
            Self::NamespaceRename => WireOperation::NamespaceRename,
            Self::TableBulkImport => WireOperation::TableBulkImport,
            Self::TableCancelCompact => WireOperation::TableCancelCompact,
            Self::TableClone => WireOperation::TableClone,
            Self::TableCompact => WireOperation::TableCompact,
            Self::TableCreate => WireOperation::TableCreate,
            Self::TableDelete => WireOperation::TableDelete,
            Self::TableDeleteRange => WireOperation::TableDeleteRange,
            Self::TableExport => WireOperation::TableExport,
            Self::TableImport => WireOperation::TableImport,
            Self::TableMerge => WireOperation::TableMerge,
            Self::TableOffline => WireOperation::TableOffline,
            Self::TableOnline => WireOperation::TableOnline,
            Self::TableRename => WireOperation::TableRename,
            Self::TableSplit => WireOperation::TableSplit,
            Self::TableTabletAvailability => WireOperation::TableTabletAvailability,
            Self::CommitCompaction
            | Self::ShutdownTabletServer
            | Self::SystemSplit
            | Self::SystemMerge => return Err(FateError::NotAWireOperation(self)),
        };
        Ok(wire)
    }

    /// Map a wire operation to its executor kind. Total: every wire
    /// operation has exactly one kind.
    pub fn from_wire(wire: WireOperation) -> Self {
        match wire {
            WireOperation::NamespaceCreate => Self::NamespaceCreate,
            WireOperation::NamespaceDelete => Self::NamespaceDelete,
            WireOperation::NamespaceRename => Self::NamespaceRename,
            WireOperation::TableBulkImport => Self::TableBulkImport,
            WireOperation::TableCancelCompact => Self::TableCancelCompact,
            WireOperation::TableClone => Self::TableClone,
            WireOperation::TableCompact => Self::TableCompact,
            WireOperation::TableCreate => Self::TableCreate,
            WireOperation::TableDelete => Self::TableDelete,
            WireOperation::TableDeleteRange => Self::TableDeleteRange,
            WireOperation::TableExport => Self::TableExport,
            WireOperation::TableImport => Self::TableImport,
            WireOperation::TableMerge => Self::TableMerge,
            WireOperation::TableOffline => Self::TableOffline,
            WireOperation::TableOnline => Self::TableOnline,
            WireOperation::TableRename => Self::TableRename,
            WireOperation::TableSplit => Self::TableSplit,
            WireOperation::TableTabletAvailability => Self::TableTabletAvailability,
        }
    }
}

impl fmt::Display for FateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed info slots stored alongside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxInfo {
    /// The declared [`FateOperation`].
    FateOp,
    /// Whether the record is deleted on completion.
    AutoClean,
    /// The recorded failure, when the transaction failed.
    Exception,
    /// Age-off hint for retention sweeps.
    TxAgeoff,
    /// Human-readable return value of a successful transaction.
    ReturnValue,
}

impl TxInfo {
    /// Canonical upper-case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FateOp => "FATE_OP",
            Self::AutoClean => "AUTO_CLEAN",
            Self::Exception => "EXCEPTION",
            Self::TxAgeoff => "TX_AGEOFF",
            Self::ReturnValue => "RETURN_VALUE",
        }
    }
}

impl fmt::Display for TxInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
