// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction identifiers and business-level deduplication keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which store family a transaction belongs to.
///
/// User transactions live in the coordination-service store and are visible
/// to clients; meta transactions live in the distributed-table store and are
/// internal to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FateInstanceType {
    /// Client-visible table and namespace operations.
    User,
    /// Manager-internal operations on the metadata tier.
    Meta,
}

impl FateInstanceType {
    /// Canonical upper-case name, as used in ids and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Meta => "META",
        }
    }

    /// Parse the canonical name back into a type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "META" => Some(Self::Meta),
            _ => None,
        }
    }
}

impl fmt::Display for FateInstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Globally unique transaction id: a random 128-bit value tagged with the
/// instance type of the store that owns it.
///
/// The canonical text form is `FATE:<TYPE>:<uuid>`, e.g.
/// `FATE:USER:3b241101-0000-4000-8000-000000000000`. It round-trips through
/// [`FromStr`] and is what the admin CLI accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FateId {
    /// Store family this id belongs to.
    pub instance_type: FateInstanceType,
    /// Random unique component.
    pub uuid: Uuid,
}

impl FateId {
    /// Allocate a fresh random id for the given instance type.
    pub fn new_random(instance_type: FateInstanceType) -> Self {
        Self {
            instance_type,
            uuid: Uuid::new_v4(),
        }
    }

    /// Rebuild an id from its persisted parts.
    pub fn from_parts(instance_type: FateInstanceType, uuid: Uuid) -> Self {
        Self {
            instance_type,
            uuid,
        }
    }
}

impl fmt::Display for FateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FATE:{}:{}", self.instance_type, self.uuid)
    }
}

/// Error returned when a string is not a canonical fate id.
#[derive(Debug, thiserror::Error)]
#[error("invalid fate id '{0}'")]
pub struct InvalidFateId(pub String);

impl FromStr for FateId {
    type Err = InvalidFateId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (prefix, type_part, uuid_part) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(t), Some(u)) => (p, t, u),
            _ => return Err(InvalidFateId(s.to_string())),
        };
        if prefix != "FATE" {
            return Err(InvalidFateId(s.to_string()));
        }
        let instance_type =
            FateInstanceType::parse(type_part).ok_or_else(|| InvalidFateId(s.to_string()))?;
        let uuid = Uuid::parse_str(uuid_part).map_err(|_| InvalidFateId(s.to_string()))?;
        Ok(Self {
            instance_type,
            uuid,
        })
    }
}

/// Kinds of business keys that may be attached to a transaction for
/// idempotent seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FateKeyKind {
    /// System-initiated tablet split.
    Split,
    /// Compaction commit for a specific external compaction.
    CompactionCommit,
}

impl FateKeyKind {
    /// Canonical upper-case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Split => "SPLIT",
            Self::CompactionCommit => "COMPACTION_COMMIT",
        }
    }

    /// Parse the canonical name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SPLIT" => Some(Self::Split),
            "COMPACTION_COMMIT" => Some(Self::CompactionCommit),
            _ => None,
        }
    }
}

impl fmt::Display for FateKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-level deduplication key: at most one live transaction per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FateKey {
    /// What kind of operation the key describes.
    pub kind: FateKeyKind,
    /// Opaque serialized identity of the operation target.
    pub payload: Vec<u8>,
}

impl FateKey {
    /// Build a key from a kind and an opaque payload.
    pub fn new(kind: FateKeyKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}
