//! Transaction isolation levels.
//!
//! The set of levels is closed. A driver advertises which of them it can
//! honor through [`Driver::isolation_levels`](crate::Driver::isolation_levels)
//! and maps each one onto its own transaction parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Read committed, seeing the latest committed record version.
    ///
    /// Firebird has no dirty reads; this is the most permissive level it
    /// offers.
    ReadUncommitted,

    /// Read committed without record versions: waits on uncommitted updates.
    #[default]
    ReadCommitted,

    /// Snapshot of the database as of transaction start.
    RepeatableRead,

    /// Snapshot with table stability (exclusive table access).
    Serializable,

    /// Read committed, read only.
    ReadCommittedReadOnly,
}

impl IsolationLevel {
    /// Every level, in ascending order of strictness.
    pub const ALL: [IsolationLevel; 5] = [
        Self::ReadUncommitted,
        Self::ReadCommitted,
        Self::RepeatableRead,
        Self::Serializable,
        Self::ReadCommittedReadOnly,
    ];

    /// Get the `SET TRANSACTION` statement for this level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => {
                "SET TRANSACTION READ WRITE ISOLATION LEVEL READ COMMITTED RECORD_VERSION"
            }
            Self::ReadCommitted => {
                "SET TRANSACTION READ WRITE ISOLATION LEVEL READ COMMITTED NO RECORD_VERSION"
            }
            Self::RepeatableRead => "SET TRANSACTION READ WRITE ISOLATION LEVEL SNAPSHOT",
            Self::Serializable => {
                "SET TRANSACTION READ WRITE ISOLATION LEVEL SNAPSHOT TABLE STABILITY"
            }
            Self::ReadCommittedReadOnly => {
                "SET TRANSACTION READ ONLY ISOLATION LEVEL READ COMMITTED"
            }
        }
    }

    /// Get the level's canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::RepeatableRead => "REPEATABLE_READ",
            Self::Serializable => "SERIALIZABLE",
            Self::ReadCommittedReadOnly => "READ_COMMITTED_READ_ONLY",
        }
    }

    /// Check if statements under this level may write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadCommittedReadOnly)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IsolationLevel {
    type Err = crate::DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace([' ', '-'], "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|level| level.name() == normalized)
            .ok_or_else(|| {
                crate::DriverError::Unsupported(format!("unknown isolation level '{s}'"))
            })
    }
}
