//! Crate-boundary error type.
//!
//! Internal plumbing returns `anyhow::Result` with `.with_context(...)`;
//! the catalog client and commit engine convert into this typed enum at
//! their public entry points so callers can match on conflict kind
//! without downcasting an opaque error.

use thiserror::Error;

use crate::ids::{PartitionDescriptor, TableId};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    #[error("partition is no longer the latest version")]
    StalePartition,
    #[error("a compaction committed concurrently")]
    CompactionRaced,
    #[error("the table schema changed concurrently")]
    SchemaChanged,
    #[error("the partition was concurrently tombstoned")]
    TombstoneRaced,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("table not found: {0}")]
    TableNotFound(TableId),

    #[error("partition not found: {table_id} {partition_desc}")]
    PartitionNotFound {
        table_id: TableId,
        partition_desc: PartitionDescriptor,
    },

    #[error("commit not found: {0}")]
    CommitNotFound(crate::ids::CommitId),

    #[error("commit conflict ({kind}) on partition {partition_desc} of table {table_id}")]
    Conflict {
        table_id: TableId,
        partition_desc: PartitionDescriptor,
        kind: ConflictKind,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("catalog unavailable after retry budget exhausted: {0}")]
    CatalogUnavailable(#[source] anyhow::Error),

    #[error("storage error on {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("schema incompatible with table {table_id} and autoMerge disabled")]
    SchemaIncompatible { table_id: TableId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
