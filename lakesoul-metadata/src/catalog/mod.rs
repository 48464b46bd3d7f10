//! Catalog client: the abstract operation set the table-state engine is
//! built against, plus the concrete implementations that drive it.
//!
//! [`CatalogClient`] is the seam the rest of the engine is built against:
//! [`memory::InMemoryCatalog`] is the reference implementation used by
//! tests, [`postgres::PostgresCatalog`] talks directly to a
//! Postgres-backed metadata schema, and [`grpc::GrpcCatalog`] speaks a
//! gRPC wire protocol to a remote metadata service.

pub mod grpc;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ConflictKind, Result};
use crate::ids::{CommitId, PartitionDescriptor, TableId};
use crate::model::{DataCommitInfo, PartitionVersion, Table};

/// A file path slated for physical deletion once no live snapshot still
/// needs it (the discard log).
///
/// `descriptor` is either a real partition's descriptor string, for
/// discards tied to one partition (a TTL sweep), or the sentinel
/// [`crate::compaction::DISCARD_FILE_LIST`] for compaction-superseded
/// inputs, which aren't scoped to a single partition descriptor.
#[derive(Debug, Clone)]
pub struct DiscardedFile {
    pub descriptor: String,
    pub path: String,
    pub size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
    Append,
    Update,
    Delete,
    Compaction,
    Merge,
}

/// The payload submitted to [`CatalogClient::commit`].
///
/// `read_partition_versions` names the versions the writer *based its
/// computation on*; the catalog compares them to current state to decide
/// whether the commit can be admitted.
#[derive(Debug, Clone)]
pub struct CommitEnvelope {
    pub table_info_snapshot: Table,
    pub data_commits: Vec<DataCommitInfo>,
    pub new_partition_versions: Vec<PartitionVersion>,
    pub commit_type: CommitType,
    pub read_partition_versions: Vec<PartitionVersion>,
}

/// The catalog's verdict on a submitted [`CommitEnvelope`].
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed {
        new_partition_versions: Vec<PartitionVersion>,
    },
    Conflict {
        kind: ConflictKind,
        partition_desc: PartitionDescriptor,
    },
}

#[async_trait]
pub trait CatalogClient: Send + Sync + std::fmt::Debug {
    async fn get_table_info(&self, table_id: TableId) -> Result<Table>;
    async fn get_table_info_by_path(&self, path: &str) -> Result<Table>;

    /// The latest [`PartitionVersion`] of every partition in the table.
    async fn list_partitions(&self, table_id: TableId) -> Result<Vec<PartitionVersion>>;

    /// `version == 0` means "latest". Returns `None` if the partition
    /// does not exist (or has been tombstoned past that version).
    async fn get_single_partition(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        version: u64,
    ) -> Result<Option<PartitionVersion>>;

    /// Server-side equality index lookup, e.g. `"k1=v1 & k2=v2"`.
    async fn get_partitions_by_eq(
        &self,
        table_id: TableId,
        query: &str,
    ) -> Result<Vec<PartitionVersion>>;

    /// The latest version at or before `ts`, or `-1` if none exists yet.
    async fn version_up_to_ts(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        ts: DateTime<Utc>,
    ) -> Result<i64>;

    async fn get_commits(
        &self,
        table_id: TableId,
        commit_ids: &[CommitId],
    ) -> Result<Vec<DataCommitInfo>>;

    /// Submits an atomic, possibly multi-partition commit. Never returns
    /// `Err` for a conflict: conflicts are a normal, typed outcome;
    /// `Err` is reserved for catalog unavailability and similar
    /// transport-level failures.
    async fn commit(&self, envelope: CommitEnvelope) -> Result<CommitOutcome>;

    async fn update_properties(
        &self,
        table_id: TableId,
        properties: std::collections::HashMap<String, String>,
    ) -> Result<()>;

    /// Best-effort: failure to record a discard must never fail the
    /// commit that produced it.
    async fn record_discard(&self, files: &[DiscardedFile]) -> Result<()>;
}

/// Writes `files` to the discard log, retrying once on failure before
/// giving up and logging a warning. Never returns an error: a failure
/// here must never unwind the commit that already landed; durable retry
/// beyond this single attempt belongs to a background sweep, out of this
/// crate's scope.
pub(crate) async fn record_discard_best_effort(catalog: &dyn CatalogClient, files: Vec<DiscardedFile>) {
    if files.is_empty() {
        return;
    }
    if let Err(first_err) = catalog.record_discard(&files).await {
        tracing::warn!(error = %first_err, count = files.len(), "discard log write failed, retrying once");
        if let Err(e) = catalog.record_discard(&files).await {
            tracing::warn!(error = %e, count = files.len(), "discard log write failed again, giving up");
        }
    }
}
