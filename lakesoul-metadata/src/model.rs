//! Data model: `Table`, `PartitionVersion`, `DataCommitInfo`,
//! `DataFileOp`, and the resolver's `DataFileInfo` output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CommitId, PartitionDescriptor, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOp {
    AppendCommit,
    CompactionCommit,
    UpdateCommit,
    DeleteCommit,
    MergeCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOp {
    Add,
    Del,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileOp {
    pub path: String,
    pub op: FileOp,
    pub size: i64,
    /// Comma-separated column list, for schema-evolution bookkeeping.
    pub file_exist_cols: String,
}

/// A table's stable identity and its partitioning/bucketing scheme.
///
/// Invariant: `schema` includes every partition column; `hash_bucket_count`
/// is immutable except via a rebucketing compaction (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub table_id: TableId,
    pub namespace: String,
    pub short_name: Option<String>,
    pub path: String,
    /// Opaque serialized schema; schema interpretation belongs to the
    /// query-engine binding layer (out of scope here).
    pub schema_json: String,
    pub range_partition_columns: Vec<String>,
    pub hash_partition_columns: Vec<String>,
    pub hash_bucket_count: u32,
    pub properties: HashMap<String, String>,
    pub cdc_column: Option<String>,
}

impl Table {
    pub fn is_range_partitioned(&self) -> bool {
        !self.range_partition_columns.is_empty()
    }

    pub fn is_hash_partitioned(&self) -> bool {
        !self.hash_partition_columns.is_empty()
    }
}

/// The immutable head of a partition at a point in its history.
///
/// Invariant: version N's `read_files` is a prefix-extension of version
/// N-1's under Append/Update/Delete; under Compaction it is a single new
/// commit that supersedes prior ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionVersion {
    pub table_id: TableId,
    pub partition_desc: PartitionDescriptor,
    pub version: u64,
    pub read_files: Vec<CommitId>,
    pub commit_op: CommitOp,
    pub expression: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An atomic set of file additions/tombstones scoped to one partition.
///
/// Invariant: a commit is referenced by a `PartitionVersion` iff
/// `committed == true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCommitInfo {
    pub commit_id: CommitId,
    pub table_id: TableId,
    pub partition_desc: PartitionDescriptor,
    pub commit_op: CommitOp,
    pub file_ops: Vec<DataFileOp>,
    pub timestamp: DateTime<Utc>,
    pub committed: bool,
}

/// The role a file plays in a partition's resolved, merge-on-read view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileRole {
    Add,
    Compacted,
}

/// The resolver's output: one physical file, located and ordered for a
/// read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFileInfo {
    pub path: String,
    pub partition_desc: PartitionDescriptor,
    pub role: FileRole,
    pub size: i64,
    pub modification_time: DateTime<Utc>,
    pub file_exist_cols: String,
    pub bucket_id: u32,
}

/// Extracts the hash-bucket id from a LakeSoul file path following the
/// `…-bucket<ID>.parquet` naming convention. Unhashed tables use bucket 0.
pub fn bucket_id_from_path(path: &str) -> u32 {
    let stem = path.strip_suffix(".parquet").unwrap_or(path);
    if let Some(idx) = stem.rfind("-bucket") {
        let digits = &stem[idx + "-bucket".len()..];
        if let Ok(id) = digits.parse::<u32>() {
            return id;
        }
    }
    0
}
