//! The file-set resolver: walks a partition's `read_files` chain into a
//! located, ordered, merge-on-read file list.
//!
//! Generalizes a simpler oldest-to-newest file ordering convention into a
//! walk that also recognizes a compaction barrier and incremental/
//! snapshot-at time bounds.

use std::collections::HashMap;

use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::ids::TableId;
use crate::model::{CommitOp, DataFileInfo, FileRole, PartitionVersion, bucket_id_from_path};
use crate::time::ReadType;

/// Resolves the physical files a reader must open for `partition`,
/// ordered so a merge-on-read pass can apply them correctly:
/// a `Compacted` base file first, followed by `Add` deltas oldest to
/// newest. Later entries for the same primary key win under CDC
/// last-write-wins because the merge applies them in this order.
pub async fn resolve(
    catalog: &dyn CatalogClient,
    table_id: TableId,
    partition: &PartitionVersion,
    read_type: ReadType,
) -> Result<Vec<DataFileInfo>> {
    let commits = catalog
        .get_commits(table_id, &partition.read_files)
        .await?;
    let mut by_id = HashMap::with_capacity(commits.len());
    for commit in commits {
        by_id.insert(commit.commit_id, commit);
    }

    // A compaction commit anywhere in the chain is a barrier: every
    // commit before it is superseded and dropped, only the compacted
    // output and anything appended after it survive.
    let barrier_index = partition
        .read_files
        .iter()
        .enumerate()
        .rev()
        .find(|(_, id)| {
            by_id
                .get(id)
                .map(|c| c.commit_op == CommitOp::CompactionCommit)
                .unwrap_or(false)
        })
        .map(|(idx, _)| idx);

    let relevant_ids = match barrier_index {
        Some(idx) => &partition.read_files[idx..],
        None => &partition.read_files[..],
    };

    // path -> role map: `add` inserts, `del`
    // tombstones whatever an earlier commit in this same walk added
    // under that path. Insertion order is preserved (a `Vec` acting as
    // an ordered map) so the final sort's tie-break on commit order is
    // stable for paths added in the same commit.
    let mut live: Vec<DataFileInfo> = Vec::new();
    for commit_id in relevant_ids {
        let Some(commit) = by_id.get(commit_id) else {
            continue;
        };
        if let Some(lower) = read_type.lower_bound() {
            if commit.timestamp <= lower {
                continue;
            }
        }
        if let Some(upper) = read_type.upper_bound() {
            if commit.timestamp > upper {
                continue;
            }
        }
        let role = if commit.commit_op == CommitOp::CompactionCommit {
            FileRole::Compacted
        } else {
            FileRole::Add
        };
        for op in &commit.file_ops {
            match op.op {
                crate::model::FileOp::Del => {
                    live.retain(|f| f.path != op.path);
                }
                crate::model::FileOp::Add => {
                    live.push(DataFileInfo {
                        path: op.path.clone(),
                        partition_desc: partition.partition_desc.clone(),
                        role,
                        size: op.size,
                        modification_time: commit.timestamp,
                        file_exist_cols: op.file_exist_cols.clone(),
                        bucket_id: bucket_id_from_path(&op.path),
                    });
                }
            }
        }
    }

    // Compacted base sorts first regardless of commit order, then adds
    // in the order they were committed (already the walk order above).
    live.sort_by_key(|f| match f.role {
        FileRole::Compacted => (0, f.modification_time),
        FileRole::Add => (1, f.modification_time),
    });

    Ok(live)
}

/// Splits a resolved file list into one list per hash bucket, the unit a
/// hash-bucketed merge-on-read reads independently.
pub fn split_by_bucket(files: Vec<DataFileInfo>) -> HashMap<u32, Vec<DataFileInfo>> {
    let mut buckets: HashMap<u32, Vec<DataFileInfo>> = HashMap::new();
    for file in files {
        buckets.entry(file.bucket_id).or_default().push(file);
    }
    buckets
}
