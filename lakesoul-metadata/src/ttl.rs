//! TTL & lifecycle: two orthogonal TTLs stored as table properties,
//! `partition_ttl_days` (tombstone stale partitions) and
//! `compaction_ttl_days` (physically reclaim pre-barrier files).
//!
//! Follows the same subcommand-per-maintenance-task shape as the admin
//! CLI in `src/bin/lakesoul_admin.rs`.

use chrono::{Duration as ChronoDuration, Utc};

use crate::catalog::{CatalogClient, DiscardedFile};
use crate::commit::CommitEngine;
use crate::error::Result;
use crate::ids::TableId;
use crate::model::CommitOp;
use crate::resolver;
use crate::snapshot::SnapshotCache;
use crate::time::ReadType;

fn parse_days_property(table: &crate::model::Table, key: &str) -> Option<i64> {
    table.properties.get(key).and_then(|v| v.parse().ok())
}

/// Tombstones every partition of `table_id` whose latest version is
/// older than `partition_ttl_days`, returning the descriptors tombstoned.
/// Every file still live in a tombstoned partition is recorded in the
/// discard log: once the tombstone lands, no snapshot will ever resolve
/// that partition again, so its files are immediately eligible for
/// physical reclamation (scenario S6).
pub async fn sweep_partition_ttl(
    catalog: &dyn CatalogClient,
    snapshots: &SnapshotCache,
    table_id: TableId,
) -> Result<Vec<crate::ids::PartitionDescriptor>> {
    let table = catalog.get_table_info(table_id).await?;
    let Some(ttl_days) = parse_days_property(&table, "partition_ttl_days") else {
        return Ok(vec![]);
    };
    let cutoff = Utc::now() - ChronoDuration::days(ttl_days);
    let engine = CommitEngine::new(catalog, snapshots);

    let mut tombstoned = Vec::new();
    for pv in catalog.list_partitions(table_id).await? {
        if pv.commit_op == CommitOp::DeleteCommit {
            continue;
        }
        if pv.timestamp < cutoff {
            let live_files = resolver::resolve(catalog, table_id, &pv, ReadType::Full).await?;
            engine.drop_partition(table_id, pv.partition_desc.clone()).await?;
            let descriptor = pv.partition_desc.to_string();
            let discarded: Vec<DiscardedFile> = live_files
                .into_iter()
                .map(|f| DiscardedFile {
                    descriptor: descriptor.clone(),
                    path: f.path,
                    size: f.size,
                })
                .collect();
            crate::catalog::record_discard_best_effort(catalog, discarded).await;
            tombstoned.push(pv.partition_desc);
        }
    }
    Ok(tombstoned)
}

/// Finds pre-compaction-barrier files older than `compaction_ttl_days`
/// across every partition of `table_id` and records them in the discard
/// log, making them eligible for physical deletion. The discard log is
/// the authoritative source of truth for what a cleanup job may delete;
/// this function never deletes bytes itself.
///
/// [`resolver::resolve`] already drops everything before a compaction
/// barrier (it is only ever used to plan a read), so the files this
/// sweep targets are exactly the ones that function omits: commits
/// earlier in `read_files` than the most recent `CompactionCommit`.
pub async fn sweep_compaction_ttl(catalog: &dyn CatalogClient, table_id: TableId) -> Result<usize> {
    let table = catalog.get_table_info(table_id).await?;
    let Some(ttl_days) = parse_days_property(&table, "compaction_ttl_days") else {
        return Ok(0);
    };
    let cutoff = Utc::now() - ChronoDuration::days(ttl_days);

    let mut discarded = Vec::new();
    for pv in catalog.list_partitions(table_id).await? {
        let commits = catalog.get_commits(table_id, &pv.read_files).await?;
        let barrier_index = pv
            .read_files
            .iter()
            .enumerate()
            .rev()
            .find(|(_, id)| {
                commits
                    .iter()
                    .find(|c| c.commit_id == **id)
                    .map(|c| c.commit_op == CommitOp::CompactionCommit)
                    .unwrap_or(false)
            })
            .map(|(idx, _)| idx);
        let Some(barrier_index) = barrier_index else {
            continue;
        };
        for commit_id in &pv.read_files[..barrier_index] {
            let Some(commit) = commits.iter().find(|c| c.commit_id == *commit_id) else {
                continue;
            };
            if commit.timestamp >= cutoff {
                continue;
            }
            for op in &commit.file_ops {
                if op.op == crate::model::FileOp::Add {
                    discarded.push(DiscardedFile {
                        descriptor: pv.partition_desc.to_string(),
                        path: op.path.clone(),
                        size: op.size,
                    });
                }
            }
        }
    }

    let count = discarded.len();
    if !discarded.is_empty() {
        catalog.record_discard(&discarded).await?;
    }
    Ok(count)
}
