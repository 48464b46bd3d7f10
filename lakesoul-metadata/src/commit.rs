//! The commit engine: builds a [`CommitEnvelope`], submits it, interprets
//! the catalog's verdict, and retries appends by rebasing onto the new
//! head when another writer landed first.
//!
//! Grounded in the retry-on-conflict shape of `ingestion`'s
//! `remote_data_lake::migrate_db` (read current state, decide whether a
//! concurrent actor already did the work, act only if not) generalized
//! from a single migration race to arbitrary concurrent commits.

use std::sync::Arc;

use chrono::Utc;

use crate::catalog::{CatalogClient, CommitEnvelope, CommitOutcome, CommitType, DiscardedFile};
use crate::error::{ConflictKind, Error, Result};
use crate::ids::{CommitId, PartitionDescriptor, TableId};
use crate::model::{CommitOp, DataCommitInfo, DataFileOp, PartitionVersion, Table};
use crate::snapshot::SnapshotCache;

/// How many times an append retries after losing a race to a concurrent
/// append, before giving up. Unbounded retries under sustained write
/// contention would starve a writer indefinitely; this value is an Open
/// Question resolution recorded in DESIGN.md.
pub const MAX_APPEND_RETRIES: u32 = 8;

/// One partition's worth of new file operations to commit.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub partition_desc: PartitionDescriptor,
    pub file_ops: Vec<DataFileOp>,
}

pub struct CommitEngine<'a> {
    catalog: &'a dyn CatalogClient,
    snapshots: &'a SnapshotCache,
}

impl<'a> CommitEngine<'a> {
    pub fn new(catalog: &'a dyn CatalogClient, snapshots: &'a SnapshotCache) -> Self {
        Self { catalog, snapshots }
    }

    /// Appends `writes` to `table_id`, rebasing onto the current head and
    /// retrying up to [`MAX_APPEND_RETRIES`] times if a concurrent append
    /// lands first (`may_append_to_newer`). Only a concurrent compaction
    /// or tombstone is a hard conflict.
    pub async fn append(&self, table_id: TableId, writes: Vec<PendingWrite>) -> Result<Vec<PartitionVersion>> {
        let mut attempt = 0;
        loop {
            let table = self.catalog.get_table_info(table_id).await?;
            let mut read_versions = Vec::with_capacity(writes.len());
            let mut new_versions = Vec::with_capacity(writes.len());
            let mut data_commits = Vec::with_capacity(writes.len());

            for write in &writes {
                check_schema_compatibility(&table, write)?;
                let base = self
                    .catalog
                    .get_single_partition(table_id, &write.partition_desc, 0)
                    .await?
                    .unwrap_or_else(|| empty_partition(table_id, write.partition_desc.clone()));
                let commit_id = CommitId::new();
                let now = Utc::now();
                data_commits.push(DataCommitInfo {
                    commit_id,
                    table_id,
                    partition_desc: write.partition_desc.clone(),
                    commit_op: CommitOp::AppendCommit,
                    file_ops: write.file_ops.clone(),
                    timestamp: now,
                    committed: false,
                });
                new_versions.push(PartitionVersion {
                    table_id,
                    partition_desc: write.partition_desc.clone(),
                    version: base.version,
                    read_files: vec![commit_id],
                    commit_op: CommitOp::AppendCommit,
                    expression: None,
                    timestamp: now,
                });
                read_versions.push(base);
            }

            let envelope = CommitEnvelope {
                table_info_snapshot: table,
                data_commits,
                new_partition_versions: new_versions,
                commit_type: CommitType::Append,
                read_partition_versions: read_versions,
            };

            match self.catalog.commit(envelope).await? {
                CommitOutcome::Committed { new_partition_versions } => {
                    self.snapshots.invalidate(table_id).await;
                    self.merge_new_columns(table_id, &writes).await;
                    return Ok(new_partition_versions);
                }
                CommitOutcome::Conflict { kind, partition_desc } => {
                    attempt += 1;
                    if attempt >= MAX_APPEND_RETRIES {
                        return Err(Error::Conflict {
                            table_id,
                            partition_desc,
                            kind,
                        });
                    }
                    tracing::info!(
                        table_id = %table_id,
                        partition_desc = %partition_desc,
                        ?kind,
                        attempt,
                        "append conflict, rebasing onto current head"
                    );
                }
            }
        }
    }

    /// Folds any new columns a just-committed append introduced into
    /// `schema.known_columns`, but only when `schema.autoMerge.enabled`
    /// let the write through in the first place. Best-effort: a failure
    /// to persist the merge must never unwind the commit that already
    /// landed.
    async fn merge_new_columns(&self, table_id: TableId, writes: &[PendingWrite]) {
        let Ok(table) = self.catalog.get_table_info(table_id).await else {
            return;
        };
        let auto_merge = table
            .properties
            .get("schema.autoMerge.enabled")
            .map(|v| v == "true")
            .unwrap_or(false);
        if !auto_merge {
            return;
        }
        let mut known: std::collections::BTreeSet<String> = table
            .properties
            .get("schema.known_columns")
            .map(|v| v.split(',').filter(|c| !c.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let before = known.len();
        for write in writes {
            for op in &write.file_ops {
                for col in op.file_exist_cols.split(',') {
                    if !col.is_empty() {
                        known.insert(col.to_string());
                    }
                }
            }
        }
        if known.len() == before {
            return;
        }
        let merged = known.into_iter().collect::<Vec<_>>().join(",");
        let mut properties = std::collections::HashMap::new();
        properties.insert("schema.known_columns".to_string(), merged);
        if let Err(e) = self.catalog.update_properties(table_id, properties).await {
            tracing::warn!(error = %e, table_id = %table_id, "failed to persist merged schema columns");
        }
    }

    /// Submits a non-retrying commit (update/delete/compaction/merge):
    /// these require `must_be_latest`, so a conflict is handed back to
    /// the caller rather than silently retried.
    pub async fn submit(
        &self,
        table_id: TableId,
        table: Table,
        commit_type: CommitType,
        data_commits: Vec<DataCommitInfo>,
        new_partition_versions: Vec<PartitionVersion>,
        read_partition_versions: Vec<PartitionVersion>,
    ) -> Result<Vec<PartitionVersion>> {
        let envelope = CommitEnvelope {
            table_info_snapshot: table,
            data_commits,
            new_partition_versions,
            commit_type,
            read_partition_versions,
        };
        match self.catalog.commit(envelope).await? {
            CommitOutcome::Committed { new_partition_versions } => {
                self.snapshots.invalidate(table_id).await;
                Ok(new_partition_versions)
            }
            CommitOutcome::Conflict { kind, partition_desc } => Err(Error::Conflict {
                table_id,
                partition_desc,
                kind,
            }),
        }
    }

    /// Drops a partition by writing a tombstone version (an empty,
    /// `DeleteCommit`-tagged head), the mechanism `dropPartition` and the
    /// TTL sweep both use.
    pub async fn drop_partition(
        &self,
        table_id: TableId,
        partition_desc: PartitionDescriptor,
    ) -> Result<PartitionVersion> {
        let table = self.catalog.get_table_info(table_id).await?;
        let current = self
            .catalog
            .get_single_partition(table_id, &partition_desc, 0)
            .await?
            .unwrap_or_else(|| empty_partition(table_id, partition_desc.clone()));
        let tombstone = PartitionVersion {
            table_id,
            partition_desc: partition_desc.clone(),
            version: current.version,
            read_files: vec![],
            commit_op: CommitOp::DeleteCommit,
            expression: None,
            timestamp: Utc::now(),
        };
        let mut result = self
            .submit(
                table_id,
                table,
                CommitType::Delete,
                vec![],
                vec![tombstone],
                vec![current],
            )
            .await?;
        result
            .pop()
            .ok_or_else(|| Error::InvalidState("drop_partition produced no version".into()))
    }

    /// Records physical files superseded by a commit as eligible for
    /// deletion once no live snapshot still needs them. Best-effort: a
    /// failure here must never unwind a successful commit.
    pub async fn record_discard(&self, files: Vec<DiscardedFile>) {
        crate::catalog::record_discard_best_effort(self.catalog, files).await;
    }
}

/// Compares a write's declared columns (`file_exist_cols`) against the
/// table's known column set. `schema_json` itself is opaque
/// here (schema interpretation belongs to the query-engine binding
/// layer), so the known set is tracked separately in the
/// `schema.known_columns` property, folded in by [`CommitEngine::merge_new_columns`]
/// once `schema.autoMerge.enabled` is set. A table with no recorded
/// column set yet has nothing to check a write against.
fn check_schema_compatibility(table: &Table, write: &PendingWrite) -> Result<()> {
    let auto_merge = table
        .properties
        .get("schema.autoMerge.enabled")
        .map(|v| v == "true")
        .unwrap_or(false);
    if auto_merge {
        return Ok(());
    }
    let known: std::collections::HashSet<&str> = match table.properties.get("schema.known_columns") {
        Some(v) => v.split(',').filter(|c| !c.is_empty()).collect(),
        None => return Ok(()),
    };
    if known.is_empty() {
        return Ok(());
    }
    for op in &write.file_ops {
        for col in op.file_exist_cols.split(',') {
            if !col.is_empty() && !known.contains(col) {
                return Err(Error::SchemaIncompatible { table_id: table.table_id });
            }
        }
    }
    Ok(())
}

fn empty_partition(table_id: TableId, partition_desc: PartitionDescriptor) -> PartitionVersion {
    PartitionVersion {
        table_id,
        partition_desc,
        version: 0,
        read_files: vec![],
        commit_op: CommitOp::AppendCommit,
        expression: None,
        timestamp: Utc::now(),
    }
}

/// Not constructed directly by `CommitEngine`, kept here so callers that
/// hold an `Arc<dyn CatalogClient>` (the admin CLI, multi-tenant
/// embeddings) can build an engine without borrowing issues.
pub fn engine_over<'a>(catalog: &'a Arc<dyn CatalogClient>, snapshots: &'a SnapshotCache) -> CommitEngine<'a> {
    CommitEngine::new(catalog.as_ref(), snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::error::ConflictKind;
    use crate::ids::TableId;
    use std::time::Duration as StdDuration;

    fn table(table_id: TableId) -> Table {
        Table {
            table_id,
            namespace: "default".into(),
            short_name: Some("t".into()),
            path: "s3://bucket/t".into(),
            schema_json: "{}".into(),
            range_partition_columns: vec!["region".into()],
            hash_partition_columns: vec![],
            hash_bucket_count: 1,
            properties: std::collections::HashMap::new(),
            cdc_column: None,
        }
    }

    fn write(desc: &PartitionDescriptor, path: &str) -> PendingWrite {
        PendingWrite {
            partition_desc: desc.clone(),
            file_ops: vec![DataFileOp {
                path: path.to_string(),
                op: crate::model::FileOp::Add,
                size: 10,
                file_exist_cols: String::new(),
            }],
        }
    }

    /// An append may land on top of another committed append
    /// (`may_append_to_newer`): two sequential appends to the same
    /// partition both succeed, and the second's `read_files` extends the
    /// first's.
    #[tokio::test]
    async fn sequential_appends_extend_the_same_partition() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        catalog.register_table(table(table_id));
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        let desc = PartitionDescriptor::build(&[("region", "us")]);

        let v1 = engine
            .append(table_id, vec![write(&desc, "p0-bucket0.parquet")])
            .await
            .unwrap();
        assert_eq!(v1[0].version, 0);
        assert_eq!(v1[0].read_files.len(), 1);

        let v2 = engine
            .append(table_id, vec![write(&desc, "p1-bucket0.parquet")])
            .await
            .unwrap();
        assert_eq!(v2[0].version, 1);
        assert_eq!(v2[0].read_files.len(), 2);
    }

    /// A non-retrying commit whose read version was superseded by a
    /// concurrent compaction must surface `CompactionRaced`, never
    /// silently clobber the compacted output.
    #[tokio::test]
    async fn submit_rejects_an_update_that_raced_a_compaction() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        catalog.register_table(table(table_id));
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        let desc = PartitionDescriptor::build(&[("region", "us")]);

        let v1 = engine
            .append(table_id, vec![write(&desc, "p0-bucket0.parquet")])
            .await
            .unwrap()
            .remove(0);

        let compacted = PartitionVersion {
            table_id,
            partition_desc: desc.clone(),
            version: v1.version,
            read_files: vec![CommitId::new()],
            commit_op: CommitOp::CompactionCommit,
            expression: None,
            timestamp: Utc::now(),
        };
        engine
            .submit(
                table_id,
                table(table_id),
                CommitType::Compaction,
                vec![],
                vec![compacted],
                vec![v1.clone()],
            )
            .await
            .unwrap();

        let stale_update = PartitionVersion {
            table_id,
            partition_desc: desc.clone(),
            version: v1.version,
            read_files: vec![],
            commit_op: CommitOp::UpdateCommit,
            expression: None,
            timestamp: Utc::now(),
        };
        let err = engine
            .submit(
                table_id,
                table(table_id),
                CommitType::Update,
                vec![],
                vec![stale_update],
                vec![v1],
            )
            .await
            .unwrap_err();
        match err {
            Error::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::CompactionRaced),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    /// An intervening append that introduced a column outside the
    /// reader's schema snapshot (autoMerge off) must surface
    /// `SchemaChanged`, not a generic `StalePartition`, so the caller can
    /// tell a schema race from a plain version race.
    #[tokio::test]
    async fn submit_reports_schema_changed_when_an_intervening_append_added_a_column() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        let mut t = table(table_id);
        t.properties.insert("schema.known_columns".into(), "a,b".into());
        catalog.register_table(t.clone());
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        let desc = PartitionDescriptor::build(&[("region", "us")]);

        let mut w = write(&desc, "p0-bucket0.parquet");
        w.file_ops[0].file_exist_cols = "a,b".into();
        let v1 = engine.append(table_id, vec![w]).await.unwrap().remove(0);

        // A concurrent append introduces a column "c" the first writer's
        // schema snapshot never saw, simulating autoMerge folding it in
        // for a different writer.
        let mut w2 = write(&desc, "p1-bucket0.parquet");
        w2.file_ops[0].file_exist_cols = "a,b,c".into();
        catalog
            .register_table({
                let mut t2 = t.clone();
                t2.properties.insert("schema.autoMerge.enabled".into(), "true".into());
                t2
            });
        engine.append(table_id, vec![w2]).await.unwrap();
        catalog.register_table(t.clone());

        let stale_update = PartitionVersion {
            table_id,
            partition_desc: desc.clone(),
            version: v1.version,
            read_files: vec![],
            commit_op: CommitOp::UpdateCommit,
            expression: None,
            timestamp: Utc::now(),
        };
        let err = engine
            .submit(
                table_id,
                t,
                CommitType::Update,
                vec![],
                vec![stale_update],
                vec![v1],
            )
            .await
            .unwrap_err();
        match err {
            Error::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::SchemaChanged),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_partition_writes_a_delete_tombstone() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        catalog.register_table(table(table_id));
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        let desc = PartitionDescriptor::build(&[("region", "us")]);

        engine
            .append(table_id, vec![write(&desc, "p0-bucket0.parquet")])
            .await
            .unwrap();
        let tombstone = engine.drop_partition(table_id, desc.clone()).await.unwrap();
        assert_eq!(tombstone.commit_op, CommitOp::DeleteCommit);

        let live = catalog.list_partitions(table_id).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn append_with_an_unknown_column_is_rejected_without_auto_merge() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        let mut t = table(table_id);
        t.properties.insert("schema.known_columns".into(), "a,b".into());
        catalog.register_table(t);
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        let desc = PartitionDescriptor::build(&[("region", "us")]);

        let mut w = write(&desc, "p0-bucket0.parquet");
        w.file_ops[0].file_exist_cols = "a,b,c".into();
        let err = engine.append(table_id, vec![w]).await.unwrap_err();
        match err {
            Error::SchemaIncompatible { table_id: tid } => assert_eq!(tid, table_id),
            other => panic!("expected SchemaIncompatible, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_with_a_new_column_is_allowed_and_merged_when_auto_merge_is_on() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        let mut t = table(table_id);
        t.properties.insert("schema.autoMerge.enabled".into(), "true".into());
        t.properties.insert("schema.known_columns".into(), "a,b".into());
        catalog.register_table(t);
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        let desc = PartitionDescriptor::build(&[("region", "us")]);

        let mut w = write(&desc, "p0-bucket0.parquet");
        w.file_ops[0].file_exist_cols = "a,b,c".into();
        engine.append(table_id, vec![w]).await.unwrap();

        let updated = catalog.get_table_info(table_id).await.unwrap();
        let known = updated.properties.get("schema.known_columns").unwrap();
        assert!(known.split(',').any(|c| c == "c"));
    }

    #[tokio::test]
    async fn record_discard_is_a_noop_on_an_empty_list() {
        let catalog = InMemoryCatalog::new();
        let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
        let engine = CommitEngine::new(&catalog, &snapshots);
        engine.record_discard(vec![]).await;
        assert!(catalog.discard_log().is_empty());
    }
}
