//! Compaction execution: stream-merges each candidate bucket through the
//! [`ParquetIo`] collaborator, aggregates every bucket's outputs into a
//! single `CompactionCommit`, and records superseded inputs under the
//! `DISCARD_FILE_LIST` sentinel descriptor.

use chrono::Utc;

use crate::catalog::{CatalogClient, CommitEnvelope, CommitOutcome, CommitType, DiscardedFile};
use crate::compaction::planner::CompactionCandidate;
use crate::error::{Error, Result};
use crate::ids::{CommitId, PartitionDescriptor, TableId};
use crate::io::{CompactionInput, ParquetIo};
use crate::model::{CommitOp, DataFileOp, FileOp, PartitionVersion, Table};

/// Sentinel partition descriptor under which discarded (superseded)
/// input paths are recorded, distinguishing them from a real partition's
/// discard entries when scanning the discard log.
pub const DISCARD_FILE_LIST: &str = "DISCARD_FILE_LIST";

#[derive(Debug)]
pub enum CompactionOutcome {
    Committed { new_version: PartitionVersion },
    Conflict,
}

/// Runs compaction for one partition end to end: merges every candidate
/// bucket, aggregates the outputs into one CompactionCommit, and submits
/// it as a compaction-type envelope with `read_partition_versions =
/// [current]`. On conflict, the just-written outputs are discarded as
/// leaks rather than left to confuse a future resolver walk.
pub async fn execute(
    catalog: &dyn CatalogClient,
    io: &dyn ParquetIo,
    table: Table,
    partition_desc: PartitionDescriptor,
    current: PartitionVersion,
    candidates: Vec<CompactionCandidate>,
    file_size_limit: i64,
    output_dir: &str,
) -> Result<CompactionOutcome> {
    let table_id = table.table_id;
    let mut file_ops = Vec::new();
    // Superseded inputs: only safe to discard once the commit that
    // supersedes them has landed.
    let mut superseded = Vec::new();
    // Newly written outputs: only safe to discard if the commit that
    // would reference them is rejected (otherwise they're live data).
    let mut produced = Vec::new();

    for candidate in &candidates {
        let inputs: Vec<CompactionInput> = candidate
            .files
            .iter()
            .map(|f| CompactionInput {
                path: f.path.clone(),
                role: f.role,
                size: f.size,
            })
            .collect();
        let outputs = io
            .merge_compact(
                &inputs,
                output_dir,
                file_size_limit,
                table.cdc_column.as_deref(),
            )
            .await
            .map_err(|e| Error::Storage {
                path: output_dir.to_string(),
                source: e,
            })?;
        for output in outputs {
            produced.push(DiscardedFile {
                descriptor: DISCARD_FILE_LIST.to_string(),
                path: output.path.clone(),
                size: output.size,
            });
            file_ops.push(DataFileOp {
                path: output.path,
                op: FileOp::Add,
                size: output.size,
                file_exist_cols: String::new(),
            });
        }
        for input in &candidate.files {
            superseded.push(DiscardedFile {
                descriptor: DISCARD_FILE_LIST.to_string(),
                path: input.path.clone(),
                size: input.size,
            });
        }
    }

    if file_ops.is_empty() {
        // Nothing qualified; nothing to commit.
        return Ok(CompactionOutcome::Committed {
            new_version: current,
        });
    }

    let commit_id = CommitId::new();
    let now = Utc::now();
    let data_commit = crate::model::DataCommitInfo {
        commit_id,
        table_id,
        partition_desc: partition_desc.clone(),
        commit_op: CommitOp::CompactionCommit,
        file_ops,
        timestamp: now,
        committed: false,
    };
    let new_version = PartitionVersion {
        table_id,
        partition_desc: partition_desc.clone(),
        version: current.version,
        read_files: vec![commit_id],
        commit_op: CommitOp::CompactionCommit,
        expression: None,
        timestamp: now,
    };

    let envelope = CommitEnvelope {
        table_info_snapshot: table,
        data_commits: vec![data_commit],
        new_partition_versions: vec![new_version.clone()],
        commit_type: CommitType::Compaction,
        read_partition_versions: vec![current],
    };

    match catalog.commit(envelope).await? {
        CommitOutcome::Committed { mut new_partition_versions } => {
            record_discard(catalog, superseded).await;
            Ok(CompactionOutcome::Committed {
                new_version: new_partition_versions
                    .pop()
                    .unwrap_or(new_version),
            })
        }
        CommitOutcome::Conflict { .. } => {
            // Our outputs are now orphaned (the inputs they would have
            // superseded are still the live data); log them so the
            // discard sweep can reclaim the space instead of leaking it.
            record_discard(catalog, produced).await;
            Ok(CompactionOutcome::Conflict)
        }
    }
}

async fn record_discard(catalog: &dyn CatalogClient, files: Vec<DiscardedFile>) {
    crate::catalog::record_discard_best_effort(catalog, files).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::compaction::planner::CompactionCandidate;
    use crate::io::ObjectStoreParquetIo;
    use crate::model::{DataFileInfo, FileRole};
    use object_store::path::Path as ObjectPath;
    use object_store::ObjectStore;
    use std::sync::Arc;

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

    async fn io_with_files(paths_and_bytes: &[(&str, &[u8])]) -> ObjectStoreParquetIo {
        let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        for (path, bytes) in paths_and_bytes {
            store.put(&ObjectPath::from(*path), bytes.to_vec().into()).await.unwrap();
        }
        ObjectStoreParquetIo::new(store, ObjectPath::from(""))
    }

    fn file_info(path: &str, size: i64, desc: &PartitionDescriptor) -> DataFileInfo {
        DataFileInfo {
            path: path.to_string(),
            partition_desc: desc.clone(),
            role: FileRole::Add,
            size,
            modification_time: Utc::now(),
            file_exist_cols: String::new(),
            bucket_id: 0,
        }
    }

    #[tokio::test]
    async fn executing_compaction_commits_merged_output_and_discards_inputs() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        catalog.register_table(table(table_id));
        let desc = PartitionDescriptor::build(&[("region", "us")]);
        let current = PartitionVersion {
            table_id,
            partition_desc: desc.clone(),
            version: 0,
            read_files: vec![],
            commit_op: CommitOp::AppendCommit,
            expression: None,
            timestamp: Utc::now(),
        };
        catalog.seed_partition(current.clone());

        let io = io_with_files(&[("a.parquet", b"aaaa"), ("b.parquet", b"bbbb")]).await;
        let candidate = CompactionCandidate {
            bucket_id: 0,
            files: vec![file_info("a.parquet", 4, &desc), file_info("b.parquet", 4, &desc)],
        };

        let outcome = execute(
            &catalog,
            &io,
            table(table_id),
            desc.clone(),
            current,
            vec![candidate],
            1024,
            "compacted",
        )
        .await
        .unwrap();

        match outcome {
            CompactionOutcome::Committed { new_version } => {
                assert_eq!(new_version.commit_op, CommitOp::CompactionCommit);
            }
            CompactionOutcome::Conflict => panic!("expected a committed compaction"),
        }

        let discards = catalog.discard_log();
        let discarded_paths: Vec<&str> = discards.iter().map(|d| d.path.as_str()).collect();
        assert!(discarded_paths.contains(&"a.parquet"));
        assert!(discarded_paths.contains(&"b.parquet"));
        assert!(discards.iter().all(|d| d.descriptor == DISCARD_FILE_LIST));
    }

    #[tokio::test]
    async fn a_conflicting_compaction_discards_its_own_output_instead_of_the_inputs() {
        let table_id = TableId::new();
        let catalog = InMemoryCatalog::new();
        catalog.register_table(table(table_id));
        let desc = PartitionDescriptor::build(&[("region", "us")]);
        let stale = PartitionVersion {
            table_id,
            partition_desc: desc.clone(),
            version: 0,
            read_files: vec![],
            commit_op: CommitOp::AppendCommit,
            expression: None,
            timestamp: Utc::now(),
        };
        catalog.seed_partition(stale.clone());
        // A concurrent compaction lands first, bumping the partition past
        // the version `stale` still reads.
        catalog.seed_partition(PartitionVersion {
            table_id,
            partition_desc: desc.clone(),
            version: 1,
            read_files: vec![CommitId::new()],
            commit_op: CommitOp::CompactionCommit,
            expression: None,
            timestamp: Utc::now(),
        });

        let io = io_with_files(&[("a.parquet", b"aaaa")]).await;
        let candidate = CompactionCandidate {
            bucket_id: 0,
            files: vec![file_info("a.parquet", 4, &desc)],
        };

        let outcome = execute(
            &catalog,
            &io,
            table(table_id),
            desc.clone(),
            stale,
            vec![candidate],
            1024,
            "compacted",
        )
        .await
        .unwrap();

        assert!(matches!(outcome, CompactionOutcome::Conflict));
        let discards = catalog.discard_log();
        assert!(!discards.iter().any(|d| d.path == "a.parquet"));
        assert!(discards.iter().any(|d| d.path.starts_with("compacted/")));
    }
}
