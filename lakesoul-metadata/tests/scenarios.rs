//! End-to-end scenario coverage, exercised against [`InMemoryCatalog`]
//! the way `analytics/tests/catalog_tests.rs` exercises the teacher's
//! catalog against an in-process double.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use lakesoul_metadata::catalog::memory::InMemoryCatalog;
use lakesoul_metadata::commit::{CommitEngine, PendingWrite};
use lakesoul_metadata::compaction::{self, CompactionCandidate, CompactionOutcome};
use lakesoul_metadata::error::{ConflictKind, Error};
use lakesoul_metadata::ids::PartitionDescriptor;
use lakesoul_metadata::io::{CompactionInput, MergedFile, ParquetIo};
use lakesoul_metadata::model::{CommitOp, DataFileInfo, DataFileOp, FileOp, FileRole, PartitionVersion, Table};
use lakesoul_metadata::planner::{ColumnPredicate, Predicate};
use lakesoul_metadata::snapshot::{Snapshot, SnapshotCache};
use lakesoul_metadata::time::ReadType;
use lakesoul_metadata::{CatalogClient, TableId};

/// A CDC-aware [`ParquetIo`] test double. Files are toy rows,
/// `pk=<key>,col=val,...` one per line; `merge_compact` applies
/// last-write-wins per `pk` across inputs in the order given, honoring
/// `cdc_column`: a row whose `cdc_column` value is `delete` tombstones
/// that primary key, `update` (or the column's absence) upserts it.
/// `ObjectStoreParquetIo` doesn't decode rows at all (it only
/// concatenates bytes), so CDC-dependent scenarios need this stand-in.
#[derive(Debug, Default)]
struct CdcMergeIo {
    files: Mutex<HashMap<String, String>>,
}

impl CdcMergeIo {
    fn with_file(self, path: &str, content: &str) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl ParquetIo for CdcMergeIo {
    async fn file_size(&self, path: &str) -> anyhow::Result<i64> {
        Ok(self.files.lock().unwrap().get(path).map(|s| s.len() as i64).unwrap_or(0))
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete_batch(&self, paths: &[String]) -> anyhow::Result<()> {
        let mut files = self.files.lock().unwrap();
        for path in paths {
            files.remove(path);
        }
        Ok(())
    }

    async fn merge_compact(
        &self,
        inputs: &[CompactionInput],
        output_dir: &str,
        _file_size_limit: i64,
        cdc_column: Option<&str>,
    ) -> anyhow::Result<Vec<MergedFile>> {
        let files = self.files.lock().unwrap();
        let mut rows: HashMap<String, Vec<(String, String)>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for input in inputs {
            let content = files.get(&input.path).cloned().unwrap_or_default();
            for line in content.lines() {
                let mut fields: Vec<(String, String)> = line
                    .split(',')
                    .filter_map(|kv| kv.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                let pk = fields
                    .iter()
                    .find(|(k, _)| k == "pk")
                    .map(|(_, v)| v.clone())
                    .expect("row missing pk column");
                let op = cdc_column.and_then(|col| fields.iter().find(|(k, _)| k == col).map(|(_, v)| v.clone()));
                fields.retain(|(k, _)| Some(k.as_str()) != cdc_column);

                if !order.contains(&pk) {
                    order.push(pk.clone());
                }
                if op.as_deref() == Some("delete") {
                    rows.remove(&pk);
                } else {
                    rows.insert(pk, fields);
                }
            }
        }
        drop(files);

        let merged = order
            .into_iter()
            .filter_map(|pk| {
                rows.get(&pk).map(|fields| {
                    let mut line = format!("pk={pk}");
                    for (k, v) in fields {
                        if k != "pk" {
                            line.push(',');
                            line.push_str(&format!("{k}={v}"));
                        }
                    }
                    line
                })
            })
            .collect::<Vec<_>>()
            .join("\n");

        let path = format!("{output_dir}/merged-00000.parquet");
        self.files.lock().unwrap().insert(path.clone(), merged.clone());
        Ok(vec![MergedFile {
            path,
            size: merged.len() as i64,
        }])
    }
}

fn bare_table(table_id: TableId, range_cols: &[&str]) -> Table {
    Table {
        table_id,
        namespace: "default".into(),
        short_name: Some("t".into()),
        path: "s3://bucket/t".into(),
        schema_json: "{}".into(),
        range_partition_columns: range_cols.iter().map(|s| s.to_string()).collect(),
        hash_partition_columns: vec!["id".into()],
        hash_bucket_count: 1,
        properties: HashMap::new(),
        cdc_column: None,
    }
}

fn add(path: &str, size: i64) -> DataFileOp {
    DataFileOp {
        path: path.to_string(),
        op: FileOp::Add,
        size,
        file_exist_cols: String::new(),
    }
}

fn resolved_file(path: &str, size: i64, desc: &PartitionDescriptor) -> DataFileInfo {
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

/// S1 — append-append concurrency: two writers both read v=3 and append
/// concurrently. Both must be admitted (appends only conflict on a
/// compaction barrier or tombstone), landing as v=4 and v=5 in whichever
/// order the catalog serializes them, with the resolver for the final
/// version returning both files in commit order.
#[tokio::test]
async fn s1_concurrent_appends_are_both_admitted_in_commit_order() -> Result<()> {
    let table_id = TableId::new();
    let catalog = InMemoryCatalog::new();
    catalog.register_table(bare_table(table_id, &["d"]));
    let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
    let engine = CommitEngine::new(&catalog, &snapshots);
    let desc = PartitionDescriptor::build(&[("d", "1")]);

    // Seed a base version so both writers' reads start from the same
    // non-empty head, the way a real table already at v=3 would.
    engine
        .append(
            table_id,
            vec![PendingWrite {
                partition_desc: desc.clone(),
                file_ops: vec![add("base-bucket0.parquet", 10)],
            }],
        )
        .await?;

    let a = engine.append(
        table_id,
        vec![PendingWrite {
            partition_desc: desc.clone(),
            file_ops: vec![add("fA-bucket0.parquet", 20)],
        }],
    );
    let b = engine.append(
        table_id,
        vec![PendingWrite {
            partition_desc: desc.clone(),
            file_ops: vec![add("fB-bucket0.parquet", 20)],
        }],
    );
    let (a_result, b_result) = tokio::join!(a, b);
    let a_versions = a_result?;
    let b_versions = b_result?;
    assert_eq!(a_versions.len(), 1);
    assert_eq!(b_versions.len(), 1);
    // Both landed, at distinct, consecutive versions.
    let mut landed = vec![a_versions[0].version, b_versions[0].version];
    landed.sort();
    assert_eq!(landed, vec![1, 2]);

    let latest = catalog
        .get_single_partition(table_id, &desc, 0)
        .await?
        .expect("partition exists");
    let files = lakesoul_metadata::resolver::resolve(&catalog, table_id, &latest, ReadType::Full).await?;
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["base-bucket0.parquet", "fA-bucket0.parquet", "fB-bucket0.parquet"]
    );
    Ok(())
}

/// S2 — append vs compaction: a compaction reading v=5 races a
/// concurrent append that lands v=6 first. The compaction's submit must
/// fail with `CompactionRaced`, not `StalePartition`, and after the
/// abort the resolver at the latest version still sees the original
/// files plus the append's file.
#[tokio::test]
async fn s2_compaction_raced_by_a_concurrent_append_fails_with_compaction_raced() -> Result<()> {
    let table_id = TableId::new();
    let catalog = InMemoryCatalog::new();
    catalog.register_table(bare_table(table_id, &["d"]));
    let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
    let engine = CommitEngine::new(&catalog, &snapshots);
    let desc = PartitionDescriptor::build(&[("d", "1")]);

    engine
        .append(
            table_id,
            vec![PendingWrite {
                partition_desc: desc.clone(),
                file_ops: vec![add("original-bucket0.parquet", 10)],
            }],
        )
        .await?;

    // The compaction reads the current head (v=0) before anything else
    // lands.
    let read_version = catalog
        .get_single_partition(table_id, &desc, 0)
        .await?
        .expect("partition exists");

    // A concurrent append lands first, advancing the partition past what
    // the compaction read.
    engine
        .append(
            table_id,
            vec![PendingWrite {
                partition_desc: desc.clone(),
                file_ops: vec![add("fC-bucket0.parquet", 10)],
            }],
        )
        .await?;

    let table = catalog.get_table_info(table_id).await?;
    let compacted = PartitionVersion {
        table_id,
        partition_desc: desc.clone(),
        version: read_version.version + 1,
        read_files: vec![],
        commit_op: CommitOp::CompactionCommit,
        expression: None,
        timestamp: Utc::now(),
    };
    let err = engine
        .submit(
            table_id,
            table,
            lakesoul_metadata::catalog::CommitType::Compaction,
            vec![],
            vec![compacted],
            vec![read_version],
        )
        .await
        .expect_err("a stale compaction must be rejected");
    match err {
        Error::Conflict { kind, .. } => assert_eq!(kind, ConflictKind::CompactionRaced),
        other => panic!("expected a conflict error, got {other:?}"),
    }

    let latest = catalog
        .get_single_partition(table_id, &desc, 0)
        .await?
        .expect("partition exists");
    let files = lakesoul_metadata::resolver::resolve(&catalog, table_id, &latest, ReadType::Full).await?;
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["original-bucket0.parquet", "fC-bucket0.parquet"]);
    Ok(())
}

/// S3 — partition pruning: a fully-bound equality filter, a
/// partially-bound equality filter, and a pure range filter each select
/// the expected partition-level file sets without ever invoking the
/// query-engine's residual (data-predicate) application.
#[tokio::test]
async fn s3_partition_predicates_prune_to_the_matching_partitions() -> Result<()> {
    let table_id = TableId::new();
    let catalog = InMemoryCatalog::new();
    catalog.register_table(bare_table(table_id, &["region", "dt"]));
    let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
    let engine = CommitEngine::new(&catalog, &snapshots);

    let us_jan1 = PartitionDescriptor::build(&[("region", "us"), ("dt", "2024-01-01")]);
    let us_jan2 = PartitionDescriptor::build(&[("region", "us"), ("dt", "2024-01-02")]);
    let eu_jan1 = PartitionDescriptor::build(&[("region", "eu"), ("dt", "2024-01-01")]);

    for (desc, path) in [
        (&us_jan1, "us-jan1.parquet"),
        (&us_jan2, "us-jan2.parquet"),
        (&eu_jan1, "eu-jan1.parquet"),
    ] {
        engine
            .append(
                table_id,
                vec![PendingWrite {
                    partition_desc: desc.clone(),
                    file_ops: vec![add(path, 10)],
                }],
            )
            .await?;
    }

    let snapshot = Snapshot::resolve(&catalog, table_id, ReadType::Full).await?;

    // Fully-bound equality: exactly the us/2024-01-01 partition.
    let full_eq = Predicate::And(vec![
        Predicate::Column("region".into(), ColumnPredicate::Eq("us".into())),
        Predicate::Column("dt".into(), ColumnPredicate::Eq("2024-01-01".into())),
    ]);
    let (files, residual) = snapshot.files_for_scan(&catalog, Some(&full_eq)).await?;
    assert!(residual.is_none());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "us-jan1.parquet");

    // Partially-bound equality: region alone narrows to both us partitions.
    let partial_eq = Predicate::Column("region".into(), ColumnPredicate::Eq("us".into()));
    let (files, _) = snapshot.files_for_scan(&catalog, Some(&partial_eq)).await?;
    let mut paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["us-jan1.parquet", "us-jan2.parquet"]);

    // Pure range on dt alone matches every region past the bound.
    let range = Predicate::Column(
        "dt".into(),
        ColumnPredicate::Range {
            lower: Some("2024-01-02".into()),
            upper: None,
        },
    );
    let (files, _) = snapshot.files_for_scan(&catalog, Some(&range)).await?;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "us-jan2.parquet");
    Ok(())
}

/// S4 — time travel: a snapshot anchored between v=3's and v=4's commit
/// timestamps resolves to the same files as an explicit snapshot at v=3.
#[tokio::test]
async fn s4_snapshot_at_between_two_commits_matches_the_earlier_version() -> Result<()> {
    let table_id = TableId::new();
    let catalog = InMemoryCatalog::new();
    catalog.register_table(bare_table(table_id, &["d"]));
    let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
    let engine = CommitEngine::new(&catalog, &snapshots);
    let desc = PartitionDescriptor::build(&[("d", "1")]);

    engine
        .append(
            table_id,
            vec![PendingWrite {
                partition_desc: desc.clone(),
                file_ops: vec![add("v3-bucket0.parquet", 10)],
            }],
        )
        .await?;
    let v3_snapshot = Snapshot::resolve(&catalog, table_id, ReadType::Full).await?;
    let (v3_files, _) = v3_snapshot.files_for_scan(&catalog, None).await?;

    let anchor = Utc::now() + Duration::milliseconds(10);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    engine
        .append(
            table_id,
            vec![PendingWrite {
                partition_desc: desc.clone(),
                file_ops: vec![add("v4-bucket0.parquet", 10)],
            }],
        )
        .await?;

    let travel_snapshot = Snapshot::resolve(&catalog, table_id, ReadType::SnapshotAt(anchor)).await?;
    let (travel_files, _) = travel_snapshot.files_for_scan(&catalog, None).await?;

    let v3_paths: Vec<&str> = v3_files.iter().map(|f| f.path.as_str()).collect();
    let travel_paths: Vec<&str> = travel_files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(v3_paths, travel_paths);
    assert_eq!(travel_paths, vec!["v3-bucket0.parquet"]);
    Ok(())
}

/// S5 — CDC merge: a base row and two CDC deltas for the same primary
/// key (`update` then `delete`) compact down to no row for that key,
/// while an untouched key's row survives the merge unchanged.
#[tokio::test]
async fn s5_cdc_last_write_wins_drops_a_deleted_key_from_the_compaction_output() -> Result<()> {
    let table_id = TableId::new();
    let catalog = InMemoryCatalog::new();
    let mut table = bare_table(table_id, &["d"]);
    table.cdc_column = Some("_op".to_string());
    catalog.register_table(table.clone());
    let desc = PartitionDescriptor::build(&[("d", "1")]);

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

    let io = CdcMergeIo::default()
        .with_file("base.parquet", "pk=1,v=a\npk=2,v=x")
        .with_file("delta1.parquet", "pk=1,v=b,_op=update")
        .with_file("delta2.parquet", "pk=1,_op=delete");

    let candidate = CompactionCandidate {
        bucket_id: 0,
        files: vec![
            resolved_file("base.parquet", 16, &desc),
            resolved_file("delta1.parquet", 18, &desc),
            resolved_file("delta2.parquet", 15, &desc),
        ],
    };

    let outcome = compaction::execute(
        &catalog,
        &io,
        table,
        desc.clone(),
        current,
        vec![candidate],
        1_000_000,
        "compacted",
    )
    .await?;

    let CompactionOutcome::Committed { new_version } = outcome else {
        panic!("expected a committed compaction");
    };
    assert_eq!(new_version.commit_op, CommitOp::CompactionCommit);

    let merged_path = io.files.lock().unwrap().get("compacted/merged-00000.parquet").cloned();
    let merged = merged_path.expect("compaction wrote a merged output");
    assert!(!merged.contains("pk=1"), "deleted key must not survive the merge: {merged}");
    assert!(merged.contains("pk=2,v=x"), "untouched key must survive the merge: {merged}");
    Ok(())
}

/// S6 — TTL cleanup: a partition whose latest version is past
/// `partition_ttl_days` is tombstoned by the sweep, reads against it
/// return nothing, and every file that was ever part of it ends up in
/// the discard log.
#[tokio::test]
async fn s6_ttl_sweep_tombstones_a_stale_partition_and_discards_its_files() -> Result<()> {
    let table_id = TableId::new();
    let catalog = InMemoryCatalog::new();
    let mut table = bare_table(table_id, &["d"]);
    table
        .properties
        .insert("partition_ttl_days".into(), "1".into());
    catalog.register_table(table);
    let desc = PartitionDescriptor::build(&[("d", "1")]);

    let stale_commit = lakesoul_metadata::model::DataCommitInfo {
        commit_id: lakesoul_metadata::CommitId::new(),
        table_id,
        partition_desc: desc.clone(),
        commit_op: CommitOp::AppendCommit,
        file_ops: vec![add("stale-bucket0.parquet", 10)],
        timestamp: Utc::now() - Duration::days(2),
        committed: true,
    };
    catalog.seed_commit(stale_commit.clone());
    catalog.seed_partition(PartitionVersion {
        table_id,
        partition_desc: desc.clone(),
        version: 0,
        read_files: vec![stale_commit.commit_id],
        commit_op: CommitOp::AppendCommit,
        expression: None,
        timestamp: Utc::now() - Duration::days(2),
    });

    let snapshots = SnapshotCache::new(StdDuration::from_secs(60));
    let tombstoned = lakesoul_metadata::ttl::sweep_partition_ttl(&catalog, &snapshots, table_id).await?;
    assert_eq!(tombstoned, vec![desc.clone()]);

    let live = catalog.list_partitions(table_id).await?;
    assert!(live.is_empty(), "tombstoned partitions must not appear in the live set");

    let latest = catalog
        .get_single_partition(table_id, &desc, 0)
        .await?
        .expect("tombstone version still exists");
    assert_eq!(latest.commit_op, CommitOp::DeleteCommit);

    let discards = catalog.discard_log();
    assert!(discards.iter().any(|d| d.path == "stale-bucket0.parquet"));
    Ok(())
}
