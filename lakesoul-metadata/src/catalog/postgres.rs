//! Postgres-backed [`CatalogClient`]: a `pg_advisory_xact_lock` gated
//! schema migration run at connect time, followed by plain `sqlx`
//! queries and transactions for the operations themselves.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Row};

use super::{CatalogClient, CommitEnvelope, CommitOutcome, CommitType, DiscardedFile};
use crate::error::{ConflictKind, Error, Result};
use crate::ids::{CommitId, PartitionDescriptor, TableId};
use crate::model::{CommitOp, DataCommitInfo, DataFileOp, FileOp, PartitionVersion, Table};

/// The lock key used for `pg_advisory_xact_lock` while migrating, distinct
/// from any key an embedding application might use for its own locking.
const MIGRATION_LOCK_KEY: i64 = 0x4c414b45_534f_554c; // "LAKESOUL" squeezed into 63 bits

pub const LATEST_SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and runs any pending migration before the pool is
    /// handed back to the caller.
    pub async fn connect(db_uri: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect(db_uri)
            .await
            .with_context(|| "connecting to lakesoul metadata database")?;
        migrate(pool.clone()).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn read_schema_version(tr: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> i32 {
    match sqlx::query("SELECT version FROM lakesoul_schema_migration;")
        .fetch_one(&mut **tr)
        .await
    {
        Ok(row) => row.get("version"),
        Err(e) => {
            tracing::info!("assuming schema version 0, could not read migration table: {e}");
            0
        }
    }
}

async fn create_v1_schema(tr: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> anyhow::Result<()> {
    tr.execute("CREATE TABLE lakesoul_schema_migration(version INTEGER);")
        .await
        .with_context(|| "creating migration table")?;
    tr.execute("INSERT INTO lakesoul_schema_migration VALUES (1);")
        .await
        .with_context(|| "recording initial schema version")?;

    tr.execute(
        "CREATE TABLE table_info(
            table_id UUID PRIMARY KEY,
            namespace TEXT NOT NULL,
            short_name TEXT,
            table_path TEXT NOT NULL UNIQUE,
            schema_json TEXT NOT NULL,
            range_partition_columns TEXT[] NOT NULL,
            hash_partition_columns TEXT[] NOT NULL,
            hash_bucket_count INTEGER NOT NULL,
            properties JSONB NOT NULL DEFAULT '{}',
            cdc_column TEXT
        );",
    )
    .await
    .with_context(|| "creating table_info")?;

    tr.execute(
        "CREATE TABLE partition_info(
            table_id UUID NOT NULL REFERENCES table_info(table_id),
            partition_desc TEXT NOT NULL,
            version BIGINT NOT NULL,
            read_files UUID[] NOT NULL,
            commit_op TEXT NOT NULL,
            expression TEXT,
            ts TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (table_id, partition_desc, version)
        );
        CREATE INDEX partition_info_table_id ON partition_info(table_id);
        CREATE INDEX partition_info_ts ON partition_info(table_id, partition_desc, ts);",
    )
    .await
    .with_context(|| "creating partition_info and its indices")?;

    tr.execute(
        "CREATE TABLE data_commit_info(
            commit_id UUID PRIMARY KEY,
            table_id UUID NOT NULL REFERENCES table_info(table_id),
            partition_desc TEXT NOT NULL,
            commit_op TEXT NOT NULL,
            file_ops JSONB NOT NULL,
            ts TIMESTAMPTZ NOT NULL,
            committed BOOLEAN NOT NULL DEFAULT FALSE
        );",
    )
    .await
    .with_context(|| "creating data_commit_info")?;

    tr.execute(
        "CREATE TABLE discard_log(
            path TEXT NOT NULL,
            size BIGINT NOT NULL,
            descriptor TEXT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );",
    )
    .await
    .with_context(|| "creating discard_log")?;

    Ok(())
}

/// Upgrades the schema to [`LATEST_SCHEMA_VERSION`], acquiring an advisory
/// lock first so concurrent processes connecting at the same time don't
/// race each other through `CREATE TABLE`.
pub async fn migrate(pool: PgPool) -> anyhow::Result<()> {
    let mut current = read_schema_version(&mut pool.begin().await?).await;
    if current == LATEST_SCHEMA_VERSION {
        return Ok(());
    }
    let mut tr = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tr)
        .await?;
    current = read_schema_version(&mut tr).await;
    if current == 0 {
        tracing::info!("creating lakesoul metadata schema v1");
        create_v1_schema(&mut tr).await?;
    }
    tr.commit().await?;
    Ok(())
}

fn commit_op_to_str(op: CommitOp) -> &'static str {
    match op {
        CommitOp::AppendCommit => "append",
        CommitOp::CompactionCommit => "compaction",
        CommitOp::UpdateCommit => "update",
        CommitOp::DeleteCommit => "delete",
        CommitOp::MergeCommit => "merge",
    }
}

fn commit_op_from_str(s: &str) -> Result<CommitOp> {
    Ok(match s {
        "append" => CommitOp::AppendCommit,
        "compaction" => CommitOp::CompactionCommit,
        "update" => CommitOp::UpdateCommit,
        "delete" => CommitOp::DeleteCommit,
        "merge" => CommitOp::MergeCommit,
        other => return Err(Error::InvalidState(format!("unknown commit_op {other}"))),
    })
}

fn row_to_partition_version(row: &sqlx::postgres::PgRow) -> Result<PartitionVersion> {
    let table_id: uuid::Uuid = row.get("table_id");
    let read_files: Vec<uuid::Uuid> = row.get("read_files");
    Ok(PartitionVersion {
        table_id: TableId(table_id),
        partition_desc: PartitionDescriptor(row.get("partition_desc")),
        version: row.get::<i64, _>("version") as u64,
        read_files: read_files.into_iter().map(CommitId).collect(),
        commit_op: commit_op_from_str(row.get("commit_op"))?,
        expression: row.get("expression"),
        timestamp: row.get("ts"),
    })
}

fn row_to_table(row: &sqlx::postgres::PgRow) -> Result<Table> {
    let properties_json: serde_json::Value = row.get("properties");
    let properties = serde_json::from_value(properties_json)
        .map_err(|e| Error::InvalidState(format!("corrupt properties json: {e}")))?;
    Ok(Table {
        table_id: TableId(row.get("table_id")),
        namespace: row.get("namespace"),
        short_name: row.get("short_name"),
        path: row.get("table_path"),
        schema_json: row.get("schema_json"),
        range_partition_columns: row.get("range_partition_columns"),
        hash_partition_columns: row.get("hash_partition_columns"),
        hash_bucket_count: row.get::<i32, _>("hash_bucket_count") as u32,
        properties,
        cdc_column: row.get("cdc_column"),
    })
}

fn row_to_data_commit(row: &sqlx::postgres::PgRow) -> Result<DataCommitInfo> {
    let file_ops_json: serde_json::Value = row.get("file_ops");
    let file_ops: Vec<DataFileOp> = serde_json::from_value(file_ops_json)
        .map_err(|e| Error::InvalidState(format!("corrupt file_ops json: {e}")))?;
    Ok(DataCommitInfo {
        commit_id: CommitId(row.get("commit_id")),
        table_id: TableId(row.get("table_id")),
        partition_desc: PartitionDescriptor(row.get("partition_desc")),
        commit_op: commit_op_from_str(row.get("commit_op"))?,
        file_ops,
        timestamp: row.get("ts"),
        committed: row.get("committed"),
    })
}

#[async_trait]
impl CatalogClient for PostgresCatalog {
    async fn get_table_info(&self, table_id: TableId) -> Result<Table> {
        let row = sqlx::query("SELECT * FROM table_info WHERE table_id = $1;")
            .bind(table_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?
            .ok_or(Error::TableNotFound(table_id))?;
        row_to_table(&row)
    }

    async fn get_table_info_by_path(&self, path: &str) -> Result<Table> {
        let row = sqlx::query("SELECT * FROM table_info WHERE table_path = $1;")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?
            .ok_or_else(|| Error::InvalidState(format!("no table registered at path {path}")))?;
        row_to_table(&row)
    }

    async fn list_partitions(&self, table_id: TableId) -> Result<Vec<PartitionVersion>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (partition_desc) *
             FROM partition_info
             WHERE table_id = $1
             ORDER BY partition_desc, version DESC;",
        )
        .bind(table_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::CatalogUnavailable(e.into()))?;
        rows.iter()
            .map(row_to_partition_version)
            .filter(|pv| !matches!(pv, Ok(pv) if pv.commit_op == CommitOp::DeleteCommit))
            .collect()
    }

    async fn get_single_partition(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        version: u64,
    ) -> Result<Option<PartitionVersion>> {
        let row = if version == 0 {
            sqlx::query(
                "SELECT * FROM partition_info
                 WHERE table_id = $1 AND partition_desc = $2
                 ORDER BY version DESC LIMIT 1;",
            )
            .bind(table_id.0)
            .bind(partition_desc.as_str())
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT * FROM partition_info
                 WHERE table_id = $1 AND partition_desc = $2 AND version = $3;",
            )
            .bind(table_id.0)
            .bind(partition_desc.as_str())
            .bind(version as i64)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(|e| Error::CatalogUnavailable(e.into()))?;
        row.as_ref().map(row_to_partition_version).transpose()
    }

    async fn get_partitions_by_eq(
        &self,
        table_id: TableId,
        query: &str,
    ) -> Result<Vec<PartitionVersion>> {
        // The equality index is a thin convenience over list_partitions;
        // a production catalog would push this down as a JSONB/GIN query
        // against a parsed partition_desc, out of scope here.
        let bindings: Vec<(String, String)> = query
            .split('&')
            .filter_map(|clause| clause.trim().split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        let all = self.list_partitions(table_id).await?;
        Ok(all
            .into_iter()
            .filter(|pv| {
                let parsed: HashMap<String, String> = pv.partition_desc.parse().into_iter().collect();
                bindings.iter().all(|(k, v)| parsed.get(k) == Some(v))
            })
            .collect())
    }

    async fn version_up_to_ts(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        ts: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT MAX(version) AS v FROM partition_info
             WHERE table_id = $1 AND partition_desc = $2 AND ts <= $3;",
        )
        .bind(table_id.0)
        .bind(partition_desc.as_str())
        .bind(ts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::CatalogUnavailable(e.into()))?;
        Ok(row.get::<Option<i64>, _>("v").unwrap_or(-1))
    }

    async fn get_commits(
        &self,
        table_id: TableId,
        commit_ids: &[CommitId],
    ) -> Result<Vec<DataCommitInfo>> {
        let ids: Vec<uuid::Uuid> = commit_ids.iter().map(|c| c.0).collect();
        let rows = sqlx::query("SELECT * FROM data_commit_info WHERE table_id = $1 AND commit_id = ANY($2);")
            .bind(table_id.0)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;
        let found: Vec<DataCommitInfo> = rows
            .iter()
            .map(row_to_data_commit)
            .collect::<Result<_>>()?;
        if found.len() != commit_ids.len() {
            if let Some(missing) = commit_ids
                .iter()
                .find(|id| !found.iter().any(|f| f.commit_id == **id))
                .copied()
            {
                return Err(Error::CommitNotFound(missing));
            }
        }
        Ok(found)
    }

    async fn commit(&self, envelope: CommitEnvelope) -> Result<CommitOutcome> {
        let table_id = envelope.table_info_snapshot.table_id;
        let auto_merge = envelope
            .table_info_snapshot
            .properties
            .get("schema.autoMerge.enabled")
            .map(|v| v == "true")
            .unwrap_or(false);
        let known_columns: std::collections::HashSet<&str> = envelope
            .table_info_snapshot
            .properties
            .get("schema.known_columns")
            .map(|v| v.split(',').filter(|c| !c.is_empty()).collect())
            .unwrap_or_default();

        let mut tr = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;

        // Lock every involved partition row range for the duration of the
        // transaction so two concurrent commits serialize instead of both
        // reading the same "current latest" snapshot.
        for read_pv in &envelope.read_partition_versions {
            sqlx::query(
                "SELECT 1 FROM partition_info
                 WHERE table_id = $1 AND partition_desc = $2
                 ORDER BY version DESC LIMIT 1 FOR UPDATE;",
            )
            .bind(table_id.0)
            .bind(read_pv.partition_desc.as_str())
            .fetch_optional(&mut *tr)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;

            let current_max: Option<i64> = sqlx::query(
                "SELECT MAX(version) AS v FROM partition_info
                 WHERE table_id = $1 AND partition_desc = $2;",
            )
            .bind(table_id.0)
            .bind(read_pv.partition_desc.as_str())
            .fetch_one(&mut *tr)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?
            .get("v");
            let latest_version = current_max.unwrap_or(-1);

            if latest_version > read_pv.version as i64 {
                let intervening = sqlx::query(
                    "SELECT commit_op, read_files FROM partition_info
                     WHERE table_id = $1 AND partition_desc = $2 AND version > $3
                     ORDER BY version;",
                )
                .bind(table_id.0)
                .bind(read_pv.partition_desc.as_str())
                .bind(read_pv.version as i64)
                .fetch_all(&mut *tr)
                .await
                .map_err(|e| Error::CatalogUnavailable(e.into()))?;

                let ops: Vec<CommitOp> = intervening
                    .iter()
                    .map(|r| commit_op_from_str(r.get("commit_op")))
                    .collect::<Result<_>>()?;

                let intervening_commit_ids: Vec<uuid::Uuid> = intervening
                    .iter()
                    .flat_map(|r| r.get::<Vec<uuid::Uuid>, _>("read_files"))
                    .collect();
                let intervening_file_exist_cols: Vec<String> = if intervening_commit_ids.is_empty() {
                    vec![]
                } else {
                    sqlx::query(
                        "SELECT file_ops FROM data_commit_info
                         WHERE table_id = $1 AND commit_id = ANY($2);",
                    )
                    .bind(table_id.0)
                    .bind(&intervening_commit_ids)
                    .fetch_all(&mut *tr)
                    .await
                    .map_err(|e| Error::CatalogUnavailable(e.into()))?
                    .iter()
                    .map(|r| {
                        let file_ops_json: serde_json::Value = r.get("file_ops");
                        serde_json::from_value::<Vec<DataFileOp>>(file_ops_json)
                            .map_err(|e| Error::InvalidState(format!("corrupt file_ops json: {e}")))
                    })
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .flatten()
                    .map(|op| op.file_exist_cols)
                    .collect()
                };

                let conflict = classify(
                    &ops,
                    envelope.commit_type,
                    &intervening_file_exist_cols,
                    &known_columns,
                    auto_merge,
                );
                if let Some(kind) = conflict {
                    return Ok(CommitOutcome::Conflict {
                        kind,
                        partition_desc: read_pv.partition_desc.clone(),
                    });
                }
            }
        }

        for dc in &envelope.data_commits {
            let file_ops_json = serde_json::to_value(&dc.file_ops)
                .map_err(|e| Error::InvalidState(format!("serializing file_ops: {e}")))?;
            sqlx::query(
                "INSERT INTO data_commit_info
                    (commit_id, table_id, partition_desc, commit_op, file_ops, ts, committed)
                 VALUES ($1, $2, $3, $4, $5, $6, TRUE)
                 ON CONFLICT (commit_id) DO UPDATE SET committed = TRUE;",
            )
            .bind(dc.commit_id.0)
            .bind(table_id.0)
            .bind(dc.partition_desc.as_str())
            .bind(commit_op_to_str(dc.commit_op))
            .bind(file_ops_json)
            .bind(dc.timestamp)
            .execute(&mut *tr)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;
        }

        let mut accepted = Vec::with_capacity(envelope.new_partition_versions.len());
        for staged_pv in envelope.new_partition_versions {
            let current_max: Option<i64> = sqlx::query(
                "SELECT MAX(version) AS v FROM partition_info
                 WHERE table_id = $1 AND partition_desc = $2;",
            )
            .bind(table_id.0)
            .bind(staged_pv.partition_desc.as_str())
            .fetch_one(&mut *tr)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?
            .get("v");
            let next_version = current_max.map(|v| v + 1).unwrap_or(0);

            let read_files: Vec<CommitId> = if envelope.commit_type == CommitType::Append {
                let prior: Vec<uuid::Uuid> = sqlx::query(
                    "SELECT read_files FROM partition_info
                     WHERE table_id = $1 AND partition_desc = $2
                     ORDER BY version DESC LIMIT 1;",
                )
                .bind(table_id.0)
                .bind(staged_pv.partition_desc.as_str())
                .fetch_optional(&mut *tr)
                .await
                .map_err(|e| Error::CatalogUnavailable(e.into()))?
                .map(|r| r.get("read_files"))
                .unwrap_or_default();
                prior
                    .into_iter()
                    .map(CommitId)
                    .chain(staged_pv.read_files.iter().copied())
                    .collect()
            } else {
                staged_pv.read_files.clone()
            };

            let read_file_ids: Vec<uuid::Uuid> = read_files.iter().map(|c| c.0).collect();
            sqlx::query(
                "INSERT INTO partition_info
                    (table_id, partition_desc, version, read_files, commit_op, expression, ts)
                 VALUES ($1, $2, $3, $4, $5, $6, $7);",
            )
            .bind(table_id.0)
            .bind(staged_pv.partition_desc.as_str())
            .bind(next_version)
            .bind(&read_file_ids)
            .bind(commit_op_to_str(staged_pv.commit_op))
            .bind(&staged_pv.expression)
            .bind(staged_pv.timestamp)
            .execute(&mut *tr)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;

            accepted.push(PartitionVersion {
                version: next_version as u64,
                read_files,
                ..staged_pv
            });
        }

        tr.commit()
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;

        Ok(CommitOutcome::Committed {
            new_partition_versions: accepted,
        })
    }

    async fn update_properties(
        &self,
        table_id: TableId,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let existing = self.get_table_info(table_id).await?;
        let mut merged = existing.properties;
        merged.extend(properties);
        let merged_json = serde_json::to_value(&merged)
            .map_err(|e| Error::InvalidState(format!("serializing properties: {e}")))?;
        sqlx::query("UPDATE table_info SET properties = $1 WHERE table_id = $2;")
            .bind(merged_json)
            .bind(table_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::CatalogUnavailable(e.into()))?;
        Ok(())
    }

    async fn record_discard(&self, files: &[DiscardedFile]) -> Result<()> {
        for f in files {
            if let Err(e) = sqlx::query(
                "INSERT INTO discard_log (path, size, descriptor) VALUES ($1, $2, $3);",
            )
                .bind(&f.path)
                .bind(f.size)
                .bind(&f.descriptor)
                .execute(&self.pool)
                .await
            {
                tracing::warn!(path = %f.path, error = %e, "failed to record discard, leaking a physical file");
            }
        }
        Ok(())
    }
}

/// `intervening_file_exist_cols` and `known_columns`/`auto_merge` drive
/// the schema-conflict check: with `autoMerge` off, an intervening
/// commit that declared a column missing from the reader's known-column
/// snapshot raced a schema change out from under this commit, reported
/// as `SchemaChanged` rather than plain `StalePartition`.
fn classify(
    intervening_ops: &[CommitOp],
    commit_type: CommitType,
    intervening_file_exist_cols: &[String],
    known_columns: &std::collections::HashSet<&str>,
    auto_merge: bool,
) -> Option<ConflictKind> {
    let saw_delete = intervening_ops.iter().any(|op| *op == CommitOp::DeleteCommit);
    let saw_compaction = intervening_ops
        .iter()
        .any(|op| *op == CommitOp::CompactionCommit);
    let saw_schema_change = !auto_merge
        && !known_columns.is_empty()
        && intervening_file_exist_cols.iter().any(|cols| {
            cols.split(',')
                .any(|col| !col.is_empty() && !known_columns.contains(col))
        });
    match commit_type {
        CommitType::Append => {
            if saw_delete {
                Some(ConflictKind::TombstoneRaced)
            } else if saw_compaction {
                Some(ConflictKind::CompactionRaced)
            } else {
                None
            }
        }
        CommitType::Compaction => {
            // `must_be_latest`: any intervening commit at all conflicts,
            // tagged by what the compaction itself was (raced), except an
            // intervening tombstone which gets its own distinct kind.
            if saw_delete {
                Some(ConflictKind::TombstoneRaced)
            } else {
                Some(ConflictKind::CompactionRaced)
            }
        }
        CommitType::Update | CommitType::Delete | CommitType::Merge => {
            if saw_delete {
                Some(ConflictKind::TombstoneRaced)
            } else if saw_compaction {
                Some(ConflictKind::CompactionRaced)
            } else if saw_schema_change {
                Some(ConflictKind::SchemaChanged)
            } else {
                Some(ConflictKind::StalePartition)
            }
        }
    }
}

#[cfg(test)]
mod classify_tests {
    use super::*;

    #[test]
    fn update_past_an_unknown_column_reports_schema_changed() {
        let known: std::collections::HashSet<&str> = ["a", "b"].into_iter().collect();
        let kind = classify(
            &[CommitOp::AppendCommit],
            CommitType::Update,
            &["a,b,c".to_string()],
            &known,
            false,
        );
        assert_eq!(kind, Some(ConflictKind::SchemaChanged));
    }

    #[test]
    fn update_past_an_unknown_column_is_plain_staleness_with_auto_merge_on() {
        let known: std::collections::HashSet<&str> = ["a", "b"].into_iter().collect();
        let kind = classify(
            &[CommitOp::AppendCommit],
            CommitType::Update,
            &["a,b,c".to_string()],
            &known,
            true,
        );
        assert_eq!(kind, Some(ConflictKind::StalePartition));
    }

    #[test]
    fn tombstone_outranks_a_schema_change() {
        let known: std::collections::HashSet<&str> = ["a"].into_iter().collect();
        let kind = classify(
            &[CommitOp::DeleteCommit],
            CommitType::Update,
            &["a,z".to_string()],
            &known,
            false,
        );
        assert_eq!(kind, Some(ConflictKind::TombstoneRaced));
    }

    #[test]
    fn append_never_reports_schema_changed() {
        let known: std::collections::HashSet<&str> = ["a"].into_iter().collect();
        let kind = classify(
            &[CommitOp::AppendCommit],
            CommitType::Append,
            &["a,z".to_string()],
            &known,
            false,
        );
        assert_eq!(kind, None);
    }
}
