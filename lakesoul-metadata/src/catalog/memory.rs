//! An in-process reference [`CatalogClient`] standing in for a live
//! Postgres catalog in tests.
//!
//! This is the primary vehicle for the property-based invariants and
//! conflict scenarios: it implements the exact conflict rules so the
//! commit engine can be exercised without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CatalogClient, CommitEnvelope, CommitOutcome, CommitType, DiscardedFile};
use crate::error::{ConflictKind, Error, Result};
use crate::ids::{CommitId, PartitionDescriptor, TableId};
use crate::model::{CommitOp, DataCommitInfo, PartitionVersion, Table};

type PartitionKey = (TableId, PartitionDescriptor);

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableId, Table>,
    tables_by_path: HashMap<String, TableId>,
    /// Append-only version history per partition, index 0 is version 0.
    partitions: HashMap<PartitionKey, Vec<PartitionVersion>>,
    commits: HashMap<(TableId, CommitId), DataCommitInfo>,
    discard_log: Vec<DiscardedFile>,
}

/// An in-memory catalog. Cheap to clone (an `Arc` internally would be
/// more usual, but tests construct one per table so plain ownership is
/// simpler); wrap in `Arc` to share across concurrent writers in a test.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&self, table: Table) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.tables_by_path.insert(table.path.clone(), table.table_id);
        state.tables.insert(table.table_id, table);
    }

    /// Test/bootstrap helper: seeds a partition's version 0 directly,
    /// bypassing `commit`. Real callers only ever reach version 0
    /// implicitly (no partition row means "version 0, empty").
    pub fn seed_partition(&self, pv: PartitionVersion) {
        let mut state = self.state.lock().expect("lock poisoned");
        let key = (pv.table_id, pv.partition_desc.clone());
        state.partitions.entry(key).or_default().push(pv);
    }

    /// Test/bootstrap helper: inserts an already-committed
    /// [`DataCommitInfo`] directly, for exercising the resolver against a
    /// hand-built commit chain without driving it through `commit`.
    pub fn seed_commit(&self, commit: DataCommitInfo) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.commits.insert((commit.table_id, commit.commit_id), commit);
    }

    pub fn discard_log(&self) -> Vec<DiscardedFile> {
        self.state.lock().expect("lock poisoned").discard_log.clone()
    }
}

/// Determines whether `read_version` is stale against `history`, and if
/// so what conflict kind to report, implementing the priority order
/// tombstone > compaction > schema change > plain staleness.
///
/// The schema check only applies when `autoMerge` is off: with it on, an
/// intervening append's new columns were meant to be folded in silently
/// (`CommitEngine::merge_new_columns`), not treated as a conflict.
#[allow(clippy::too_many_arguments)]
fn classify_staleness(
    history: &[PartitionVersion],
    read_version: u64,
    commits: &HashMap<(TableId, CommitId), DataCommitInfo>,
    table_id: TableId,
    known_columns: &std::collections::HashSet<&str>,
    auto_merge: bool,
) -> Option<ConflictKind> {
    let latest_version = history.last().map(|pv| pv.version).unwrap_or(0);
    if latest_version == read_version {
        return None;
    }
    let intervening: Vec<&PartitionVersion> = history.iter().filter(|pv| pv.version > read_version).collect();
    let mut saw_compaction = false;
    for pv in &intervening {
        if pv.commit_op == CommitOp::DeleteCommit {
            return Some(ConflictKind::TombstoneRaced);
        }
        if pv.commit_op == CommitOp::CompactionCommit {
            saw_compaction = true;
        }
    }
    if saw_compaction {
        return Some(ConflictKind::CompactionRaced);
    }
    if !auto_merge && !known_columns.is_empty() && schema_changed_by(&intervening, commits, table_id, known_columns) {
        return Some(ConflictKind::SchemaChanged);
    }
    Some(ConflictKind::StalePartition)
}

/// Whether any intervening commit's declared columns (`file_exist_cols`)
/// include a column absent from `known_columns`, the schema the current
/// writer based its commit on.
fn schema_changed_by(
    intervening: &[&PartitionVersion],
    commits: &HashMap<(TableId, CommitId), DataCommitInfo>,
    table_id: TableId,
    known_columns: &std::collections::HashSet<&str>,
) -> bool {
    intervening.iter().any(|pv| {
        pv.read_files.iter().any(|commit_id| {
            commits
                .get(&(table_id, *commit_id))
                .map(|commit| {
                    commit.file_ops.iter().any(|op| {
                        op.file_exist_cols
                            .split(',')
                            .any(|col| !col.is_empty() && !known_columns.contains(col))
                    })
                })
                .unwrap_or(false)
        })
    })
}

/// Compaction-specific staleness check (scenario S2): `must_be_latest`
/// means any intervening commit at all is a conflict, but the error the
/// writer sees is tagged by what the *compaction itself* was — it was
/// raced, whether the intervening commit was a plain append or another
/// compaction. Only an intervening tombstone gets its own distinct kind.
fn classify_compaction_staleness(history: &[PartitionVersion], read_version: u64) -> Option<ConflictKind> {
    let latest_version = history.last().map(|pv| pv.version).unwrap_or(0);
    if latest_version == read_version {
        return None;
    }
    let intervening = history.iter().filter(|pv| pv.version > read_version);
    for pv in intervening {
        if pv.commit_op == CommitOp::DeleteCommit {
            return Some(ConflictKind::TombstoneRaced);
        }
    }
    Some(ConflictKind::CompactionRaced)
}

/// Append-specific staleness check: an append may land on top of other
/// appends (`may_append_to_newer = yes`), it only conflicts on an
/// intervening compaction barrier or tombstone.
fn classify_append_staleness(
    history: &[PartitionVersion],
    read_version: u64,
) -> Option<ConflictKind> {
    let intervening = history.iter().filter(|pv| pv.version > read_version);
    for pv in intervening {
        if pv.commit_op == CommitOp::DeleteCommit {
            return Some(ConflictKind::TombstoneRaced);
        }
        if pv.commit_op == CommitOp::CompactionCommit {
            return Some(ConflictKind::CompactionRaced);
        }
    }
    None
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn get_table_info(&self, table_id: TableId) -> Result<Table> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .tables
            .get(&table_id)
            .cloned()
            .ok_or(Error::TableNotFound(table_id))
    }

    async fn get_table_info_by_path(&self, path: &str) -> Result<Table> {
        let state = self.state.lock().expect("lock poisoned");
        let table_id = state
            .tables_by_path
            .get(path)
            .copied()
            .ok_or_else(|| Error::InvalidState(format!("no table registered at path {path}")))?;
        state
            .tables
            .get(&table_id)
            .cloned()
            .ok_or(Error::TableNotFound(table_id))
    }

    async fn list_partitions(&self, table_id: TableId) -> Result<Vec<PartitionVersion>> {
        let state = self.state.lock().expect("lock poisoned");
        Ok(state
            .partitions
            .iter()
            .filter(|((tid, _), _)| *tid == table_id)
            .filter_map(|(_, history)| history.last().cloned())
            .filter(|pv| pv.commit_op != CommitOp::DeleteCommit)
            .collect())
    }

    async fn get_single_partition(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        version: u64,
    ) -> Result<Option<PartitionVersion>> {
        let state = self.state.lock().expect("lock poisoned");
        let key = (table_id, partition_desc.clone());
        let Some(history) = state.partitions.get(&key) else {
            return Ok(None);
        };
        if version == 0 {
            return Ok(history.last().cloned());
        }
        Ok(history.iter().find(|pv| pv.version == version).cloned())
    }

    async fn get_partitions_by_eq(
        &self,
        table_id: TableId,
        query: &str,
    ) -> Result<Vec<PartitionVersion>> {
        let bindings: Vec<(String, String)> = query
            .split('&')
            .map(str::trim)
            .filter_map(|clause| clause.split_once('='))
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
        let state = self.state.lock().expect("lock poisoned");
        let key = (table_id, partition_desc.clone());
        let Some(history) = state.partitions.get(&key) else {
            return Ok(-1);
        };
        Ok(history
            .iter()
            .filter(|pv| pv.timestamp <= ts)
            .map(|pv| pv.version as i64)
            .max()
            .unwrap_or(-1))
    }

    async fn get_commits(
        &self,
        table_id: TableId,
        commit_ids: &[CommitId],
    ) -> Result<Vec<DataCommitInfo>> {
        let state = self.state.lock().expect("lock poisoned");
        commit_ids
            .iter()
            .map(|id| {
                state
                    .commits
                    .get(&(table_id, *id))
                    .cloned()
                    .ok_or(Error::CommitNotFound(*id))
            })
            .collect()
    }

    async fn commit(&self, envelope: CommitEnvelope) -> Result<CommitOutcome> {
        let mut state = self.state.lock().expect("lock poisoned");
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

        // Every read_partition_version must still be admissible; the
        // exact rule depends on commit_type.
        for read_pv in &envelope.read_partition_versions {
            let key = (table_id, read_pv.partition_desc.clone());
            let history = state.partitions.entry(key.clone()).or_default();
            let conflict = match envelope.commit_type {
                CommitType::Append => classify_append_staleness(history, read_pv.version),
                CommitType::Compaction => classify_compaction_staleness(history, read_pv.version),
                CommitType::Update | CommitType::Delete | CommitType::Merge => classify_staleness(
                    history,
                    read_pv.version,
                    &state.commits,
                    table_id,
                    &known_columns,
                    auto_merge,
                ),
            };
            if let Some(kind) = conflict {
                tracing::warn!(
                    table_id = %table_id,
                    partition_desc = %read_pv.partition_desc,
                    commit_type = ?envelope.commit_type,
                    ?kind,
                    "commit rejected"
                );
                return Ok(CommitOutcome::Conflict {
                    kind,
                    partition_desc: read_pv.partition_desc.clone(),
                });
            }
        }

        // Admit: flip commits to committed, splice new versions in,
        // recomputing read_files against the *current* head for append
        // (the prefix-extension invariant) rather than trusting what the
        // writer staged against a possibly-stale read.
        for commit in &envelope.data_commits {
            let mut committed = commit.clone();
            committed.committed = true;
            state.commits.insert((table_id, commit.commit_id), committed);
        }

        let mut accepted = Vec::with_capacity(envelope.new_partition_versions.len());
        for staged_pv in envelope.new_partition_versions {
            let key = (table_id, staged_pv.partition_desc.clone());
            let history = state.partitions.entry(key).or_default();
            let next_version = history.last().map(|pv| pv.version + 1).unwrap_or(0);
            let final_pv = if envelope.commit_type == CommitType::Append {
                let mut read_files = history
                    .last()
                    .map(|pv| pv.read_files.clone())
                    .unwrap_or_default();
                read_files.extend(staged_pv.read_files.iter().copied());
                PartitionVersion {
                    version: next_version,
                    read_files,
                    ..staged_pv
                }
            } else {
                PartitionVersion {
                    version: next_version,
                    ..staged_pv
                }
            };
            history.push(final_pv.clone());
            accepted.push(final_pv);
        }

        Ok(CommitOutcome::Committed {
            new_partition_versions: accepted,
        })
    }

    async fn update_properties(
        &self,
        table_id: TableId,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        let table = state
            .tables
            .get_mut(&table_id)
            .ok_or(Error::TableNotFound(table_id))?;
        table.properties.extend(properties);
        Ok(())
    }

    async fn record_discard(&self, files: &[DiscardedFile]) -> Result<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.discard_log.extend_from_slice(files);
        Ok(())
    }
}
