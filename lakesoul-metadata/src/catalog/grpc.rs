//! A [`CatalogClient`] that speaks a gRPC wire protocol to a remote
//! metadata service: a thin wrapper around a generated tonic client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tonic::transport::Channel;

use lakesoul_metadata_proto::{
    self as pb, meta_data_service_client::MetaDataServiceClient,
};

use super::{CatalogClient, CommitEnvelope, CommitOutcome, CommitType, DiscardedFile};
use crate::error::{ConflictKind, Error, Result};
use crate::ids::{CommitId, PartitionDescriptor, TableId};
use crate::model::{CommitOp, DataCommitInfo, DataFileOp, FileOp, PartitionVersion, Table};

#[derive(Debug, Clone)]
pub struct GrpcCatalog {
    inner: MetaDataServiceClient<Channel>,
}

impl GrpcCatalog {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: MetaDataServiceClient::new(channel),
        }
    }

    pub async fn connect(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let inner = MetaDataServiceClient::connect(endpoint.into()).await?;
        Ok(Self { inner })
    }
}

fn status_to_error(status: tonic::Status) -> Error {
    Error::CatalogUnavailable(anyhow::anyhow!("{status}"))
}

fn uuid_to_pb(u: uuid::Uuid) -> pb::Uuid {
    let bytes = u.as_u128();
    pb::Uuid {
        high: (bytes >> 64) as i64,
        low: bytes as i64,
    }
}

fn pb_to_uuid(id: &pb::Uuid) -> uuid::Uuid {
    let high = (id.high as u64 as u128) << 64;
    let low = id.low as u64 as u128;
    uuid::Uuid::from_u128(high | low)
}

fn commit_op_to_pb(op: CommitOp) -> i32 {
    (match op {
        CommitOp::AppendCommit => pb::CommitOp::Append,
        CommitOp::CompactionCommit => pb::CommitOp::Compaction,
        CommitOp::UpdateCommit => pb::CommitOp::Update,
        CommitOp::DeleteCommit => pb::CommitOp::Delete,
        CommitOp::MergeCommit => pb::CommitOp::Merge,
    }) as i32
}

fn commit_op_from_pb(op: i32) -> CommitOp {
    match pb::CommitOp::try_from(op).unwrap_or(pb::CommitOp::Append) {
        pb::CommitOp::Append => CommitOp::AppendCommit,
        pb::CommitOp::Compaction => CommitOp::CompactionCommit,
        pb::CommitOp::Update => CommitOp::UpdateCommit,
        pb::CommitOp::Delete => CommitOp::DeleteCommit,
        pb::CommitOp::Merge => CommitOp::MergeCommit,
    }
}

fn commit_type_to_pb(t: CommitType) -> i32 {
    (match t {
        CommitType::Append => pb::CommitType::Append,
        CommitType::Update => pb::CommitType::Update,
        CommitType::Delete => pb::CommitType::Delete,
        CommitType::Compaction => pb::CommitType::Compaction,
        CommitType::Merge => pb::CommitType::Merge,
    }) as i32
}

fn conflict_kind_from_pb(kind: i32) -> Option<ConflictKind> {
    match pb::ConflictKind::try_from(kind).unwrap_or(pb::ConflictKind::None) {
        pb::ConflictKind::None => None,
        pb::ConflictKind::StalePartition => Some(ConflictKind::StalePartition),
        pb::ConflictKind::CompactionRaced => Some(ConflictKind::CompactionRaced),
        pb::ConflictKind::SchemaChanged => Some(ConflictKind::SchemaChanged),
        pb::ConflictKind::TombstoneRaced => Some(ConflictKind::TombstoneRaced),
    }
}

fn ts_to_pb(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn ts_from_pb(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn table_from_pb(t: pb::TableInfo) -> Result<Table> {
    Ok(Table {
        table_id: TableId(pb_to_uuid(
            t.table_id
                .as_ref()
                .ok_or_else(|| Error::InvalidState("table_info missing table_id".into()))?,
        )),
        namespace: t.namespace,
        short_name: (!t.short_name.is_empty()).then_some(t.short_name),
        path: t.path,
        schema_json: t.schema_json,
        range_partition_columns: t.range_partition_columns,
        hash_partition_columns: t.hash_partition_columns,
        hash_bucket_count: t.hash_bucket_count as u32,
        properties: t.properties,
        cdc_column: (!t.cdc_column.is_empty()).then_some(t.cdc_column),
    })
}

fn table_to_pb(t: &Table) -> pb::TableInfo {
    pb::TableInfo {
        table_id: Some(uuid_to_pb(t.table_id.0)),
        namespace: t.namespace.clone(),
        short_name: t.short_name.clone().unwrap_or_default(),
        path: t.path.clone(),
        schema_json: t.schema_json.clone(),
        range_partition_columns: t.range_partition_columns.clone(),
        hash_partition_columns: t.hash_partition_columns.clone(),
        hash_bucket_count: t.hash_bucket_count as i32,
        properties: t.properties.clone(),
        cdc_column: t.cdc_column.clone().unwrap_or_default(),
    }
}

fn partition_version_from_pb(p: pb::PartitionInfo) -> Result<PartitionVersion> {
    Ok(PartitionVersion {
        table_id: TableId(pb_to_uuid(
            p.table_id
                .as_ref()
                .ok_or_else(|| Error::InvalidState("partition_info missing table_id".into()))?,
        )),
        partition_desc: PartitionDescriptor(p.partition_desc),
        version: p.version as u64,
        read_files: p.read_files.iter().map(|id| CommitId(pb_to_uuid(id))).collect(),
        commit_op: commit_op_from_pb(p.commit_op),
        expression: (!p.expression.is_empty()).then_some(p.expression),
        timestamp: ts_from_pb(p.timestamp),
    })
}

fn partition_version_to_pb(p: &PartitionVersion) -> pb::PartitionInfo {
    pb::PartitionInfo {
        table_id: Some(uuid_to_pb(p.table_id.0)),
        partition_desc: p.partition_desc.as_str().to_string(),
        version: p.version as i32,
        read_files: p.read_files.iter().map(|id| uuid_to_pb(id.0)).collect(),
        commit_op: commit_op_to_pb(p.commit_op),
        expression: p.expression.clone().unwrap_or_default(),
        timestamp: ts_to_pb(p.timestamp),
    }
}

fn data_commit_from_pb(c: pb::DataCommitInfo) -> Result<DataCommitInfo> {
    Ok(DataCommitInfo {
        commit_id: CommitId(pb_to_uuid(
            c.commit_id
                .as_ref()
                .ok_or_else(|| Error::InvalidState("data_commit_info missing commit_id".into()))?,
        )),
        table_id: TableId(pb_to_uuid(
            c.table_id
                .as_ref()
                .ok_or_else(|| Error::InvalidState("data_commit_info missing table_id".into()))?,
        )),
        partition_desc: PartitionDescriptor(c.partition_desc),
        commit_op: commit_op_from_pb(c.commit_op),
        file_ops: c
            .file_ops
            .into_iter()
            .map(|op| DataFileOp {
                path: op.path,
                op: if op.op == pb::FileOp::Del as i32 {
                    FileOp::Del
                } else {
                    FileOp::Add
                },
                size: op.size,
                file_exist_cols: op.file_exist_cols,
            })
            .collect(),
        timestamp: ts_from_pb(c.timestamp),
        committed: c.committed,
    })
}

fn data_commit_to_pb(c: &DataCommitInfo) -> pb::DataCommitInfo {
    pb::DataCommitInfo {
        commit_id: Some(uuid_to_pb(c.commit_id.0)),
        table_id: Some(uuid_to_pb(c.table_id.0)),
        partition_desc: c.partition_desc.as_str().to_string(),
        commit_op: commit_op_to_pb(c.commit_op),
        file_ops: c
            .file_ops
            .iter()
            .map(|op| pb::DataFileOp {
                path: op.path.clone(),
                op: if op.op == FileOp::Del {
                    pb::FileOp::Del
                } else {
                    pb::FileOp::Add
                } as i32,
                size: op.size,
                file_exist_cols: op.file_exist_cols.clone(),
            })
            .collect(),
        timestamp: ts_to_pb(c.timestamp),
        committed: c.committed,
    }
}

#[async_trait]
impl CatalogClient for GrpcCatalog {
    async fn get_table_info(&self, table_id: TableId) -> Result<Table> {
        let mut client = self.inner.clone();
        let resp = client
            .get_table_info(pb::GetTableInfoRequest {
                by: Some(pb::get_table_info_request::By::TableId(uuid_to_pb(table_id.0))),
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        table_from_pb(
            resp.table_info
                .ok_or(Error::TableNotFound(table_id))?,
        )
    }

    async fn get_table_info_by_path(&self, path: &str) -> Result<Table> {
        let mut client = self.inner.clone();
        let resp = client
            .get_table_info(pb::GetTableInfoRequest {
                by: Some(pb::get_table_info_request::By::TablePath(path.to_string())),
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        table_from_pb(resp.table_info.ok_or_else(|| {
            Error::InvalidState(format!("no table registered at path {path}"))
        })?)
    }

    async fn list_partitions(&self, table_id: TableId) -> Result<Vec<PartitionVersion>> {
        let mut client = self.inner.clone();
        let resp = client
            .list_partitions(pb::ListPartitionsRequest {
                table_id: Some(uuid_to_pb(table_id.0)),
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        resp.partitions
            .into_iter()
            .map(partition_version_from_pb)
            .collect()
    }

    async fn get_single_partition(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        version: u64,
    ) -> Result<Option<PartitionVersion>> {
        let mut client = self.inner.clone();
        let resp = client
            .get_single_partition(pb::GetSinglePartitionRequest {
                table_id: Some(uuid_to_pb(table_id.0)),
                partition_desc: partition_desc.as_str().to_string(),
                version: version as i32,
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        resp.partition.map(partition_version_from_pb).transpose()
    }

    async fn get_partitions_by_eq(
        &self,
        table_id: TableId,
        query: &str,
    ) -> Result<Vec<PartitionVersion>> {
        let mut client = self.inner.clone();
        let resp = client
            .get_partitions_by_eq(pb::GetPartitionsByEqRequest {
                table_id: Some(uuid_to_pb(table_id.0)),
                equality_query: query.to_string(),
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        resp.partitions
            .into_iter()
            .map(partition_version_from_pb)
            .collect()
    }

    async fn version_up_to_ts(
        &self,
        table_id: TableId,
        partition_desc: &PartitionDescriptor,
        ts: DateTime<Utc>,
    ) -> Result<i64> {
        let mut client = self.inner.clone();
        let resp = client
            .version_up_to_ts(pb::VersionUpToTsRequest {
                table_id: Some(uuid_to_pb(table_id.0)),
                partition_desc: partition_desc.as_str().to_string(),
                timestamp: ts_to_pb(ts),
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        Ok(resp.version as i64)
    }

    async fn get_commits(
        &self,
        table_id: TableId,
        commit_ids: &[CommitId],
    ) -> Result<Vec<DataCommitInfo>> {
        let mut client = self.inner.clone();
        let resp = client
            .get_commits(pb::GetCommitsRequest {
                table_id: Some(uuid_to_pb(table_id.0)),
                commit_ids: commit_ids.iter().map(|id| uuid_to_pb(id.0)).collect(),
            })
            .await
            .map_err(status_to_error)?
            .into_inner();
        resp.commits.into_iter().map(data_commit_from_pb).collect()
    }

    async fn commit(&self, envelope: CommitEnvelope) -> Result<CommitOutcome> {
        let mut client = self.inner.clone();
        let pb_envelope = pb::CommitEnvelope {
            table_info_snapshot: Some(table_to_pb(&envelope.table_info_snapshot)),
            data_commits: envelope.data_commits.iter().map(data_commit_to_pb).collect(),
            new_partition_versions: envelope
                .new_partition_versions
                .iter()
                .map(partition_version_to_pb)
                .collect(),
            commit_type: commit_type_to_pb(envelope.commit_type),
            read_partition_versions: envelope
                .read_partition_versions
                .iter()
                .map(partition_version_to_pb)
                .collect(),
        };
        let resp = client
            .commit(pb_envelope)
            .await
            .map_err(status_to_error)?
            .into_inner();
        if resp.ok {
            Ok(CommitOutcome::Committed {
                new_partition_versions: resp
                    .new_partition_versions
                    .into_iter()
                    .map(partition_version_from_pb)
                    .collect::<Result<_>>()?,
            })
        } else {
            let kind = conflict_kind_from_pb(resp.conflict_kind)
                .ok_or_else(|| Error::InvalidState("conflict response missing conflict_kind".into()))?;
            Ok(CommitOutcome::Conflict {
                kind,
                partition_desc: PartitionDescriptor(resp.partition_desc),
            })
        }
    }

    async fn update_properties(
        &self,
        table_id: TableId,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let mut client = self.inner.clone();
        let properties_json = serde_json::to_string(&properties)
            .map_err(|e| Error::InvalidState(format!("serializing properties: {e}")))?;
        client
            .update_properties(pb::UpdatePropertiesRequest {
                table_id: Some(uuid_to_pb(table_id.0)),
                properties_json,
            })
            .await
            .map_err(status_to_error)?;
        Ok(())
    }

    async fn record_discard(&self, files: &[DiscardedFile]) -> Result<()> {
        let mut client = self.inner.clone();
        if let Err(status) = client
            .record_discard(pb::RecordDiscardRequest {
                files: files
                    .iter()
                    .map(|f| pb::DiscardedFile {
                        path: f.path.clone(),
                        size: f.size,
                        descriptor: f.descriptor.clone(),
                    })
                    .collect(),
            })
            .await
        {
            tracing::warn!(error = %status, "record_discard rpc failed, leaking physical files");
        }
        Ok(())
    }
}
