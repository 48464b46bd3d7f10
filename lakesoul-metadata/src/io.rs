//! The storage/codec seam: everything about actually reading and writing
//! Parquet bytes is an external collaborator (the query-engine binding
//! layer owns DataFusion/Arrow/Parquet); this module only defines the
//! trait the compaction executor drives and a blob-level reference
//! implementation over `object_store`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use crate::model::FileRole;

/// One input to a compaction merge: a located file and the role it plays
/// (an `Add` delta on top of a prior `Compacted` base, or the base
/// itself), already ordered by the resolver.
#[derive(Debug, Clone)]
pub struct CompactionInput {
    pub path: String,
    pub role: FileRole,
    pub size: i64,
}

/// One physical file produced by a compaction merge.
#[derive(Debug, Clone)]
pub struct MergedFile {
    pub path: String,
    pub size: i64,
}

/// The compaction executor's view of durable storage and of the
/// merge-and-rewrite step a real embedding backs with Parquet/Arrow.
///
/// Implementations MUST make `merge_compact` honor CDC last-write-wins:
/// when `cdc_column` is `Some`, rows with the same primary key across
/// inputs resolve to the value from the latest-ordered input.
#[async_trait]
pub trait ParquetIo: Send + Sync + std::fmt::Debug {
    async fn file_size(&self, path: &str) -> anyhow::Result<i64>;

    async fn delete(&self, path: &str) -> anyhow::Result<()>;

    async fn delete_batch(&self, paths: &[String]) -> anyhow::Result<()>;

    /// Merges `inputs`, in the order given, into one or more output
    /// files under `output_dir`, each kept under `file_size_limit` bytes.
    async fn merge_compact(
        &self,
        inputs: &[CompactionInput],
        output_dir: &str,
        file_size_limit: i64,
        cdc_column: Option<&str>,
    ) -> anyhow::Result<Vec<MergedFile>>;
}

/// A reference [`ParquetIo`] over an [`ObjectStore`], used by tests and by
/// the admin CLI's dry-run mode. It does not decode Parquet row groups:
/// it models a file purely by its byte size and approximates a merge by
/// concatenating inputs into size-bounded chunks, which is sufficient to
/// exercise the compaction planner/executor's file-count and size-limit
/// behavior without pulling in a columnar engine.
#[derive(Debug)]
pub struct ObjectStoreParquetIo {
    store: Arc<dyn ObjectStore>,
    root: ObjectPath,
}

impl ObjectStoreParquetIo {
    pub fn new(store: Arc<dyn ObjectStore>, root: ObjectPath) -> Self {
        Self { store, root }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), ObjectPath::from(""))
    }

    /// Builds a store rooted at a table's `path` URI (`s3://bucket/key`,
    /// `file:///…`, …), the store a real compaction pass runs against
    /// rather than the in-memory stand-in tests and dry-runs use.
    pub fn from_table_path(table_path: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(table_path)
            .with_context(|| format!("parsing table path {table_path} as a URL"))?;
        let (store, root) = object_store::parse_url(&url)
            .with_context(|| format!("building an object store for {table_path}"))?;
        Ok(Self::new(Arc::from(store), root))
    }

    fn full_path(&self, obj_path: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{obj_path}", self.root))
    }
}

#[async_trait]
impl ParquetIo for ObjectStoreParquetIo {
    async fn file_size(&self, path: &str) -> anyhow::Result<i64> {
        let meta = self.store.head(&self.full_path(path)).await?;
        Ok(meta.size as i64)
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        match self.store.delete(&self.full_path(path)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_batch(&self, paths: &[String]) -> anyhow::Result<()> {
        for path in paths {
            self.delete(path).await?;
        }
        Ok(())
    }

    async fn merge_compact(
        &self,
        inputs: &[CompactionInput],
        output_dir: &str,
        file_size_limit: i64,
        _cdc_column: Option<&str>,
    ) -> anyhow::Result<Vec<MergedFile>> {
        let mut outputs = Vec::new();
        let mut chunk: Vec<u8> = Vec::new();
        let mut chunk_index = 0usize;

        for input in inputs {
            let bytes = self.store.get(&self.full_path(&input.path)).await?.bytes().await?;
            if !chunk.is_empty() && chunk.len() as i64 + bytes.len() as i64 > file_size_limit {
                outputs.push(self.flush_chunk(output_dir, chunk_index, &chunk).await?);
                chunk.clear();
                chunk_index += 1;
            }
            chunk.extend_from_slice(&bytes);
        }
        if !chunk.is_empty() {
            outputs.push(self.flush_chunk(output_dir, chunk_index, &chunk).await?);
        }
        Ok(outputs)
    }
}

impl ObjectStoreParquetIo {
    async fn flush_chunk(
        &self,
        output_dir: &str,
        index: usize,
        data: &[u8],
    ) -> anyhow::Result<MergedFile> {
        let path = format!("{output_dir}/compact-{index:05}.parquet");
        let full = self.full_path(&path);
        self.store.put(&full, data.to_vec().into()).await?;
        Ok(MergedFile {
            path,
            size: data.len() as i64,
        })
    }
}
