//! Runtime configuration, read from the environment the way
//! `analytics-srv`/`telemetry-admin-cli` read `MICROMEGAS_SQL_CONNECTION_STRING`
//! and `MICROMEGAS_OBJECT_STORE_URI`: required settings fail fast with
//! the variable name in the error, optional ones fall back to a default.

use std::time::Duration;

use anyhow::Context;

/// Which [`crate::catalog::CatalogClient`] backend to construct.
#[derive(Debug, Clone)]
pub enum CatalogBackend {
    Postgres { db_uri: String },
    Grpc { endpoint: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub catalog: CatalogBackend,
    /// How long a resolved [`crate::snapshot::Snapshot`] stays cached
    /// before a fresh read re-resolves it (`snapshot.cache.expire.seconds`).
    pub snapshot_cache_ttl: Duration,
    /// Default `compaction.level1.file.number.limit` for tables that
    /// don't override it via a table property.
    pub default_level1_file_num_limit: usize,
    /// Default `compaction.level1.merge.size.limit` in bytes.
    pub default_level1_merge_size_limit: i64,
    /// Default `compaction.level1.merge.num.limit`: how many files a
    /// single compaction pass merges out of a qualifying bucket.
    pub default_level1_merge_num_limit: usize,
    /// Default `compaction.level.max.file.size` in bytes for compaction
    /// outputs.
    pub default_level_max_file_size: i64,
}

impl Config {
    /// Reads configuration from the environment:
    ///
    /// - `LAKESOUL_PG_URL`: Postgres connection string for the
    ///   Postgres-backed catalog. Mutually exclusive with
    ///   `LAKESOUL_META_GRPC_ENDPOINT`; if neither is set, falls back to
    ///   an in-memory catalog (suitable for local experimentation only).
    /// - `LAKESOUL_META_GRPC_ENDPOINT`: address of a remote metadata
    ///   service speaking the wire protocol in `lakesoul-metadata-proto`.
    /// - `LAKESOUL_SNAPSHOT_CACHE_TTL_SECONDS`: optional, default `30`.
    /// - `LAKESOUL_LEVEL1_FILE_NUM_LIMIT`: optional, default `20`
    ///   (`compaction.level1.file.number.limit`).
    /// - `LAKESOUL_LEVEL1_MERGE_SIZE_LIMIT_BYTES`: optional, default `1 GiB`
    ///   (`compaction.level1.merge.size.limit`).
    /// - `LAKESOUL_LEVEL1_MERGE_NUM_LIMIT`: optional, default `5`
    ///   (`compaction.level1.merge.num.limit`).
    /// - `LAKESOUL_LEVEL_MAX_FILE_SIZE_BYTES`: optional, default `5 GiB`
    ///   (`compaction.level.max.file.size`).
    pub fn from_env() -> anyhow::Result<Self> {
        let catalog = if let Ok(db_uri) = std::env::var("LAKESOUL_PG_URL") {
            CatalogBackend::Postgres { db_uri }
        } else if let Ok(endpoint) = std::env::var("LAKESOUL_META_GRPC_ENDPOINT") {
            CatalogBackend::Grpc { endpoint }
        } else {
            tracing::warn!("neither LAKESOUL_PG_URL nor LAKESOUL_META_GRPC_ENDPOINT set, using an in-memory catalog");
            CatalogBackend::Memory
        };

        let snapshot_cache_ttl = Duration::from_secs(read_env_or("LAKESOUL_SNAPSHOT_CACHE_TTL_SECONDS", 30)?);
        let default_level1_file_num_limit = read_env_or("LAKESOUL_LEVEL1_FILE_NUM_LIMIT", 20)?;
        let default_level1_merge_size_limit = read_env_or("LAKESOUL_LEVEL1_MERGE_SIZE_LIMIT_BYTES", 1024 * 1024 * 1024)?;
        let default_level1_merge_num_limit = read_env_or("LAKESOUL_LEVEL1_MERGE_NUM_LIMIT", 5)?;
        let default_level_max_file_size = read_env_or("LAKESOUL_LEVEL_MAX_FILE_SIZE_BYTES", 5 * 1024 * 1024 * 1024)?;

        Ok(Self {
            catalog,
            snapshot_cache_ttl,
            default_level1_file_num_limit,
            default_level1_merge_size_limit,
            default_level1_merge_num_limit,
            default_level_max_file_size,
        })
    }
}

fn read_env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("parsing {key}")),
        Err(_) => Ok(default),
    }
}
