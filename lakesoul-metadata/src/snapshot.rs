//! A table [`Snapshot`]: the immutable, consistent view a reader plans a
//! scan against. Backed by a cache of partition rows fetched for one
//! read, with a `moka::future::Cache` sized by the
//! `snapshot.cache.expire.seconds` TTL rather than entry count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;

use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::ids::{PartitionDescriptor, TableId};
use crate::model::{DataFileInfo, PartitionVersion, Table};
use crate::planner::{self, Predicate};
use crate::resolver;
use crate::time::ReadType;

/// An immutable `(table_info, version_map)` pair: which version of every
/// partition this read is pinned against, resolved once up front so a
/// long-running scan never observes a partial commit.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub table: Table,
    pub read_type: ReadType,
    versions: HashMap<PartitionDescriptor, PartitionVersion>,
    /// Partitions read by this snapshot, recorded so the commit engine's
    /// append-retry rebasing can tell which reads conflict with which
    /// writes.
    read_log: Vec<PartitionDescriptor>,
    /// Per-predicate-key cache of matched partition descriptors. Wrapped
    /// in `Arc<Mutex<..>>` rather than held by value so `Snapshot` stays
    /// `Clone` and every clone still shares one cache, the way the
    /// teacher's `PartitionCache` shares its row index across clones.
    partition_filter_cache: Arc<Mutex<HashMap<String, Arc<Vec<PartitionDescriptor>>>>>,
    /// Per-partition resolved file list, independent of any predicate
    /// (file resolution depends only on the pinned version and
    /// `read_type`), so it pays off across repeated scans under
    /// different filters.
    file_cache: Arc<Mutex<HashMap<PartitionDescriptor, Arc<Vec<DataFileInfo>>>>>,
}

impl Snapshot {
    /// Resolves a fresh snapshot directly from the catalog, pinning every
    /// partition to its latest version (or, for `SnapshotAt`, to the
    /// version current as of that instant).
    pub async fn resolve(
        catalog: &dyn CatalogClient,
        table_id: TableId,
        read_type: ReadType,
    ) -> Result<Self> {
        let table = catalog.get_table_info(table_id).await?;
        let latest = catalog.list_partitions(table_id).await?;
        let mut versions = HashMap::with_capacity(latest.len());
        for pv in latest {
            let pinned = match read_type.upper_bound() {
                None => pv,
                Some(ts) => {
                    let version =
                        catalog.version_up_to_ts(table_id, &pv.partition_desc, ts).await?;
                    if version < 0 {
                        continue;
                    }
                    catalog
                        .get_single_partition(table_id, &pv.partition_desc, version as u64)
                        .await?
                        .unwrap_or(pv)
                }
            };
            versions.insert(pinned.partition_desc.clone(), pinned);
        }
        Ok(Self {
            table,
            read_type,
            versions,
            read_log: Vec::new(),
            partition_filter_cache: Arc::new(Mutex::new(HashMap::new())),
            file_cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The partitions this snapshot can scan, narrowed by nothing but its
    /// own pinning; partition-predicate filtering happens in the planner.
    pub fn partitions_for_scan(&self) -> impl Iterator<Item = &PartitionVersion> {
        self.versions.values()
    }

    pub fn partition_version(&self, desc: &PartitionDescriptor) -> Option<&PartitionVersion> {
        self.versions.get(desc)
    }

    /// Marks `desc` as having been read by this snapshot. Commit
    /// conflict-detection consults this when deciding whether a
    /// concurrent compaction or delete invalidates an in-flight read.
    pub fn record_partition_read(&mut self, desc: PartitionDescriptor) {
        self.read_log.push(desc);
    }

    pub fn read_log(&self) -> &[PartitionDescriptor] {
        &self.read_log
    }

    /// Resolves every file a scan under `predicate` must read: splits
    /// `predicate` into its partition-decidable component and a data
    /// residual, narrows to the matching partitions (cached per
    /// canonical predicate key), then resolves each matched partition's
    /// file list against this snapshot's pinned version (cached per
    /// partition, reusable across different predicates since file
    /// resolution doesn't depend on the predicate). Returns the residual
    /// for the caller's query-engine binding layer to apply.
    pub async fn files_for_scan(
        &self,
        catalog: &dyn CatalogClient,
        predicate: Option<&Predicate>,
    ) -> Result<(Vec<DataFileInfo>, Option<Predicate>)> {
        let split = predicate.map(|p| planner::split(p, &self.table));
        let partition_predicate = split.as_ref().and_then(|s| s.partition_predicate.clone());
        let data_predicate = split.and_then(|s| s.data_predicate);

        let matched = self.partitions_matching(partition_predicate.as_ref());

        let mut files = Vec::new();
        for desc in matched.iter() {
            let Some(pv) = self.versions.get(desc) else {
                continue;
            };
            let cached = { self.file_cache.lock().expect("lock poisoned").get(desc).cloned() };
            let resolved = match cached {
                Some(files) => files,
                None => {
                    let resolved =
                        Arc::new(resolver::resolve(catalog, self.table.table_id, pv, self.read_type).await?);
                    self.file_cache
                        .lock()
                        .expect("lock poisoned")
                        .insert(desc.clone(), resolved.clone());
                    resolved
                }
            };
            files.extend(resolved.iter().cloned());
        }
        Ok((files, data_predicate))
    }

    /// The partition descriptors a partition predicate selects out of
    /// this snapshot's pinned set, cached by a canonical key so
    /// logically-identical predicates with differently-ordered AND/OR
    /// children still hit.
    fn partitions_matching(&self, predicate: Option<&Predicate>) -> Arc<Vec<PartitionDescriptor>> {
        let key = cache_key(predicate);
        if let Some(hit) = self.partition_filter_cache.lock().expect("lock poisoned").get(&key) {
            return hit.clone();
        }
        let matched: Vec<PartitionDescriptor> = match predicate {
            None => self.versions.keys().cloned().collect(),
            Some(p) => self
                .versions
                .keys()
                .filter(|desc| planner::matches_partition(p, desc))
                .cloned()
                .collect(),
        };
        let matched = Arc::new(matched);
        self.partition_filter_cache
            .lock()
            .expect("lock poisoned")
            .insert(key, matched.clone());
        matched
    }
}

/// Canonicalizes a predicate into a cache key so two predicates that
/// differ only in the order of their AND/OR children hash identically.
fn cache_key(predicate: Option<&Predicate>) -> String {
    match predicate {
        None => "<all>".to_string(),
        Some(p) => cache_key_inner(p),
    }
}

fn cache_key_inner(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Column(col, pred) => format!("col:{col}:{pred:?}"),
        Predicate::Opaque => "opaque".to_string(),
        Predicate::And(children) => {
            let mut parts: Vec<String> = children.iter().map(cache_key_inner).collect();
            parts.sort();
            format!("and({})", parts.join(","))
        }
        Predicate::Or(children) => {
            let mut parts: Vec<String> = children.iter().map(cache_key_inner).collect();
            parts.sort();
            format!("or({})", parts.join(","))
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    snapshot: Arc<Snapshot>,
}

/// Caches resolved [`Snapshot`]s for `Full`/`SnapshotAt` reads keyed by
/// table, bounded by a TTL rather than an entry-count LRU: a snapshot is
/// only valid until the next commit invalidates it, so expiring on a
/// fixed clock (`snapshot.cache.expire.seconds`) is a better fit than
/// sizing by weight.
pub struct SnapshotCache {
    cache: Cache<TableId, CacheEntry>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).build();
        Self { cache }
    }

    pub async fn get_or_resolve(
        &self,
        catalog: &dyn CatalogClient,
        table_id: TableId,
    ) -> Result<Arc<Snapshot>> {
        if let Some(entry) = self.cache.get(&table_id).await {
            return Ok(entry.snapshot);
        }
        let snapshot = Arc::new(Snapshot::resolve(catalog, table_id, ReadType::Full).await?);
        self.cache
            .insert(
                table_id,
                CacheEntry {
                    snapshot: snapshot.clone(),
                },
            )
            .await;
        Ok(snapshot)
    }

    /// Forces the next read of `table_id` to resolve a fresh snapshot.
    /// Called after a successful commit.
    pub async fn invalidate(&self, table_id: TableId) {
        self.cache.invalidate(&table_id).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

/// The wall-clock instant a [`ReadType::SnapshotAt`] or `Incremental`
/// read is anchored to, mostly here so callers don't need to import
/// `chrono::Utc::now` directly at every call site.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
