//! Compaction candidate selection: group a partition's resolved files by
//! bucket, pick buckets past the file-count or byte-size threshold, and
//! honor `only_save_once_compaction`.

use std::collections::HashMap;

use crate::model::{DataFileInfo, FileRole, Table};
use crate::resolver::split_by_bucket;

/// Table properties the planner reads, parsed once per call rather than
/// re-parsing the raw string map at every bucket. Property names and
/// defaults match the catalog wire contract's configuration surface.
#[derive(Debug, Clone, Copy)]
pub struct CompactionThresholds {
    pub level1_file_num_limit: usize,
    pub level1_merge_size_limit: i64,
    /// Caps how many files a single compaction pass merges out of a
    /// qualifying bucket; the remainder is left for a subsequent pass.
    pub level1_merge_num_limit: usize,
    /// Per-output-file byte cap, passed through to the IO collaborator's
    /// merge step.
    pub level_max_file_size: i64,
    pub only_save_once_compaction: bool,
}

impl CompactionThresholds {
    pub fn from_table(table: &Table) -> Self {
        Self {
            level1_file_num_limit: table
                .properties
                .get("compaction.level1.file.number.limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            level1_merge_size_limit: table
                .properties
                .get("compaction.level1.merge.size.limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024 * 1024 * 1024),
            level1_merge_num_limit: table
                .properties
                .get("compaction.level1.merge.num.limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            level_max_file_size: table
                .properties
                .get("compaction.level.max.file.size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5 * 1024 * 1024 * 1024),
            only_save_once_compaction: table
                .properties
                .get("only_save_once_compaction")
                .map(|v| v == "true")
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompactionCandidate {
    pub bucket_id: u32,
    /// Smallest-size-first, then oldest-modification-time-first within
    /// equal size.
    pub files: Vec<DataFileInfo>,
}

/// Selects the buckets of `resolved_files` that qualify for compaction.
///
/// `rebucketing` forces every bucket to participate and signals the
/// executor to rehash rows by the table's hash-partition columns instead
/// of preserving bucket assignment.
pub fn select_candidates(
    resolved_files: Vec<DataFileInfo>,
    thresholds: CompactionThresholds,
    rebucketing: bool,
) -> Vec<CompactionCandidate> {
    let buckets = split_by_bucket(resolved_files);
    let mut candidates = Vec::new();
    for (bucket_id, mut files) in buckets {
        if thresholds.only_save_once_compaction && already_fully_compacted(&files) {
            continue;
        }
        let qualifies = rebucketing
            || files.len() >= thresholds.level1_file_num_limit
            || total_bytes(&files) >= thresholds.level1_merge_size_limit;
        if !qualifies {
            continue;
        }
        sort_by_tie_break(&mut files);
        files.truncate(thresholds.level1_merge_num_limit.max(1));
        candidates.push(CompactionCandidate { bucket_id, files });
    }
    candidates
}

/// A bucket whose only file is already a compacted output, with no
/// subsequent deltas on top, needs no further work under
/// `only_save_once_compaction`.
fn already_fully_compacted(files: &[DataFileInfo]) -> bool {
    files.len() == 1 && files[0].role == FileRole::Compacted
}

fn total_bytes(files: &[DataFileInfo]) -> i64 {
    files.iter().map(|f| f.size).sum()
}

fn sort_by_tie_break(files: &mut [DataFileInfo]) {
    files.sort_by(|a, b| {
        a.size
            .cmp(&b.size)
            .then_with(|| a.modification_time.cmp(&b.modification_time))
    });
}

/// Convenience grouping for callers that want per-bucket byte totals
/// without running the full candidate selection (e.g. the admin CLI's
/// `compact --dry-run`).
pub fn bucket_sizes(resolved_files: &[DataFileInfo]) -> HashMap<u32, i64> {
    let mut sizes = HashMap::new();
    for f in resolved_files {
        *sizes.entry(f.bucket_id).or_insert(0) += f.size;
    }
    sizes
}
