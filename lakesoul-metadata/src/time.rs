use chrono::{DateTime, Utc};

/// An inclusive-exclusive `[begin, end)` window in wall-clock time,
/// shared by incremental reads and TTL sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.begin && ts < self.end
    }
}

/// How a [`crate::snapshot::Snapshot`] was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    /// Read against the latest committed state of every partition.
    Full,
    /// Read against the state as of a fixed instant.
    SnapshotAt(DateTime<Utc>),
    /// Read only the file-ops whose source commit timestamp falls in
    /// `(start_ts, end_ts]`.
    Incremental {
        start_ts: DateTime<Utc>,
        end_ts: DateTime<Utc>,
    },
}

impl ReadType {
    /// The instant a version-chain walk should stop admitting commits
    /// at, or `None` for [`ReadType::Full`].
    pub fn upper_bound(&self) -> Option<DateTime<Utc>> {
        match self {
            ReadType::Full => None,
            ReadType::SnapshotAt(ts) => Some(*ts),
            ReadType::Incremental { end_ts, .. } => Some(*end_ts),
        }
    }

    /// The instant below which commits are excluded, only meaningful for
    /// incremental reads.
    pub fn lower_bound(&self) -> Option<DateTime<Utc>> {
        match self {
            ReadType::Incremental { start_ts, .. } => Some(*start_ts),
            _ => None,
        }
    }
}
