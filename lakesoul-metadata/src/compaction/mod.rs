//! Compaction: candidate selection, stream-merge execution, and CDC
//! last-write-wins semantics.

pub mod executor;
pub mod planner;

pub use executor::{execute, CompactionOutcome};
pub use planner::{select_candidates, CompactionCandidate};
