//! Partition-predicate planning: a hand-rolled predicate
//! tree (the columnar-engine expression type is out of scope), a
//! partition/data predicate split, and classification of the residual
//! partition predicate into an access path against [`CatalogClient`].
//!
//! Shaped like range narrowing before a finer per-partition filter,
//! generalized from a single time range to arbitrary partition-column
//! equality/range predicates.

use std::collections::{HashMap, HashSet};

use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::ids::PartitionDescriptor;
use crate::model::{PartitionVersion, Table};

/// A predicate over a single partition column, the unit the planner can
/// reason about without a columnar engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnPredicate {
    Eq(String),
    In(Vec<String>),
    /// Inclusive lower, exclusive upper; either bound may be absent.
    Range {
        lower: Option<String>,
        upper: Option<String>,
    },
}

impl ColumnPredicate {
    fn matches(&self, value: &str) -> bool {
        match self {
            ColumnPredicate::Eq(v) => v == value,
            ColumnPredicate::In(vs) => vs.iter().any(|v| v == value),
            ColumnPredicate::Range { lower, upper } => {
                lower.as_deref().map(|l| value >= l).unwrap_or(true)
                    && upper.as_deref().map(|u| value < u).unwrap_or(true)
            }
        }
    }

    fn is_equality(&self) -> bool {
        matches!(self, ColumnPredicate::Eq(_))
    }
}

/// A predicate tree over table columns, built by the caller from whatever
/// representation the query-engine binding layer hands in.
#[derive(Debug, Clone)]
pub enum Predicate {
    Column(String, ColumnPredicate),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Cannot be evaluated against partition columns alone (references a
    /// data column, or a shape the planner doesn't model); always passed
    /// through to the data-predicate residual.
    Opaque,
}

/// What a [`Predicate`] resolves to once split against a table's
/// partitioning scheme.
#[derive(Debug, Clone)]
pub struct SplitPredicate {
    /// The part of the predicate decidable from partition columns alone.
    pub partition_predicate: Option<Predicate>,
    /// The remainder, to be applied to resolved data files downstream
    /// (out of scope here: the query-engine binding layer applies it).
    pub data_predicate: Option<Predicate>,
}

/// How specific a [`SplitPredicate`]'s partition component is, used to
/// choose a catalog access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateClass {
    /// Every leaf is an equality predicate on every range-partition column:
    /// resolves to `get_single_partition`/`get_partitions_by_eq`.
    AllEquality,
    /// Some but not all range-partition columns are constrained by
    /// equality: a narrowed `get_partitions_by_eq` plus a residual filter.
    PartialEquality,
    /// Ranges, disjunctions, or no partition-column predicate at all:
    /// falls back to `list_partitions` plus a full residual filter.
    General,
}

/// Splits `predicate` into a partition-decidable part and a residual,
/// given `table`'s partition-column set.
pub fn split(predicate: &Predicate, table: &Table) -> SplitPredicate {
    let partition_columns: std::collections::HashSet<&str> = table
        .range_partition_columns
        .iter()
        .map(String::as_str)
        .collect();
    split_inner(predicate, &partition_columns)
}

fn split_inner(
    predicate: &Predicate,
    partition_columns: &std::collections::HashSet<&str>,
) -> SplitPredicate {
    match predicate {
        Predicate::Column(col, _) if partition_columns.contains(col.as_str()) => SplitPredicate {
            partition_predicate: Some(predicate.clone()),
            data_predicate: None,
        },
        Predicate::Column(_, _) | Predicate::Opaque => SplitPredicate {
            partition_predicate: None,
            data_predicate: Some(predicate.clone()),
        },
        Predicate::And(children) => {
            let mut partition_parts = Vec::new();
            let mut data_parts = Vec::new();
            for child in children {
                let split = split_inner(child, partition_columns);
                partition_parts.extend(split.partition_predicate);
                data_parts.extend(split.data_predicate);
            }
            SplitPredicate {
                partition_predicate: combine_and(partition_parts),
                data_predicate: combine_and(data_parts),
            }
        }
        // An OR cannot be split cleanly unless every branch decides
        // purely on partition columns; otherwise the whole disjunction
        // must fall through to the data predicate.
        Predicate::Or(children) => {
            let splits: Vec<SplitPredicate> =
                children.iter().map(|c| split_inner(c, partition_columns)).collect();
            if splits.iter().all(|s| s.data_predicate.is_none()) {
                SplitPredicate {
                    partition_predicate: Some(Predicate::Or(
                        splits.into_iter().filter_map(|s| s.partition_predicate).collect(),
                    )),
                    data_predicate: None,
                }
            } else {
                SplitPredicate {
                    partition_predicate: None,
                    data_predicate: Some(predicate.clone()),
                }
            }
        }
    }
}

fn combine_and(mut parts: Vec<Predicate>) -> Option<Predicate> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Predicate::And(parts)),
    }
}

/// Classifies a partition predicate's specificity against the table's
/// declared range-partition columns.
pub fn classify(predicate: Option<&Predicate>, table: &Table) -> PredicateClass {
    let Some(predicate) = predicate else {
        return PredicateClass::General;
    };
    let mut equality_columns = std::collections::HashSet::new();
    if !collect_equality_columns(predicate, &mut equality_columns) {
        return PredicateClass::General;
    }
    let declared: std::collections::HashSet<&str> = table
        .range_partition_columns
        .iter()
        .map(String::as_str)
        .collect();
    if declared.is_empty() {
        return PredicateClass::General;
    }
    if declared.iter().all(|c| equality_columns.contains(*c)) {
        PredicateClass::AllEquality
    } else if equality_columns.is_empty() {
        PredicateClass::General
    } else {
        PredicateClass::PartialEquality
    }
}

/// Walks a predicate tree restricted to AND/OR of equality leaves,
/// collecting constrained column names. Returns `false` if a non-equality
/// leaf makes the whole predicate ineligible for the equality index.
fn collect_equality_columns<'a>(
    predicate: &'a Predicate,
    out: &mut std::collections::HashSet<&'a str>,
) -> bool {
    match predicate {
        Predicate::Column(col, pred) if pred.is_equality() => {
            out.insert(col.as_str());
            true
        }
        Predicate::Column(_, _) | Predicate::Opaque => false,
        Predicate::And(children) => children.iter().all(|c| collect_equality_columns(c, out)),
        Predicate::Or(children) => children.iter().all(|c| collect_equality_columns(c, out)),
    }
}

/// Extracts the OR-component equality bindings of a partition predicate,
/// one map per disjunct, for callers that want to union per-`partition_desc`
/// lookups rather than issue one broad `list_partitions` scan.
pub fn or_components(predicate: &Predicate) -> Vec<HashMap<String, ColumnPredicate>> {
    match predicate {
        Predicate::Or(children) => children.iter().flat_map(or_components).collect(),
        Predicate::And(children) => {
            let mut combined = HashMap::new();
            for child in children {
                for component in or_components(child) {
                    combined.extend(component);
                }
            }
            vec![combined]
        }
        Predicate::Column(col, pred) => {
            let mut m = HashMap::new();
            m.insert(col.clone(), pred.clone());
            vec![m]
        }
        Predicate::Opaque => vec![HashMap::new()],
    }
}

/// Resolves the partitions a predicate selects by issuing the cheapest
/// catalog access path for its [`PredicateClass`]: `get_single_partition`
/// for an all-equality predicate, `get_partitions_by_eq` for a
/// partial-equality one, or `list_partitions` plus client-side filtering
/// otherwise. A top-level disjunction is evaluated branch by branch and
/// unioned by `partition_desc` — partitions are deduplicated by the
/// descriptor string, never by comparing the full column-value map.
pub fn plan_partitions<'a>(
    catalog: &'a dyn CatalogClient,
    table: &'a Table,
    predicate: Option<&'a Predicate>,
) -> futures::future::BoxFuture<'a, Result<Vec<PartitionVersion>>> {
    Box::pin(async move {
        let split_result = predicate.map(|p| split(p, table));
        let Some(partition_predicate) = split_result.and_then(|s| s.partition_predicate) else {
            return catalog.list_partitions(table.table_id).await;
        };

        if let Predicate::Or(branches) = &partition_predicate {
            let mut seen = HashSet::new();
            let mut result = Vec::new();
            for branch in branches {
                for pv in plan_partitions(catalog, table, Some(branch)).await? {
                    if seen.insert(pv.partition_desc.clone()) {
                        result.push(pv);
                    }
                }
            }
            return Ok(result);
        }

        match classify(Some(&partition_predicate), table) {
            PredicateClass::AllEquality => {
                let bindings = equality_bindings(&partition_predicate);
                let ordered: Vec<(&str, &str)> = table
                    .range_partition_columns
                    .iter()
                    .map(|c| (c.as_str(), bindings.get(c).map(String::as_str).unwrap_or("")))
                    .collect();
                let desc = PartitionDescriptor::build(&ordered);
                Ok(catalog
                    .get_single_partition(table.table_id, &desc, 0)
                    .await?
                    .into_iter()
                    .collect())
            }
            PredicateClass::PartialEquality => {
                let bindings = equality_bindings(&partition_predicate);
                let query = bindings
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" & ");
                catalog.get_partitions_by_eq(table.table_id, &query).await
            }
            PredicateClass::General => {
                let all = catalog.list_partitions(table.table_id).await?;
                Ok(all
                    .into_iter()
                    .filter(|pv| matches_partition(&partition_predicate, &pv.partition_desc))
                    .collect())
            }
        }
    })
}

/// Collects every equality binding in a predicate tree restricted to
/// AND-of-equality leaves (the shape [`classify`] requires for
/// `AllEquality`/`PartialEquality`).
fn equality_bindings(predicate: &Predicate) -> HashMap<String, String> {
    let mut out = HashMap::new();
    collect_eq_bindings(predicate, &mut out);
    out
}

fn collect_eq_bindings(predicate: &Predicate, out: &mut HashMap<String, String>) {
    match predicate {
        Predicate::Column(col, ColumnPredicate::Eq(v)) => {
            out.insert(col.clone(), v.clone());
        }
        Predicate::And(children) => {
            for child in children {
                collect_eq_bindings(child, out);
            }
        }
        _ => {}
    }
}

/// Evaluates a partition predicate against one partition's bindings.
pub fn matches_partition(predicate: &Predicate, desc: &PartitionDescriptor) -> bool {
    let bindings: HashMap<String, String> = desc.parse().into_iter().collect();
    eval(predicate, &bindings)
}

fn eval(predicate: &Predicate, bindings: &HashMap<String, String>) -> bool {
    match predicate {
        Predicate::Column(col, pred) => bindings.get(col).map(|v| pred.matches(v)).unwrap_or(false),
        Predicate::And(children) => children.iter().all(|c| eval(c, bindings)),
        Predicate::Or(children) => children.iter().any(|c| eval(c, bindings)),
        Predicate::Opaque => true,
    }
}
