//! Runtime payloads of the physical operators the horizon planner emits.
//!
//! These structs are what the gateway executor consumes: per-route merge
//! ordering, ordered-aggregate opcodes and group keys, memory-sort keys,
//! simple-projection column picks. The planner populates them; execution
//! is elsewhere. Everything serializes for EXPLAIN-style plan descriptions.

use std::fmt;

use kestrel_common::types::CollationId;
use kestrel_sql_frontend::ast::{Expr, FuncExpr};
use serde::{Serialize, Serializer};

/// Aggregation functions the gateway can merge across shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOpcode {
    Count,
    Sum,
    Min,
    Max,
    CountDistinct,
    SumDistinct,
}

impl fmt::Display for AggregateOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateOpcode::Count => "count",
            AggregateOpcode::Sum => "sum",
            AggregateOpcode::Min => "min",
            AggregateOpcode::Max => "max",
            AggregateOpcode::CountDistinct => "count_distinct",
            AggregateOpcode::SumDistinct => "sum_distinct",
        })
    }
}

/// Look up the merge opcode for a lowered aggregate function name.
pub fn supported_aggregate(name: &str) -> Option<AggregateOpcode> {
    Some(match name {
        "count" => AggregateOpcode::Count,
        "sum" => AggregateOpcode::Sum,
        "min" => AggregateOpcode::Min,
        "max" => AggregateOpcode::Max,
        "count_distinct" => AggregateOpcode::CountDistinct,
        "sum_distinct" => AggregateOpcode::SumDistinct,
        _ => return None,
    })
}

fn ser_sql<S: Serializer, T: fmt::Display>(v: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(v)
}

fn ser_opt_sql<S: Serializer>(v: &Option<Expr>, serializer: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(expr) => serializer.collect_str(expr),
        None => serializer.serialize_none(),
    }
}

/// One merge-sort / memory-sort key.
///
/// `weight_string_col` points at the synthesized `weight_string(...)` sibling
/// column when the key needs collation-correct comparison; `None` for
/// byte-comparable (numeric) keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderByParams {
    pub col: usize,
    pub weight_string_col: Option<usize>,
    pub desc: bool,
    /// Column index to keep stable when a `select *` widens the frame.
    pub star_col_fixed_index: usize,
    pub collation: CollationId,
}

/// One streaming-aggregation group key. `key_col` and `weight_string_col`
/// address columns of the aggregate's *input* plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupByParams {
    pub key_col: usize,
    pub weight_string_col: Option<usize>,
    /// The expression the key was planned from; absent for keys synthesized
    /// over already-projected columns (gateway-side DISTINCT).
    #[serde(serialize_with = "ser_opt_sql", skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    pub collation: CollationId,
}

/// One aggregate computed at the gateway. `col` addresses the column of the
/// input plan carrying the shard-local partial result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateParams {
    pub opcode: AggregateOpcode,
    pub col: usize,
    pub alias: String,
    #[serde(serialize_with = "ser_sql")]
    pub expr: FuncExpr,
    /// Weight-string column backing a distinct-aggregate's dedup key.
    pub w_col: Option<usize>,
}

/// How a route addresses shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteOpcode {
    /// The keyspace is unsharded; one shard holds everything.
    Unsharded,
    /// An equality on a unique vindex pins the query to one shard.
    EqualUnique,
    /// A reference table, present on every shard.
    Reference,
    /// Fan out to all shards.
    Scatter,
}

impl RouteOpcode {
    pub fn is_single_shard(self) -> bool {
        matches!(self, RouteOpcode::Unsharded | RouteOpcode::EqualUnique | RouteOpcode::Reference)
    }
}

impl fmt::Display for RouteOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteOpcode::Unsharded => "Unsharded",
            RouteOpcode::EqualUnique => "EqualUnique",
            RouteOpcode::Reference => "Reference",
            RouteOpcode::Scatter => "Scatter",
        })
    }
}

/// Runtime payload of a route: merge ordering across shard streams and the
/// result-width truncation applied after merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteParams {
    pub order_by: Vec<OrderByParams>,
    /// Width of the caller-visible result; trailing synthesized columns
    /// (weight strings, distinct keys) are cut. Zero means no truncation.
    pub truncate_column_count: usize,
}

/// Runtime payload of the ordered (streaming) aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderedAggregateParams {
    pub aggregates: Vec<AggregateParams>,
    pub group_by_keys: Vec<GroupByParams>,
    /// Input rows need gateway-side preprocessing (distinct-aggregate dedup).
    pub pre_process: bool,
    pub truncate_column_count: usize,
}

/// Runtime payload of the gateway in-memory sort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemorySortParams {
    pub order_by: Vec<OrderByParams>,
    pub truncate_column_count: usize,
}

/// Re-emit a subset of the input's columns, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimpleProjectionParams {
    pub cols: Vec<usize>,
}

/// Output frame of a vindex function. `cols` index into the fixed field set
/// a vindex exposes (id, keyspace_id, …).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VindexFuncParams {
    pub fields: Vec<String>,
    pub cols: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_aggregate_lookup() {
        assert_eq!(supported_aggregate("count"), Some(AggregateOpcode::Count));
        assert_eq!(supported_aggregate("sum_distinct"), Some(AggregateOpcode::SumDistinct));
        assert_eq!(supported_aggregate("group_concat"), None);
        assert_eq!(supported_aggregate("rand"), None);
    }

    #[test]
    fn single_shard_opcodes() {
        assert!(RouteOpcode::Unsharded.is_single_shard());
        assert!(RouteOpcode::EqualUnique.is_single_shard());
        assert!(RouteOpcode::Reference.is_single_shard());
        assert!(!RouteOpcode::Scatter.is_single_shard());
    }
}
