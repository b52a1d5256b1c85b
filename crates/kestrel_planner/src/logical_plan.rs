//! The logical plan tree the horizon planner rewrites.
//!
//! `LogicalPlan` is a closed tagged tree; every rewriter dispatches on the
//! variant and unknown variants map to errors. Each variant has a fixed
//! column-addressing discipline:
//!
//! - `Route`: the embedded SQL's projection list is the frame; offsets index
//!   into it.
//! - `Join` / `HashJoin` / `SemiJoin`: `cols` encodes provenance — `-n`
//!   means left child offset `n-1`, `+n` means right child offset `n-1`;
//!   zero is forbidden.
//! - `OrderedAggregate`: aggregate and group-key offsets address the *input*
//!   plan's frame.
//! - `SimpleProjection`: output i re-emits input offset `cols[i]`.
//! - `PulloutSubquery`, `Filter`, `Limit`, `Distinct`: transparent
//!   passthroughs to their input.

use kestrel_common::types::TableSet;
use kestrel_common::{unsupported, PlanError, PlanResult};
use kestrel_sql_frontend::ast::{AliasedExpr, Expr, SelectStatement};

use crate::engine::{
    MemorySortParams, OrderedAggregateParams, RouteParams, RouteOpcode, SimpleProjectionParams,
    VindexFuncParams,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOpcode {
    /// Inner join; both sides preserved.
    Normal,
    /// Left outer join; the right side is non-preserved.
    LeftJoin,
}

/// Forwards its embedded SQL to one shard (single-shard opcodes) or all
/// shards (scatter). The embedded statement is the sole source of truth for
/// the projection frame.
#[derive(Debug, Clone)]
pub struct Route {
    pub opcode: RouteOpcode,
    /// Tables of the original query this route resolves.
    pub tables: TableSet,
    pub select: SelectStatement,
    pub eroute: RouteParams,
}

impl Route {
    pub fn is_single_shard(&self) -> bool {
        self.opcode.is_single_shard()
    }
}

/// Nested-loop cross-shard join. `vars` maps bind-variable names exposed to
/// the right side onto left-side column offsets, in insertion order.
#[derive(Debug, Clone)]
pub struct Join {
    pub left: Box<LogicalPlan>,
    pub right: Box<LogicalPlan>,
    pub opcode: JoinOpcode,
    pub cols: Vec<i32>,
    pub vars: Vec<(String, usize)>,
}

/// Hash join built from both sides' streams; no bind-variable channel, so
/// projections cannot straddle it.
#[derive(Debug, Clone)]
pub struct HashJoin {
    pub left: Box<LogicalPlan>,
    pub right: Box<LogicalPlan>,
    pub opcode: JoinOpcode,
    pub cols: Vec<i32>,
}

/// Correlated-subquery join: rows come from the lhs only, the rhs acts as a
/// filter source. `cols` therefore holds only negative entries.
#[derive(Debug, Clone)]
pub struct SemiJoin {
    pub lhs: Box<LogicalPlan>,
    pub rhs: Box<LogicalPlan>,
    pub cols: Vec<i32>,
}

/// Streaming aggregation over an input sorted by its group keys.
#[derive(Debug, Clone)]
pub struct OrderedAggregate {
    pub input: Box<LogicalPlan>,
    pub eaggr: OrderedAggregateParams,
}

/// Gateway in-memory sort.
#[derive(Debug, Clone)]
pub struct MemorySort {
    pub input: Box<LogicalPlan>,
    pub ems: MemorySortParams,
}

#[derive(Debug, Clone)]
pub struct SimpleProjection {
    pub input: Box<LogicalPlan>,
    pub eproj: SimpleProjectionParams,
}

/// A vindex lookup exposed as a relation; its projection frame is the fixed
/// field set of the vindex result.
#[derive(Debug, Clone)]
pub struct VindexFunc {
    pub tables: TableSet,
    pub evindex: VindexFuncParams,
}

/// Fields a vindex function can produce, in frame order.
pub const VINDEX_FIELDS: &[&str] =
    &["id", "keyspace_id", "range_start", "range_end", "hex_keyspace_id", "shard"];

impl VindexFunc {
    /// Install a projection; only direct references to the vindex fields are
    /// expressible. Returns the output offset.
    pub fn supply_projection(&mut self, expr: &AliasedExpr, reuse: bool) -> PlanResult<usize> {
        let Expr::ColName(col) = &expr.expr else {
            return Err(unsupported!("expression on results of a vindex function"));
        };
        let field = VINDEX_FIELDS
            .iter()
            .position(|f| *f == col.name)
            .ok_or_else(|| PlanError::bad_field(&col.name, "field list"))?;
        if reuse {
            if let Some(i) = self.evindex.cols.iter().position(|c| *c == field) {
                return Ok(i);
            }
        }
        self.evindex.cols.push(field);
        self.evindex.fields.push(col.name.clone());
        Ok(self.evindex.cols.len() - 1)
    }
}

/// Extracts a subquery's result into bind variables evaluated against the
/// underlying plan; transparent to every horizon operation.
#[derive(Debug, Clone)]
pub struct PulloutSubquery {
    pub subquery: Box<LogicalPlan>,
    pub underlying: Box<LogicalPlan>,
}

/// Gateway-side predicate evaluation (HAVING that could not be pushed).
#[derive(Debug, Clone)]
pub struct Filter {
    pub input: Box<LogicalPlan>,
    pub predicate: Expr,
}

#[derive(Debug, Clone)]
pub struct Limit {
    pub input: Box<LogicalPlan>,
    pub row_count: u64,
}

#[derive(Debug, Clone)]
pub struct Distinct {
    pub input: Box<LogicalPlan>,
}

/// UNION of sources with identical frames; projections must already exist in
/// every source, so nothing is ever pushed through it.
#[derive(Debug, Clone)]
pub struct Concatenate {
    pub sources: Vec<LogicalPlan>,
}

#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum LogicalPlan {
    Route(Route),
    Join(Join),
    HashJoin(HashJoin),
    SemiJoin(SemiJoin),
    OrderedAggregate(OrderedAggregate),
    MemorySort(MemorySort),
    SimpleProjection(SimpleProjection),
    VindexFunc(VindexFunc),
    PulloutSubquery(PulloutSubquery),
    Filter(Filter),
    Limit(Limit),
    Distinct(Distinct),
    Concatenate(Concatenate),
}

impl LogicalPlan {
    /// Variant name for diagnostics and plan descriptions.
    pub fn kind(&self) -> &'static str {
        match self {
            LogicalPlan::Route(_) => "route",
            LogicalPlan::Join(_) => "join",
            LogicalPlan::HashJoin(_) => "hash_join",
            LogicalPlan::SemiJoin(_) => "semi_join",
            LogicalPlan::OrderedAggregate(_) => "ordered_aggregate",
            LogicalPlan::MemorySort(_) => "memory_sort",
            LogicalPlan::SimpleProjection(_) => "simple_projection",
            LogicalPlan::VindexFunc(_) => "vindex_func",
            LogicalPlan::PulloutSubquery(_) => "pullout_subquery",
            LogicalPlan::Filter(_) => "filter",
            LogicalPlan::Limit(_) => "limit",
            LogicalPlan::Distinct(_) => "distinct",
            LogicalPlan::Concatenate(_) => "concatenate",
        }
    }

    /// Union of the tables resolved under this subtree.
    pub fn contains_tables(&self) -> TableSet {
        match self {
            LogicalPlan::Route(r) => r.tables,
            LogicalPlan::Join(j) => j.left.contains_tables().merge(j.right.contains_tables()),
            LogicalPlan::HashJoin(j) => j.left.contains_tables().merge(j.right.contains_tables()),
            LogicalPlan::SemiJoin(j) => j.lhs.contains_tables().merge(j.rhs.contains_tables()),
            LogicalPlan::OrderedAggregate(a) => a.input.contains_tables(),
            LogicalPlan::MemorySort(m) => m.input.contains_tables(),
            LogicalPlan::SimpleProjection(p) => p.input.contains_tables(),
            LogicalPlan::VindexFunc(v) => v.tables,
            LogicalPlan::PulloutSubquery(p) => {
                p.subquery.contains_tables().merge(p.underlying.contains_tables())
            }
            LogicalPlan::Filter(f) => f.input.contains_tables(),
            LogicalPlan::Limit(l) => l.input.contains_tables(),
            LogicalPlan::Distinct(d) => d.input.contains_tables(),
            LogicalPlan::Concatenate(c) => c
                .sources
                .iter()
                .fold(TableSet::EMPTY, |acc, s| acc.merge(s.contains_tables())),
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, LogicalPlan::Join(_) | LogicalPlan::HashJoin(_))
    }
}
