//! Per-query planning context: the semantic table, the vschema, and the
//! bind-variable name counter shared by every rewriter in one invocation.

use kestrel_common::types::TableSet;
use kestrel_sql_frontend::ast::{ColName, Expr};
use kestrel_sql_frontend::semantics::SemTable;

/// The sharding metadata the planner consults: does a column carry a unique
/// vindex? A unique vindex guarantees each value maps to a single shard,
/// which lets the gateway skip gateway-side dedup/aggregation.
pub trait Vschema {
    fn column_has_unique_vindex(&self, table: &str, column: &str) -> bool;
}

pub struct PlanningContext<'a> {
    pub sem_table: &'a mut SemTable,
    pub vschema: &'a dyn Vschema,
    bindvar_counter: u32,
}

impl<'a> PlanningContext<'a> {
    pub fn new(sem_table: &'a mut SemTable, vschema: &'a dyn Vschema) -> PlanningContext<'a> {
        PlanningContext { sem_table, vschema, bindvar_counter: 0 }
    }

    /// A bind-variable name unique within this query, derived from the
    /// column it carries.
    pub fn new_bindvar_name(&mut self, col: &ColName) -> String {
        self.bindvar_counter += 1;
        format!("{}_{}", col.compliant_name(), self.bindvar_counter)
    }
}

/// True when the expression is a column reference carrying a unique vindex.
pub fn expr_has_unique_vindex(ctx: &PlanningContext<'_>, expr: &Expr) -> bool {
    let Expr::ColName(col) = expr else { return false };
    let deps = ctx.sem_table.recursive_deps(expr);
    let Some(table) = ctx.sem_table.table(deps) else { return false };
    if table.derived.is_some() {
        return false;
    }
    ctx.vschema.column_has_unique_vindex(&table.name, &col.name)
}

/// A vschema backed by an explicit (table, column) list. Production wires
/// the real vschema in; tests and tools use this.
#[derive(Debug, Default)]
pub struct StaticVschema {
    unique_vindexes: Vec<(String, String)>,
}

impl StaticVschema {
    pub fn new() -> StaticVschema {
        StaticVschema::default()
    }

    pub fn with_unique_vindex(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> StaticVschema {
        self.unique_vindexes.push((table.into(), column.into()));
        self
    }
}

impl Vschema for StaticVschema {
    fn column_has_unique_vindex(&self, table: &str, column: &str) -> bool {
        self.unique_vindexes.iter().any(|(t, c)| t == table && c == column)
    }
}

/// True when every order expression's dependencies are solved by `ts`.
pub fn order_exprs_depend_on_table_set(
    sem_table: &SemTable,
    exprs: &[crate::query_projection::OrderBy],
    ts: TableSet,
) -> bool {
    exprs
        .iter()
        .all(|o| sem_table.recursive_deps(&o.inner.expr).is_solved_by(ts))
}
