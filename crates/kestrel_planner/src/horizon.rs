//! The horizon driver.
//!
//! `plan_horizon` turns a logical operator tree plus the SELECT's remaining
//! horizon (projection, aggregation, HAVING, DISTINCT, ORDER BY, LIMIT)
//! into a physical plan, in a fixed order:
//!
//! 1. single-shard routes take the shortcut — the whole SELECT is installed
//!    into the route's SQL and nothing else runs;
//! 2. aggregation (and HAVING) planning;
//! 3. ORDER BY planning, then group-via-order alignment when grouping
//!    stayed at the gateway;
//! 4. DISTINCT planning;
//! 5. truncation of trailing synthesized columns.

use kestrel_common::error::PlanResult;
use kestrel_common::{bug, unsupported};
use kestrel_sql_frontend::ast::{
    remove_keyspace_from_cols, AliasedExpr, Expr, Order, Select, SelectExpr,
};

use crate::context::PlanningContext;
use crate::logical_plan::{Filter, LogicalPlan, Route, SimpleProjection};
use crate::projection::push_projection;
use crate::query_projection::QueryProjection;

/// Per-SELECT planning state: created at entry, mutated throughout, and
/// discarded with the plan. `needs_truncation` is monotone.
pub(crate) struct HorizonPlanning<'a> {
    pub(crate) sel: &'a Select,
    pub(crate) qp: QueryProjection,
    pub(crate) needs_truncation: bool,
    pub(crate) gateway_grouping: bool,
}

/// Plan the query horizon of `sel` over `plan`.
pub fn plan_horizon(
    ctx: &mut PlanningContext<'_>,
    sel: &Select,
    mut plan: LogicalPlan,
) -> PlanResult<LogicalPlan> {
    if !matches!(plan, LogicalPlan::Route(_)) {
        // The analyzer already knows this query cannot be spread over
        // shards; a non-route plan means it would have to be.
        if let Some(err) = ctx.sem_table.sharded_error.clone() {
            return Err(err);
        }
    }
    if let LogicalPlan::Route(route) = &mut plan {
        if route.is_single_shard() {
            tracing::debug!(opcode = %route.opcode, "single-shard shortcut");
            plan_single_shard_route(sel, route);
            return Ok(plan);
        }
    }

    let qp = QueryProjection::from_select(sel, ctx.sem_table)?;
    let hp = HorizonPlanning { sel, qp, needs_truncation: false, gateway_grouping: false };
    hp.plan(ctx, plan)
}

impl<'a> HorizonPlanning<'a> {
    fn plan(
        mut self,
        ctx: &mut PlanningContext<'_>,
        mut plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        let is_route = matches!(plan, LogicalPlan::Route(_));
        let needs_aggr_or_having = self.qp.needs_aggregation() || self.sel.having.is_some();
        let can_shortcut = is_route && !needs_aggr_or_having && self.qp.order_exprs.is_empty();

        if needs_aggr_or_having {
            plan = self.plan_aggregations(ctx, plan)?;
        } else {
            if matches!(plan, LogicalPlan::OrderedAggregate(_)) {
                // Leftover aggregation from an earlier phase with nothing to
                // aggregate here; re-select through it.
                plan = LogicalPlan::SimpleProjection(SimpleProjection {
                    input: Box::new(plan),
                    eproj: Default::default(),
                });
            }
            if can_shortcut {
                let LogicalPlan::Route(route) = &mut plan else {
                    return Err(bug!("shortcut planning on a non-route plan"));
                };
                plan_single_shard_route(self.sel, route);
            } else {
                let select_items = self.qp.select_exprs.clone();
                for item in &select_items {
                    let mut aliased = item.get_aliased_expr()?.clone();
                    push_projection(ctx, &mut aliased, &mut plan, true, false, false)?;
                }
            }
        }

        // The shortcut installed ORDER BY and GROUP BY wholesale; nothing
        // left to plan in that case.
        if !can_shortcut {
            if !self.qp.order_exprs.is_empty() {
                let order_exprs = self.qp.order_exprs.clone();
                plan = self.plan_order_by(ctx, &order_exprs, plan)?;
            }
            if self.qp.can_push_down_sorting && self.gateway_grouping {
                plan = self.plan_group_by_using_order_by(ctx, plan)?;
            }
        }

        plan = self.plan_distinct(ctx, plan)?;
        self.truncate_columns_if_needed(&mut plan)?;
        Ok(plan)
    }

    pub(crate) fn have_to_truncate(&mut self, added: bool) {
        self.needs_truncation = self.needs_truncation || added;
    }

    /// Push-downs may have widened the output frame past the SELECT's own
    /// column count; tell the root operator where the visible frame ends.
    pub(crate) fn truncate_columns_if_needed(&self, plan: &mut LogicalPlan) -> PlanResult<()> {
        if !self.needs_truncation {
            return Ok(());
        }
        set_truncate_column_count(plan, self.sel.column_count())
    }

    pub(crate) fn plan_having(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        match self.sel.having.clone() {
            Some(having) => push_having(ctx, &having, plan),
            None => Ok(plan),
        }
    }
}

fn set_truncate_column_count(plan: &mut LogicalPlan, count: usize) -> PlanResult<()> {
    match plan {
        LogicalPlan::Route(route) => route.eroute.truncate_column_count = count,
        // Extra columns on a join are harmless; nothing to cut.
        LogicalPlan::Join(_) | LogicalPlan::HashJoin(_) | LogicalPlan::SemiJoin(_) => {}
        LogicalPlan::OrderedAggregate(aggregate) => {
            aggregate.eaggr.truncate_column_count = count
        }
        LogicalPlan::MemorySort(sort) => sort.ems.truncate_column_count = count,
        LogicalPlan::PulloutSubquery(pullout) => {
            return set_truncate_column_count(&mut pullout.underlying, count)
        }
        LogicalPlan::Filter(filter) => {
            return set_truncate_column_count(&mut filter.input, count)
        }
        other => {
            return Err(bug!("plan type not known for column truncation: {}", other.kind()))
        }
    }
    Ok(())
}

fn push_having(
    ctx: &mut PlanningContext<'_>,
    expr: &Expr,
    plan: LogicalPlan,
) -> PlanResult<LogicalPlan> {
    match plan {
        LogicalPlan::Route(mut route) => {
            route.select.first_select_mut().add_having(expr.clone());
            Ok(LogicalPlan::Route(route))
        }
        LogicalPlan::PulloutSubquery(mut pullout) => {
            let underlying = *pullout.underlying;
            pullout.underlying = Box::new(push_having(ctx, expr, underlying)?);
            Ok(LogicalPlan::PulloutSubquery(pullout))
        }
        LogicalPlan::SimpleProjection(_) => {
            Err(unsupported!("filtering on results of cross-shard derived table"))
        }
        plan @ LogicalPlan::OrderedAggregate(_) => Ok(LogicalPlan::Filter(Filter {
            input: Box::new(plan),
            predicate: expr.clone(),
        })),
        other => Err(bug!("unreachable {}.filtering", other.kind())),
    }
}

/// Install the complete SELECT into a single-shard route: one shard holds
/// every row, so the database can do projection, grouping, ordering, HAVING,
/// DISTINCT and LIMIT on its own. Keyspace qualifiers are stripped — the
/// shard-local database does not know them.
pub(crate) fn plan_single_shard_route(sel: &Select, route: &mut Route) {
    let target = route.select.first_select_mut();
    target.distinct = sel.distinct;
    target.select_exprs = sel.select_exprs.iter().map(strip_select_expr).collect();
    target.group_by = sel.group_by.iter().map(remove_keyspace_from_cols).collect();
    target.order_by = sel
        .order_by
        .iter()
        .map(|o| Order { expr: remove_keyspace_from_cols(&o.expr), direction: o.direction })
        .collect();
    target.having = sel.having.as_ref().map(remove_keyspace_from_cols);
    route.select.set_limit(sel.limit);
}

fn strip_select_expr(item: &SelectExpr) -> SelectExpr {
    match item {
        SelectExpr::Aliased(ae) => SelectExpr::Aliased(AliasedExpr {
            expr: remove_keyspace_from_cols(&ae.expr),
            alias: ae.alias.clone(),
        }),
        SelectExpr::Star(star) => {
            let mut star = star.clone();
            if let Some(table) = &mut star.table {
                table.keyspace = None;
            }
            SelectExpr::Star(star)
        }
    }
}
