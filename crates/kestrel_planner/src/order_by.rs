//! ORDER BY planning.
//!
//! Ordering is either installed into a route (the shards sort, the gateway
//! merge-sorts using the route's sort keys) or implemented by a memory sort
//! at the gateway. Text sort keys get a `weight_string(...)` sibling column
//! so cross-shard comparison is collation-correct; numeric keys are
//! byte-comparable and skip the weight string.

use kestrel_common::error::PlanResult;
use kestrel_common::types::CollationId;
use kestrel_common::{bug, unsupported};
use kestrel_sql_frontend::ast::{
    contains_aggregation, AliasedExpr, Expr, FuncExpr, OrderDirection, SelectExpr,
};

use crate::context::{order_exprs_depend_on_table_set, PlanningContext};
use crate::engine::{MemorySortParams, OrderByParams};
use crate::horizon::HorizonPlanning;
use crate::logical_plan::{
    HashJoin, Join, LogicalPlan, MemorySort, OrderedAggregate, Route,
};
use crate::projection::push_projection;
use crate::query_projection::OrderBy;

impl<'a> HorizonPlanning<'a> {
    pub(crate) fn plan_order_by(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        order_exprs: &[OrderBy],
        plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        match plan {
            plan @ LogicalPlan::Route(_) => self.plan_order_by_for_route(ctx, order_exprs, plan),
            LogicalPlan::Join(join) => self.plan_order_by_for_join(ctx, order_exprs, join),
            LogicalPlan::HashJoin(join) => {
                self.plan_order_by_for_hash_join(ctx, order_exprs, join)
            }
            LogicalPlan::OrderedAggregate(mut aggregate) => {
                // Ordering happens at the gateway here, so ORDER BY NULL
                // carries no information.
                let order_exprs: Vec<OrderBy> =
                    order_exprs.iter().filter(|o| !o.inner.expr.is_null()).cloned().collect();
                if order_exprs.iter().any(|o| contains_aggregation(&o.weight_str_expr)) {
                    return create_memory_sort_plan_on_aggregation(aggregate, &order_exprs);
                }
                let input = *aggregate.input;
                aggregate.input = Box::new(self.plan_order_by(ctx, &order_exprs, input)?);
                Ok(LogicalPlan::OrderedAggregate(aggregate))
            }
            plan @ LogicalPlan::MemorySort(_) => Ok(plan),
            plan @ LogicalPlan::SimpleProjection(_) => {
                self.create_memory_sort_plan(ctx, plan, order_exprs, true)
            }
            // Evaluated at the gateway only; no weight_string available there.
            plan @ LogicalPlan::VindexFunc(_) => {
                self.create_memory_sort_plan(ctx, plan, order_exprs, false)
            }
            LogicalPlan::Limit(mut limit) => {
                let input = *limit.input;
                limit.input = Box::new(self.plan_order_by(ctx, order_exprs, input)?);
                Ok(LogicalPlan::Limit(limit))
            }
            LogicalPlan::SemiJoin(mut semi_join) => {
                let lhs = *semi_join.lhs;
                semi_join.lhs = Box::new(self.plan_order_by(ctx, order_exprs, lhs)?);
                Ok(LogicalPlan::SemiJoin(semi_join))
            }
            LogicalPlan::Filter(mut filter) => {
                let input = *filter.input;
                filter.input = Box::new(self.plan_order_by(ctx, order_exprs, input)?);
                Ok(LogicalPlan::Filter(filter))
            }
            LogicalPlan::PulloutSubquery(mut pullout) => {
                let underlying = *pullout.underlying;
                pullout.underlying = Box::new(self.plan_order_by(ctx, order_exprs, underlying)?);
                Ok(LogicalPlan::PulloutSubquery(pullout))
            }
            other => Err(unsupported!("ordering on complex query {}", other.kind())),
        }
    }

    fn plan_order_by_for_route(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        order_exprs: &[OrderBy],
        mut plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        let orig_col_count = as_route(&plan).select.column_count();
        for order in order_exprs {
            {
                let route = as_route_mut(&mut plan);
                check_order_expr_can_be_planned_in_scatter(route, order, self.qp.has_star)?;
                route.select.add_order(order.inner.clone());
            }
            if is_special_order_by(order) {
                // ORDER BY NULL / RAND() needs no sort key at the gateway.
                continue;
            }
            let (offset, weight_string_offset, _) =
                wrap_and_push_expr(ctx, &order.inner.expr, Some(&order.weight_str_expr), &mut plan)?;
            let collation = ctx.sem_table.collation_for(&order.inner.expr);
            as_route_mut(&mut plan).eroute.order_by.push(OrderByParams {
                col: offset,
                weight_string_col: weight_string_offset,
                desc: order.inner.direction == OrderDirection::Desc,
                star_col_fixed_index: offset,
                collation,
            });
        }
        let grew = as_route(&plan).select.column_count() != orig_col_count;
        self.have_to_truncate(grew);
        Ok(plan)
    }

    fn plan_order_by_for_join(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        order_exprs: &[OrderBy],
        mut join: Join,
    ) -> PlanResult<LogicalPlan> {
        if order_exprs.len() == 1 && is_special_order_by(&order_exprs[0]) {
            let left = *join.left;
            join.left = Box::new(self.plan_order_by(ctx, order_exprs, left)?);
            let right = *join.right;
            join.right = Box::new(self.plan_order_by(ctx, order_exprs, right)?);
            return Ok(LogicalPlan::Join(join));
        }
        if order_exprs_depend_on_table_set(ctx.sem_table, order_exprs, join.left.contains_tables())
        {
            // The join iterates the left side in order; sorting it sorts
            // the join output.
            let left = *join.left;
            join.left = Box::new(self.plan_order_by(ctx, order_exprs, left)?);
            return Ok(LogicalPlan::Join(join));
        }
        self.create_memory_sort_plan(ctx, LogicalPlan::Join(join), order_exprs, true)
    }

    fn plan_order_by_for_hash_join(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        order_exprs: &[OrderBy],
        mut join: HashJoin,
    ) -> PlanResult<LogicalPlan> {
        if order_exprs.len() == 1 && is_special_order_by(&order_exprs[0]) {
            let right = *join.right;
            join.right = Box::new(self.plan_order_by(ctx, order_exprs, right)?);
            return Ok(LogicalPlan::HashJoin(join));
        }
        if order_exprs_depend_on_table_set(ctx.sem_table, order_exprs, join.right.contains_tables())
        {
            // The probe side streams through; its order survives the join.
            let right = *join.right;
            join.right = Box::new(self.plan_order_by(ctx, order_exprs, right)?);
            return Ok(LogicalPlan::HashJoin(join));
        }
        self.create_memory_sort_plan(ctx, LogicalPlan::HashJoin(join), order_exprs, true)
    }

    pub(crate) fn create_memory_sort_plan(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        mut plan: LogicalPlan,
        order_exprs: &[OrderBy],
        use_weight_str: bool,
    ) -> PlanResult<LogicalPlan> {
        let mut ems = MemorySortParams::default();
        for order in order_exprs {
            let weight_str_expr = use_weight_str.then_some(&order.weight_str_expr);
            let (offset, weight_string_offset, added) =
                wrap_and_push_expr(ctx, &order.inner.expr, weight_str_expr, &mut plan)?;
            self.have_to_truncate(added);
            ems.order_by.push(OrderByParams {
                col: offset,
                weight_string_col: weight_string_offset,
                desc: order.inner.direction == OrderDirection::Desc,
                star_col_fixed_index: offset,
                collation: ctx.sem_table.collation_for(&order.inner.expr),
            });
        }
        tracing::debug!(keys = ems.order_by.len(), "inserting gateway memory sort");
        Ok(LogicalPlan::MemorySort(MemorySort { input: Box::new(plan), ems }))
    }
}

/// Sort the output of an ordered aggregate on expressions it already
/// computes (group keys or aggregates); nothing can be pushed below the
/// aggregation.
fn create_memory_sort_plan_on_aggregation(
    aggregate: OrderedAggregate,
    order_exprs: &[OrderBy],
) -> PlanResult<LogicalPlan> {
    let mut ems = MemorySortParams::default();
    for order in order_exprs {
        let (offset, weight_string_offset, index) = find_expr_in_ordered_aggr(&aggregate, order)
            .ok_or_else(|| {
                bug!(
                    "expected to find the order by expression ({}) in the ordered aggregate",
                    order.inner.expr
                )
            })?;
        let collation = if weight_string_offset.is_some() {
            aggregate.eaggr.group_by_keys[index].collation
        } else {
            CollationId::UNKNOWN
        };
        ems.order_by.push(OrderByParams {
            col: offset,
            weight_string_col: weight_string_offset,
            desc: order.inner.direction == OrderDirection::Desc,
            star_col_fixed_index: offset,
            collation,
        });
    }
    Ok(LogicalPlan::MemorySort(MemorySort {
        input: Box::new(LogicalPlan::OrderedAggregate(aggregate)),
        ems,
    }))
}

/// Match an order expression against the aggregate's group keys, then its
/// aggregates. Returns `(key col, weight-string col, index)`.
fn find_expr_in_ordered_aggr(
    aggregate: &OrderedAggregate,
    order: &OrderBy,
) -> Option<(usize, Option<usize>, usize)> {
    for (index, key) in aggregate.eaggr.group_by_keys.iter().enumerate() {
        if key.expr.as_ref() == Some(&order.weight_str_expr) {
            return Some((key.key_col, key.weight_string_col, index));
        }
    }
    for (index, aggr) in aggregate.eaggr.aggregates.iter().enumerate() {
        if matches!(&order.weight_str_expr, Expr::FuncExpr(f) if *f == aggr.expr) {
            return Some((aggr.col, None, index));
        }
    }
    None
}

/// ORDER BY NULL and ORDER BY RAND() install no sort key.
pub(crate) fn is_special_order_by(order: &OrderBy) -> bool {
    if order.inner.expr.is_null() {
        return true;
    }
    matches!(&order.inner.expr, Expr::FuncExpr(f) if f.name == "rand")
}

/// A scatter query with a `*` projection can only order by something the
/// select list already carries; there is no frame to add sort keys to.
fn check_order_expr_can_be_planned_in_scatter(
    route: &Route,
    order: &OrderBy,
    has_star: bool,
) -> PlanResult<()> {
    if !has_star {
        return Ok(());
    }
    let sel = route.select.first_select();
    let found = sel.select_exprs.iter().any(|item| {
        matches!(item, SelectExpr::Aliased(ae) if ae.expr == order.inner.expr)
    });
    if found {
        Ok(())
    } else {
        Err(unsupported!(
            "in scatter query: order by must reference a column in the select list: {}",
            order.inner
        ))
    }
}

/// Push an expression plus (when needed) its `weight_string(...)` sibling.
/// Returns `(offset, weight-string offset, column added)`. The weight
/// string is omitted for numeric keys, which compare bytewise already.
pub(crate) fn wrap_and_push_expr(
    ctx: &mut PlanningContext<'_>,
    expr: &Expr,
    weight_str_expr: Option<&Expr>,
    plan: &mut LogicalPlan,
) -> PlanResult<(usize, Option<usize>, bool)> {
    let mut aliased = AliasedExpr::unaliased(expr.clone());
    let (offset, added) = push_projection(ctx, &mut aliased, plan, true, true, false)?;
    let Some(weight_str_expr) = weight_str_expr else {
        return Ok((offset, None, added));
    };

    let mut key_expr = expr;
    if !key_expr.is_col_name() {
        match key_expr {
            Expr::UnaryExpr { expr: inner, .. } if inner.is_col_name() => key_expr = inner,
            _ => {
                return Err(unsupported!(
                    "in scatter query: complex order by expression: {}",
                    expr
                ))
            }
        }
    }
    if matches!(ctx.sem_table.type_for(key_expr), Some(t) if t.is_numeric()) {
        return Ok((offset, None, added));
    }

    let mut ws_aliased = AliasedExpr::unaliased(weight_string_for(weight_str_expr));
    let (ws_offset, ws_added) = push_projection(ctx, &mut ws_aliased, plan, true, true, false)?;
    Ok((offset, Some(ws_offset), added || ws_added))
}

pub(crate) fn weight_string_for(expr: &Expr) -> Expr {
    Expr::FuncExpr(FuncExpr {
        name: "weight_string".into(),
        distinct: false,
        args: vec![expr.clone()],
    })
}

fn as_route(plan: &LogicalPlan) -> &Route {
    match plan {
        LogicalPlan::Route(route) => route,
        _ => unreachable!("plan changed variant during route order-by planning"),
    }
}

fn as_route_mut(plan: &mut LogicalPlan) -> &mut Route {
    match plan {
        LogicalPlan::Route(route) => route,
        _ => unreachable!("plan changed variant during route order-by planning"),
    }
}
