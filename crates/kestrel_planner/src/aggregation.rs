//! Aggregation and GROUP BY planning.
//!
//! When grouping is not provably single-shard (no unique vindex among the
//! group keys, or the plan is a join), aggregation is finalized at the
//! gateway: an ordered aggregate wraps the plan, shard-local partials are
//! pushed down, and group keys gain weight-string siblings. Distinct
//! aggregates (`count(distinct x)`) are rewritten to their `*_distinct`
//! opcode plus a synthetic group key on the argument.

use kestrel_common::error::{PlanError, PlanResult};
use kestrel_common::unsupported;
use kestrel_sql_frontend::ast::{
    contains_aggregation, is_aggregation, AliasedExpr, Expr, FuncExpr, Order,
};

use crate::context::{expr_has_unique_vindex, PlanningContext};
use crate::engine::{
    supported_aggregate, AggregateOpcode, AggregateParams, GroupByParams, OrderedAggregateParams,
};
use crate::horizon::HorizonPlanning;
use crate::logical_plan::{LogicalPlan, OrderedAggregate};
use crate::order_by::{weight_string_for, wrap_and_push_expr};
use crate::projection::push_projection;
use crate::query_projection::{GroupBy, OrderBy};

impl<'a> HorizonPlanning<'a> {
    pub(crate) fn plan_aggregations(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        let uniq_vindex = has_unique_vindex(ctx, &self.qp.group_by_exprs);
        let join_plan = plan.is_join();
        let mut eaggr: Option<OrderedAggregateParams> = None;
        if !uniq_vindex || join_plan {
            // No single shard owns a whole group: the gateway has to merge.
            if let Some(err) = self.qp.projection_error.clone() {
                return Err(err);
            }
            eaggr = Some(OrderedAggregateParams::default());
            self.gateway_grouping = true;
            tracing::debug!("finalizing aggregation at the gateway");
        }

        if join_plan && self.qp.has_aggr && !self.qp.group_by_exprs.is_empty() {
            return Err(unsupported!("cross-shard query with aggregates"));
        }

        let mut plan = plan;
        let select_items = self.qp.select_exprs.clone();
        for item in &select_items {
            let aliased = item.get_aliased_expr()?;
            let ea = match eaggr.as_mut() {
                Some(ea) if item.aggr => ea,
                // Plain projections, and everything when the shards
                // aggregate on their own, go straight down.
                _ => {
                    let mut expr = aliased.clone();
                    push_projection(ctx, &mut expr, &mut plan, true, false, false)?;
                    continue;
                }
            };

            let Expr::FuncExpr(func) = &aliased.expr else {
                return Err(unsupported!("in scatter query: complex aggregate expression"));
            };
            let opcode = supported_aggregate(&func.name).ok_or_else(|| {
                unsupported!("in scatter query: aggregation function '{}'", func.name)
            })?;
            let distinct_target = need_distinct_handling(ctx, func, opcode, &plan)?;
            let func = func.clone();
            let (mut push_expr, alias, opcode) =
                self.create_push_expr_and_alias(aliased, distinct_target, opcode, ea);
            let (offset, _) = push_projection(ctx, &mut push_expr, &mut plan, true, false, true)?;
            ea.aggregates.push(AggregateParams {
                opcode,
                col: offset,
                alias,
                expr: func,
                w_col: None,
            });
        }

        // Synthetic distinct-aggregate keys were appended above, so clone
        // the group-by list only now.
        let group_by_exprs = self.qp.group_by_exprs.clone();
        for group_expr in &group_by_exprs {
            let added = if let Some(ea) = eaggr.as_mut() {
                let (key_col, ws_offset, col_added) = wrap_and_push_expr(
                    ctx,
                    &group_expr.inner,
                    Some(&group_expr.weight_str_expr),
                    &mut plan,
                )?;
                if group_expr.distinct_aggr_index == 0 {
                    ea.group_by_keys.push(GroupByParams {
                        key_col,
                        weight_string_col: ws_offset,
                        expr: Some(group_expr.weight_str_expr.clone()),
                        collation: ctx.sem_table.collation_for(&group_expr.inner),
                    });
                } else if let Some(ws_offset) = ws_offset {
                    // The key belongs to a distinct aggregate; hand the
                    // weight string to the aggregate instead.
                    ea.aggregates[group_expr.distinct_aggr_index - 1].w_col = Some(ws_offset);
                }
                let added_below = plan_group_by(ctx, group_expr, &mut plan, ws_offset.is_some())?;
                col_added || added_below
            } else {
                plan_group_by(ctx, group_expr, &mut plan, false)?
            };
            self.have_to_truncate(added);
        }

        // A streaming aggregate needs its input sorted by the group keys;
        // when the sort cannot be pushed down later, install it now.
        if !self.qp.can_push_down_sorting && eaggr.is_some() {
            let order_exprs: Vec<OrderBy> = group_by_exprs
                .iter()
                .filter(|g| !g.inner.is_null())
                .map(|g| OrderBy {
                    inner: Order::asc(g.inner.clone()),
                    weight_str_expr: g.weight_str_expr.clone(),
                })
                .collect();
            if !order_exprs.is_empty() {
                plan = self.plan_order_by(ctx, &order_exprs, plan)?;
            }
        }

        let mut plan = match eaggr {
            Some(eaggr) => LogicalPlan::OrderedAggregate(OrderedAggregate {
                input: Box::new(plan),
                eaggr,
            }),
            None => plan,
        };

        plan = self.plan_having(ctx, plan)?;

        // Gateway operators were built around the route; expressions that
        // merely contain an aggregate cannot be finalized up here.
        if !matches!(plan, LogicalPlan::Route(_)) {
            for item in &self.qp.select_exprs {
                let expr = item.get_expr()?;
                if !is_aggregation(expr) && contains_aggregation(expr) {
                    return Err(unsupported!("in scatter query: complex aggregate expression"));
                }
            }
        }

        Ok(plan)
    }

    /// The expression pushed to the shards for one aggregate, its result
    /// alias, and the (possibly distinct-rewritten) opcode. A distinct
    /// rewrite pushes the bare argument, switches to the `*_distinct`
    /// opcode and appends a synthetic group key pointing back at the
    /// aggregate.
    fn create_push_expr_and_alias(
        &mut self,
        aliased: &AliasedExpr,
        distinct_target: Option<AliasedExpr>,
        opcode: AggregateOpcode,
        eaggr: &mut OrderedAggregateParams,
    ) -> (AliasedExpr, String, AggregateOpcode) {
        let alias = aliased.alias.clone().unwrap_or_else(|| aliased.expr.to_string());
        let Some(inner) = distinct_target else {
            return (aliased.clone(), alias, opcode);
        };
        let opcode = match opcode {
            AggregateOpcode::Count => AggregateOpcode::CountDistinct,
            AggregateOpcode::Sum => AggregateOpcode::SumDistinct,
            other => other,
        };
        eaggr.pre_process = true;
        self.have_to_truncate(true);
        self.qp.group_by_exprs.push(GroupBy {
            inner: inner.expr.clone(),
            weight_str_expr: inner.expr.clone(),
            distinct_aggr_index: eaggr.aggregates.len() + 1,
        });
        (inner, alias, opcode)
    }

    /// Derive an ORDER BY from the group keys not already ordered on, so the
    /// gateway sort lines up with the aggregation's required group order.
    pub(crate) fn plan_group_by_using_order_by(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        let order_exprs: Vec<OrderBy> = self
            .qp
            .group_by_exprs
            .iter()
            .filter(|group_expr| {
                !self.qp.order_exprs.iter().any(|o| o.inner.expr == group_expr.inner)
            })
            .map(|group_expr| OrderBy {
                inner: Order::asc(group_expr.inner.clone()),
                weight_str_expr: group_expr.weight_str_expr.clone(),
            })
            .collect();
        if order_exprs.is_empty() {
            return Ok(plan);
        }
        self.plan_order_by(ctx, &order_exprs, plan)
    }
}

fn has_unique_vindex(ctx: &PlanningContext<'_>, group_by_exprs: &[GroupBy]) -> bool {
    group_by_exprs.iter().any(|g| expr_has_unique_vindex(ctx, &g.weight_str_expr))
}

/// Whether a distinct aggregate needs gateway-side handling, and if so the
/// bare argument to push instead of the whole call. Shard-local distinct is
/// enough when the argument carries a unique vindex.
fn need_distinct_handling(
    ctx: &PlanningContext<'_>,
    func: &FuncExpr,
    opcode: AggregateOpcode,
    input: &LogicalPlan,
) -> PlanResult<Option<AliasedExpr>> {
    if !func.distinct {
        return Ok(None);
    }
    if !matches!(opcode, AggregateOpcode::Count | AggregateOpcode::Sum) {
        // min/max(distinct x) ≡ min/max(x)
        return Ok(None);
    }
    let arg = match func.args.first() {
        Some(arg) if !matches!(arg, Expr::Star) => arg,
        _ => return Err(PlanError::Syntax(func.to_string())),
    };
    let inner = AliasedExpr::unaliased(arg.clone());
    if !matches!(input, LogicalPlan::Route(_)) {
        return Ok(Some(inner));
    }
    if expr_has_unique_vindex(ctx, &inner.expr) {
        return Ok(None);
    }
    Ok(Some(inner))
}

/// Install one GROUP BY key into the plan.
fn plan_group_by(
    ctx: &mut PlanningContext<'_>,
    group_expr: &GroupBy,
    plan: &mut LogicalPlan,
    ws_added: bool,
) -> PlanResult<bool> {
    match plan {
        LogicalPlan::Route(route) => {
            let sel = route.select.first_select_mut();
            sel.group_by.push(group_expr.inner.clone());
            if ws_added {
                // A weight_string projection was added for this key; it must
                // also be grouped or full_group_by mode rejects the query.
                sel.group_by.push(weight_string_for(&group_expr.weight_str_expr));
            }
            Ok(false)
        }
        LogicalPlan::Join(_) | LogicalPlan::HashJoin(_) => {
            let (_, _, added) = wrap_and_push_expr(
                ctx,
                &group_expr.inner,
                Some(&group_expr.weight_str_expr),
                plan,
            )?;
            Ok(added)
        }
        LogicalPlan::OrderedAggregate(aggregate) => {
            let (key_col, ws_offset, col_added) = wrap_and_push_expr(
                ctx,
                &group_expr.inner,
                Some(&group_expr.weight_str_expr),
                &mut aggregate.input,
            )?;
            if group_expr.distinct_aggr_index == 0 {
                aggregate.eaggr.group_by_keys.push(GroupByParams {
                    key_col,
                    weight_string_col: ws_offset,
                    expr: Some(group_expr.weight_str_expr.clone()),
                    collation: ctx.sem_table.collation_for(&group_expr.inner),
                });
            } else if let Some(ws_offset) = ws_offset {
                aggregate.eaggr.aggregates[group_expr.distinct_aggr_index - 1].w_col =
                    Some(ws_offset);
            }
            let added_below =
                plan_group_by(ctx, group_expr, &mut aggregate.input, ws_offset.is_some())?;
            Ok(col_added || added_below)
        }
        LogicalPlan::PulloutSubquery(pullout) => {
            plan_group_by(ctx, group_expr, &mut pullout.underlying, ws_added)
        }
        LogicalPlan::SemiJoin(_) => {
            Err(unsupported!("group by in a query having a correlated subquery"))
        }
        other => Err(unsupported!("group by on: {}", other.kind())),
    }
}
