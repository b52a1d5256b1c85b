//! DISTINCT planning.
//!
//! A route always gets `select distinct ...` pushed into its SQL; that alone
//! is enough only when the route is single-shard or some projected column
//! carries a unique vindex (equal rows then live on one shard). Otherwise —
//! and for joins and subquery pullouts — the gateway dedups by wrapping the
//! plan in an ordered aggregate grouping on every projected column.

use kestrel_common::error::PlanResult;
use kestrel_common::{bug, unsupported};
use kestrel_sql_frontend::ast::{AliasedExpr, ColName, Expr, Order, SelectExpr};

use crate::context::{expr_has_unique_vindex, PlanningContext};
use crate::engine::{GroupByParams, OrderedAggregateParams};
use crate::horizon::HorizonPlanning;
use crate::logical_plan::{LogicalPlan, OrderedAggregate};
use crate::order_by::wrap_and_push_expr;
use crate::query_projection::{OrderBy, SelectItem};

impl<'a> HorizonPlanning<'a> {
    pub(crate) fn plan_distinct(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        if !self.qp.needs_distinct() {
            return Ok(plan);
        }
        match plan {
            LogicalPlan::Route(mut route) => {
                // The underlying query is always made distinct; a gateway
                // dedup goes on top only when shard-local dedup can miss.
                route.select.make_distinct();
                if route.is_single_shard() || self.select_has_unique_vindex(ctx) {
                    tracing::debug!("distinct handled entirely by the route");
                    return Ok(LogicalPlan::Route(route));
                }
                self.add_distinct(ctx, LogicalPlan::Route(route))
            }
            plan @ (LogicalPlan::Join(_) | LogicalPlan::PulloutSubquery(_)) => {
                self.add_distinct(ctx, plan)
            }
            LogicalPlan::OrderedAggregate(aggregate) => self.plan_distinct_oa(ctx, aggregate),
            other => Err(bug!("unknown plan type for DISTINCT {}", other.kind())),
        }
    }

    /// DISTINCT over an ordered aggregate: a second aggregate whose group
    /// keys cover every select expression, matched against the existing
    /// keys and aggregates — everything projected must already be there.
    fn plan_distinct_oa(
        &self,
        ctx: &mut PlanningContext<'_>,
        current: OrderedAggregate,
    ) -> PlanResult<LogicalPlan> {
        let mut eaggr = OrderedAggregateParams::default();
        for item in &self.qp.select_exprs {
            let expr = item.get_expr()?;
            let existing_key = current
                .eaggr
                .group_by_keys
                .iter()
                .find(|key| key.expr.as_ref() == Some(expr));
            if let Some(key) = existing_key {
                eaggr.group_by_keys.push(key.clone());
                continue;
            }
            let existing_aggr = current
                .eaggr
                .aggregates
                .iter()
                .find(|aggr| matches!(expr, Expr::FuncExpr(f) if *f == aggr.expr));
            if let Some(aggr) = existing_aggr {
                eaggr.group_by_keys.push(GroupByParams {
                    key_col: aggr.col,
                    weight_string_col: None,
                    expr: None,
                    collation: ctx.sem_table.collation_for(expr),
                });
                continue;
            }
            return Err(bug!(
                "unable to plan distinct query as the column is not projected: {}",
                item.col
            ));
        }
        Ok(LogicalPlan::OrderedAggregate(OrderedAggregate {
            input: Box::new(LogicalPlan::OrderedAggregate(current)),
            eaggr,
        }))
    }

    /// Gateway-side dedup: sort on every projected column, then group on
    /// all of them with an aggregate that computes nothing.
    fn add_distinct(
        &mut self,
        ctx: &mut PlanningContext<'_>,
        mut plan: LogicalPlan,
    ) -> PlanResult<LogicalPlan> {
        let mut eaggr = OrderedAggregateParams::default();
        let mut order_exprs = Vec::new();
        let select_items = self.qp.select_exprs.clone();
        for (index, item) in select_items.iter().enumerate() {
            let aliased = item.get_aliased_expr()?;
            if is_ambiguous_order_by(index, aliased, &select_items) {
                return Err(unsupported!(
                    "generating order by clause: ambiguous symbol reference: {}",
                    aliased.alias.clone().unwrap_or_default()
                ));
            }
            let inner = match &aliased.alias {
                None => aliased.expr.clone(),
                Some(alias) => {
                    // Order by the alias; the sort key must resolve like the
                    // expression it names.
                    let col = Expr::ColName(ColName::new(alias.clone()));
                    ctx.sem_table.copy_dependencies(&aliased.expr, &col);
                    col
                }
            };
            let collation = ctx.sem_table.collation_for(&inner);
            let (_, ws_offset, added) =
                wrap_and_push_expr(ctx, &aliased.expr, Some(&aliased.expr), &mut plan)?;
            self.have_to_truncate(added);
            eaggr.group_by_keys.push(GroupByParams {
                key_col: index,
                weight_string_col: ws_offset,
                expr: None,
                collation,
            });
            order_exprs.push(OrderBy {
                inner: Order::asc(inner),
                weight_str_expr: aliased.expr.clone(),
            });
        }
        let input = self.plan_order_by(ctx, &order_exprs, plan)?;
        Ok(LogicalPlan::OrderedAggregate(OrderedAggregate {
            input: Box::new(input),
            eaggr,
        }))
    }

    fn select_has_unique_vindex(&self, ctx: &PlanningContext<'_>) -> bool {
        self.qp.select_exprs.iter().any(|item| match item.get_expr() {
            Ok(expr) => expr_has_unique_vindex(ctx, expr),
            Err(_) => false,
        })
    }
}

/// An aliased item is ambiguous as a sort key when another item claims the
/// same name, either through its alias or its bare column name.
fn is_ambiguous_order_by(index: usize, aliased: &AliasedExpr, items: &[SelectItem]) -> bool {
    let Some(name) = &aliased.alias else { return false };
    for (i, item) in items.iter().enumerate() {
        if i == index {
            continue;
        }
        let SelectExpr::Aliased(other) = &item.col else {
            // a star hides arbitrary names
            return true;
        };
        let other_name = match &other.alias {
            Some(alias) => Some(alias.as_str()),
            None => other.expr.as_col_name().map(|c| c.name.as_str()),
        };
        if other_name == Some(name.as_str()) {
            return true;
        }
    }
    false
}
