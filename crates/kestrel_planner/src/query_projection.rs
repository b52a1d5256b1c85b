//! Normalized view of a SELECT's horizon.
//!
//! `QueryProjection` flattens the statement into what the planners dispatch
//! on: select items with aggregate flags, group-bys and order-bys with their
//! weight-string expressions (ordinals and select aliases resolved to the
//! expressions behind them), and the `needs-aggregation` /
//! `can-push-down-sorting` / `has-star` flags.
//!
//! A projection that mixes an aggregate into a larger expression is not
//! rejected here: the error is cached and surfaced only if planning actually
//! enters the gateway-side aggregation path.

use kestrel_common::error::{PlanError, PlanResult};
use kestrel_common::unsupported;
use kestrel_sql_frontend::ast::{
    contains_aggregation, AliasedExpr, Expr, Literal, Order, Select, SelectExpr,
};
use kestrel_sql_frontend::semantics::SemTable;

/// One projection item with its aggregation flag.
#[derive(Debug, Clone)]
pub struct SelectItem {
    pub col: SelectExpr,
    pub aggr: bool,
}

impl SelectItem {
    pub fn get_aliased_expr(&self) -> PlanResult<&AliasedExpr> {
        match &self.col {
            SelectExpr::Aliased(ae) => Ok(ae),
            SelectExpr::Star(_) => Err(unsupported!("'*' expression in cross-shard query")),
        }
    }

    pub fn get_expr(&self) -> PlanResult<&Expr> {
        self.get_aliased_expr().map(|ae| &ae.expr)
    }
}

/// One GROUP BY key. `weight_str_expr` is the expression to generate a
/// weight string for (the expression behind an alias/ordinal, where `inner`
/// keeps the original spelling). `distinct_aggr_index` is 1-based into the
/// aggregate list for keys synthesized by a distinct-aggregate rewrite, 0
/// otherwise.
#[derive(Debug, Clone)]
pub struct GroupBy {
    pub inner: Expr,
    pub weight_str_expr: Expr,
    pub distinct_aggr_index: usize,
}

/// One ORDER BY key, with the expression its weight string is built from.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub inner: Order,
    pub weight_str_expr: Expr,
}

#[derive(Debug, Clone, Default)]
pub struct QueryProjection {
    pub select_exprs: Vec<SelectItem>,
    pub group_by_exprs: Vec<GroupBy>,
    pub order_exprs: Vec<OrderBy>,
    pub has_aggr: bool,
    pub has_star: bool,
    pub can_push_down_sorting: bool,
    pub distinct: bool,
    /// Deferred: set when the projection cannot work on the gateway-side
    /// aggregation path, surfaced only if that path is entered.
    pub projection_error: Option<PlanError>,
}

impl QueryProjection {
    pub fn from_select(sel: &Select, sem_table: &mut SemTable) -> PlanResult<QueryProjection> {
        let mut qp = QueryProjection { distinct: sel.distinct, ..QueryProjection::default() };

        for item in &sel.select_exprs {
            match item {
                SelectExpr::Aliased(ae) => {
                    let aggr = contains_aggregation(&ae.expr);
                    if aggr {
                        qp.has_aggr = true;
                        if !matches!(ae.expr, Expr::FuncExpr(_)) && qp.projection_error.is_none() {
                            qp.projection_error = Some(unsupported!(
                                "in scatter query: complex aggregate expression"
                            ));
                        }
                    }
                    qp.select_exprs.push(SelectItem { col: item.clone(), aggr });
                }
                SelectExpr::Star(_) => {
                    qp.has_star = true;
                    qp.select_exprs.push(SelectItem { col: item.clone(), aggr: false });
                }
            }
        }

        for group_expr in &sel.group_by {
            let (inner, weight_str_expr) =
                qp.simplified_expr(group_expr, sel, sem_table, "group statement")?;
            qp.group_by_exprs.push(GroupBy { inner, weight_str_expr, distinct_aggr_index: 0 });
        }

        let mut can_push_down_sorting = true;
        for order in &sel.order_by {
            let (inner, weight_str_expr) =
                qp.simplified_expr(&order.expr, sel, sem_table, "order clause")?;
            can_push_down_sorting = can_push_down_sorting && !contains_aggregation(&weight_str_expr);
            qp.order_exprs.push(OrderBy {
                inner: Order { expr: inner, direction: order.direction },
                weight_str_expr,
            });
        }
        qp.can_push_down_sorting = can_push_down_sorting;

        Ok(qp)
    }

    pub fn needs_aggregation(&self) -> bool {
        self.has_aggr || !self.group_by_exprs.is_empty()
    }

    pub fn needs_distinct(&self) -> bool {
        self.distinct
    }

    /// Resolve ordinals (`order by 2`) and select aliases to the expression
    /// they name. The weight string must be generated against the resolved
    /// expression, not the alias; an alias reference additionally gets the
    /// resolved expression's binding recorded so later dependency and type
    /// lookups see through it.
    fn simplified_expr(
        &self,
        expr: &Expr,
        sel: &Select,
        sem_table: &mut SemTable,
        clause: &str,
    ) -> PlanResult<(Expr, Expr)> {
        if let Expr::Literal(Literal::Int(n)) = expr {
            let item = usize::try_from(*n - 1)
                .ok()
                .and_then(|i| sel.select_exprs.get(i))
                .ok_or_else(|| PlanError::bad_field(n.to_string(), clause))?;
            return match item {
                SelectExpr::Aliased(ae) => Ok((ae.expr.clone(), ae.expr.clone())),
                SelectExpr::Star(_) => Err(PlanError::bad_field(n.to_string(), clause)),
            };
        }
        if let Expr::ColName(col) = expr {
            if col.qualifier.is_none() {
                for item in &sel.select_exprs {
                    let SelectExpr::Aliased(ae) = item else { continue };
                    if ae.alias.as_deref() == Some(col.name.as_str()) {
                        sem_table.copy_dependencies(&ae.expr, expr);
                        return Ok((expr.clone(), ae.expr.clone()));
                    }
                }
            }
        }
        Ok((expr.clone(), expr.clone()))
    }
}
