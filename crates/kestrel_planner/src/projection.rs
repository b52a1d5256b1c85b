//! Projection push-down.
//!
//! `push_projection` installs an aliased expression into a plan and returns
//! the column offset where the result appears in that operator's output
//! frame, rewriting the expression into the child's frame as it descends:
//!
//! - routes append to (or reuse from) the embedded SELECT,
//! - joins record signed provenance in `cols` and split expressions that
//!   straddle the join into LHS bind variables plus an RHS rewrite,
//! - transparent operators recurse,
//! - ordered aggregates are read-only: only existing aggregates/keys can be
//!   referenced.

use kestrel_common::error::{ErrorCode, PlanError, PlanResult};
use kestrel_common::types::TableSet;
use kestrel_common::{bug, unsupported};
use kestrel_sql_frontend::ast::{
    remove_keyspace_from_cols, AliasedExpr, ColName, Expr, FuncExpr, SelectExpr, SelectStatement,
};
use kestrel_sql_frontend::semantics::SemTable;

use crate::context::PlanningContext;
use crate::eval;
use crate::logical_plan::{JoinOpcode, LogicalPlan};

/// Install `expr` into `plan`; returns `(offset, added)` where `added`
/// reports whether any operator in the subtree appended a new column.
///
/// `inner` is false underneath the non-preserved side of an outer join;
/// `reuse_col` asks for reuse of an existing column instead of appending;
/// `has_aggregation` marks an aggregate being pushed, which must not be
/// split across a join.
pub(crate) fn push_projection(
    ctx: &mut PlanningContext<'_>,
    expr: &mut AliasedExpr,
    plan: &mut LogicalPlan,
    inner: bool,
    reuse_col: bool,
    has_aggregation: bool,
) -> PlanResult<(usize, bool)> {
    match plan {
        LogicalPlan::Route(route) => {
            if !expr.expr.is_col_name() {
                // The shards' database can evaluate what the gateway cannot,
                // but only on the preserved side of the join tree.
                if let Err(err) = eval::convert(&expr.expr, ctx.sem_table) {
                    if err.code() != ErrorCode::Unimplemented {
                        return Err(err);
                    } else if !inner {
                        return Err(unsupported!(
                            "cross-shard left join and column expressions"
                        ));
                    }
                }
            }
            if reuse_col {
                if let Some(i) = check_if_already_exists(expr, &route.select, ctx.sem_table) {
                    return Ok((i, false));
                }
            }
            expr.expr = remove_keyspace_from_cols(&expr.expr);
            rewrite_projection_of_derived_table(expr, ctx.sem_table);
            let sel = match &mut route.select {
                SelectStatement::Select(sel) => sel,
                // Only ORDER BY tries to add columns to a union route.
                SelectStatement::Union(_) => {
                    return Err(PlanError::bad_field(expr.to_string(), "order clause"))
                }
            };
            let offset = sel.select_exprs.len();
            sel.select_exprs.push(SelectExpr::Aliased(expr.clone()));
            Ok((offset, true))
        }

        LogicalPlan::Join(join) => {
            let lhs_solves = join.left.contains_tables();
            let rhs_solves = join.right.contains_tables();
            let deps = ctx.sem_table.recursive_deps(&expr.expr);
            let pass_down_reuse_col = reuse_col || expr.alias.is_none();
            let rhs_inner = inner && join.opcode != JoinOpcode::LeftJoin;

            let (column, appended) = if deps.is_solved_by(lhs_solves) {
                let (offset, added) = push_projection(
                    ctx,
                    expr,
                    &mut join.left,
                    inner,
                    pass_down_reuse_col,
                    has_aggregation,
                )?;
                (-((offset + 1) as i32), added)
            } else if deps.is_solved_by(rhs_solves) {
                let (offset, added) = push_projection(
                    ctx,
                    expr,
                    &mut join.right,
                    rhs_inner,
                    pass_down_reuse_col,
                    has_aggregation,
                )?;
                ((offset + 1) as i32, added)
            } else {
                // An aggregate must not be split up and evaluated on both
                // sides; anything else is broken into LHS columns exposed as
                // bind variables plus a rewritten RHS expression.
                if has_aggregation {
                    return Err(unsupported!("cross-shard query with aggregates"));
                }
                let (names, cols, rewritten) =
                    break_expression_in_lhs_and_rhs(ctx, &expr.expr, lhs_solves);
                for (name, col) in names.into_iter().zip(cols) {
                    let mut col_expr = AliasedExpr::unaliased(Expr::ColName(col));
                    let (col_offset, _) =
                        push_projection(ctx, &mut col_expr, &mut join.left, inner, true, false)?;
                    join.vars.push((name, col_offset));
                }
                expr.expr = rewritten;
                let (offset, added) = push_projection(
                    ctx,
                    expr,
                    &mut join.right,
                    rhs_inner,
                    pass_down_reuse_col,
                    false,
                )?;
                ((offset + 1) as i32, added)
            };

            if reuse_col && !appended {
                if let Some(idx) = join.cols.iter().position(|c| *c == column) {
                    return Ok((idx, false));
                }
                // not appended to either child and not in cols; add it anyway
            }
            join.cols.push(column);
            Ok((join.cols.len() - 1, true))
        }

        LogicalPlan::HashJoin(join) => {
            let lhs_solves = join.left.contains_tables();
            let rhs_solves = join.right.contains_tables();
            let deps = ctx.sem_table.recursive_deps(&expr.expr);
            let pass_down_reuse_col = reuse_col || expr.alias.is_none();

            let (column, appended) = if deps.is_solved_by(lhs_solves) {
                let (offset, added) = push_projection(
                    ctx,
                    expr,
                    &mut join.left,
                    inner,
                    pass_down_reuse_col,
                    has_aggregation,
                )?;
                (-((offset + 1) as i32), added)
            } else if deps.is_solved_by(rhs_solves) {
                let (offset, added) = push_projection(
                    ctx,
                    expr,
                    &mut join.right,
                    inner && join.opcode != JoinOpcode::LeftJoin,
                    pass_down_reuse_col,
                    has_aggregation,
                )?;
                ((offset + 1) as i32, added)
            } else {
                if has_aggregation {
                    return Err(unsupported!("cross-shard query with aggregates"));
                }
                // No bind-variable channel across a hash join.
                return Err(unsupported!(
                    "hash join with projection from both sides of the join"
                ));
            };

            if reuse_col && !appended {
                if let Some(idx) = join.cols.iter().position(|c| *c == column) {
                    return Ok((idx, false));
                }
            }
            join.cols.push(column);
            Ok((join.cols.len() - 1, true))
        }

        LogicalPlan::SemiJoin(semi_join) => {
            let pass_down_reuse_col = reuse_col || expr.alias.is_none();
            let (offset, added) = push_projection(
                ctx,
                expr,
                &mut semi_join.lhs,
                inner,
                pass_down_reuse_col,
                has_aggregation,
            )?;
            let column = -((offset + 1) as i32);
            if reuse_col && !added {
                if let Some(idx) = semi_join.cols.iter().position(|c| *c == column) {
                    return Ok((idx, false));
                }
            }
            semi_join.cols.push(column);
            Ok((semi_join.cols.len() - 1, true))
        }

        LogicalPlan::PulloutSubquery(pullout) => push_projection(
            ctx,
            expr,
            &mut pullout.underlying,
            inner,
            reuse_col,
            has_aggregation,
        ),

        LogicalPlan::Limit(limit) => {
            push_projection(ctx, expr, &mut limit.input, inner, reuse_col, has_aggregation)
        }

        LogicalPlan::Distinct(distinct) => {
            push_projection(ctx, expr, &mut distinct.input, inner, reuse_col, has_aggregation)
        }

        LogicalPlan::SimpleProjection(projection) => {
            let (offset, _) =
                push_projection(ctx, expr, &mut projection.input, inner, true, has_aggregation)?;
            if reuse_col {
                if let Some(i) = projection.eproj.cols.iter().position(|c| *c == offset) {
                    return Ok((i, false));
                }
            }
            projection.eproj.cols.push(offset);
            Ok((projection.eproj.cols.len() - 1, true))
        }

        LogicalPlan::OrderedAggregate(aggregate) => {
            // Read-only: the only legal projections reference an existing
            // aggregate (by source expression or alias).
            let col_name = expr.expr.as_col_name();
            for aggr in &aggregate.eaggr.aggregates {
                if matches!(&expr.expr, Expr::FuncExpr(f) if *f == aggr.expr) {
                    return Ok((aggr.col, false));
                }
                if let Some(col) = col_name {
                    if col.name == aggr.alias {
                        return Ok((aggr.col, false));
                    }
                }
            }
            Err(bug!("cannot push projections in ordered aggregates"))
        }

        LogicalPlan::VindexFunc(vindex_func) => {
            let cols_before = vindex_func.evindex.cols.len();
            let i = vindex_func.supply_projection(expr, reuse_col)?;
            Ok((i, vindex_func.evindex.cols.len() > cols_before))
        }

        LogicalPlan::Concatenate(concatenate) => {
            if has_aggregation {
                return Err(unsupported!("aggregation on unions"));
            }
            let source = concatenate
                .sources
                .first_mut()
                .ok_or_else(|| bug!("concatenate plan with no sources"))?;
            let (offset, added) =
                push_projection(ctx, expr, source, inner, reuse_col, has_aggregation)?;
            if added {
                return Err(bug!(
                    "pushing projection {} on concatenate should reference an existing column",
                    expr
                ));
            }
            Ok((offset, false))
        }

        other => Err(bug!("push projection does not yet support: {}", other.kind())),
    }
}

/// If the expression belongs to a derived table, rewrite it to match the
/// column names used inside that derived table.
fn rewrite_projection_of_derived_table(expr: &mut AliasedExpr, sem_table: &SemTable) {
    if let Some(table) = sem_table.derived_table_for(&expr.expr) {
        expr.expr = sem_table.rewrite_derived_expression(&expr.expr, table);
    }
}

/// Find an equivalent projection already present in the statement's first
/// SELECT. Two expressions match when their dependency sets are equal and
/// either both are columns with equal names (existing item unaliased), both
/// are structurally equal (existing item unaliased), or the existing item's
/// alias matches the incoming column name.
pub(crate) fn check_if_already_exists(
    expr: &AliasedExpr,
    statement: &SelectStatement,
    sem_table: &SemTable,
) -> Option<usize> {
    let expr_dep = sem_table.recursive_deps(&expr.expr);
    let expr_col = expr.expr.as_col_name();
    // A union's output frame is its first SELECT's frame.
    let sel = statement.first_select();

    for (i, item) in sel.select_exprs.iter().enumerate() {
        let SelectExpr::Aliased(select_expr) = item else { continue };
        if sem_table.recursive_deps(&select_expr.expr) != expr_dep {
            continue;
        }
        match &select_expr.alias {
            None => {
                if let (Some(sel_col), Some(col)) = (select_expr.expr.as_col_name(), expr_col) {
                    if sel_col.name == col.name {
                        return Some(i);
                    }
                } else if select_expr.expr == expr.expr {
                    return Some(i);
                }
            }
            Some(alias) => {
                if let Some(col) = expr_col {
                    if *alias == col.name {
                        return Some(i);
                    }
                }
            }
        }
    }
    None
}

/// Split an expression straddling a join: every column solved by the LHS is
/// replaced with a fresh bind variable. Returns the bind-variable names, the
/// columns they carry (parallel, insertion order), and the rewritten
/// expression for the RHS.
pub(crate) fn break_expression_in_lhs_and_rhs(
    ctx: &mut PlanningContext<'_>,
    expr: &Expr,
    lhs_tables: TableSet,
) -> (Vec<String>, Vec<ColName>, Expr) {
    fn rewrite(
        ctx: &mut PlanningContext<'_>,
        expr: &Expr,
        lhs_tables: TableSet,
        names: &mut Vec<String>,
        cols: &mut Vec<ColName>,
    ) -> Expr {
        match expr {
            Expr::ColName(col)
                if ctx.sem_table.recursive_deps(expr).is_solved_by(lhs_tables) =>
            {
                // One bind variable per distinct column, insertion-ordered.
                if let Some(i) = cols.iter().position(|c| c == col) {
                    return Expr::Argument(names[i].clone());
                }
                let name = ctx.new_bindvar_name(col);
                names.push(name.clone());
                cols.push(col.clone());
                Expr::Argument(name)
            }
            Expr::FuncExpr(f) => Expr::FuncExpr(FuncExpr {
                name: f.name.clone(),
                distinct: f.distinct,
                args: f.args.iter().map(|a| rewrite(ctx, a, lhs_tables, names, cols)).collect(),
            }),
            Expr::BinaryExpr { op, left, right } => Expr::BinaryExpr {
                op: *op,
                left: Box::new(rewrite(ctx, left, lhs_tables, names, cols)),
                right: Box::new(rewrite(ctx, right, lhs_tables, names, cols)),
            },
            Expr::UnaryExpr { op, expr } => Expr::UnaryExpr {
                op: *op,
                expr: Box::new(rewrite(ctx, expr, lhs_tables, names, cols)),
            },
            _ => expr.clone(),
        }
    }

    let mut names = Vec::new();
    let mut cols = Vec::new();
    let rewritten = rewrite(ctx, expr, lhs_tables, &mut names, &mut cols);
    (names, cols, rewritten)
}
