//! SQL text → planner AST.
//!
//! Parsing is done by sqlparser-rs (MySQL dialect — the gateway speaks
//! MySQL); this module converts the sqlparser tree into the planner AST of
//! [`crate::ast`], lowercasing identifiers and function names on the way so
//! the AST's structural equality is MySQL's case-insensitive comparison.
//!
//! Only the SELECT surface the horizon planner consumes is converted;
//! anything else maps to a syntax/unsupported error.

use kestrel_common::error::{PlanError, PlanResult};
use kestrel_common::unsupported;
use sqlparser::ast as sp;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::ast::*;

/// Parse a single SELECT statement (UNIONs rejected).
pub fn parse_select(sql: &str) -> PlanResult<Select> {
    match parse_select_statement(sql)? {
        SelectStatement::Select(s) => Ok(*s),
        SelectStatement::Union(_) => Err(unsupported!("expected a plain SELECT, got a UNION")),
    }
}

/// Parse a SELECT or UNION statement.
pub fn parse_select_statement(sql: &str) -> PlanResult<SelectStatement> {
    let statements = Parser::parse_sql(&MySqlDialect {}, sql)
        .map_err(|e| PlanError::Syntax(e.to_string()))?;
    let statement = statements
        .into_iter()
        .next()
        .ok_or_else(|| PlanError::Syntax("empty statement".into()))?;
    match statement {
        sp::Statement::Query(query) => convert_query(&query),
        other => Err(unsupported!("not a SELECT statement: {}", other)),
    }
}

fn convert_query(query: &sp::Query) -> PlanResult<SelectStatement> {
    let mut statement = convert_set_expr(&query.body)?;

    if let Some(order_by) = &query.order_by {
        for obe in &order_by.exprs {
            statement.add_order(convert_order_by_expr(obe)?);
        }
    }
    let limit = convert_limit(query)?;
    if limit.is_some() {
        statement.set_limit(limit);
    }
    Ok(statement)
}

fn convert_set_expr(body: &sp::SetExpr) -> PlanResult<SelectStatement> {
    match body {
        sp::SetExpr::Select(select) => {
            Ok(SelectStatement::Select(Box::new(convert_select(select)?)))
        }
        sp::SetExpr::Query(query) => convert_query(query),
        sp::SetExpr::SetOperation { op: sp::SetOperator::Union, set_quantifier, left, right } => {
            Ok(SelectStatement::Union(Box::new(Union {
                left: convert_set_expr(left)?,
                right: convert_set_expr(right)?,
                all: matches!(set_quantifier, sp::SetQuantifier::All),
                order_by: vec![],
                limit: None,
            })))
        }
        other => Err(unsupported!("set operation: {}", other)),
    }
}

fn convert_select(select: &sp::Select) -> PlanResult<Select> {
    let mut out = Select {
        distinct: matches!(select.distinct, Some(sp::Distinct::Distinct)),
        ..Select::default()
    };

    for item in &select.projection {
        out.select_exprs.push(convert_select_item(item)?);
    }
    for twj in &select.from {
        out.from.push(convert_table_with_joins(twj)?);
    }
    out.where_clause = select.selection.as_ref().map(convert_expr).transpose()?;
    match &select.group_by {
        sp::GroupByExpr::Expressions(exprs, _) => {
            for e in exprs {
                out.group_by.push(convert_expr(e)?);
            }
        }
        other => return Err(unsupported!("group by clause: {}", other)),
    }
    out.having = select.having.as_ref().map(convert_expr).transpose()?;
    Ok(out)
}

fn convert_select_item(item: &sp::SelectItem) -> PlanResult<SelectExpr> {
    Ok(match item {
        sp::SelectItem::UnnamedExpr(expr) => {
            SelectExpr::Aliased(AliasedExpr { expr: convert_expr(expr)?, alias: None })
        }
        sp::SelectItem::ExprWithAlias { expr, alias } => SelectExpr::Aliased(AliasedExpr {
            expr: convert_expr(expr)?,
            alias: Some(lower(alias)),
        }),
        sp::SelectItem::Wildcard(_) => SelectExpr::Star(StarExpr { table: None }),
        sp::SelectItem::QualifiedWildcard(name, _) => {
            SelectExpr::Star(StarExpr { table: Some(convert_table_name(name)?) })
        }
    })
}

fn convert_table_with_joins(twj: &sp::TableWithJoins) -> PlanResult<TableExpr> {
    let mut table = convert_table_factor(&twj.relation)?;
    for join in &twj.joins {
        let right = convert_table_factor(&join.relation)?;
        let (kind, constraint) = match &join.join_operator {
            sp::JoinOperator::Inner(c) => (JoinKind::Inner, c),
            sp::JoinOperator::LeftOuter(c) => (JoinKind::Left, c),
            sp::JoinOperator::RightOuter(c) => (JoinKind::Right, c),
            other => return Err(unsupported!("join type: {:?}", other)),
        };
        let on = match constraint {
            sp::JoinConstraint::On(expr) => Some(convert_expr(expr)?),
            sp::JoinConstraint::None => None,
            other => return Err(unsupported!("join constraint: {:?}", other)),
        };
        table = TableExpr::Join {
            left: Box::new(table),
            right: Box::new(right),
            kind,
            on,
        };
    }
    Ok(table)
}

fn convert_table_factor(factor: &sp::TableFactor) -> PlanResult<TableExpr> {
    match factor {
        sp::TableFactor::Table { name, alias, .. } => Ok(TableExpr::Table {
            name: convert_table_name(name)?,
            alias: alias.as_ref().map(|a| lower(&a.name)),
        }),
        sp::TableFactor::Derived { subquery, alias, .. } => {
            let select = match convert_query(subquery)? {
                SelectStatement::Select(s) => s,
                SelectStatement::Union(_) => {
                    return Err(unsupported!("union inside a derived table"))
                }
            };
            let alias = alias
                .as_ref()
                .map(|a| lower(&a.name))
                .ok_or_else(|| PlanError::Syntax("derived table requires an alias".into()))?;
            Ok(TableExpr::Derived { select, alias })
        }
        other => Err(unsupported!("table factor: {}", other)),
    }
}

fn convert_table_name(name: &sp::ObjectName) -> PlanResult<TableName> {
    match name.0.as_slice() {
        [table] => Ok(TableName { keyspace: None, name: lower(table) }),
        [keyspace, table] => {
            Ok(TableName { keyspace: Some(lower(keyspace)), name: lower(table) })
        }
        _ => Err(PlanError::Syntax(format!("invalid table name: {}", name))),
    }
}

fn convert_order_by_expr(obe: &sp::OrderByExpr) -> PlanResult<Order> {
    let direction = match obe.asc {
        Some(false) => OrderDirection::Desc,
        _ => OrderDirection::Asc,
    };
    Ok(Order { expr: convert_expr(&obe.expr)?, direction })
}

fn convert_limit(query: &sp::Query) -> PlanResult<Option<Limit>> {
    let Some(limit) = &query.limit else { return Ok(None) };
    let row_count = literal_u64(limit)?;
    let offset = match &query.offset {
        Some(offset) => Some(literal_u64(&offset.value)?),
        None => None,
    };
    Ok(Some(Limit { row_count, offset }))
}

fn literal_u64(expr: &sp::Expr) -> PlanResult<u64> {
    if let sp::Expr::Value(sp::Value::Number(n, _)) = expr {
        if let Ok(v) = n.parse() {
            return Ok(v);
        }
    }
    Err(PlanError::Syntax(format!("expected an integer literal, got {}", expr)))
}

fn convert_expr(expr: &sp::Expr) -> PlanResult<Expr> {
    Ok(match expr {
        sp::Expr::Identifier(ident) => Expr::ColName(ColName::new(lower(ident))),
        sp::Expr::CompoundIdentifier(parts) => match parts.as_slice() {
            [table, column] => Expr::ColName(ColName {
                name: lower(column),
                qualifier: Some(TableName { keyspace: None, name: lower(table) }),
            }),
            [keyspace, table, column] => Expr::ColName(ColName {
                name: lower(column),
                qualifier: Some(TableName {
                    keyspace: Some(lower(keyspace)),
                    name: lower(table),
                }),
            }),
            _ => return Err(PlanError::Syntax(format!("invalid column reference: {}", expr))),
        },
        sp::Expr::Value(value) => convert_value(value)?,
        sp::Expr::BinaryOp { left, op, right } => Expr::BinaryExpr {
            op: convert_binary_op(op)?,
            left: Box::new(convert_expr(left)?),
            right: Box::new(convert_expr(right)?),
        },
        sp::Expr::UnaryOp { op, expr } => match op {
            sp::UnaryOperator::Minus => {
                Expr::UnaryExpr { op: UnaryOp::Minus, expr: Box::new(convert_expr(expr)?) }
            }
            sp::UnaryOperator::Plus => convert_expr(expr)?,
            sp::UnaryOperator::Not => {
                Expr::UnaryExpr { op: UnaryOp::Not, expr: Box::new(convert_expr(expr)?) }
            }
            other => return Err(unsupported!("unary operator: {}", other)),
        },
        sp::Expr::Nested(inner) => convert_expr(inner)?,
        sp::Expr::Function(func) => convert_function(func)?,
        other => return Err(unsupported!("expression: {}", other)),
    })
}

fn convert_value(value: &sp::Value) -> PlanResult<Expr> {
    Ok(match value {
        sp::Value::Number(n, _) => match n.parse::<i64>() {
            Ok(v) => Expr::Literal(Literal::Int(v)),
            Err(_) => Expr::Literal(Literal::Float(n.clone())),
        },
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
            Expr::Literal(Literal::Str(s.clone()))
        }
        sp::Value::Null => Expr::Null,
        sp::Value::Placeholder(name) => {
            Expr::Argument(name.trim_start_matches([':', '?']).to_string())
        }
        other => return Err(unsupported!("literal: {}", other)),
    })
}

fn convert_binary_op(op: &sp::BinaryOperator) -> PlanResult<BinaryOp> {
    Ok(match op {
        sp::BinaryOperator::Plus => BinaryOp::Add,
        sp::BinaryOperator::Minus => BinaryOp::Sub,
        sp::BinaryOperator::Multiply => BinaryOp::Mul,
        sp::BinaryOperator::Divide => BinaryOp::Div,
        sp::BinaryOperator::Modulo => BinaryOp::Mod,
        sp::BinaryOperator::Eq => BinaryOp::Eq,
        sp::BinaryOperator::NotEq => BinaryOp::Ne,
        sp::BinaryOperator::Lt => BinaryOp::Lt,
        sp::BinaryOperator::LtEq => BinaryOp::Le,
        sp::BinaryOperator::Gt => BinaryOp::Gt,
        sp::BinaryOperator::GtEq => BinaryOp::Ge,
        sp::BinaryOperator::And => BinaryOp::And,
        sp::BinaryOperator::Or => BinaryOp::Or,
        other => return Err(unsupported!("binary operator: {}", other)),
    })
}

fn convert_function(func: &sp::Function) -> PlanResult<Expr> {
    let name = func
        .name
        .0
        .last()
        .map(lower)
        .ok_or_else(|| PlanError::Syntax("function with empty name".into()))?;

    let (distinct, args) = match &func.args {
        sp::FunctionArguments::None => (false, vec![]),
        sp::FunctionArguments::List(list) => {
            let distinct =
                matches!(list.duplicate_treatment, Some(sp::DuplicateTreatment::Distinct));
            let mut args = Vec::with_capacity(list.args.len());
            for arg in &list.args {
                args.push(convert_function_arg(arg)?);
            }
            (distinct, args)
        }
        sp::FunctionArguments::Subquery(_) => {
            return Err(unsupported!("subquery as function argument: {}", func))
        }
    };
    Ok(Expr::FuncExpr(FuncExpr { name, distinct, args }))
}

fn convert_function_arg(arg: &sp::FunctionArg) -> PlanResult<Expr> {
    match arg {
        sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => convert_expr(e),
        sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => Ok(Expr::Star),
        other => Err(unsupported!("function argument: {}", other)),
    }
}

fn lower(ident: &sp::Ident) -> String {
    ident.value.to_lowercase()
}
