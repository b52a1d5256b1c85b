//! Gate for gateway-side expression evaluation.
//!
//! Before pushing a non-column projection into a route, the planner checks
//! whether the expression is one the gateway's runtime evaluator could take
//! over. Conversion failing with an `Unimplemented`-classed error is
//! tolerated on the preserved side of a join (the shard's database will
//! evaluate the expression instead); on a non-preserved side it is fatal.
//!
//! Column references fail here: the evaluator resolves columns by offset,
//! and no offsets exist at validation time.

use kestrel_common::error::PlanResult;
use kestrel_common::unsupported;
use kestrel_sql_frontend::ast::{BinaryOp, Expr, Literal, UnaryOp};
use kestrel_sql_frontend::semantics::SemTable;

/// An expression compiled for in-process evaluation at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalExpr {
    Literal(Literal),
    Null,
    BindVar(String),
    Binary { op: BinaryOp, left: Box<EvalExpr>, right: Box<EvalExpr> },
    Neg(Box<EvalExpr>),
    Not(Box<EvalExpr>),
}

/// Convert an AST expression into an evaluator expression, or fail with an
/// `Unimplemented`-classed error for anything the gateway cannot evaluate.
pub fn convert(expr: &Expr, sem_table: &SemTable) -> PlanResult<EvalExpr> {
    match expr {
        Expr::Literal(l) => Ok(EvalExpr::Literal(l.clone())),
        Expr::Null => Ok(EvalExpr::Null),
        Expr::Argument(name) => Ok(EvalExpr::BindVar(name.clone())),
        Expr::ColName(_) => Err(unsupported!("column access not supported here")),
        Expr::BinaryExpr { op, left, right } => Ok(EvalExpr::Binary {
            op: *op,
            left: Box::new(convert(left, sem_table)?),
            right: Box::new(convert(right, sem_table)?),
        }),
        Expr::UnaryExpr { op: UnaryOp::Minus, expr } => {
            Ok(EvalExpr::Neg(Box::new(convert(expr, sem_table)?)))
        }
        Expr::UnaryExpr { op: UnaryOp::Not, expr } => {
            Ok(EvalExpr::Not(Box::new(convert(expr, sem_table)?)))
        }
        other => Err(unsupported!("expr cannot be translated, not supported: {}", other)),
    }
}
