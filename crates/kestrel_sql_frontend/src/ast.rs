//! Planner-facing SQL AST.
//!
//! This is the statement shape the horizon planner rewrites: a SELECT with a
//! projection list, GROUP BY, HAVING, ORDER BY, DISTINCT and LIMIT, plus the
//! expression tree underneath. Routes embed a [`SelectStatement`] because a
//! route may carry a UNION.
//!
//! All nodes are `Clone + PartialEq + Eq + Hash`; identifiers are lowercased
//! at parse time, so derived equality is the case-insensitive comparison
//! MySQL applies to unquoted identifiers. `Display` renders canonical SQL
//! (lowercase keywords) — that rendering is the wire query a route sends to
//! its shards.

use std::fmt;

/// A table name, optionally qualified by a keyspace (`ks.t`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub keyspace: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> TableName {
        TableName { keyspace: None, name: name.into() }
    }
}

/// A column reference, optionally qualified by a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColName {
    pub name: String,
    pub qualifier: Option<TableName>,
}

impl ColName {
    pub fn new(name: impl Into<String>) -> ColName {
        ColName { name: name.into(), qualifier: None }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> ColName {
        ColName { name: name.into(), qualifier: Some(TableName::new(table)) }
    }

    /// A bind-variable-safe rendition of the (qualified) name: `l.a` → `l_a`.
    pub fn compliant_name(&self) -> String {
        match &self.qualifier {
            Some(t) => format!("{}_{}", t.name, self.name),
            None => self.name.clone(),
        }
    }
}

/// A literal value. Floats keep their source text so the AST stays `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Float(String),
    Str(String),
}

/// A function call. `name` is stored lowercased; `distinct` carries the
/// `count(distinct x)` flag; a `*` argument (as in `count(*)`) is
/// [`Expr::Star`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncExpr {
    pub name: String,
    pub distinct: bool,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Minus,
    Not,
}

/// An SQL scalar expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    ColName(ColName),
    Literal(Literal),
    Null,
    /// `*` as an aggregate argument (`count(*)`). Never a projection item.
    Star,
    FuncExpr(FuncExpr),
    BinaryExpr { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    UnaryExpr { op: UnaryOp, expr: Box<Expr> },
    /// A bind variable (`:name`), synthesized when an expression is split
    /// across a join.
    Argument(String),
}

impl Expr {
    pub fn col(name: &str) -> Expr {
        Expr::ColName(ColName::new(name))
    }

    pub fn as_col_name(&self) -> Option<&ColName> {
        match self {
            Expr::ColName(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_col_name(&self) -> bool {
        matches!(self, Expr::ColName(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Null)
    }

    /// Pre-order walk over this expression and all subexpressions.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::FuncExpr(f) => {
                for arg in &f.args {
                    arg.walk(visit);
                }
            }
            Expr::BinaryExpr { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::UnaryExpr { expr, .. } => expr.walk(visit),
            _ => {}
        }
    }
}

// ── Aggregation helpers ─────────────────────────────────────────────────

/// Function names MySQL treats as aggregates. Wider than the set the
/// gateway can merge across shards — that one lives with the engine
/// opcodes.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "avg",
    "bit_and",
    "bit_or",
    "bit_xor",
    "count",
    "group_concat",
    "max",
    "min",
    "std",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "sum",
    "var_pop",
    "var_samp",
    "variance",
];

pub fn is_aggregate_func_name(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.contains(&name)
}

/// True when the expression itself is an aggregate function call.
pub fn is_aggregation(expr: &Expr) -> bool {
    match expr {
        Expr::FuncExpr(f) => is_aggregate_func_name(&f.name),
        _ => false,
    }
}

/// True when any subexpression is an aggregate function call.
pub fn contains_aggregation(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if is_aggregation(e) {
            found = true;
        }
    });
    found
}

/// Strip keyspace qualifiers from every column reference: `ks.t.a` → `t.a`.
/// The shard-local database does not know the keyspace name.
pub fn remove_keyspace_from_cols(expr: &Expr) -> Expr {
    let mut out = expr.clone();
    fn strip(e: &mut Expr) {
        match e {
            Expr::ColName(c) => {
                if let Some(q) = &mut c.qualifier {
                    q.keyspace = None;
                }
            }
            Expr::FuncExpr(f) => f.args.iter_mut().for_each(strip),
            Expr::BinaryExpr { left, right, .. } => {
                strip(left);
                strip(right);
            }
            Expr::UnaryExpr { expr, .. } => strip(expr),
            _ => {}
        }
    }
    strip(&mut out);
    out
}

// ── Projection items ────────────────────────────────────────────────────

/// An expression in the projection list, with an optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasedExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl AliasedExpr {
    pub fn unaliased(expr: Expr) -> AliasedExpr {
        AliasedExpr { expr, alias: None }
    }
}

/// A `t.*` (or bare `*`) projection item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StarExpr {
    pub table: Option<TableName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectExpr {
    Aliased(AliasedExpr),
    Star(StarExpr),
}

// ── FROM clause ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableExpr {
    Table {
        name: TableName,
        alias: Option<String>,
    },
    Derived {
        select: Box<Select>,
        alias: String,
    },
    Join {
        left: Box<TableExpr>,
        right: Box<TableExpr>,
        kind: JoinKind,
        on: Option<Expr>,
    },
}

// ── ORDER BY / LIMIT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Order {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl Order {
    pub fn asc(expr: Expr) -> Order {
        Order { expr, direction: OrderDirection::Asc }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limit {
    pub row_count: u64,
    pub offset: Option<u64>,
}

// ── Statements ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Select {
    pub distinct: bool,
    pub select_exprs: Vec<SelectExpr>,
    pub from: Vec<TableExpr>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<Order>,
    pub limit: Option<Limit>,
}

impl Select {
    pub fn column_count(&self) -> usize {
        self.select_exprs.len()
    }

    /// AND the expression into the HAVING clause.
    pub fn add_having(&mut self, expr: Expr) {
        self.having = Some(match self.having.take() {
            Some(existing) => Expr::BinaryExpr {
                op: BinaryOp::And,
                left: Box::new(existing),
                right: Box::new(expr),
            },
            None => expr,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Union {
    pub left: SelectStatement,
    pub right: SelectStatement,
    pub all: bool,
    pub order_by: Vec<Order>,
    pub limit: Option<Limit>,
}

/// The statement embedded in a route: a plain SELECT or a UNION tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectStatement {
    Select(Box<Select>),
    Union(Box<Union>),
}

impl SelectStatement {
    /// The leftmost SELECT — the frame union legs must agree with.
    pub fn first_select(&self) -> &Select {
        match self {
            SelectStatement::Select(s) => s,
            SelectStatement::Union(u) => u.left.first_select(),
        }
    }

    pub fn first_select_mut(&mut self) -> &mut Select {
        match self {
            SelectStatement::Select(s) => s,
            SelectStatement::Union(u) => u.left.first_select_mut(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.first_select().column_count()
    }

    pub fn add_order(&mut self, order: Order) {
        match self {
            SelectStatement::Select(s) => s.order_by.push(order),
            SelectStatement::Union(u) => u.order_by.push(order),
        }
    }

    pub fn set_limit(&mut self, limit: Option<Limit>) {
        match self {
            SelectStatement::Select(s) => s.limit = limit,
            SelectStatement::Union(u) => u.limit = limit,
        }
    }

    pub fn make_distinct(&mut self) {
        match self {
            SelectStatement::Select(s) => s.distinct = true,
            SelectStatement::Union(u) => u.all = false,
        }
    }
}

// ── SQL rendering ───────────────────────────────────────────────────────

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ks) = &self.keyspace {
            write!(f, "{}.", ks)?;
        }
        f.write_str(&self.name)
    }
}

impl fmt::Display for ColName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(q) = &self.qualifier {
            write!(f, "{}.", q)?;
        }
        f.write_str(&self.name)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => f.write_str(v),
            Literal::Str(v) => write!(f, "'{}'", v.replace('\'', "\\'")),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        })
    }
}

impl fmt::Display for FuncExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        if self.distinct {
            f.write_str("distinct ")?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::ColName(c) => write!(f, "{}", c),
            Expr::Literal(l) => write!(f, "{}", l),
            Expr::Null => f.write_str("null"),
            Expr::Star => f.write_str("*"),
            Expr::FuncExpr(func) => write!(f, "{}", func),
            Expr::BinaryExpr { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Expr::UnaryExpr { op, expr } => match op {
                UnaryOp::Minus => write!(f, "-{}", expr),
                UnaryOp::Not => write!(f, "not {}", expr),
            },
            Expr::Argument(name) => write!(f, ":{}", name),
        }
    }
}

impl fmt::Display for AliasedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectExpr::Aliased(ae) => write!(f, "{}", ae),
            SelectExpr::Star(s) => match &s.table {
                Some(t) => write!(f, "{}.*", t),
                None => f.write_str("*"),
            },
        }
    }
}

impl fmt::Display for TableExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableExpr::Table { name, alias } => {
                write!(f, "{}", name)?;
                if let Some(a) = alias {
                    write!(f, " as {}", a)?;
                }
                Ok(())
            }
            TableExpr::Derived { select, alias } => write!(f, "({}) as {}", select, alias),
            TableExpr::Join { left, right, kind, on } => {
                let kw = match kind {
                    JoinKind::Inner => "join",
                    JoinKind::Left => "left join",
                    JoinKind::Right => "right join",
                };
                write!(f, "{} {} {}", left, kw, right)?;
                if let Some(on) = on {
                    write!(f, " on {}", on)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        };
        write!(f, "{} {}", self.expr, dir)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "limit {}, {}", offset, self.row_count),
            None => write!(f, "limit {}", self.row_count),
        }
    }
}

fn fmt_comma_separated<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("select ")?;
        if self.distinct {
            f.write_str("distinct ")?;
        }
        fmt_comma_separated(f, &self.select_exprs)?;
        if !self.from.is_empty() {
            f.write_str(" from ")?;
            fmt_comma_separated(f, &self.from)?;
        }
        if let Some(w) = &self.where_clause {
            write!(f, " where {}", w)?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" group by ")?;
            fmt_comma_separated(f, &self.group_by)?;
        }
        if let Some(h) = &self.having {
            write!(f, " having {}", h)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" order by ")?;
            fmt_comma_separated(f, &self.order_by)?;
        }
        if let Some(l) = &self.limit {
            write!(f, " {}", l)?;
        }
        Ok(())
    }
}

impl fmt::Display for Union {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.all { "union all" } else { "union" };
        write!(f, "{} {} {}", self.left, op, self.right)?;
        if !self.order_by.is_empty() {
            f.write_str(" order by ")?;
            fmt_comma_separated(f, &self.order_by)?;
        }
        if let Some(l) = &self.limit {
            write!(f, " {}", l)?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectStatement::Select(s) => write!(f, "{}", s),
            SelectStatement::Union(u) => write!(f, "{}", u),
        }
    }
}
