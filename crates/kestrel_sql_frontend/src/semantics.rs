//! Semantic table: the name-resolution results the horizon planner consumes.
//!
//! The planner never resolves names itself — it asks this table for:
//! - the recursive table-dependency set of an expression,
//! - the type and collation of an expression,
//! - derived-table membership and expression rewriting,
//! - dependency copying for synthesized column references (the single
//!   write operation), and
//! - the sharded-error sentinel recorded during analysis.
//!
//! Tables are registered in order; registration index n is bit n of the
//! [`TableSet`] bitset.

use std::collections::HashMap;

use kestrel_common::error::PlanError;
use kestrel_common::types::{CollationId, DataType, TableSet};

use crate::ast::{ColName, Expr, Literal};

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    pub collation: CollationId,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> ColumnInfo {
        let collation = if data_type.is_text() {
            CollationId::UTF8MB4_GENERAL_CI
        } else {
            CollationId::UNKNOWN
        };
        ColumnInfo { name: name.into(), data_type, collation }
    }

    pub fn with_collation(mut self, collation: CollationId) -> ColumnInfo {
        self.collation = collation;
        self
    }
}

/// A derived table's output frame: projected alias → the expression behind it.
#[derive(Debug, Clone)]
pub struct DerivedTable {
    pub columns: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub derived: Option<DerivedTable>,
}

/// Binding recorded for a synthesized expression (an alias reference, a
/// rewritten column): the resolution results of the expression it stands for.
#[derive(Debug, Clone, Copy)]
struct CopiedBinding {
    deps: TableSet,
    data_type: Option<DataType>,
    collation: CollationId,
}

#[derive(Debug, Clone, Default)]
pub struct SemTable {
    tables: Vec<TableInfo>,
    /// Bindings recorded explicitly via [`SemTable::copy_dependencies`],
    /// keyed by the synthesized expression. Checked before name resolution.
    copied: HashMap<Expr, CopiedBinding>,
    /// Set during analysis when the query is structurally un-plannable
    /// across shards; the planner surfaces it verbatim for non-route plans.
    pub sharded_error: Option<PlanError>,
}

impl SemTable {
    pub fn new() -> SemTable {
        SemTable::default()
    }

    /// Register a physical table; returns its singleton table set.
    pub fn add_table(&mut self, name: impl Into<String>, columns: Vec<ColumnInfo>) -> TableSet {
        self.tables.push(TableInfo { name: name.into(), columns, derived: None });
        TableSet::single(self.tables.len() - 1)
    }

    /// Register a derived table; `columns` maps each projected alias to the
    /// expression behind it inside the subquery.
    pub fn add_derived_table(
        &mut self,
        name: impl Into<String>,
        columns: Vec<(String, Expr, DataType)>,
    ) -> TableSet {
        let infos = columns
            .iter()
            .map(|(alias, _, data_type)| ColumnInfo::new(alias.clone(), *data_type))
            .collect();
        let derived = DerivedTable {
            columns: columns.into_iter().map(|(alias, expr, _)| (alias, expr)).collect(),
        };
        self.tables.push(TableInfo { name: name.into(), columns: infos, derived: Some(derived) });
        TableSet::single(self.tables.len() - 1)
    }

    pub fn set_sharded_error(&mut self, err: PlanError) {
        self.sharded_error = Some(err);
    }

    /// The union of the tables every column in the expression resolves to.
    /// Unresolvable columns contribute nothing; a pure-literal expression
    /// has the empty set.
    pub fn recursive_deps(&self, expr: &Expr) -> TableSet {
        if let Some(binding) = self.copied.get(expr) {
            return binding.deps;
        }
        match expr {
            Expr::ColName(col) => self
                .resolve_column(col)
                .map(|(index, _, _)| TableSet::single(index))
                .unwrap_or(TableSet::EMPTY),
            Expr::FuncExpr(f) => f
                .args
                .iter()
                .fold(TableSet::EMPTY, |acc, arg| acc.merge(self.recursive_deps(arg))),
            Expr::BinaryExpr { left, right, .. } => {
                self.recursive_deps(left).merge(self.recursive_deps(right))
            }
            Expr::UnaryExpr { expr, .. } => self.recursive_deps(expr),
            _ => TableSet::EMPTY,
        }
    }

    /// Record that `to` (a synthesized column reference) resolves like
    /// `from`: same dependency set, type, collation.
    pub fn copy_dependencies(&mut self, from: &Expr, to: &Expr) {
        let binding = CopiedBinding {
            deps: self.recursive_deps(from),
            data_type: self.type_for(from),
            collation: self.collation_for(from),
        };
        self.copied.insert(to.clone(), binding);
    }

    pub fn type_for(&self, expr: &Expr) -> Option<DataType> {
        if let Some(binding) = self.copied.get(expr) {
            return binding.data_type;
        }
        match expr {
            Expr::ColName(col) => self.resolve_column(col).and_then(|(_, _, c)| c).map(|c| c.data_type),
            Expr::Literal(Literal::Int(_)) => Some(DataType::Int64),
            Expr::Literal(Literal::Float(_)) => Some(DataType::Float64),
            Expr::Literal(Literal::Str(_)) => Some(DataType::VarChar),
            _ => None,
        }
    }

    /// The collation ordering the expression by; `UNKNOWN` when none applies
    /// (numerics, composite expressions).
    pub fn collation_for(&self, expr: &Expr) -> CollationId {
        if let Some(binding) = self.copied.get(expr) {
            return binding.collation;
        }
        match expr {
            Expr::ColName(col) => match self.resolve_column(col) {
                Some((_, _, Some(c))) if c.data_type.is_text() => c.collation,
                _ => CollationId::UNKNOWN,
            },
            _ => CollationId::UNKNOWN,
        }
    }

    /// The table behind the set, when it holds exactly one.
    pub fn table(&self, set: TableSet) -> Option<&TableInfo> {
        set.single_index().and_then(|i| self.tables.get(i))
    }

    /// The derived table the expression resolves into, when its dependencies
    /// are exactly one table and that table is derived.
    pub fn derived_table_for(&self, expr: &Expr) -> Option<&TableInfo> {
        let table = self.table(self.recursive_deps(expr))?;
        table.derived.as_ref()?;
        Some(table)
    }

    /// Rewrite an expression addressed at a derived table so it matches the
    /// column names used inside it: each column reference whose name is one
    /// of the derived table's output aliases becomes the expression behind
    /// that alias.
    pub fn rewrite_derived_expression(&self, expr: &Expr, table: &TableInfo) -> Expr {
        let Some(derived) = &table.derived else { return expr.clone() };
        fn rewrite(expr: &Expr, derived: &DerivedTable) -> Expr {
            match expr {
                Expr::ColName(col) => {
                    for (alias, inner) in &derived.columns {
                        if *alias == col.name {
                            return inner.clone();
                        }
                    }
                    expr.clone()
                }
                Expr::FuncExpr(f) => Expr::FuncExpr(crate::ast::FuncExpr {
                    name: f.name.clone(),
                    distinct: f.distinct,
                    args: f.args.iter().map(|a| rewrite(a, derived)).collect(),
                }),
                Expr::BinaryExpr { op, left, right } => Expr::BinaryExpr {
                    op: *op,
                    left: Box::new(rewrite(left, derived)),
                    right: Box::new(rewrite(right, derived)),
                },
                Expr::UnaryExpr { op, expr } => {
                    Expr::UnaryExpr { op: *op, expr: Box::new(rewrite(expr, derived)) }
                }
                _ => expr.clone(),
            }
        }
        rewrite(expr, derived)
    }

    fn resolve_column(&self, col: &ColName) -> Option<(usize, &TableInfo, Option<&ColumnInfo>)> {
        if let Some(qualifier) = &col.qualifier {
            let index = self.tables.iter().position(|t| t.name == qualifier.name)?;
            let table = &self.tables[index];
            let column = table.columns.iter().find(|c| c.name == col.name);
            Some((index, table, column))
        } else {
            for (index, table) in self.tables.iter().enumerate() {
                if let Some(column) = table.columns.iter().find(|c| c.name == col.name) {
                    return Some((index, table, Some(column)));
                }
            }
            None
        }
    }
}
