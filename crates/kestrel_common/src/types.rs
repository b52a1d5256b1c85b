use std::fmt;

use serde::{Serialize, Serializer};

/// A bitset of the tables a query (or expression) touches.
///
/// Bit `n` is the table registered n-th with the semantic table. An
/// expression's dependency set is the union of the sets of the columns it
/// references; the empty set (a literal expression) is solved by any side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TableSet(u64);

impl TableSet {
    pub const EMPTY: TableSet = TableSet(0);

    /// The set containing only the table with the given registration index.
    pub fn single(index: usize) -> TableSet {
        debug_assert!(index < 64);
        TableSet(1 << index)
    }

    pub fn merge(self, other: TableSet) -> TableSet {
        TableSet(self.0 | other.0)
    }

    /// True when every table in `self` is also in `other`.
    /// The empty set is solved by anything.
    pub fn is_solved_by(self, other: TableSet) -> bool {
        self.0 & other.0 == self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The registration index, when the set holds exactly one table.
    pub fn single_index(self) -> Option<usize> {
        if self.0 != 0 && self.0 & (self.0 - 1) == 0 {
            Some(self.0.trailing_zeros() as usize)
        } else {
            None
        }
    }
}

/// SQL column types, as far as the horizon planner cares: numeric types
/// order byte-comparably and need no weight-string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Decimal,
    VarChar,
    Text,
    VarBinary,
    Blob,
    Date,
    Time,
    Datetime,
    Json,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, DataType::VarChar | DataType::Text)
    }
}

/// MySQL collation identifier. The ids mirror the server's collation table;
/// `UNKNOWN` (0) means "no collation applies" (numerics, expressions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CollationId(pub u16);

impl CollationId {
    pub const UNKNOWN: CollationId = CollationId(0);
    pub const LATIN1_SWEDISH_CI: CollationId = CollationId(8);
    pub const UTF8MB4_GENERAL_CI: CollationId = CollationId(45);
    pub const UTF8MB4_BIN: CollationId = CollationId(46);
    pub const BINARY: CollationId = CollationId(63);
    pub const UTF8MB4_0900_AI_CI: CollationId = CollationId(255);

    pub fn name(self) -> &'static str {
        match self {
            CollationId::UNKNOWN => "unknown",
            CollationId::LATIN1_SWEDISH_CI => "latin1_swedish_ci",
            CollationId::UTF8MB4_GENERAL_CI => "utf8mb4_general_ci",
            CollationId::UTF8MB4_BIN => "utf8mb4_bin",
            CollationId::BINARY => "binary",
            CollationId::UTF8MB4_0900_AI_CI => "utf8mb4_0900_ai_ci",
            _ => "other",
        }
    }
}

impl fmt::Display for CollationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for CollationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_set_solving() {
        let left = TableSet::single(0).merge(TableSet::single(1));
        let right = TableSet::single(2);
        assert!(TableSet::single(1).is_solved_by(left));
        assert!(!right.is_solved_by(left));
        assert!(TableSet::EMPTY.is_solved_by(left));
        assert!(!left.merge(right).is_solved_by(left));
    }

    #[test]
    fn single_index_only_for_singletons() {
        assert_eq!(TableSet::single(3).single_index(), Some(3));
        assert_eq!(TableSet::EMPTY.single_index(), None);
        assert_eq!(TableSet::single(0).merge(TableSet::single(1)).single_index(), None);
    }

    #[test]
    fn numeric_types_are_byte_comparable() {
        assert!(DataType::Int64.is_numeric());
        assert!(DataType::Decimal.is_numeric());
        assert!(!DataType::VarChar.is_numeric());
        assert!(DataType::Text.is_text());
    }
}
