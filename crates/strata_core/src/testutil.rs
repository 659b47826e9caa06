//! Table builders shared by unit tests.

use std::sync::Arc;

use crate::catalog::MemoryCatalog;
use crate::config::session::SessionConfig;
use crate::context::QueryContext;
use crate::scalar::ScalarValue;
use crate::scalar::datatype::DataType;
use crate::schema::{ColumnInfo, TableInfo, TableName};
use crate::table::TableRef;
use crate::table::memory::{IndexKind, MemoryTable};

/// Single column table `name(a INT)` holding `values` in order.
pub fn int_table(name: &str, kind: IndexKind, values: &[Option<i32>]) -> Arc<MemoryTable> {
    let info = TableInfo::new(TableName::new(name), [ColumnInfo::new("a", DataType::Int32)]);
    let table = MemoryTable::with_indexes(info, vec![kind]);
    for value in values {
        table.insert(vec![ScalarValue::from(*value)]).unwrap();
    }
    Arc::new(table)
}

/// `t(a INT, b TEXT)` with rows `(1, 'x')`, `(2, 'y')`, `(3, 'x')`.
pub fn two_col_table() -> TableRef {
    let info = TableInfo::new(
        TableName::new("t"),
        [
            ColumnInfo::new("a", DataType::Int32),
            ColumnInfo::new("b", DataType::Utf8),
        ],
    );
    let table = MemoryTable::new(info);
    table
        .insert_all([
            vec![1.into(), "x".into()],
            vec![2.into(), "y".into()],
            vec![3.into(), "x".into()],
        ])
        .unwrap();
    Arc::new(table)
}

/// Context over an empty catalog.
pub fn test_context() -> QueryContext {
    QueryContext::new(Arc::new(MemoryCatalog::new()), SessionConfig::default())
}
