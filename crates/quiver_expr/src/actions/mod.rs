pub mod array_join;
pub mod chain;
pub mod dag;
pub mod expression;
pub mod join;

use quiver_column::column::Column;
use quiver_column::datatype::DataType;

/// A named, typed column in a stage interface.
///
/// The column value is present when the column is a known constant or a
/// precomputed value; interface-only descriptions leave it out.
#[derive(Debug, Clone)]
pub struct ColumnWithType {
    pub name: String,
    pub datatype: DataType,
    pub column: Option<Column>,
}

impl ColumnWithType {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        ColumnWithType {
            name: name.into(),
            datatype,
            column: None,
        }
    }

    pub fn with_column(name: impl Into<String>, column: Column) -> Self {
        ColumnWithType {
            name: name.into(),
            datatype: column.datatype(),
            column: Some(column),
        }
    }
}
