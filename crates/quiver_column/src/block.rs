use quiver_error::{QuiverError, Result};

use crate::column::Column;
use crate::datatype::DataType;

/// A named, typed column inside a block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockColumn {
    pub name: String,
    pub datatype: DataType,
    pub column: Column,
}

impl BlockColumn {
    pub fn new(name: impl Into<String>, column: Column) -> Self {
        BlockColumn {
            name: name.into(),
            datatype: column.datatype(),
            column,
        }
    }
}

/// A batch of rows in columnar layout: same-length named columns plus an
/// explicit row count.
///
/// The row count is kept separately so a block with no columns still carries
/// block structure downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    columns: Vec<BlockColumn>,
    num_rows: usize,
}

impl Block {
    pub fn empty() -> Self {
        Block {
            columns: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn empty_with_num_rows(num_rows: usize) -> Self {
        Block {
            columns: Vec::new(),
            num_rows,
        }
    }

    pub fn try_new(columns: Vec<BlockColumn>) -> Result<Self> {
        let num_rows = match columns.first() {
            Some(col) => col.column.len(),
            None => return Ok(Self::empty()),
        };

        for col in &columns {
            if col.column.len() != num_rows {
                return Err(QuiverError::LogicalError(format!(
                    "Expected column '{}' to have length {num_rows}, got {}",
                    col.name,
                    col.column.len()
                )));
            }
        }

        Ok(Block { columns, num_rows })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Overwrite the row count. Callers are responsible for keeping columns
    /// consistent; this exists for operators that change cardinality.
    pub fn set_num_rows(&mut self, num_rows: usize) {
        self.num_rows = num_rows;
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[BlockColumn] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&BlockColumn> {
        self.columns.get(idx)
    }

    /// Position of the last column with the given name.
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.columns.iter().rposition(|col| col.name == name)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&BlockColumn> {
        self.position_by_name(name).map(|idx| &self.columns[idx])
    }

    pub fn push(&mut self, column: BlockColumn) -> Result<()> {
        if self.columns.is_empty() && self.num_rows == 0 {
            self.num_rows = column.column.len();
        } else if column.column.len() != self.num_rows {
            return Err(QuiverError::LogicalError(format!(
                "Expected column '{}' to have length {}, got {}",
                column.name,
                self.num_rows,
                column.column.len()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, idx: usize) -> BlockColumn {
        self.columns.remove(idx)
    }

    pub fn into_columns(self) -> Vec<BlockColumn> {
        self.columns
    }

    /// Names and types in column order.
    pub fn schema(&self) -> Vec<(String, DataType)> {
        self.columns
            .iter()
            .map(|col| (col.name.clone(), col.datatype.clone()))
            .collect()
    }
}
