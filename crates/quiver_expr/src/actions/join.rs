use std::fmt::Debug;

use quiver_column::block::Block;
use quiver_error::Result;

use super::ColumnWithType;

/// Runtime side of a JOIN handoff: materializes the joined block.
///
/// Join algorithms live outside this crate; the chain only needs to thread
/// blocks through one.
pub trait JoinHook: Debug + Send + Sync {
    fn join_block(&self, block: &mut Block) -> Result<()>;
}

/// Analyzer side of a JOIN handoff: the columns the join consumes from the
/// left side and the columns it appends.
#[derive(Debug, Clone, Default)]
pub struct TableJoin {
    required_columns: Vec<String>,
    added_columns: Vec<ColumnWithType>,
}

impl TableJoin {
    pub fn new(required_columns: Vec<String>, added_columns: Vec<ColumnWithType>) -> Self {
        TableJoin {
            required_columns,
            added_columns,
        }
    }

    /// Left-side columns the join condition needs.
    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }

    /// Columns the join appends to the block.
    pub fn added_columns(&self) -> &[ColumnWithType] {
        &self.added_columns
    }
}
