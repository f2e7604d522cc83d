use quiver_column::block::{Block, BlockColumn};
use quiver_column::column::Column;
use quiver_error::{QuiverError, Result};

/// Unfolds the listed array columns of a block, replicating every other
/// column per array lengths.
///
/// All listed columns must agree on per-row array sizes; the unfolded
/// column keeps its name with the element type.
#[derive(Debug, Clone)]
pub struct ArrayJoinAction {
    columns: Vec<String>,
}

impl ArrayJoinAction {
    pub fn try_new(columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(QuiverError::LogicalError(
                "No arrays to join".to_string(),
            ));
        }
        Ok(ArrayJoinAction { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|col| col == name)
    }

    pub fn execute(&self, block: &mut Block) -> Result<()> {
        let mut reference: Option<Vec<usize>> = None;
        let mut unfolded: Vec<(usize, Column)> = Vec::with_capacity(self.columns.len());

        for name in &self.columns {
            let pos = block.position_by_name(name).ok_or_else(|| {
                QuiverError::UnknownIdentifier(format!(
                    "ARRAY JOIN column '{name}' is missing from block"
                ))
            })?;
            let (elements, lengths) = block.columns()[pos].column.unfold_list()?;

            match &reference {
                Some(expected) if *expected != lengths => {
                    return Err(QuiverError::TypeMismatch(
                        "ARRAY JOIN columns have diverging array sizes".to_string(),
                    ));
                }
                Some(_) => (),
                None => reference = Some(lengths),
            }
            unfolded.push((pos, elements));
        }

        let lengths = reference.ok_or_else(|| {
            QuiverError::LogicalError("ARRAY JOIN resolved no columns".to_string())
        })?;
        let num_rows = lengths.iter().sum();

        let old = std::mem::replace(block, Block::empty_with_num_rows(num_rows));
        for (pos, col) in old.into_columns().into_iter().enumerate() {
            match unfolded.iter().find(|(unfolded_pos, _)| *unfolded_pos == pos) {
                Some((_, elements)) => {
                    block.push(BlockColumn::new(col.name, elements.clone()))?;
                }
                None => {
                    block.push(BlockColumn {
                        name: col.name,
                        datatype: col.datatype,
                        column: col.column.replicate(&lengths)?,
                    })?;
                }
            }
        }

        Ok(())
    }
}
