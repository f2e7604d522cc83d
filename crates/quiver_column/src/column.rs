use std::sync::Arc;

use quiver_error::{QuiverError, Result};

use crate::array::Array;
use crate::datatype::DataType;
use crate::scalar::ScalarValue;

/// A constant column: one value with a logical length.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstColumn {
    pub value: ScalarValue,
    pub datatype: DataType,
    pub len: usize,
}

/// A column is either a fully materialized array or a constant.
///
/// Columns are immutable after construction and cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Full(Arc<Array>),
    Const(ConstColumn),
}

impl Column {
    pub fn full(array: impl Into<Arc<Array>>) -> Self {
        Column::Full(array.into())
    }

    pub fn constant(value: ScalarValue, len: usize) -> Self {
        let datatype = value.datatype();
        Column::Const(ConstColumn {
            value,
            datatype,
            len,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Full(arr) => arr.len(),
            Self::Const(c) => c.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Self::Full(arr) => arr.datatype(),
            Self::Const(c) => c.datatype.clone(),
        }
    }

    pub const fn is_const(&self) -> bool {
        matches!(self, Column::Const(_))
    }

    pub fn as_const(&self) -> Option<&ConstColumn> {
        match self {
            Self::Const(c) => Some(c),
            Self::Full(_) => None,
        }
    }

    pub fn scalar_at(&self, idx: usize) -> Option<ScalarValue> {
        match self {
            Self::Full(arr) => arr.scalar(idx),
            Self::Const(c) => (idx < c.len).then(|| c.value.clone()),
        }
    }

    /// Expand into a full array. Constants are repeated out to their logical
    /// length.
    pub fn materialize(&self) -> Result<Arc<Array>> {
        match self {
            Self::Full(arr) => Ok(arr.clone()),
            Self::Const(c) => Ok(Arc::new(c.value.repeat(c.len)?)),
        }
    }

    /// Resize a constant column. Full columns cannot be resized.
    pub fn with_len(&self, len: usize) -> Result<Column> {
        match self {
            Self::Const(c) => Ok(Column::Const(ConstColumn {
                value: c.value.clone(),
                datatype: c.datatype.clone(),
                len,
            })),
            Self::Full(arr) if arr.len() == len => Ok(self.clone()),
            Self::Full(arr) => Err(QuiverError::LogicalError(format!(
                "Cannot resize full column of length {} to {len}",
                arr.len()
            ))),
        }
    }

    /// Repeat row i `lengths[i]` times. This is the lockstep expansion used
    /// by ARRAY JOIN.
    pub fn replicate(&self, lengths: &[usize]) -> Result<Column> {
        if lengths.len() != self.len() {
            return Err(QuiverError::LogicalError(format!(
                "Replicate lengths {} do not match column length {}",
                lengths.len(),
                self.len()
            )));
        }

        match self {
            Self::Const(c) => Ok(Column::Const(ConstColumn {
                value: c.value.clone(),
                datatype: c.datatype.clone(),
                len: lengths.iter().sum(),
            })),
            Self::Full(arr) => {
                let mut indices = Vec::with_capacity(lengths.iter().sum());
                for (row, count) in lengths.iter().enumerate() {
                    indices.extend(std::iter::repeat(row).take(*count));
                }
                Ok(Column::Full(Arc::new(arr.take(&indices)?)))
            }
        }
    }

    /// Unfold a list column into its element column plus per-row lengths.
    pub fn unfold_list(&self) -> Result<(Column, Vec<usize>)> {
        match self {
            Self::Full(arr) => match arr.as_ref() {
                Array::List(list) => {
                    let lengths = list.lengths();
                    Ok((Column::Full(list.child().clone()), lengths))
                }
                other => Err(QuiverError::ArrayJoinTypeMismatch(format!(
                    "Expected a list column, got {}",
                    other.datatype()
                ))),
            },
            Self::Const(c) => match &c.value {
                ScalarValue::List { element, values } => {
                    let lengths = vec![values.len(); c.len];
                    let mut flat = Vec::with_capacity(values.len() * c.len);
                    for _ in 0..c.len {
                        flat.extend(values.iter().cloned());
                    }
                    let child = Array::try_from_scalars(element, &flat)?;
                    Ok((Column::Full(Arc::new(child)), lengths))
                }
                other => Err(QuiverError::ArrayJoinTypeMismatch(format!(
                    "Expected a list column, got {}",
                    other.datatype()
                ))),
            },
        }
    }
}
