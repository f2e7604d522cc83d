use std::sync::Arc;

use quiver_error::{QuiverError, Result};

use crate::datatype::DataType;
use crate::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Boolean(BooleanArray),
    Int32(Int32Array),
    Int64(Int64Array),
    Float64(Float64Array),
    Utf8(Utf8Array),
    List(ListArray),
}

impl Array {
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(arr) => arr.len(),
            Self::Int32(arr) => arr.len(),
            Self::Int64(arr) => arr.len(),
            Self::Float64(arr) => arr.len(),
            Self::Utf8(arr) => arr.len(),
            Self::List(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::List(arr) => DataType::list_of(arr.element_type()),
        }
    }

    /// Get a scalar value at the given index.
    pub fn scalar(&self, idx: usize) -> Option<ScalarValue> {
        Some(match self {
            Self::Boolean(arr) => ScalarValue::Boolean(arr.value(idx)?),
            Self::Int32(arr) => ScalarValue::Int32(*arr.value(idx)?),
            Self::Int64(arr) => ScalarValue::Int64(*arr.value(idx)?),
            Self::Float64(arr) => ScalarValue::Float64(*arr.value(idx)?),
            Self::Utf8(arr) => ScalarValue::Utf8(arr.value(idx)?.to_string()),
            Self::List(arr) => ScalarValue::List {
                element: arr.element_type(),
                values: arr.value(idx)?,
            },
        })
    }

    /// Take rows at the given indices, producing a new array.
    ///
    /// Indices may repeat and may be in any order.
    pub fn take(&self, indices: &[usize]) -> Result<Array> {
        let check = |idx: &usize| -> Result<usize> {
            if *idx >= self.len() {
                return Err(QuiverError::LogicalError(format!(
                    "Take index {idx} out of bounds for array of length {}",
                    self.len()
                )));
            }
            Ok(*idx)
        };

        Ok(match self {
            Self::Boolean(arr) => {
                let mut values = Vec::with_capacity(indices.len());
                for idx in indices {
                    values.push(arr.values[check(idx)?]);
                }
                Array::Boolean(BooleanArray { values })
            }
            Self::Int32(arr) => Array::Int32(take_primitive(arr, indices, check)?),
            Self::Int64(arr) => Array::Int64(take_primitive(arr, indices, check)?),
            Self::Float64(arr) => Array::Float64(take_primitive(arr, indices, check)?),
            Self::Utf8(arr) => {
                let mut values = Vec::with_capacity(indices.len());
                for idx in indices {
                    values.push(arr.values[check(idx)?].clone());
                }
                Array::Utf8(Utf8Array { values })
            }
            Self::List(arr) => {
                let mut rows = Vec::with_capacity(indices.len());
                for idx in indices {
                    rows.push(ScalarValue::List {
                        element: arr.element_type(),
                        values: arr.value(check(idx)?).expect("index checked"),
                    });
                }
                Array::try_from_scalars(&self.datatype(), &rows)?
            }
        })
    }

    /// Build an array of the given type from scalar values.
    ///
    /// Errors if any scalar does not match the datatype.
    pub fn try_from_scalars(datatype: &DataType, values: &[ScalarValue]) -> Result<Array> {
        let mismatch = |got: &ScalarValue| {
            QuiverError::TypeMismatch(format!(
                "Cannot place {} value into {datatype} array",
                got.datatype()
            ))
        };

        Ok(match datatype {
            DataType::Boolean => Array::Boolean(BooleanArray {
                values: values
                    .iter()
                    .map(|v| match v {
                        ScalarValue::Boolean(b) => Ok(*b),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
            DataType::Int32 => Array::Int32(Int32Array {
                values: values
                    .iter()
                    .map(|v| match v {
                        ScalarValue::Int32(i) => Ok(*i),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
            DataType::Int64 => Array::Int64(Int64Array {
                values: values
                    .iter()
                    .map(|v| match v {
                        ScalarValue::Int64(i) => Ok(*i),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
            DataType::Float64 => Array::Float64(Float64Array {
                values: values
                    .iter()
                    .map(|v| match v {
                        ScalarValue::Float64(f) => Ok(*f),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
            DataType::Utf8 => Array::Utf8(Utf8Array {
                values: values
                    .iter()
                    .map(|v| match v {
                        ScalarValue::Utf8(s) => Ok(s.clone()),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
            DataType::List(meta) => {
                let mut elements = Vec::new();
                let mut offsets = Vec::with_capacity(values.len() + 1);
                offsets.push(0);
                for value in values {
                    match value {
                        ScalarValue::List { values: row, .. } => {
                            elements.extend(row.iter().cloned());
                            offsets.push(elements.len() as i32);
                        }
                        other => return Err(mismatch(other)),
                    }
                }
                let child = Array::try_from_scalars(&meta.datatype, &elements)?;
                Array::List(ListArray::new(child, offsets))
            }
        })
    }
}

fn take_primitive<T: Copy>(
    arr: &PrimitiveArray<T>,
    indices: &[usize],
    check: impl Fn(&usize) -> Result<usize>,
) -> Result<PrimitiveArray<T>> {
    let mut values = Vec::with_capacity(indices.len());
    for idx in indices {
        values.push(arr.values[check(idx)?]);
    }
    Ok(PrimitiveArray { values })
}

/// Array for storing primitive values.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveArray<T> {
    values: Vec<T>,
}

pub type Int32Array = PrimitiveArray<i32>;
pub type Int64Array = PrimitiveArray<i64>;
pub type Float64Array = PrimitiveArray<f64>;

impl<T> PrimitiveArray<T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> Option<&T> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

impl<T> FromIterator<T> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        PrimitiveArray {
            values: iter.into_iter().collect(),
        }
    }
}

/// A logical array for representing bools.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanArray {
    values: Vec<bool>,
}

impl BooleanArray {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> Option<bool> {
        self.values.get(idx).copied()
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }
}

impl FromIterator<bool> for BooleanArray {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        BooleanArray {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utf8Array {
    values: Vec<String>,
}

impl Utf8Array {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).map(|s| s.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Utf8Array {
            values: iter.into_iter().map(|s| s.into()).collect(),
        }
    }
}

/// A list array.
///
/// Offsets index into the child array. Length is one more than the number of
/// rows; row i spans `offsets[i]..offsets[i + 1]` in the child.
#[derive(Debug, Clone)]
pub struct ListArray {
    child: Arc<Array>,
    offsets: Vec<i32>,
}

impl ListArray {
    pub fn new(child: impl Into<Arc<Array>>, offsets: Vec<i32>) -> Self {
        let child = child.into();
        debug_assert!(!offsets.is_empty());
        debug_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        debug_assert_eq!(*offsets.last().unwrap() as usize, child.len());

        ListArray { child, offsets }
    }

    /// Build a list array from per-row element vectors, for tests and
    /// literals.
    pub fn try_from_rows(element: DataType, rows: &[Vec<ScalarValue>]) -> Result<Self> {
        let mut flat = Vec::new();
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        for row in rows {
            flat.extend(row.iter().cloned());
            offsets.push(flat.len() as i32);
        }
        let child = Array::try_from_scalars(&element, &flat)?;
        Ok(ListArray::new(child, offsets))
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> DataType {
        self.child.datatype()
    }

    pub fn child(&self) -> &Arc<Array> {
        &self.child
    }

    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    /// Per-row element counts.
    pub fn lengths(&self) -> Vec<usize> {
        self.offsets
            .windows(2)
            .map(|w| (w[1] - w[0]) as usize)
            .collect()
    }

    /// Elements of row `idx` as scalars.
    pub fn value(&self, idx: usize) -> Option<Vec<ScalarValue>> {
        if idx >= self.len() {
            return None;
        }
        let start = self.offsets[idx] as usize;
        let end = self.offsets[idx + 1] as usize;
        Some(
            (start..end)
                .map(|i| self.child.scalar(i).expect("offset in bounds"))
                .collect(),
        )
    }
}

impl PartialEq for ListArray {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        (0..self.len()).all(|idx| self.value(idx) == other.value(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_repeats_rows() {
        let arr = Array::Int32(Int32Array::from_iter([10, 20, 30]));
        let out = arr.take(&[0, 0, 2, 1]).unwrap();
        assert_eq!(out, Array::Int32(Int32Array::from_iter([10, 10, 30, 20])));
    }

    #[test]
    fn take_out_of_bounds() {
        let arr = Array::Int32(Int32Array::from_iter([10, 20]));
        assert!(arr.take(&[3]).is_err());
    }

    #[test]
    fn list_lengths_and_values() {
        let list = ListArray::try_from_rows(
            DataType::Int32,
            &[
                vec![ScalarValue::Int32(1), ScalarValue::Int32(2)],
                vec![],
                vec![ScalarValue::Int32(3)],
            ],
        )
        .unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list.lengths(), vec![2, 0, 1]);
        assert_eq!(
            list.value(0).unwrap(),
            vec![ScalarValue::Int32(1), ScalarValue::Int32(2)]
        );
        assert_eq!(list.value(1).unwrap(), Vec::<ScalarValue>::new());
    }

    #[test]
    fn scalars_round_trip() {
        let arr = Array::Utf8(Utf8Array::from_iter(["a", "b"]));
        assert_eq!(arr.scalar(1), Some(ScalarValue::Utf8("b".to_string())));

        let rebuilt = Array::try_from_scalars(
            &DataType::Utf8,
            &[
                ScalarValue::Utf8("a".to_string()),
                ScalarValue::Utf8("b".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(arr, rebuilt);
    }

    #[test]
    fn from_scalars_type_mismatch() {
        let res = Array::try_from_scalars(&DataType::Int32, &[ScalarValue::Boolean(true)]);
        assert!(res.is_err());
    }
}
