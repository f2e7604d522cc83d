use std::fmt;

use quiver_error::Result;

use crate::array::{Array, BooleanArray, Float64Array, Int32Array, Int64Array, ListArray, Utf8Array};
use crate::datatype::DataType;

/// A single owned scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    List {
        /// Element type; needed so empty lists stay typed.
        element: DataType,
        values: Vec<ScalarValue>,
    },
}

impl ScalarValue {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::List { element, .. } => DataType::list_of(element.clone()),
        }
    }

    /// Produce an array holding this value `num_rows` times.
    pub fn repeat(&self, num_rows: usize) -> Result<Array> {
        Ok(match self {
            Self::Boolean(v) => {
                Array::Boolean(BooleanArray::from_iter(std::iter::repeat(*v).take(num_rows)))
            }
            Self::Int32(v) => {
                Array::Int32(Int32Array::from_iter(std::iter::repeat(*v).take(num_rows)))
            }
            Self::Int64(v) => {
                Array::Int64(Int64Array::from_iter(std::iter::repeat(*v).take(num_rows)))
            }
            Self::Float64(v) => {
                Array::Float64(Float64Array::from_iter(std::iter::repeat(*v).take(num_rows)))
            }
            Self::Utf8(v) => Array::Utf8(Utf8Array::from_iter(
                std::iter::repeat(v.as_str()).take(num_rows),
            )),
            Self::List { element, values } => {
                let rows: Vec<Vec<ScalarValue>> =
                    std::iter::repeat(values.clone()).take(num_rows).collect();
                Array::List(ListArray::try_from_rows(element.clone(), &rows)?)
            }
        })
    }

    /// Placeholder value for a type, used by dry-run execution to shape
    /// columns without computing anything.
    pub fn default_for(datatype: &DataType) -> ScalarValue {
        match datatype {
            DataType::Boolean => ScalarValue::Boolean(false),
            DataType::Int32 => ScalarValue::Int32(0),
            DataType::Int64 => ScalarValue::Int64(0),
            DataType::Float64 => ScalarValue::Float64(0.0),
            DataType::Utf8 => ScalarValue::Utf8(String::new()),
            DataType::List(meta) => ScalarValue::List {
                element: (*meta.datatype).clone(),
                values: Vec::new(),
            },
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::List { values, .. } => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}
