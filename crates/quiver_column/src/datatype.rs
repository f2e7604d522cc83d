use std::fmt;

use quiver_error::{QuiverError, Result};

/// Metadata associated with lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListTypeMeta {
    pub datatype: Box<DataType>,
}

impl ListTypeMeta {
    pub fn new(datatype: DataType) -> Self {
        ListTypeMeta {
            datatype: Box::new(datatype),
        }
    }
}

/// Supported data types.
///
/// A deliberately small type system; enough for the expression core and its
/// tests. Lists carry their element type as metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
    /// A list of values all of the same type.
    List(ListTypeMeta),
}

impl DataType {
    pub fn list_of(element: DataType) -> Self {
        DataType::List(ListTypeMeta::new(element))
    }

    pub const fn is_list(&self) -> bool {
        matches!(self, DataType::List(_))
    }

    /// Get the element type of a list, erroring for any other type.
    pub fn try_list_inner(&self) -> Result<&DataType> {
        match self {
            DataType::List(meta) => Ok(&meta.datatype),
            other => Err(QuiverError::TypeMismatch(format!(
                "Expected a list type, got {other}"
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float64 => write!(f, "Float64"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::List(meta) => write!(f, "List[{}]", meta.datatype),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_inner() {
        let typ = DataType::list_of(DataType::Int32);
        assert_eq!(typ.try_list_inner().unwrap(), &DataType::Int32);
        assert!(DataType::Int32.try_list_inner().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(
            DataType::list_of(DataType::Utf8).to_string(),
            "List[Utf8]"
        );
    }
}
