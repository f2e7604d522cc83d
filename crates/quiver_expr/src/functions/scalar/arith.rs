use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_error::Result;

use crate::functions::{invalid_input_types_error, plan_check_num_args, FunctionInfo, Signature};

use super::{primitive_binary_execute, PlannedScalarFunction, ScalarFunction};

/// Signatures for primitive arith operations (+, -, *, /).
const PRIMITIVE_ARITH_SIGNATURES: &[Signature] = &[
    Signature {
        input: &[DataType::Int32, DataType::Int32],
        return_type: DataType::Int32,
    },
    Signature {
        input: &[DataType::Int64, DataType::Int64],
        return_type: DataType::Int64,
    },
    Signature {
        input: &[DataType::Float64, DataType::Float64],
        return_type: DataType::Float64,
    },
];

fn plan_arith(func: &impl FunctionInfo, inputs: &[DataType]) -> Result<DataType> {
    plan_check_num_args(func, inputs, 2)?;
    match (&inputs[0], &inputs[1]) {
        (DataType::Int32, DataType::Int32) => Ok(DataType::Int32),
        (DataType::Int64, DataType::Int64) => Ok(DataType::Int64),
        (DataType::Float64, DataType::Float64) => Ok(DataType::Float64),
        (a, b) => Err(invalid_input_types_error(func, &[a, b])),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Add;

impl FunctionInfo for Add {
    fn name(&self) -> &'static str {
        "+"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["add"]
    }

    fn signatures(&self) -> &[Signature] {
        PRIMITIVE_ARITH_SIGNATURES
    }
}

impl ScalarFunction for Add {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        Ok(Box::new(AddPlanned {
            datatype: plan_arith(self, inputs)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPlanned {
    pub datatype: DataType,
}

impl PlannedScalarFunction for AddPlanned {
    fn name(&self) -> &'static str {
        "+"
    }

    fn return_type(&self) -> DataType {
        self.datatype.clone()
    }

    fn is_compilable(&self) -> bool {
        true
    }

    fn execute(&self, inputs: &[Column], _num_rows: usize) -> Result<Column> {
        use quiver_column::array::Array;

        let first = inputs[0].materialize()?;
        let second = inputs[1].materialize()?;
        Ok(Column::full(match (first.as_ref(), second.as_ref()) {
            (Array::Int32(a), Array::Int32(b)) => {
                primitive_binary_execute!(a, b, Int32, |x: i32, y: i32| x.wrapping_add(y))
            }
            (Array::Int64(a), Array::Int64(b)) => {
                primitive_binary_execute!(a, b, Int64, |x: i64, y: i64| x.wrapping_add(y))
            }
            (Array::Float64(a), Array::Float64(b)) => {
                primitive_binary_execute!(a, b, Float64, |x: f64, y: f64| x + y)
            }
            other => panic!("unexpected array types: {other:?}"),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sub;

impl FunctionInfo for Sub {
    fn name(&self) -> &'static str {
        "-"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["sub"]
    }

    fn signatures(&self) -> &[Signature] {
        PRIMITIVE_ARITH_SIGNATURES
    }
}

impl ScalarFunction for Sub {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        Ok(Box::new(SubPlanned {
            datatype: plan_arith(self, inputs)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPlanned {
    pub datatype: DataType,
}

impl PlannedScalarFunction for SubPlanned {
    fn name(&self) -> &'static str {
        "-"
    }

    fn return_type(&self) -> DataType {
        self.datatype.clone()
    }

    fn is_compilable(&self) -> bool {
        true
    }

    fn execute(&self, inputs: &[Column], _num_rows: usize) -> Result<Column> {
        use quiver_column::array::Array;

        let first = inputs[0].materialize()?;
        let second = inputs[1].materialize()?;
        Ok(Column::full(match (first.as_ref(), second.as_ref()) {
            (Array::Int32(a), Array::Int32(b)) => {
                primitive_binary_execute!(a, b, Int32, |x: i32, y: i32| x.wrapping_sub(y))
            }
            (Array::Int64(a), Array::Int64(b)) => {
                primitive_binary_execute!(a, b, Int64, |x: i64, y: i64| x.wrapping_sub(y))
            }
            (Array::Float64(a), Array::Float64(b)) => {
                primitive_binary_execute!(a, b, Float64, |x: f64, y: f64| x - y)
            }
            other => panic!("unexpected array types: {other:?}"),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mul;

impl FunctionInfo for Mul {
    fn name(&self) -> &'static str {
        "*"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mul"]
    }

    fn signatures(&self) -> &[Signature] {
        PRIMITIVE_ARITH_SIGNATURES
    }
}

impl ScalarFunction for Mul {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        Ok(Box::new(MulPlanned {
            datatype: plan_arith(self, inputs)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulPlanned {
    pub datatype: DataType,
}

impl PlannedScalarFunction for MulPlanned {
    fn name(&self) -> &'static str {
        "*"
    }

    fn return_type(&self) -> DataType {
        self.datatype.clone()
    }

    fn is_compilable(&self) -> bool {
        true
    }

    fn execute(&self, inputs: &[Column], _num_rows: usize) -> Result<Column> {
        use quiver_column::array::Array;

        let first = inputs[0].materialize()?;
        let second = inputs[1].materialize()?;
        Ok(Column::full(match (first.as_ref(), second.as_ref()) {
            (Array::Int32(a), Array::Int32(b)) => {
                primitive_binary_execute!(a, b, Int32, |x: i32, y: i32| x.wrapping_mul(y))
            }
            (Array::Int64(a), Array::Int64(b)) => {
                primitive_binary_execute!(a, b, Int64, |x: i64, y: i64| x.wrapping_mul(y))
            }
            (Array::Float64(a), Array::Float64(b)) => {
                primitive_binary_execute!(a, b, Float64, |x: f64, y: f64| x * y)
            }
            other => panic!("unexpected array types: {other:?}"),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Div;

impl FunctionInfo for Div {
    fn name(&self) -> &'static str {
        "/"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["div"]
    }

    fn signatures(&self) -> &[Signature] {
        PRIMITIVE_ARITH_SIGNATURES
    }
}

impl ScalarFunction for Div {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        Ok(Box::new(DivPlanned {
            datatype: plan_arith(self, inputs)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivPlanned {
    pub datatype: DataType,
}

impl PlannedScalarFunction for DivPlanned {
    fn name(&self) -> &'static str {
        "/"
    }

    fn return_type(&self) -> DataType {
        self.datatype.clone()
    }

    fn is_compilable(&self) -> bool {
        true
    }

    fn execute(&self, inputs: &[Column], _num_rows: usize) -> Result<Column> {
        use quiver_column::array::Array;

        let first = inputs[0].materialize()?;
        let second = inputs[1].materialize()?;
        Ok(Column::full(match (first.as_ref(), second.as_ref()) {
            (Array::Int32(a), Array::Int32(b)) => {
                primitive_binary_execute!(a, b, Int32, |x: i32, y: i32| x.wrapping_div(y))
            }
            (Array::Int64(a), Array::Int64(b)) => {
                primitive_binary_execute!(a, b, Int64, |x: i64, y: i64| x.wrapping_div(y))
            }
            (Array::Float64(a), Array::Float64(b)) => {
                primitive_binary_execute!(a, b, Float64, |x: f64, y: f64| x / y)
            }
            other => panic!("unexpected array types: {other:?}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use quiver_column::array::{Array, Int32Array};

    use super::*;

    #[test]
    fn add_i32() {
        let a = Column::full(Array::Int32(Int32Array::from_iter([1, 2, 3])));
        let b = Column::full(Array::Int32(Int32Array::from_iter([4, 5, 6])));

        let planned = Add.plan(&[DataType::Int32, DataType::Int32]).unwrap();
        assert_eq!(planned.return_type(), DataType::Int32);

        let out = planned.execute(&[a, b], 3).unwrap();
        assert_eq!(
            out.materialize().unwrap().as_ref(),
            &Array::Int32(Int32Array::from_iter([5, 7, 9]))
        );
    }

    #[test]
    fn mul_const_input() {
        let a = Column::constant(quiver_column::scalar::ScalarValue::Int32(2), 3);
        let b = Column::full(Array::Int32(Int32Array::from_iter([4, 5, 6])));

        let planned = Mul.plan(&[DataType::Int32, DataType::Int32]).unwrap();
        let out = planned.execute(&[a, b], 3).unwrap();
        assert_eq!(
            out.materialize().unwrap().as_ref(),
            &Array::Int32(Int32Array::from_iter([8, 10, 12]))
        );
    }

    #[test]
    fn plan_type_mismatch() {
        assert!(Add.plan(&[DataType::Int32, DataType::Utf8]).is_err());
        assert!(Add.plan(&[DataType::Int32]).is_err());
    }
}
