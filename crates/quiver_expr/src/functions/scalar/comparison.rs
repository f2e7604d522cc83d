use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_error::Result;

use crate::functions::{invalid_input_types_error, plan_check_num_args, FunctionInfo, Signature};

use super::{comparison_binary_execute, PlannedScalarFunction, ScalarFunction};

const COMPARISON_SIGNATURES: &[Signature] = &[
    Signature {
        input: &[DataType::Int32, DataType::Int32],
        return_type: DataType::Boolean,
    },
    Signature {
        input: &[DataType::Int64, DataType::Int64],
        return_type: DataType::Boolean,
    },
    Signature {
        input: &[DataType::Float64, DataType::Float64],
        return_type: DataType::Boolean,
    },
    Signature {
        input: &[DataType::Utf8, DataType::Utf8],
        return_type: DataType::Boolean,
    },
];

fn plan_comparison(func: &impl FunctionInfo, inputs: &[DataType]) -> Result<()> {
    plan_check_num_args(func, inputs, 2)?;
    match (&inputs[0], &inputs[1]) {
        (DataType::Int32, DataType::Int32)
        | (DataType::Int64, DataType::Int64)
        | (DataType::Float64, DataType::Float64)
        | (DataType::Utf8, DataType::Utf8) => Ok(()),
        (a, b) => Err(invalid_input_types_error(func, &[a, b])),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eq;

impl FunctionInfo for Eq {
    fn name(&self) -> &'static str {
        "="
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["eq"]
    }

    fn signatures(&self) -> &[Signature] {
        COMPARISON_SIGNATURES
    }
}

impl ScalarFunction for Eq {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        plan_comparison(self, inputs)?;
        Ok(Box::new(EqPlanned))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqPlanned;

impl PlannedScalarFunction for EqPlanned {
    fn name(&self) -> &'static str {
        "="
    }

    fn return_type(&self) -> DataType {
        DataType::Boolean
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
                comparison_binary_execute!(a, b, |x: &i32, y: &i32| x == y)
            }
            (Array::Int64(a), Array::Int64(b)) => {
                comparison_binary_execute!(a, b, |x: &i64, y: &i64| x == y)
            }
            (Array::Float64(a), Array::Float64(b)) => {
                comparison_binary_execute!(a, b, |x: &f64, y: &f64| x == y)
            }
            (Array::Utf8(a), Array::Utf8(b)) => {
                use quiver_column::array::BooleanArray;
                Array::Boolean(BooleanArray::from_iter(
                    (0..a.len()).map(|idx| a.value(idx) == b.value(idx)),
                ))
            }
            other => panic!("unexpected array types: {other:?}"),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lt;

impl FunctionInfo for Lt {
    fn name(&self) -> &'static str {
        "<"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["lt"]
    }

    fn signatures(&self) -> &[Signature] {
        COMPARISON_SIGNATURES
    }
}

impl ScalarFunction for Lt {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        plan_comparison(self, inputs)?;
        Ok(Box::new(LtPlanned))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtPlanned;

impl PlannedScalarFunction for LtPlanned {
    fn name(&self) -> &'static str {
        "<"
    }

    fn return_type(&self) -> DataType {
        DataType::Boolean
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
                comparison_binary_execute!(a, b, |x: &i32, y: &i32| x < y)
            }
            (Array::Int64(a), Array::Int64(b)) => {
                comparison_binary_execute!(a, b, |x: &i64, y: &i64| x < y)
            }
            (Array::Float64(a), Array::Float64(b)) => {
                comparison_binary_execute!(a, b, |x: &f64, y: &f64| x < y)
            }
            (Array::Utf8(a), Array::Utf8(b)) => {
                use quiver_column::array::BooleanArray;
                Array::Boolean(BooleanArray::from_iter(
                    (0..a.len()).map(|idx| a.value(idx) < b.value(idx)),
                ))
            }
            other => panic!("unexpected array types: {other:?}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use quiver_column::array::{Array, BooleanArray, Int32Array};

    use super::*;

    #[test]
    fn eq_i32() {
        let a = Column::full(Array::Int32(Int32Array::from_iter([1, 2, 3])));
        let b = Column::full(Array::Int32(Int32Array::from_iter([1, 5, 3])));

        let planned = Eq.plan(&[DataType::Int32, DataType::Int32]).unwrap();
        let out = planned.execute(&[a, b], 3).unwrap();
        assert_eq!(
            out.materialize().unwrap().as_ref(),
            &Array::Boolean(BooleanArray::from_iter([true, false, true]))
        );
    }

    #[test]
    fn lt_i32() {
        let a = Column::full(Array::Int32(Int32Array::from_iter([1, 5])));
        let b = Column::full(Array::Int32(Int32Array::from_iter([2, 4])));

        let planned = Lt.plan(&[DataType::Int32, DataType::Int32]).unwrap();
        let out = planned.execute(&[a, b], 2).unwrap();
        assert_eq!(
            out.materialize().unwrap().as_ref(),
            &Array::Boolean(BooleanArray::from_iter([true, false]))
        );
    }
}
