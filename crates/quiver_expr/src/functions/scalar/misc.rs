use std::time::{SystemTime, UNIX_EPOCH};

use quiver_column::array::{Array, Float64Array};
use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_column::scalar::ScalarValue;
use quiver_error::Result;

use crate::functions::{plan_check_num_args, FunctionInfo, Signature};

use super::{PlannedScalarFunction, ScalarFunction};

/// `ignore` accepts any arguments and returns constant zero.
///
/// The result is always constant and is precomputed to avoid materialization,
/// but it must never replace the node in consumers: the arguments still count
/// as used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ignore;

impl FunctionInfo for Ignore {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn signatures(&self) -> &[Signature] {
        // Accepts any argument types; resolution happens in `plan`.
        &[]
    }
}

impl ScalarFunction for Ignore {
    fn plan(&self, _inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        Ok(Box::new(IgnorePlanned))
    }

    fn allows_constant_folding(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IgnorePlanned;

impl PlannedScalarFunction for IgnorePlanned {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn return_type(&self) -> DataType {
        DataType::Int32
    }

    fn execute(&self, _inputs: &[Column], num_rows: usize) -> Result<Column> {
        Ok(Column::constant(ScalarValue::Int32(0), num_rows))
    }
}

/// Pseudo-random Float64 in `[0, 1)` per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random;

impl FunctionInfo for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["rand"]
    }

    fn signatures(&self) -> &[Signature] {
        const SIGS: &[Signature] = &[Signature {
            input: &[],
            return_type: DataType::Float64,
        }];
        SIGS
    }
}

impl ScalarFunction for Random {
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>> {
        plan_check_num_args(self, inputs, 0)?;
        Ok(Box::new(RandomPlanned))
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomPlanned;

impl PlannedScalarFunction for RandomPlanned {
    fn name(&self) -> &'static str {
        "random"
    }

    fn return_type(&self) -> DataType {
        DataType::Float64
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn execute(&self, _inputs: &[Column], num_rows: usize) -> Result<Column> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut state = seed | 1;
        let values = (0..num_rows).map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        });

        Ok(Column::full(Array::Float64(Float64Array::from_iter(
            values,
        ))))
    }
}
