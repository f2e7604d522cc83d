pub mod scalar;

use quiver_column::datatype::DataType;
use quiver_error::{QuiverError, Result};

/// Function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Expected input types for this signature.
    pub input: &'static [DataType],

    /// The expected return type.
    pub return_type: DataType,
}

impl Signature {
    /// Return if inputs given data types exactly satisfy the signature.
    fn exact_match(&self, inputs: &[DataType]) -> bool {
        if self.input.len() != inputs.len() {
            return false;
        }

        self.input.iter().zip(inputs.iter()).all(|(a, b)| a == b)
    }
}

/// Trait for defining information about functions.
pub trait FunctionInfo {
    /// Name of the function.
    fn name(&self) -> &'static str;

    /// Aliases for the function.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Signatures for the function.
    ///
    /// Overload resolution is an exact match over these; implicit casting
    /// happens in the translator above this layer. Functions that accept any
    /// argument types return an empty slice and resolve in `plan`.
    fn signatures(&self) -> &[Signature];

    /// Get the return type for this function if the inputs have an exact
    /// signature match.
    fn return_type_for_inputs(&self, inputs: &[DataType]) -> Option<DataType> {
        let sig = self
            .signatures()
            .iter()
            .find(|sig| sig.exact_match(inputs))?;

        Some(sig.return_type.clone())
    }
}

/// Check the number of arguments provided, erroring if it doesn't match the
/// expected number of arguments.
pub fn plan_check_num_args(
    func: &impl FunctionInfo,
    inputs: &[DataType],
    expected: usize,
) -> Result<()> {
    if inputs.len() != expected {
        return Err(QuiverError::TypeMismatch(format!(
            "Expected {} inputs for '{}', received {}",
            expected,
            func.name(),
            inputs.len(),
        )));
    }
    Ok(())
}

/// Return an error indicating the input types we got are not ones we can
/// handle.
pub fn invalid_input_types_error(func: &impl FunctionInfo, got: &[&DataType]) -> QuiverError {
    let got_types = got
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",");
    QuiverError::TypeMismatch(format!(
        "Got invalid type(s) '{}' for '{}'",
        got_types,
        func.name()
    ))
}
