pub mod arith;
pub mod comparison;
pub mod misc;

use std::fmt::Debug;

use dyn_clone::DynClone;
use once_cell::sync::Lazy;
use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_error::Result;

use super::FunctionInfo;

/// List of all built-in scalar functions.
pub static BUILTIN_SCALAR_FUNCTIONS: Lazy<Vec<Box<dyn ScalarFunction>>> = Lazy::new(|| {
    vec![
        // Arith
        Box::new(arith::Add),
        Box::new(arith::Sub),
        Box::new(arith::Mul),
        Box::new(arith::Div),
        // Comparison
        Box::new(comparison::Eq),
        Box::new(comparison::Lt),
        // Misc
        Box::new(misc::Ignore),
        Box::new(misc::Random),
    ]
});

/// Find a built-in scalar function by name or alias.
pub fn lookup_builtin(name: &str) -> Option<&'static dyn ScalarFunction> {
    BUILTIN_SCALAR_FUNCTIONS
        .iter()
        .find(|func| func.name() == name || func.aliases().contains(&name))
        .map(|func| func.as_ref())
}

/// A scalar function that resolves into a planned function for concrete
/// input types.
///
/// This is the overload-set resolver the graph builder consumes. Scalar
/// functions must be cheaply cloneable.
pub trait ScalarFunction: FunctionInfo + Debug + Sync + Send + DynClone {
    /// Plan the function for the given input types.
    fn plan(&self, inputs: &[DataType]) -> Result<Box<dyn PlannedScalarFunction>>;

    /// Whether the function returns the same output for the same input.
    ///
    /// Non-deterministic functions are never constant folded and never move
    /// across row-multiplying operators.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// Whether a constant result of this function may replace it in
    /// consumers.
    ///
    /// Functions like `ignore` always produce a constant we precompute to
    /// avoid materialization, but that constant must not fold further.
    fn allows_constant_folding(&self) -> bool {
        true
    }
}

impl Clone for Box<dyn ScalarFunction> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

impl PartialEq<dyn ScalarFunction> for Box<dyn ScalarFunction + '_> {
    fn eq(&self, other: &dyn ScalarFunction) -> bool {
        self.as_ref() == other
    }
}

impl PartialEq for dyn ScalarFunction + '_ {
    fn eq(&self, other: &dyn ScalarFunction) -> bool {
        self.name() == other.name() && self.signatures() == other.signatures()
    }
}

/// A scalar function planned for concrete input types.
///
/// Carries both the bound signature (return type, properties) and the
/// implementation invoked during execution.
pub trait PlannedScalarFunction: Debug + Sync + Send + DynClone {
    /// Name of the planned function.
    fn name(&self) -> &'static str;

    /// The type produced by this function.
    fn return_type(&self) -> DataType;

    fn is_deterministic(&self) -> bool {
        true
    }

    /// Whether the compiler may fuse this function into a compiled
    /// supernode.
    fn is_compilable(&self) -> bool {
        false
    }

    /// Execute on the given argument columns, producing `num_rows` rows.
    fn execute(&self, inputs: &[Column], num_rows: usize) -> Result<Column>;
}

impl Clone for Box<dyn PlannedScalarFunction> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

/// Evaluate a binary primitive operation over two materialized arrays.
macro_rules! primitive_binary_execute {
    ($first:expr, $second:expr, $variant:ident, $op:expr) => {{
        use quiver_column::array::{Array, PrimitiveArray};
        Array::$variant(PrimitiveArray::from_iter(
            $first
                .values()
                .iter()
                .zip($second.values().iter())
                .map(|(a, b)| $op(*a, *b)),
        ))
    }};
}

/// Evaluate a binary comparison over two materialized arrays, producing a
/// boolean array.
macro_rules! comparison_binary_execute {
    ($first:expr, $second:expr, $op:expr) => {{
        use quiver_column::array::{Array, BooleanArray};
        Array::Boolean(BooleanArray::from_iter(
            $first
                .values()
                .iter()
                .zip($second.values().iter())
                .map(|(a, b)| $op(a, b)),
        ))
    }};
}

pub(crate) use comparison_binary_execute;
pub(crate) use primitive_binary_execute;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity_eq_check() {
        let fn1 = Box::new(arith::Add) as Box<dyn ScalarFunction>;
        let fn2 = Box::new(arith::Sub) as Box<dyn ScalarFunction>;
        let fn3 = Box::new(arith::Sub) as Box<dyn ScalarFunction>;

        assert_ne!(fn1, fn2);
        assert_eq!(fn2, fn3);
    }

    #[test]
    fn builtin_lookup() {
        assert!(lookup_builtin("+").is_some());
        assert!(lookup_builtin("add").is_some());
        assert!(lookup_builtin("no_such_function").is_none());
    }
}
