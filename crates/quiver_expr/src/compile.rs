//! Compilation boundary for fused expression subgraphs.
//!
//! The DAG identifies maximal compilable subgraphs and hands them over as
//! [`CompilableFragment`]s; an [`ExpressionCompiler`] turns a fragment into a
//! single planned function. Compiled functions are shared process-wide
//! through the [`CompiledExpressionCache`] and outlive the DAG that produced
//! them.

use std::fmt::Debug;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_error::{QuiverError, Result};
use tracing::debug;

use crate::functions::scalar::PlannedScalarFunction;

/// Where a fragment node's argument comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentArg {
    /// One of the fragment's frontier inputs.
    Input(usize),
    /// The result of an earlier fragment node.
    Node(usize),
}

#[derive(Debug, Clone)]
pub struct FragmentNode {
    pub function: Box<dyn PlannedScalarFunction>,
    pub args: Vec<FragmentArg>,
}

/// A connected subgraph of function nodes extracted for compilation.
///
/// Nodes are in evaluation order; the last node is the fragment's root.
#[derive(Debug, Clone)]
pub struct CompilableFragment {
    pub nodes: Vec<FragmentNode>,
    pub input_types: Vec<DataType>,
    pub result_type: DataType,
    /// Stable key describing the fragment's structure and types. Two
    /// fragments with equal signatures compute the same function.
    pub signature: String,
}

/// Produces an executable function for a fused subgraph.
///
/// Implementations may emit native code; the [`FragmentInterpreter`] below
/// evaluates the fragment directly so compilation never changes results.
pub trait ExpressionCompiler: Debug + Sync + Send {
    fn compile(&self, fragment: &CompilableFragment) -> Result<Box<dyn PlannedScalarFunction>>;
}

/// Process-wide store of compiled fused functions, keyed by fragment
/// signature.
///
/// Lookup is frequent, insertion rare. Entries are reference counted;
/// handing one out keeps it alive independently of any DAG.
#[derive(Debug, Default)]
pub struct CompiledExpressionCache {
    entries: RwLock<HashMap<String, Arc<dyn PlannedScalarFunction>>>,
}

impl CompiledExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the compiled function for a fragment, compiling and inserting on
    /// miss.
    pub fn get_or_compile(
        &self,
        compiler: &dyn ExpressionCompiler,
        fragment: &CompilableFragment,
    ) -> Result<Box<dyn PlannedScalarFunction>> {
        if let Some(hit) = self.entries.read().get(&fragment.signature) {
            return Ok(Box::new(SharedCompiledFunction::new(hit.clone())));
        }

        debug!(signature = %fragment.signature, "compiling expression fragment");
        let compiled: Arc<dyn PlannedScalarFunction> = Arc::from(compiler.compile(fragment)?);

        let mut entries = self.entries.write();
        // Another thread may have compiled the same fragment; keep the first.
        let entry = entries
            .entry(fragment.signature.clone())
            .or_insert(compiled)
            .clone();

        Ok(Box::new(SharedCompiledFunction::new(entry)))
    }
}

/// A cache entry wrapped back into a planned function.
#[derive(Debug, Clone)]
pub struct SharedCompiledFunction {
    inner: Arc<dyn PlannedScalarFunction>,
}

impl SharedCompiledFunction {
    pub fn new(inner: Arc<dyn PlannedScalarFunction>) -> Self {
        SharedCompiledFunction { inner }
    }
}

impl PlannedScalarFunction for SharedCompiledFunction {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn return_type(&self) -> DataType {
        self.inner.return_type()
    }

    fn is_deterministic(&self) -> bool {
        self.inner.is_deterministic()
    }

    fn execute(&self, inputs: &[Column], num_rows: usize) -> Result<Column> {
        self.inner.execute(inputs, num_rows)
    }
}

/// The default "compiler": evaluates the fragment node by node.
///
/// Exists so enabling compilation is purely an optimization decision; a
/// native-code implementation plugs in through the same trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentInterpreter;

impl ExpressionCompiler for FragmentInterpreter {
    fn compile(&self, fragment: &CompilableFragment) -> Result<Box<dyn PlannedScalarFunction>> {
        Ok(Box::new(InterpretedFragment {
            fragment: fragment.clone(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct InterpretedFragment {
    fragment: CompilableFragment,
}

impl PlannedScalarFunction for InterpretedFragment {
    fn name(&self) -> &'static str {
        "fused"
    }

    fn return_type(&self) -> DataType {
        self.fragment.result_type.clone()
    }

    fn execute(&self, inputs: &[Column], num_rows: usize) -> Result<Column> {
        let mut values: Vec<Column> = Vec::with_capacity(self.fragment.nodes.len());

        for node in &self.fragment.nodes {
            let args = node
                .args
                .iter()
                .map(|arg| match arg {
                    FragmentArg::Input(idx) => inputs.get(*idx).cloned().ok_or_else(|| {
                        QuiverError::LogicalError(format!("Fragment input {idx} out of range"))
                    }),
                    FragmentArg::Node(idx) => values.get(*idx).cloned().ok_or_else(|| {
                        QuiverError::LogicalError(format!("Fragment node {idx} not yet computed"))
                    }),
                })
                .collect::<Result<Vec<_>>>()?;

            values.push(node.function.execute(&args, num_rows)?);
        }

        values
            .pop()
            .ok_or_else(|| QuiverError::LogicalError("Empty compilable fragment".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use quiver_column::array::{Array, Int32Array};

    use crate::functions::scalar::arith::{Add, Mul};
    use crate::functions::scalar::ScalarFunction;

    use super::*;

    fn test_fragment() -> CompilableFragment {
        // (a + b) * a
        let add = Add.plan(&[DataType::Int32, DataType::Int32]).unwrap();
        let mul = Mul.plan(&[DataType::Int32, DataType::Int32]).unwrap();

        CompilableFragment {
            nodes: vec![
                FragmentNode {
                    function: add,
                    args: vec![FragmentArg::Input(0), FragmentArg::Input(1)],
                },
                FragmentNode {
                    function: mul,
                    args: vec![FragmentArg::Node(0), FragmentArg::Input(0)],
                },
            ],
            input_types: vec![DataType::Int32, DataType::Int32],
            result_type: DataType::Int32,
            signature: "*(+(#0 Int32, #1 Int32), #0 Int32)".to_string(),
        }
    }

    #[test]
    fn interpreter_evaluates_fragment() {
        let compiled = FragmentInterpreter.compile(&test_fragment()).unwrap();

        let a = Column::full(Array::Int32(Int32Array::from_iter([1, 2])));
        let b = Column::full(Array::Int32(Int32Array::from_iter([10, 20])));
        let out = compiled.execute(&[a, b], 2).unwrap();

        assert_eq!(
            out.materialize().unwrap().as_ref(),
            &Array::Int32(Int32Array::from_iter([11, 44]))
        );
    }

    #[test]
    fn cache_dedups_by_signature() {
        let cache = CompiledExpressionCache::new();
        let fragment = test_fragment();

        let first = cache
            .get_or_compile(&FragmentInterpreter, &fragment)
            .unwrap();
        let second = cache
            .get_or_compile(&FragmentInterpreter, &fragment)
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(first.return_type(), second.return_type());
    }
}
