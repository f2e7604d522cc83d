//! Expression evaluation core for a columnar engine.
//!
//! Expressions are built into an [`actions::dag::ActionsDag`], an intermediate
//! representation amenable to optimization (pruning, constant folding,
//! splitting around ARRAY JOIN, compiling fused subgraphs). A finalized DAG is
//! wrapped into an [`actions::expression::ExpressionActions`], the linearized
//! plan executed per block. [`actions::chain::ActionsChain`] stitches multiple
//! stages together with backward column-demand propagation.

pub mod actions;
pub mod compile;
pub mod functions;
