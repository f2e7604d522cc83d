use std::collections::HashSet;

use quiver_error::{QuiverError, Result};
use tracing::trace;

use super::array_join::ArrayJoinAction;
use super::dag::ActionsDag;
use super::join::{JoinHook, TableJoin};
use super::ColumnWithType;

/// One stage of an [`ActionsChain`].
#[derive(Debug)]
pub struct Step {
    pub kind: StepKind,
    /// Columns required in the result of this step.
    pub required_output: Vec<String>,
    /// Parallel to `required_output`: true when the column is needed only
    /// right after this step (a filter column, say) and may be dropped from
    /// the block once consumed. Filled in [`ActionsChain::finalize`]: a
    /// caller-set flag is cleared when the next step still demands the
    /// column.
    pub can_remove_required_output: Vec<bool>,
    /// Columns provided to this step from outside the chain, in addition to
    /// the previous step's output.
    pub additional_input: HashSet<String>,
}

#[derive(Debug)]
pub enum StepKind {
    Expression {
        dag: ActionsDag,
    },
    ArrayJoin {
        action: ArrayJoinAction,
        required_columns: Vec<ColumnWithType>,
        result_columns: Vec<ColumnWithType>,
    },
    Join {
        join: TableJoin,
        hook: Box<dyn JoinHook>,
        required_columns: Vec<ColumnWithType>,
        result_columns: Vec<ColumnWithType>,
    },
}

impl Step {
    pub fn expression(dag: ActionsDag) -> Self {
        Step {
            kind: StepKind::Expression { dag },
            required_output: Vec::new(),
            can_remove_required_output: Vec::new(),
            additional_input: HashSet::new(),
        }
    }

    /// ARRAY JOIN stage over the given incoming columns. Unfolded columns
    /// keep their names with the element type.
    pub fn array_join(
        action: ArrayJoinAction,
        required_columns: Vec<ColumnWithType>,
    ) -> Result<Self> {
        let mut result_columns = Vec::with_capacity(required_columns.len());
        for col in &required_columns {
            if action.contains(&col.name) {
                result_columns.push(ColumnWithType::new(
                    col.name.clone(),
                    col.datatype.try_list_inner()?.clone(),
                ));
            } else {
                result_columns.push(col.clone());
            }
        }

        Ok(Step {
            kind: StepKind::ArrayJoin {
                action,
                required_columns,
                result_columns,
            },
            required_output: Vec::new(),
            can_remove_required_output: Vec::new(),
            additional_input: HashSet::new(),
        })
    }

    /// JOIN stage: passes the incoming columns through and appends the
    /// columns the join produces.
    pub fn join(
        join: TableJoin,
        hook: Box<dyn JoinHook>,
        required_columns: Vec<ColumnWithType>,
    ) -> Self {
        let mut result_columns = required_columns.clone();
        result_columns.extend(join.added_columns().iter().cloned());

        Step {
            kind: StepKind::Join {
                join,
                hook,
                required_columns,
                result_columns,
            },
            required_output: Vec::new(),
            can_remove_required_output: Vec::new(),
            additional_input: HashSet::new(),
        }
    }

    /// Declare a column this step must produce. `can_remove` marks columns
    /// consumed right after the step (filter columns) that the block may
    /// drop afterwards.
    pub fn add_required_output(&mut self, name: impl Into<String>, can_remove: bool) {
        self.required_output.push(name.into());
        self.can_remove_required_output.push(can_remove);
    }

    /// Columns this step needs from the previous step's result.
    pub fn required_columns(&self) -> Vec<ColumnWithType> {
        match &self.kind {
            StepKind::Expression { dag } => dag.required_columns(),
            StepKind::ArrayJoin {
                required_columns, ..
            }
            | StepKind::Join {
                required_columns, ..
            } => required_columns.clone(),
        }
    }

    /// Columns this step exposes to the next step.
    pub fn result_columns(&self) -> Vec<ColumnWithType> {
        match &self.kind {
            StepKind::Expression { dag } => dag.result_columns(),
            StepKind::ArrayJoin { result_columns, .. }
            | StepKind::Join { result_columns, .. } => result_columns.clone(),
        }
    }

    /// Remove unused results and narrow required columns to what is still
    /// demanded.
    pub fn finalize(&mut self, required_output: &[String]) -> Result<()> {
        let needed: HashSet<&str> = required_output.iter().map(String::as_str).collect();

        match &mut self.kind {
            StepKind::Expression { dag } => {
                if !dag.settings().projected_output {
                    dag.remove_unused_actions(required_output)?;
                }
            }
            StepKind::ArrayJoin {
                action,
                required_columns,
                result_columns,
            } => {
                result_columns.retain(|col| needed.contains(col.name.as_str()));
                required_columns.retain(|col| {
                    needed.contains(col.name.as_str()) || action.contains(&col.name)
                });
            }
            StepKind::Join {
                join,
                required_columns,
                result_columns,
                ..
            } => {
                result_columns.retain(|col| needed.contains(col.name.as_str()));
                required_columns.retain(|col| {
                    needed.contains(col.name.as_str())
                        || join.required_columns().contains(&col.name)
                });
            }
        }
        Ok(())
    }

    /// Drop unreferenced block columns when this step executes.
    pub fn prepend_project_input(&mut self) {
        if let StepKind::Expression { dag } = &mut self.kind {
            dag.project_input();
        }
    }

    pub fn dump(&self) -> String {
        match &self.kind {
            StepKind::Expression { dag } => dag.dump_dag(),
            StepKind::ArrayJoin { action, .. } => {
                format!("ARRAY JOIN {}\n", action.columns().join(", "))
            }
            StepKind::Join { .. } => "JOIN\n".to_string(),
        }
    }
}

/// The sequence of transformations over a block.
///
/// The result of each step feeds the input of the next; between steps the
/// surrounding engine may filter, array join, or join. Finalization walks
/// the chain back to front so every step exposes exactly the columns needed
/// downstream.
#[derive(Debug, Default)]
pub struct ActionsChain {
    pub steps: Vec<Step>,
}

impl ActionsChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Append a new expression step reading the previous step's result.
    ///
    /// Constants flow in as foldable COLUMN nodes unless listed in
    /// `non_constant_inputs`.
    pub fn add_step(&mut self, non_constant_inputs: &HashSet<String>) -> Result<()> {
        let prev = self.steps.last().ok_or(QuiverError::EmptyChain)?;
        let columns = prev.result_columns();
        let dag = ActionsDag::from_columns(&columns, non_constant_inputs)?;
        self.steps.push(Step::expression(dag));
        Ok(())
    }

    pub fn last_step(&self) -> Result<&Step> {
        self.steps.last().ok_or(QuiverError::EmptyChain)
    }

    pub fn last_step_mut(&mut self) -> Result<&mut Step> {
        self.steps.last_mut().ok_or(QuiverError::EmptyChain)
    }

    /// Last step, creating an initial expression step over the given
    /// columns when the chain is empty.
    pub fn last_step_or_init(&mut self, columns: &[ColumnWithType]) -> Result<&mut Step> {
        if self.steps.is_empty() {
            let dag = ActionsDag::from_columns(columns, &HashSet::new())?;
            self.steps.push(Step::expression(dag));
        }
        self.steps.last_mut().ok_or(QuiverError::EmptyChain)
    }

    pub fn last_actions(&self) -> Result<&ActionsDag> {
        match &self.last_step()?.kind {
            StepKind::Expression { dag } => Ok(dag),
            _ => Err(QuiverError::LogicalError(
                "Last chain step is not an expression".to_string(),
            )),
        }
    }

    pub fn last_actions_mut(&mut self) -> Result<&mut ActionsDag> {
        match &mut self.last_step_mut()?.kind {
            StepKind::Expression { dag } => Ok(dag),
            _ => Err(QuiverError::LogicalError(
                "Last chain step is not an expression".to_string(),
            )),
        }
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Finalize all steps, right to left, so unnecessary inputs disappear.
    ///
    /// A step's demand is its own `required_output` plus the columns the
    /// next step requires and does not receive from outside the chain. The
    /// `can_remove_required_output` bitmap is filled here: a remove-after-use
    /// flag survives only when the next step does not demand the column, so
    /// the operator between the steps may drop it and it never enters any
    /// upstream demand.
    pub fn finalize(&mut self) -> Result<()> {
        for i in (0..self.steps.len()).rev() {
            let mut required_output = self.steps[i].required_output.clone();
            let mut required_names: HashSet<String> = required_output.iter().cloned().collect();

            let declared: std::collections::HashMap<String, usize> = self.steps[i]
                .required_output
                .iter()
                .enumerate()
                .map(|(pos, name)| (name.clone(), pos))
                .collect();
            if self.steps[i].can_remove_required_output.len()
                != self.steps[i].required_output.len()
            {
                self.steps[i].can_remove_required_output =
                    vec![false; self.steps[i].required_output.len()];
            }

            if i + 1 < self.steps.len() {
                let next = &self.steps[i + 1];
                let next_demands: Vec<String> = next
                    .required_columns()
                    .into_iter()
                    .filter(|col| !next.additional_input.contains(&col.name))
                    .map(|col| col.name)
                    .collect();

                for name in next_demands {
                    match declared.get(&name) {
                        // The next step still needs this output; the
                        // operator between the steps must not remove it.
                        Some(pos) => self.steps[i].can_remove_required_output[*pos] = false,
                        None => {
                            if !required_names.contains(&name) {
                                required_names.insert(name.clone());
                                required_output.push(name);
                            }
                        }
                    }
                }
            }

            self.steps[i].finalize(&required_output)?;
            trace!(step = i, outputs = required_output.len(), "finalized chain step");
        }
        Ok(())
    }

    pub fn dump_chain(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for (idx, step) in self.steps.iter().enumerate() {
            let _ = writeln!(out, "step {idx}");
            let _ = writeln!(out, "required output: {}", step.required_output.join(", "));
            out.push_str(&step.dump());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use quiver_column::block::Block;
    use quiver_column::column::Column;
    use quiver_column::datatype::DataType;
    use quiver_column::scalar::ScalarValue;

    use crate::actions::dag::NodeKind;
    use crate::functions::scalar::arith::{Add, Mul};
    use crate::functions::scalar::comparison::Lt;

    use super::*;

    #[derive(Debug)]
    struct NoopJoin;

    impl JoinHook for NoopJoin {
        fn join_block(&self, _block: &mut Block) -> Result<()> {
            Ok(())
        }
    }

    fn first_step_dag() -> ActionsDag {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();
        dag.add_function(&Mul, &["a", "b"], "t").unwrap();
        dag
    }

    #[test]
    fn accessors_error_on_empty_chain() {
        let mut chain = ActionsChain::new();
        assert!(matches!(chain.last_step(), Err(QuiverError::EmptyChain)));
        assert!(matches!(
            chain.last_actions_mut(),
            Err(QuiverError::EmptyChain)
        ));
        assert!(matches!(
            chain.add_step(&HashSet::new()),
            Err(QuiverError::EmptyChain)
        ));
    }

    #[test]
    fn finalize_propagates_demand_backward() {
        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(first_step_dag()));
        chain.add_step(&HashSet::new()).unwrap();

        let dag = chain.last_actions_mut().unwrap();
        dag.add_function(&Add, &["s", "s"], "u").unwrap();
        chain.last_step_mut().unwrap().add_required_output("u", false);

        chain.finalize().unwrap();

        // The tail step needs only s; the head step drops t and keeps the
        // inputs that feed s.
        let tail_required: Vec<String> = chain.steps[1]
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(tail_required, vec!["s".to_string()]);

        let head = match &chain.steps[0].kind {
            StepKind::Expression { dag } => dag,
            other => panic!("expected expression step, got {other:?}"),
        };
        assert!(head.output_node("t").is_none());
        assert_eq!(head.output_names(), vec!["s".to_string()]);

        // Demands only shrink: every step's requirement is a subset of what
        // it produced before finalize.
        for step in &chain.steps {
            for col in step.required_columns() {
                assert!(col.name == "a" || col.name == "b" || col.name == "s");
            }
        }
    }

    #[test]
    fn add_step_carries_constants_forward() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_column(quiver_column::block::BlockColumn::new(
            "c",
            Column::constant(ScalarValue::Int32(3), 1),
        ))
        .unwrap();

        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(dag));
        chain.add_step(&HashSet::new()).unwrap();

        let next = chain.last_actions_mut().unwrap();
        let folded = next.add_function(&Add, &["c", "c"], "d").unwrap();
        assert_eq!(next.node(folded).kind, NodeKind::Column);
    }

    #[test]
    fn non_constant_inputs_suppress_folding() {
        let mut dag = ActionsDag::new();
        dag.add_column(quiver_column::block::BlockColumn::new(
            "c",
            Column::constant(ScalarValue::Int32(3), 1),
        ))
        .unwrap();

        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(dag));
        chain
            .add_step(&HashSet::from(["c".to_string()]))
            .unwrap();

        let next = chain.last_actions_mut().unwrap();
        let id = next.add_function(&Add, &["c", "c"], "d").unwrap();
        assert_eq!(next.node(id).kind, NodeKind::Function);
    }

    #[test]
    fn array_join_step_narrows_on_finalize() {
        let action = ArrayJoinAction::try_new(vec!["arr".to_string()]).unwrap();
        let mut step = Step::array_join(
            action,
            vec![
                ColumnWithType::new("arr", DataType::list_of(DataType::Int32)),
                ColumnWithType::new("k", DataType::Int32),
            ],
        )
        .unwrap();

        // Unfolding rewrites the type in the step's result.
        let result_types: Vec<DataType> = step
            .result_columns()
            .into_iter()
            .map(|col| col.datatype)
            .collect();
        assert_eq!(result_types, vec![DataType::Int32, DataType::Int32]);

        step.finalize(&["arr".to_string()]).unwrap();
        let results: Vec<String> = step
            .result_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(results, vec!["arr".to_string()]);

        // The array source stays required even though k was dropped.
        let required: Vec<String> = step
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(required, vec!["arr".to_string()]);
    }

    #[test]
    fn join_step_appends_and_narrows() {
        let join = TableJoin::new(
            vec!["id".to_string()],
            vec![ColumnWithType::new("v", DataType::Int64)],
        );
        let mut step = Step::join(
            join,
            Box::new(NoopJoin),
            vec![
                ColumnWithType::new("id", DataType::Int32),
                ColumnWithType::new("x", DataType::Int32),
            ],
        );

        let results: Vec<String> = step
            .result_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(
            results,
            vec!["id".to_string(), "x".to_string(), "v".to_string()]
        );

        step.finalize(&["v".to_string()]).unwrap();
        let results: Vec<String> = step
            .result_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(results, vec!["v".to_string()]);

        // The join key is still required; x is not.
        let required: Vec<String> = step
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(required, vec!["id".to_string()]);
    }

    #[test]
    fn last_step_or_init_seeds_chain() {
        let mut chain = ActionsChain::new();
        let step = chain
            .last_step_or_init(&[ColumnWithType::new("a", DataType::Int32)])
            .unwrap();
        assert!(matches!(step.kind, StepKind::Expression { .. }));
        assert_eq!(chain.steps.len(), 1);

        chain
            .last_step_or_init(&[ColumnWithType::new("b", DataType::Int32)])
            .unwrap();
        assert_eq!(chain.steps.len(), 1);
    }

    #[test]
    fn last_actions_requires_expression_tail() {
        let mut chain = ActionsChain::new();
        let action = ArrayJoinAction::try_new(vec!["arr".to_string()]).unwrap();
        chain.push_step(
            Step::array_join(
                action,
                vec![ColumnWithType::new(
                    "arr",
                    DataType::list_of(DataType::Int32),
                )],
            )
            .unwrap(),
        );

        assert!(matches!(
            chain.last_actions(),
            Err(QuiverError::LogicalError(_))
        ));
    }

    #[test]
    fn prepend_project_input_reaches_dag() {
        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(first_step_dag()));
        chain.last_step_mut().unwrap().prepend_project_input();
        assert!(chain.last_actions().unwrap().settings().project_input);
    }

    #[test]
    fn dump_chain_lists_steps() {
        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(first_step_dag()));
        chain.add_step(&HashSet::new()).unwrap();

        let dump = chain.dump_chain();
        assert!(dump.contains("step 0"));
        assert!(dump.contains("step 1"));

        chain.clear();
        assert!(chain.is_empty());
    }

    #[test]
    fn additional_input_excluded_from_upstream_demand() {
        // step 0 produces only s; step 1 also consumes ext, which arrives
        // from outside the chain.
        let mut dag0 = ActionsDag::new();
        dag0.add_input("a", DataType::Int32).unwrap();
        dag0.add_function(&Add, &["a", "a"], "s").unwrap();

        let mut dag1 = ActionsDag::new();
        dag1.add_input("s", DataType::Int32).unwrap();
        dag1.add_input("ext", DataType::Int32).unwrap();
        dag1.add_function(&Add, &["s", "ext"], "u").unwrap();

        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(dag0));
        let mut step = Step::expression(dag1);
        step.additional_input.insert("ext".to_string());
        step.add_required_output("u", false);
        chain.push_step(step);

        // Without the exclusion, step 0 would be asked for ext and fail
        // with UnknownIdentifier.
        chain.finalize().unwrap();

        let head = match &chain.steps[0].kind {
            StepKind::Expression { dag } => dag,
            other => panic!("expected expression step, got {other:?}"),
        };
        assert_eq!(head.output_names(), vec!["s".to_string()]);
        let head_required: Vec<String> = chain.steps[0]
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(head_required, vec!["a".to_string()]);

        // ext is still an input of the tail step, just not demanded from
        // the chain.
        let tail_required: Vec<String> = chain.steps[1]
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert!(tail_required.contains(&"ext".to_string()));
    }

    fn filter_step_dag() -> ActionsDag {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Lt, &["a", "b"], "filt").unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();
        dag
    }

    #[test]
    fn remove_after_use_flag_survives_without_downstream_demand() {
        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(filter_step_dag()));
        {
            let step = chain.last_step_mut().unwrap();
            step.add_required_output("filt", true);
            step.add_required_output("s", false);
        }
        chain.add_step(&HashSet::new()).unwrap();
        chain
            .last_actions_mut()
            .unwrap()
            .add_function(&Add, &["s", "s"], "u")
            .unwrap();
        chain.last_step_mut().unwrap().add_required_output("u", false);

        chain.finalize().unwrap();

        // The tail only needs s, so the filter column may be dropped right
        // after the filter runs.
        assert_eq!(
            chain.steps[0].can_remove_required_output,
            vec![true, false]
        );
        let head = match &chain.steps[0].kind {
            StepKind::Expression { dag } => dag,
            other => panic!("expected expression step, got {other:?}"),
        };
        assert_eq!(
            head.output_names(),
            vec!["filt".to_string(), "s".to_string()]
        );
    }

    #[test]
    fn remove_after_use_flag_cleared_when_next_step_demands() {
        let mut chain = ActionsChain::new();
        chain.push_step(Step::expression(filter_step_dag()));
        {
            let step = chain.last_step_mut().unwrap();
            step.add_required_output("filt", true);
            step.add_required_output("s", false);
        }
        chain.add_step(&HashSet::new()).unwrap();
        chain
            .last_actions_mut()
            .unwrap()
            .add_alias("filt", "keep", false)
            .unwrap();
        chain.last_step_mut().unwrap().add_required_output("keep", false);

        chain.finalize().unwrap();

        // The tail still reads filt, so the filter must leave it in the
        // block.
        assert_eq!(
            chain.steps[0].can_remove_required_output,
            vec![false, false]
        );
        let tail_required: Vec<String> = chain.steps[1]
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(tail_required, vec!["filt".to_string()]);
    }
}
