use std::sync::Arc;

use quiver_column::block::{Block, BlockColumn};
use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_column::scalar::ScalarValue;
use quiver_error::{QuiverError, Result};

use super::dag::{ActionsDag, ActionsSettings, NodeId, NodeKind};

/// One argument slot of an action.
#[derive(Debug, Clone, Copy)]
pub struct Argument {
    /// Position in the execution context's column array.
    pub pos: usize,
    /// True if a later action (or the result) still uses this column.
    /// Otherwise the slot is released after the action.
    pub needed_later: bool,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub node: NodeId,
    pub arguments: Vec<Argument>,
    pub result_position: usize,
}

/// An input column the block must provide, with its assigned slot.
#[derive(Debug, Clone)]
pub struct RequiredColumn {
    pub name: String,
    pub datatype: DataType,
    pos: usize,
}

/// Linearized execution plan over an [`ActionsDag`].
///
/// Orders the required actions topologically, assigns column slots with
/// reuse, and evaluates the plan per block. Immutable after construction
/// and safely shareable across threads; one `execute` call runs on one
/// thread start to finish.
#[derive(Debug, Clone)]
pub struct ExpressionActions {
    dag: Arc<ActionsDag>,
    actions: Vec<Action>,
    /// High-water mark of simultaneously assigned slots.
    num_columns: usize,
    required_columns: Vec<RequiredColumn>,
    /// Constant COLUMN nodes placed into their slots before the first
    /// action.
    constants: Vec<(NodeId, usize)>,
    /// Output slots, in output order.
    result_positions: Vec<usize>,
    sample_block: Block,
    settings: ActionsSettings,
}

impl ExpressionActions {
    pub fn try_new(dag: Arc<ActionsDag>) -> Result<Self> {
        let settings = dag.settings().clone();
        let mut actions = ExpressionActions {
            dag,
            actions: Vec::new(),
            num_columns: 0,
            required_columns: Vec::new(),
            constants: Vec::new(),
            result_positions: Vec::new(),
            sample_block: Block::empty(),
            settings,
        };
        actions.linearize()?;

        let mut sample = actions.input_sample_block()?;
        let mut num_rows = 0;
        actions.execute(&mut sample, &mut num_rows, true)?;
        actions.sample_block = sample;

        Ok(actions)
    }

    pub fn dag(&self) -> &Arc<ActionsDag> {
        &self.dag
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn required_columns(&self) -> &[RequiredColumn] {
        &self.required_columns
    }

    pub fn required_names(&self) -> Vec<String> {
        self.required_columns
            .iter()
            .map(|req| req.name.clone())
            .collect()
    }

    /// Names and types of the result columns, computed once at
    /// construction.
    pub fn sample_block(&self) -> &Block {
        &self.sample_block
    }

    pub fn has_array_join(&self) -> bool {
        self.dag.has_array_join()
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Assign slots and build the ordered action list.
    fn linearize(&mut self) -> Result<()> {
        let nodes = self.dag.nodes();
        let reachable = self.dag.reachable_from_output();

        // Arena order is topological by construction; a child with a higher
        // id than its parent means the graph is corrupt.
        for (idx, node) in nodes.iter().enumerate() {
            if !reachable[idx] {
                continue;
            }
            for child in &node.children {
                if child.idx() >= idx {
                    return Err(QuiverError::LogicalError(format!(
                        "Topological order broken: node {idx} depends on {child}"
                    )));
                }
            }
        }

        let mut last_consumer: Vec<Option<usize>> = vec![None; nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            if !reachable[idx] {
                continue;
            }
            for child in &node.children {
                last_consumer[child.idx()] = Some(idx);
            }
        }

        let mut in_output = vec![false; nodes.len()];
        for id in self.dag.output_nodes() {
            in_output[id.idx()] = true;
        }

        let mut slot: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut num_columns = 0usize;
        let mut free: Vec<usize> = Vec::new();

        // Inputs and constants occupy their slots from the start of
        // execution; they never reuse a released slot.
        for (idx, node) in nodes.iter().enumerate() {
            if !reachable[idx] {
                continue;
            }
            match node.kind {
                NodeKind::Input => {
                    slot[idx] = Some(num_columns);
                    self.required_columns.push(RequiredColumn {
                        name: node.result_name.clone(),
                        datatype: node.result_type.clone(),
                        pos: num_columns,
                    });
                    num_columns += 1;
                }
                NodeKind::Column => {
                    slot[idx] = Some(num_columns);
                    self.constants.push((NodeId::new(idx), num_columns));
                    num_columns += 1;
                }
                _ => (),
            }
        }

        let mut released = vec![false; nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            if !reachable[idx] {
                continue;
            }
            if matches!(node.kind, NodeKind::Input | NodeKind::Column) {
                continue;
            }

            let result_position = match free.pop() {
                Some(pos) => pos,
                None => {
                    num_columns += 1;
                    num_columns - 1
                }
            };
            slot[idx] = Some(result_position);

            let mut arguments = Vec::with_capacity(node.children.len());
            for child in &node.children {
                let pos = slot[child.idx()].ok_or_else(|| {
                    QuiverError::LogicalError(format!("Child {child} has no slot"))
                })?;
                let needed_later = in_output[child.idx()]
                    || last_consumer[child.idx()].is_some_and(|consumer| consumer > idx);
                arguments.push(Argument { pos, needed_later });
            }

            self.actions.push(Action {
                node: NodeId::new(idx),
                arguments,
                result_position,
            });

            for child in &node.children {
                if !in_output[child.idx()]
                    && last_consumer[child.idx()] == Some(idx)
                    && !released[child.idx()]
                {
                    released[child.idx()] = true;
                    if let Some(pos) = slot[child.idx()] {
                        free.push(pos);
                    }
                }
            }
        }

        for id in self.dag.output_nodes() {
            let pos = slot[id.idx()].ok_or_else(|| {
                QuiverError::LogicalError(format!("Output node {id} has no slot"))
            })?;
            self.result_positions.push(pos);
        }

        self.num_columns = num_columns;
        Ok(())
    }

    /// Empty block carrying the required columns, used to compute the
    /// sample block.
    fn input_sample_block(&self) -> Result<Block> {
        let mut block = Block::empty();
        for req in &self.required_columns {
            block.push(BlockColumn {
                name: req.name.clone(),
                datatype: req.datatype.clone(),
                column: Column::constant(ScalarValue::default_for(&req.datatype), 0),
            })?;
        }
        Ok(block)
    }

    /// Execute the expressions on the block.
    ///
    /// The block must contain all required columns; they are consumed. The
    /// result block holds the output columns in order, followed by the
    /// untouched remainder of the input block unless `project_input` is
    /// set. `num_rows` is overwritten when an ARRAY JOIN changes the
    /// cardinality.
    pub fn execute(&self, block: &mut Block, num_rows: &mut usize, dry_run: bool) -> Result<()> {
        let mut columns: Vec<Option<Column>> = vec![None; self.num_columns];

        let mut input_positions = Vec::with_capacity(self.required_columns.len());
        for req in &self.required_columns {
            let pos = block.position_by_name(&req.name).ok_or_else(|| {
                QuiverError::UnknownIdentifier(format!(
                    "Block is missing required column '{}'",
                    req.name
                ))
            })?;
            let col = &block.columns()[pos];
            if col.datatype != req.datatype {
                return Err(QuiverError::TypeMismatch(format!(
                    "Required column '{}' has type {}, block provides {}",
                    req.name, req.datatype, col.datatype
                )));
            }
            input_positions.push((req.pos, pos));
        }

        // Move inputs out of the block, highest position first so earlier
        // positions stay valid.
        input_positions.sort_by(|a, b| b.1.cmp(&a.1));
        for (slot, pos) in input_positions {
            let col = block.remove_column(pos);
            columns[slot] = Some(col.column);
        }

        for (id, slot) in &self.constants {
            let node = self.dag.node(*id);
            let col = node.column.as_ref().ok_or_else(|| {
                QuiverError::LogicalError(format!(
                    "COLUMN node '{}' has no value",
                    node.result_name
                ))
            })?;

            let placed = if col.is_const() {
                col.with_len(*num_rows)?
            } else if dry_run {
                Column::constant(ScalarValue::default_for(&node.result_type), *num_rows)
            } else if col.len() == *num_rows {
                col.clone()
            } else {
                return Err(QuiverError::LogicalError(format!(
                    "Materialized column '{}' has {} rows, block has {num_rows}",
                    node.result_name,
                    col.len()
                )));
            };
            columns[*slot] = Some(placed);
        }

        for action in &self.actions {
            self.execute_action(action, &mut columns, num_rows, dry_run)?;

            for arg in &action.arguments {
                if !arg.needed_later {
                    columns[arg.pos] = None;
                }
            }

            self.check_limits(&columns)?;
        }

        let mut result = Block::empty_with_num_rows(*num_rows);
        for (entry, pos) in self
            .dag
            .output_nodes()
            .iter()
            .zip(self.result_positions.iter())
        {
            let node = self.dag.node(*entry);
            let col = columns[*pos].clone().ok_or_else(|| {
                QuiverError::LogicalError(format!(
                    "Result column '{}' was released before output",
                    node.result_name
                ))
            })?;
            result.push(BlockColumn {
                name: node.result_name.clone(),
                datatype: node.result_type.clone(),
                column: col,
            })?;
        }

        if self.settings.project_input {
            *block = result;
        } else {
            let leftover = std::mem::replace(block, Block::empty());
            for col in leftover.into_columns() {
                result.push(col)?;
            }
            *block = result;
        }

        Ok(())
    }

    fn execute_action(
        &self,
        action: &Action,
        columns: &mut [Option<Column>],
        num_rows: &mut usize,
        dry_run: bool,
    ) -> Result<()> {
        let node = self.dag.node(action.node);
        match node.kind {
            NodeKind::Alias => {
                let src = action.arguments.first().ok_or_else(|| {
                    QuiverError::LogicalError("ALIAS action without argument".to_string())
                })?;
                let col = columns[src.pos].clone().ok_or_else(|| {
                    QuiverError::LogicalError("ALIAS source slot is empty".to_string())
                })?;
                columns[action.result_position] = Some(col);
            }
            NodeKind::ArrayJoin => {
                let src = action.arguments.first().copied().ok_or_else(|| {
                    QuiverError::LogicalError("ARRAY_JOIN action without argument".to_string())
                })?;
                let col = columns[src.pos].clone().ok_or_else(|| {
                    QuiverError::LogicalError("ARRAY_JOIN source slot is empty".to_string())
                })?;

                let (elements, lengths) = col.unfold_list()?;

                // Release the source before the lockstep expansion so it is
                // not replicated needlessly.
                if !src.needed_later {
                    columns[src.pos] = None;
                }

                *num_rows = lengths.iter().sum();
                for slot in columns.iter_mut() {
                    if let Some(col) = slot {
                        *col = col.replicate(&lengths)?;
                    }
                }
                columns[action.result_position] = Some(elements);
            }
            NodeKind::Function => {
                let res = if dry_run {
                    Column::constant(ScalarValue::default_for(&node.result_type), *num_rows)
                } else {
                    let function = node.function.as_ref().ok_or_else(|| {
                        QuiverError::LogicalError(format!(
                            "FUNCTION node '{}' has no bound function",
                            node.result_name
                        ))
                    })?;

                    let args = action
                        .arguments
                        .iter()
                        .map(|arg| {
                            columns[arg.pos].clone().ok_or_else(|| {
                                QuiverError::LogicalError(
                                    "FUNCTION argument slot is empty".to_string(),
                                )
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;

                    let out = function.execute(&args, *num_rows)?;
                    if out.len() != *num_rows {
                        return Err(QuiverError::LogicalError(format!(
                            "Function '{}' produced {} rows, expected {num_rows}",
                            node.result_name,
                            out.len()
                        )));
                    }
                    if out.datatype() != node.result_type {
                        return Err(QuiverError::LogicalError(format!(
                            "Function '{}' produced {} instead of {}",
                            node.result_name,
                            out.datatype(),
                            node.result_type
                        )));
                    }
                    out
                };
                columns[action.result_position] = Some(res);
            }
            NodeKind::Input | NodeKind::Column => {
                return Err(QuiverError::LogicalError(format!(
                    "Unexpected {} action",
                    node.kind.as_str()
                )));
            }
        }
        Ok(())
    }

    /// The same, but deriving the row count from the block. If the result
    /// has no columns, a `_dummy` marker column carries the row count so
    /// downstream operators observe block structure.
    pub fn execute_block(&self, block: &mut Block, dry_run: bool) -> Result<()> {
        let mut num_rows = block.num_rows();
        self.execute(block, &mut num_rows, dry_run)?;

        if block.num_columns() == 0 {
            block.set_num_rows(num_rows);
            block.push(BlockColumn::new(
                "_dummy",
                Column::constant(ScalarValue::Boolean(false), num_rows),
            ))?;
        }
        Ok(())
    }

    fn check_limits(&self, columns: &[Option<Column>]) -> Result<()> {
        if self.settings.max_temporary_columns != 0 {
            let live = columns.iter().filter(|col| col.is_some()).count();
            if live > self.settings.max_temporary_columns {
                return Err(QuiverError::TooManyTemporaryColumns(format!(
                    "{live} columns live, limit is {}",
                    self.settings.max_temporary_columns
                )));
            }
        }

        if self.settings.max_temporary_non_const_columns != 0 {
            let non_const = columns
                .iter()
                .filter(|col| col.as_ref().is_some_and(|c| !c.is_const()))
                .count();
            if non_const > self.settings.max_temporary_non_const_columns {
                return Err(QuiverError::TooManyTemporaryNonConstColumns(format!(
                    "{non_const} non-const columns live, limit is {}",
                    self.settings.max_temporary_non_const_columns
                )));
            }
        }

        Ok(())
    }

    /// Check whether the named output column is a constant that is
    /// logically false. True only if statically determinable; call it only
    /// after subqueries for sets have been materialized.
    pub fn check_column_is_always_false(&self, name: &str) -> bool {
        let Some(id) = self.dag.output_node(name) else {
            return false;
        };
        let node = self.dag.node(id);
        match node.column.as_ref().and_then(|col| col.as_const()) {
            Some(c) => matches!(
                c.value,
                ScalarValue::Boolean(false) | ScalarValue::Int32(0) | ScalarValue::Int64(0)
            ),
            None => false,
        }
    }

    /// One line per action: kind, node name, argument positions, result
    /// position.
    pub fn dump_actions(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let required = self
            .required_columns
            .iter()
            .map(|req| format!("{} {}", req.name, req.datatype))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "required: [{required}]");

        for action in &self.actions {
            let node = self.dag.node(action.node);
            let args = action
                .arguments
                .iter()
                .map(|arg| arg.pos.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "{} {} [{args}] -> {}",
                node.kind.as_str(),
                node.result_name,
                action.result_position
            );
        }

        let outputs = self
            .dag
            .output_nodes()
            .iter()
            .zip(self.result_positions.iter())
            .map(|(id, pos)| format!("{} -> {pos}", self.dag.node(*id).result_name))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "output: [{outputs}]");

        out
    }
}
