use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use quiver_column::block::BlockColumn;
use quiver_column::column::Column;
use quiver_column::datatype::DataType;
use quiver_error::{QuiverError, Result};
use tracing::{debug, trace};

use crate::compile::{
    CompilableFragment, CompiledExpressionCache, ExpressionCompiler, FragmentArg, FragmentNode,
};
use crate::functions::scalar::{PlannedScalarFunction, ScalarFunction};

use super::ColumnWithType;

/// Stable handle of a node in the DAG's arena.
///
/// Node identity is by id, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(idx: usize) -> Self {
        NodeId(idx as u32)
    }

    pub(crate) fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Column which must be in input.
    Input,
    /// Column with a known value.
    Column,
    /// Another name for a column.
    Alias,
    /// Unfolds an array column. Specially separated because it changes the
    /// number of rows.
    ArrayJoin,
    Function,
}

impl NodeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Column => "COLUMN",
            Self::Alias => "ALIAS",
            Self::ArrayJoin => "ARRAY_JOIN",
            Self::Function => "FUNCTION",
        }
    }
}

/// One graph vertex: the computation of a single named, typed column.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub result_name: String,
    pub result_type: DataType,
    /// Ordered dependencies; arity is fixed by `kind`.
    pub children: Vec<NodeId>,
    /// Bound function, present on FUNCTION nodes.
    pub function: Option<Box<dyn PlannedScalarFunction>>,
    /// True if this node was fused into a compiled supernode.
    pub is_compiled: bool,
    /// Value for COLUMN nodes and precomputed constants; propagated through
    /// aliases.
    pub column: Option<Column>,
    /// Constants like `ignore()` results are precomputed to avoid
    /// materialization but must not replace this node in consumers.
    pub allow_constant_folding: bool,
}

impl Node {
    fn has_const_value(&self) -> bool {
        self.column.as_ref().is_some_and(|c| c.is_const())
    }
}

/// Ordered, name-indexed view over the DAG's output columns.
///
/// The list may contain duplicate names; the map then points to the most
/// recently inserted occurrence. Removing a name removes it from the output
/// only; the node stays in the arena.
#[derive(Debug, Clone, Default)]
pub(crate) struct Index {
    list: Vec<NodeId>,
    map: HashMap<String, NodeId>,
}

impl Index {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<NodeId> {
        self.map.get(name).copied()
    }

    pub(crate) fn entries(&self) -> &[NodeId] {
        &self.list
    }

    /// Append an entry. An existing entry with the same name stays in the
    /// list; the map is re-pointed at the new one.
    pub(crate) fn insert(&mut self, name: &str, id: NodeId) {
        self.list.push(id);
        self.map.insert(name.to_string(), id);
    }

    /// Replace the entry with the same name if present, append otherwise.
    pub(crate) fn replace(&mut self, name: &str, id: NodeId) {
        match self.map.get_mut(name) {
            Some(mapped) => {
                let old = *mapped;
                *mapped = id;
                match self.list.iter().rposition(|entry| *entry == old) {
                    Some(pos) => self.list[pos] = id,
                    None => self.list.push(id),
                }
            }
            None => self.insert(name, id),
        }
    }

    /// Remove the last entry with the given name from both map and list,
    /// re-pointing the map at an earlier duplicate when one remains.
    ///
    /// Returns whether the name was present.
    pub(crate) fn remove(&mut self, name: &str, nodes: &[Node]) -> bool {
        if self.map.remove(name).is_none() {
            return false;
        }

        if let Some(pos) = self
            .list
            .iter()
            .rposition(|id| nodes[id.idx()].result_name == name)
        {
            self.list.remove(pos);
        }

        if let Some(pos) = self
            .list
            .iter()
            .rposition(|id| nodes[id.idx()].result_name == name)
        {
            self.map.insert(name.to_string(), self.list[pos]);
        }

        true
    }

    pub(crate) fn clear(&mut self) {
        self.list.clear();
        self.map.clear();
    }
}

/// Build- and execute-time knobs, carried by the DAG and copied into the
/// executable plan.
#[derive(Debug, Clone, Default)]
pub struct ActionsSettings {
    /// Execute-time cap on simultaneously live columns; zero disables.
    pub max_temporary_columns: usize,
    /// Same, counting only non-constant columns.
    pub max_temporary_non_const_columns: usize,
    /// Smallest fusable subgraph size worth compiling.
    pub min_count_to_compile_expression: usize,
    pub compile_expressions: bool,
    /// On execute, drop block columns not referenced by any input.
    pub project_input: bool,
    /// Set once `project()` ran; suppresses further unused-removal passes.
    pub projected_output: bool,
}

/// Directed acyclic graph of expressions.
///
/// The intermediate representation of the actions computed from an
/// expression list. Nodes live in an arena owned by the DAG; explicit
/// dependencies make it possible to prune unused expressions, fold and
/// propagate constants, compile subexpressions, and split the graph around
/// row-multiplying operators.
///
/// A built DAG is wrapped into
/// [`ExpressionActions`](super::expression::ExpressionActions), which
/// evaluates the expressions on blocks.
#[derive(Debug, Clone, Default)]
pub struct ActionsDag {
    nodes: Vec<Node>,
    index: Index,
    settings: ActionsSettings,
    compilation_cache: Option<Arc<CompiledExpressionCache>>,
}

impl ActionsDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// DAG whose sources are the given input columns.
    pub fn from_input_types(
        inputs: impl IntoIterator<Item = (String, DataType)>,
    ) -> Result<Self> {
        let mut dag = Self::new();
        for (name, datatype) in inputs {
            dag.add_input(name, datatype)?;
        }
        Ok(dag)
    }

    /// DAG whose sources are a previous stage's result columns.
    ///
    /// Known constants become COLUMN nodes so downstream folding can use
    /// them, unless listed in `non_constant_inputs`.
    pub fn from_columns(
        columns: &[ColumnWithType],
        non_constant_inputs: &HashSet<String>,
    ) -> Result<Self> {
        let mut dag = Self::new();
        for col in columns {
            match &col.column {
                Some(column)
                    if column.is_const() && !non_constant_inputs.contains(&col.name) =>
                {
                    dag.add_column(BlockColumn {
                        name: col.name.clone(),
                        datatype: col.datatype.clone(),
                        column: column.clone(),
                    })?;
                }
                _ => {
                    dag.add_input(col.name.clone(), col.datatype.clone())?;
                }
            }
        }
        Ok(dag)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.idx()]
    }

    pub fn settings(&self) -> &ActionsSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ActionsSettings {
        &mut self.settings
    }

    pub fn set_compilation_cache(&mut self, cache: Arc<CompiledExpressionCache>) {
        self.compilation_cache = Some(cache);
    }

    pub fn compilation_cache(&self) -> Option<&Arc<CompiledExpressionCache>> {
        self.compilation_cache.as_ref()
    }

    /// Output node ids, in output order.
    pub fn output_nodes(&self) -> &[NodeId] {
        self.index.entries()
    }

    /// Resolve an output column by name; the last inserted occurrence wins.
    pub fn output_node(&self, name: &str) -> Option<NodeId> {
        self.index.get(name)
    }

    /// Names of the output columns, in order.
    pub fn output_names(&self) -> Vec<String> {
        self.index
            .entries()
            .iter()
            .map(|id| self.nodes[id.idx()].result_name.clone())
            .collect()
    }

    /// Input columns, in insertion order.
    pub fn required_columns(&self) -> Vec<ColumnWithType> {
        self.nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Input)
            .map(|node| ColumnWithType::new(node.result_name.clone(), node.result_type.clone()))
            .collect()
    }

    /// Output columns with their known constant values, in output order.
    pub fn result_columns(&self) -> Vec<ColumnWithType> {
        self.index
            .entries()
            .iter()
            .map(|id| {
                let node = &self.nodes[id.idx()];
                ColumnWithType {
                    name: node.result_name.clone(),
                    datatype: node.result_type.clone(),
                    column: node.column.clone(),
                }
            })
            .collect()
    }

    /// True if the actions only contain inputs.
    pub fn empty(&self) -> bool {
        self.nodes.iter().all(|node| node.kind == NodeKind::Input)
    }

    pub fn has_array_join(&self) -> bool {
        self.nodes.iter().any(|node| node.kind == NodeKind::ArrayJoin)
    }

    /// Drop block columns not referenced by any input during execute.
    pub fn project_input(&mut self) {
        self.settings.project_input = true;
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId::new(self.nodes.len() - 1)
    }

    fn get_output_node(&self, name: &str) -> Result<NodeId> {
        self.index
            .get(name)
            .ok_or_else(|| QuiverError::UnknownIdentifier(format!("Unknown column: {name}")))
    }

    pub fn add_input(&mut self, name: impl Into<String>, datatype: DataType) -> Result<NodeId> {
        let name = name.into();
        if self.index.contains(&name) {
            return Err(QuiverError::DuplicateInput(name));
        }

        let id = self.push_node(Node {
            kind: NodeKind::Input,
            result_name: name.clone(),
            result_type: datatype,
            children: Vec::new(),
            function: None,
            is_compiled: false,
            column: None,
            allow_constant_folding: true,
        });
        self.index.insert(&name, id);
        Ok(id)
    }

    pub fn add_input_column(&mut self, column: BlockColumn) -> Result<NodeId> {
        self.add_input(column.name, column.datatype)
    }

    /// Insert a COLUMN node holding the given value: a constant, or a fully
    /// materialized column used to inject literals and precomputed values.
    pub fn add_column(&mut self, column: BlockColumn) -> Result<NodeId> {
        if column.name.is_empty() {
            return Err(QuiverError::LogicalError(
                "Cannot add column with empty name".to_string(),
            ));
        }

        let name = column.name;
        let id = self.push_node(Node {
            kind: NodeKind::Column,
            result_name: name.clone(),
            result_type: column.datatype,
            children: Vec::new(),
            function: None,
            is_compiled: false,
            column: Some(column.column),
            allow_constant_folding: true,
        });
        self.index.insert(&name, id);
        Ok(id)
    }

    /// Rename a column. If `can_replace` is set and the alias already exists
    /// in the output, the entry is replaced; otherwise the new entry is
    /// appended and shadows the old one by name.
    pub fn add_alias(
        &mut self,
        name: &str,
        alias: impl Into<String>,
        can_replace: bool,
    ) -> Result<NodeId> {
        let child = self.get_output_node(name)?;
        let alias = alias.into();
        let id = self.push_alias_node(child, alias.clone());

        if can_replace {
            self.index.replace(&alias, id);
        } else {
            self.index.insert(&alias, id);
        }
        Ok(id)
    }

    fn push_alias_node(&mut self, child: NodeId, alias: String) -> NodeId {
        let child_node = &self.nodes[child.idx()];
        let node = Node {
            kind: NodeKind::Alias,
            result_name: alias,
            result_type: child_node.result_type.clone(),
            children: vec![child],
            function: None,
            is_compiled: false,
            // Constants stay visible through renames, including the
            // no-folding flag.
            column: child_node.column.clone(),
            allow_constant_folding: child_node.allow_constant_folding,
        };
        self.push_node(node)
    }

    /// Unfold an array column. The source must be list-typed; the result is
    /// the element type. The only node kind that changes the row count.
    pub fn add_array_join(
        &mut self,
        source_name: &str,
        result_name: impl Into<String>,
    ) -> Result<NodeId> {
        let child = self.get_output_node(source_name)?;
        let element = self.nodes[child.idx()].result_type.try_list_inner()?.clone();

        let result_name = result_name.into();
        let id = self.push_node(Node {
            kind: NodeKind::ArrayJoin,
            result_name: result_name.clone(),
            result_type: element,
            children: vec![child],
            function: None,
            is_compiled: false,
            column: None,
            allow_constant_folding: true,
        });
        self.index.insert(&result_name, id);
        Ok(id)
    }

    /// Resolve and insert a function over named arguments.
    ///
    /// If every argument is a known true constant that permits folding and
    /// the function is deterministic, the function is evaluated on one row
    /// and a COLUMN node replaces it. Functions that prohibit folding of
    /// their result still precompute it, flagged non-foldable.
    pub fn add_function(
        &mut self,
        function: &dyn ScalarFunction,
        argument_names: &[&str],
        result_name: impl Into<String>,
    ) -> Result<NodeId> {
        let mut children = Vec::with_capacity(argument_names.len());
        let mut argument_types = Vec::with_capacity(argument_names.len());
        for name in argument_names {
            let id = self.get_output_node(name)?;
            argument_types.push(self.nodes[id.idx()].result_type.clone());
            children.push(id);
        }

        let planned = function.plan(&argument_types)?;
        let result_type = planned.return_type();

        let mut result_name = result_name.into();
        if result_name.is_empty() {
            result_name = format!("{}({})", function.name(), argument_names.join(", "));
        }

        let all_const = children
            .iter()
            .all(|id| self.nodes[id.idx()].has_const_value());
        let folding_allowed = children
            .iter()
            .all(|id| self.nodes[id.idx()].allow_constant_folding);

        if function.is_deterministic() && all_const && folding_allowed {
            let args = children
                .iter()
                .map(|id| {
                    self.nodes[id.idx()]
                        .column
                        .as_ref()
                        .ok_or_else(|| {
                            QuiverError::LogicalError(
                                "Constant child lost its value".to_string(),
                            )
                        })?
                        .with_len(1)
                })
                .collect::<Result<Vec<_>>>()?;

            let out = planned.execute(&args, 1)?;
            if out.datatype() != result_type {
                return Err(QuiverError::LogicalError(format!(
                    "Function '{}' returned {} instead of {result_type}",
                    function.name(),
                    out.datatype()
                )));
            }
            let value = out.scalar_at(0).ok_or_else(|| {
                QuiverError::LogicalError(format!(
                    "Constant folding of '{}' produced no rows",
                    function.name()
                ))
            })?;

            let id = self.push_node(Node {
                kind: NodeKind::Column,
                result_name: result_name.clone(),
                result_type,
                children: Vec::new(),
                function: None,
                is_compiled: false,
                column: Some(Column::constant(value, 1)),
                allow_constant_folding: function.allows_constant_folding(),
            });
            self.index.insert(&result_name, id);
            return Ok(id);
        }

        let id = self.push_node(Node {
            kind: NodeKind::Function,
            result_name: result_name.clone(),
            result_type,
            children,
            function: Some(planned),
            is_compiled: false,
            column: None,
            allow_constant_folding: true,
        });
        self.index.insert(&result_name, id);
        Ok(id)
    }

    /// Rename columns in bulk without pruning.
    pub fn add_aliases(&mut self, aliases: &[(String, String)]) -> Result<()> {
        let ids = self.alias_nodes(aliases)?;
        for id in ids {
            let name = self.nodes[id.idx()].result_name.clone();
            self.index.replace(&name, id);
        }
        Ok(())
    }

    /// Rename columns and replace the output with exactly the listed
    /// columns, in that order.
    pub fn project(&mut self, projection: &[(String, String)]) -> Result<()> {
        let ids = self.alias_nodes(projection)?;
        self.index.clear();
        for id in ids {
            let name = self.nodes[id.idx()].result_name.clone();
            self.index.insert(&name, id);
        }
        self.settings.projected_output = true;
        Ok(())
    }

    fn alias_nodes(&mut self, aliases: &[(String, String)]) -> Result<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(aliases.len());
        for (name, alias) in aliases {
            let id = self.get_output_node(name)?;
            let id = if !alias.is_empty() && alias != name {
                self.push_alias_node(id, alias.clone())
            } else {
                id
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// Remove the last output entry with this name. The node stays in the
    /// arena and may still be reached transitively.
    pub fn remove_column(&mut self, name: &str) -> Result<()> {
        if !self.index.remove(name, &self.nodes) {
            return Err(QuiverError::UnknownIdentifier(format!(
                "Unknown column: {name}"
            )));
        }
        Ok(())
    }

    /// Re-insert into the output a node that is still in the arena but not
    /// currently exposed. Returns whether it was found.
    pub fn try_restore_column(&mut self, name: &str) -> bool {
        if self.index.contains(name) {
            return true;
        }

        for idx in (0..self.nodes.len()).rev() {
            if self.nodes[idx].result_name == name {
                self.index.insert(name, NodeId::new(idx));
                return true;
            }
        }
        false
    }

    /// Keep only the actions needed to produce the named outputs.
    ///
    /// Idempotent; preserves output order for the kept names. Suppressed
    /// once the output has been projected.
    pub fn remove_unused_actions(&mut self, required_names: &[String]) -> Result<()> {
        if self.settings.projected_output {
            trace!("skipping unused-removal on projected output");
            return Ok(());
        }

        for name in required_names {
            if !self.index.contains(name) {
                return Err(QuiverError::UnknownIdentifier(format!(
                    "Unknown column: {name}"
                )));
            }
        }

        let required: HashSet<&str> = required_names.iter().map(String::as_str).collect();
        let kept: Vec<NodeId> = self
            .index
            .entries()
            .iter()
            .copied()
            .filter(|id| required.contains(self.nodes[id.idx()].result_name.as_str()))
            .collect();

        self.prune(kept)
    }

    /// Compact the arena down to the nodes reachable from `kept_index`,
    /// which becomes the new output.
    fn prune(&mut self, kept_index: Vec<NodeId>) -> Result<()> {
        let mut required = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = kept_index.clone();
        while let Some(id) = stack.pop() {
            if required[id.idx()] {
                continue;
            }
            required[id.idx()] = true;
            stack.extend(self.nodes[id.idx()].children.iter().copied());
        }

        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut new_nodes = Vec::new();
        for (idx, mut node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if !required[idx] {
                continue;
            }
            node.children = node
                .children
                .iter()
                .map(|child| {
                    remap[child.idx()].ok_or_else(|| {
                        QuiverError::LogicalError(
                            "Topological order broken while pruning".to_string(),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            remap[idx] = Some(NodeId::new(new_nodes.len()));
            new_nodes.push(node);
        }
        self.nodes = new_nodes;

        let mut index = Index::default();
        for id in kept_index {
            let new_id = remap[id.idx()].ok_or_else(|| {
                QuiverError::LogicalError("Output entry lost while pruning".to_string())
            })?;
            let name = self.nodes[new_id.idx()].result_name.clone();
            index.insert(&name, new_id);
        }
        self.index = index;

        Ok(())
    }

    /// Split out the computations that do not depend on the columns about to
    /// be array joined.
    ///
    /// Returns the extracted DAG; executing it, then ARRAY JOIN, then `self`
    /// yields the same columns as executing the original after the join.
    /// Returns `None` when every computation depends on the array-joined
    /// set. Non-deterministic functions are row sensitive and always stay in
    /// `self`.
    pub fn split_before_array_join(
        &mut self,
        array_joined_columns: &HashSet<String>,
    ) -> Result<Option<ActionsDag>> {
        let node_count = self.nodes.len();

        let mut depends = vec![false; node_count];
        for idx in 0..node_count {
            let node = &self.nodes[idx];
            let own = match node.kind {
                NodeKind::Input => array_joined_columns.contains(&node.result_name),
                NodeKind::ArrayJoin => true,
                NodeKind::Function => node
                    .function
                    .as_ref()
                    .is_some_and(|f| !f.is_deterministic()),
                NodeKind::Column | NodeKind::Alias => false,
            };
            depends[idx] =
                own || node.children.iter().any(|child| depends[child.idx()]);
        }

        let any_moved_computation = (0..node_count)
            .any(|idx| !depends[idx] && self.nodes[idx].kind != NodeKind::Input);
        if !any_moved_computation {
            return Ok(None);
        }

        // Nodes that must be visible at the cut: moved nodes consumed by a
        // kept node, and moved nodes that were outputs.
        let mut exposed = vec![false; node_count];
        for idx in 0..node_count {
            if !depends[idx] {
                continue;
            }
            for child in &self.nodes[idx].children {
                if !depends[child.idx()] {
                    exposed[child.idx()] = true;
                }
            }
        }
        for id in self.index.entries() {
            if !depends[id.idx()] {
                exposed[id.idx()] = true;
            }
        }

        // Build the extracted DAG from the moved nodes.
        let mut pre = ActionsDag {
            nodes: Vec::new(),
            index: Index::default(),
            settings: self.settings.clone(),
            compilation_cache: self.compilation_cache.clone(),
        };
        pre.settings.projected_output = false;

        let mut pre_map: Vec<Option<NodeId>> = vec![None; node_count];
        for idx in 0..node_count {
            if depends[idx] {
                continue;
            }
            let mut node = self.nodes[idx].clone();
            node.children = node
                .children
                .iter()
                .map(|child| {
                    pre_map[child.idx()].ok_or_else(|| {
                        QuiverError::LogicalError(
                            "Split produced a dangling dependency".to_string(),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            pre_map[idx] = Some(NodeId::new(pre.nodes.len()));
            pre.nodes.push(node);
        }

        // The extracted DAG exposes the cut columns and passes through the
        // inputs the remainder still needs from the source block.
        for idx in 0..node_count {
            if depends[idx] {
                let node = &self.nodes[idx];
                if node.kind == NodeKind::Input {
                    let name = node.result_name.clone();
                    let datatype = node.result_type.clone();
                    let pid = pre.push_node(Node {
                        kind: NodeKind::Input,
                        result_name: name.clone(),
                        result_type: datatype,
                        children: Vec::new(),
                        function: None,
                        is_compiled: false,
                        column: None,
                        allow_constant_folding: true,
                    });
                    pre.index.insert(&name, pid);
                }
            } else if exposed[idx] {
                let name = self.nodes[idx].result_name.clone();
                let pre_id = pre_map[idx].ok_or_else(|| {
                    QuiverError::LogicalError("Exposed node missing after split".to_string())
                })?;
                pre.index.insert(&name, pre_id);
            }
        }

        // Rebuild the remainder: kept nodes, with inputs standing in for the
        // moved computations they consume.
        let mut new_nodes: Vec<Node> = Vec::new();
        let mut self_map: Vec<Option<NodeId>> = vec![None; node_count];
        let mut stub_for: Vec<Option<NodeId>> = vec![None; node_count];

        fn stub_of(
            new_nodes: &mut Vec<Node>,
            stub_for: &mut [Option<NodeId>],
            source: &Node,
            source_idx: usize,
        ) -> NodeId {
            if let Some(id) = stub_for[source_idx] {
                return id;
            }
            let id = NodeId::new(new_nodes.len());
            new_nodes.push(Node {
                kind: NodeKind::Input,
                result_name: source.result_name.clone(),
                result_type: source.result_type.clone(),
                children: Vec::new(),
                function: None,
                is_compiled: false,
                column: None,
                allow_constant_folding: true,
            });
            stub_for[source_idx] = Some(id);
            id
        }

        for idx in 0..node_count {
            if !depends[idx] {
                continue;
            }
            let mut node = self.nodes[idx].clone();
            let mut children = Vec::with_capacity(node.children.len());
            for child in &node.children {
                if depends[child.idx()] {
                    children.push(self_map[child.idx()].ok_or_else(|| {
                        QuiverError::LogicalError(
                            "Topological order broken while splitting".to_string(),
                        )
                    })?);
                } else {
                    children.push(stub_of(
                        &mut new_nodes,
                        &mut stub_for,
                        &self.nodes[child.idx()],
                        child.idx(),
                    ));
                }
            }
            node.children = children;
            self_map[idx] = Some(NodeId::new(new_nodes.len()));
            new_nodes.push(node);
        }

        let mut new_index = Index::default();
        for id in self.index.entries().to_vec() {
            let new_id = if depends[id.idx()] {
                self_map[id.idx()].ok_or_else(|| {
                    QuiverError::LogicalError("Output entry lost while splitting".to_string())
                })?
            } else {
                stub_of(
                    &mut new_nodes,
                    &mut stub_for,
                    &self.nodes[id.idx()],
                    id.idx(),
                )
            };
            let name = self.nodes[id.idx()].result_name.clone();
            new_index.insert(&name, new_id);
        }

        self.nodes = new_nodes;
        self.index = new_index;

        // Drop moved nodes the extracted output no longer reaches.
        let pre_kept = pre.index.entries().to_vec();
        pre.prune(pre_kept)?;

        debug!(
            moved = pre.nodes.len(),
            kept = self.nodes.len(),
            "split actions before ARRAY JOIN"
        );

        Ok(Some(pre))
    }

    /// Fuse maximal connected subgraphs of compilable functions into single
    /// compiled nodes.
    ///
    /// A no-op unless `compile_expressions` is set. Results never change;
    /// compilation only fuses deterministic, compilable functions. Fused
    /// functions are shared through the compilation cache when one is
    /// attached.
    pub fn compile_expressions(&mut self, compiler: &dyn ExpressionCompiler) -> Result<()> {
        if !self.settings.compile_expressions {
            return Ok(());
        }
        let min_count = self.settings.min_count_to_compile_expression.max(1);
        let node_count = self.nodes.len();

        let mut parent_count = vec![0usize; node_count];
        for node in &self.nodes {
            for child in &node.children {
                parent_count[child.idx()] += 1;
            }
        }
        let mut sole_parent = vec![usize::MAX; node_count];
        for (idx, node) in self.nodes.iter().enumerate() {
            for child in &node.children {
                if parent_count[child.idx()] == 1 {
                    sole_parent[child.idx()] = idx;
                }
            }
        }

        let mut in_output = vec![false; node_count];
        for id in self.index.entries() {
            in_output[id.idx()] = true;
        }

        let compilable: Vec<bool> = self
            .nodes
            .iter()
            .map(|node| {
                node.kind == NodeKind::Function
                    && !node.is_compiled
                    && node
                        .function
                        .as_ref()
                        .is_some_and(|f| f.is_compilable() && f.is_deterministic())
            })
            .collect();

        // A node folds into its consumer's fragment only if nothing else
        // observes it.
        let absorbed: Vec<bool> = (0..node_count)
            .map(|idx| {
                compilable[idx]
                    && !in_output[idx]
                    && sole_parent[idx] != usize::MAX
                    && compilable[sole_parent[idx]]
            })
            .collect();

        for root in 0..node_count {
            if !compilable[root] || absorbed[root] {
                continue;
            }

            let mut member = vec![false; node_count];
            let mut stack = vec![root];
            while let Some(idx) = stack.pop() {
                if member[idx] {
                    continue;
                }
                member[idx] = true;
                for child in &self.nodes[idx].children {
                    if absorbed[child.idx()] {
                        stack.push(child.idx());
                    }
                }
            }

            let interior: Vec<usize> = (0..node_count).filter(|idx| member[*idx]).collect();
            if interior.len() < min_count {
                continue;
            }

            let fragment = self.build_fragment(&interior, root)?;
            let compiled = match &self.compilation_cache {
                Some(cache) => cache.get_or_compile(compiler, &fragment)?,
                None => compiler.compile(&fragment)?,
            };

            let frontier = self.fragment_frontier(&interior);
            let root_node = &mut self.nodes[root];
            root_node.children = frontier;
            root_node.function = Some(compiled);
            root_node.is_compiled = true;

            debug!(
                fused = interior.len(),
                signature = %fragment.signature,
                "fused compilable subgraph"
            );
        }

        Ok(())
    }

    /// Frontier children of a fragment, in first-use order.
    fn fragment_frontier(&self, interior: &[usize]) -> Vec<NodeId> {
        let member: HashSet<usize> = interior.iter().copied().collect();
        let mut frontier = Vec::new();
        for idx in interior {
            for child in &self.nodes[*idx].children {
                if !member.contains(&child.idx()) && !frontier.contains(child) {
                    frontier.push(*child);
                }
            }
        }
        frontier
    }

    fn build_fragment(&self, interior: &[usize], root: usize) -> Result<CompilableFragment> {
        let frontier = self.fragment_frontier(interior);
        let input_types: Vec<DataType> = frontier
            .iter()
            .map(|id| self.nodes[id.idx()].result_type.clone())
            .collect();

        let mut position = HashMap::new();
        for (pos, idx) in interior.iter().enumerate() {
            position.insert(*idx, pos);
        }

        let mut fragment_nodes = Vec::with_capacity(interior.len());
        let mut signature_parts = Vec::with_capacity(interior.len());
        for idx in interior {
            let node = &self.nodes[*idx];
            let function = node.function.clone().ok_or_else(|| {
                QuiverError::LogicalError("Compilable node without a function".to_string())
            })?;

            let mut args = Vec::with_capacity(node.children.len());
            let mut arg_parts = Vec::with_capacity(node.children.len());
            for child in &node.children {
                match position.get(&child.idx()) {
                    Some(pos) => {
                        args.push(FragmentArg::Node(*pos));
                        arg_parts.push(format!("@{pos}"));
                    }
                    None => {
                        let pos = frontier
                            .iter()
                            .position(|id| id == child)
                            .ok_or_else(|| {
                                QuiverError::LogicalError(
                                    "Fragment frontier is incomplete".to_string(),
                                )
                            })?;
                        args.push(FragmentArg::Input(pos));
                        arg_parts.push(format!(
                            "#{pos} {}",
                            self.nodes[child.idx()].result_type
                        ));
                    }
                }
            }

            signature_parts.push(format!("{}({})", function.name(), arg_parts.join(", ")));
            fragment_nodes.push(FragmentNode { function, args });
        }

        Ok(CompilableFragment {
            nodes: fragment_nodes,
            input_types,
            result_type: self.nodes[root].result_type.clone(),
            signature: signature_parts.join("; "),
        })
    }

    /// Which nodes are reachable from the output.
    pub(crate) fn reachable_from_output(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self.index.entries().to_vec();
        while let Some(id) = stack.pop() {
            if reachable[id.idx()] {
                continue;
            }
            reachable[id.idx()] = true;
            stack.extend(self.nodes[id.idx()].children.iter().copied());
        }
        reachable
    }

    /// Output column names, comma separated.
    pub fn dump_names(&self) -> String {
        self.output_names().join(", ")
    }

    /// Multi-line description of every node plus the output, for EXPLAIN and
    /// debugging.
    pub fn dump_dag(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            let _ = write!(
                out,
                "{idx}: {} {} {}",
                node.kind.as_str(),
                node.result_name,
                node.result_type
            );
            if !node.children.is_empty() {
                let children = node
                    .children
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = write!(out, " <- [{children}]");
            }
            if let Some(column) = &node.column {
                if let Some(value) = column.as_const().map(|c| &c.value) {
                    let _ = write!(out, " = {value}");
                }
            }
            if node.is_compiled {
                out.push_str(" [compiled]");
            }
            out.push('\n');
        }

        let index = self
            .index
            .entries()
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "Output: [{index}]");
        out
    }
}

#[cfg(test)]
mod tests {
    use quiver_column::scalar::ScalarValue;

    use crate::compile::FragmentInterpreter;
    use crate::functions::scalar::arith::{Add, Mul};
    use crate::functions::scalar::misc::{Ignore, Random};

    use super::*;

    fn int_constant(name: &str, value: i32) -> BlockColumn {
        BlockColumn::new(name, Column::constant(ScalarValue::Int32(value), 1))
    }

    #[test]
    fn duplicate_input_rejected() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        assert!(matches!(
            dag.add_input("a", DataType::Int64),
            Err(QuiverError::DuplicateInput(_))
        ));
    }

    #[test]
    fn unknown_identifier_on_build() {
        let mut dag = ActionsDag::new();
        assert!(matches!(
            dag.add_alias("missing", "x", false),
            Err(QuiverError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            dag.add_function(&Add, &["missing", "missing"], "s"),
            Err(QuiverError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn array_join_requires_list_source() {
        let mut dag = ActionsDag::new();
        dag.add_input("k", DataType::Int32).unwrap();
        assert!(matches!(
            dag.add_array_join("k", "e"),
            Err(QuiverError::TypeMismatch(_))
        ));
    }

    #[test]
    fn alias_shadowing_resolves_to_last() {
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int32).unwrap();
        let first = dag.add_alias("x", "y", false).unwrap();
        let second = dag.add_alias("x", "y", true).unwrap();
        assert_ne!(first, second);

        assert_eq!(dag.output_node("y"), Some(second));

        dag.remove_unused_actions(&["y".to_string()]).unwrap();
        // The replaced alias node is unreachable and pruned; the input and
        // surviving alias remain.
        assert_eq!(dag.nodes().len(), 2);
        let alias = dag.output_node("y").unwrap();
        assert_eq!(dag.node(alias).kind, NodeKind::Alias);
    }

    #[test]
    fn constant_folding_produces_column_node() {
        let mut dag = ActionsDag::new();
        dag.add_column(int_constant("c1", 2)).unwrap();
        dag.add_column(int_constant("c2", 3)).unwrap();
        let id = dag.add_function(&Add, &["c1", "c2"], "k").unwrap();

        let node = dag.node(id);
        assert_eq!(node.kind, NodeKind::Column);
        assert!(node.allow_constant_folding);
        assert_eq!(
            node.column.as_ref().and_then(|c| c.scalar_at(0)),
            Some(ScalarValue::Int32(5))
        );
        assert!(dag
            .nodes()
            .iter()
            .all(|node| node.kind != NodeKind::Function));
    }

    #[test]
    fn folding_skips_non_constant_children() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_column(int_constant("c", 3)).unwrap();
        let id = dag.add_function(&Add, &["a", "c"], "s").unwrap();
        assert_eq!(dag.node(id).kind, NodeKind::Function);
    }

    #[test]
    fn folding_skips_non_deterministic_functions() {
        let mut dag = ActionsDag::new();
        let id = dag.add_function(&Random, &[], "r").unwrap();
        assert_eq!(dag.node(id).kind, NodeKind::Function);
    }

    #[test]
    fn ignore_precomputes_but_blocks_folding() {
        let mut dag = ActionsDag::new();
        dag.add_column(int_constant("c", 1)).unwrap();
        let z = dag.add_function(&Ignore, &["c"], "z").unwrap();

        let node = dag.node(z);
        assert_eq!(node.kind, NodeKind::Column);
        assert!(!node.allow_constant_folding);
        assert!(node.column.as_ref().is_some_and(|c| c.is_const()));

        dag.add_column(int_constant("z2", 7)).unwrap();
        let w = dag.add_function(&Add, &["z", "z2"], "w").unwrap();
        assert_eq!(dag.node(w).kind, NodeKind::Function);
    }

    #[test]
    fn no_fold_flag_propagates_through_alias() {
        let mut dag = ActionsDag::new();
        dag.add_column(int_constant("c", 1)).unwrap();
        dag.add_function(&Ignore, &["c"], "z").unwrap();
        dag.add_alias("z", "z_renamed", false).unwrap();
        dag.add_column(int_constant("z2", 7)).unwrap();

        let w = dag.add_function(&Add, &["z_renamed", "z2"], "w").unwrap();
        assert_eq!(dag.node(w).kind, NodeKind::Function);
    }

    #[test]
    fn synthesized_function_name() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        let id = dag.add_function(&Add, &["a", "b"], "").unwrap();
        assert_eq!(dag.node(id).result_name, "+(a, b)");
        assert!(dag.output_node("+(a, b)").is_some());
    }

    #[test]
    fn remove_unused_is_idempotent() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();
        dag.add_function(&Mul, &["a", "b"], "m").unwrap();

        dag.remove_unused_actions(&["s".to_string()]).unwrap();
        let after_first: Vec<String> = dag.output_names();
        let node_count = dag.nodes().len();

        dag.remove_unused_actions(&["s".to_string()]).unwrap();
        assert_eq!(dag.output_names(), after_first);
        assert_eq!(dag.nodes().len(), node_count);

        // Only a, b, s survive.
        assert_eq!(node_count, 3);
        assert!(dag.output_node("m").is_none());
    }

    #[test]
    fn remove_unused_requires_known_names() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        assert!(matches!(
            dag.remove_unused_actions(&["nope".to_string()]),
            Err(QuiverError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn project_replaces_output_and_suppresses_pruning() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();

        dag.project(&[("s".to_string(), "sum".to_string())]).unwrap();
        assert!(dag.settings().projected_output);
        assert_eq!(dag.output_names(), vec!["sum".to_string()]);

        // Unused-removal passes are suppressed once projected.
        let nodes_before = dag.nodes().len();
        dag.remove_unused_actions(&["sum".to_string()]).unwrap();
        assert_eq!(dag.nodes().len(), nodes_before);
    }

    #[test]
    fn remove_and_restore_column() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();

        dag.remove_column("b").unwrap();
        assert!(dag.output_node("b").is_none());
        assert!(matches!(
            dag.remove_column("b"),
            Err(QuiverError::UnknownIdentifier(_))
        ));

        // The node is still in the arena and can come back.
        assert!(dag.try_restore_column("b"));
        assert!(dag.output_node("b").is_some());
        assert!(!dag.try_restore_column("never_existed"));
    }

    #[test]
    fn remove_duplicate_name_repoints_to_earlier() {
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int32).unwrap();
        let first = dag.add_alias("x", "y", false).unwrap();
        let second = dag.add_alias("x", "y", false).unwrap();
        assert_eq!(dag.output_node("y"), Some(second));

        dag.remove_column("y").unwrap();
        // The earlier occurrence becomes resolvable again.
        assert_eq!(dag.output_node("y"), Some(first));

        dag.remove_column("y").unwrap();
        assert!(dag.output_node("y").is_none());
    }

    #[test]
    fn empty_and_has_array_join() {
        let mut dag = ActionsDag::new();
        dag.add_input("arr", DataType::list_of(DataType::Int32))
            .unwrap();
        assert!(dag.empty());
        assert!(!dag.has_array_join());

        dag.add_array_join("arr", "e").unwrap();
        assert!(!dag.empty());
        assert!(dag.has_array_join());
    }

    fn split_fixture() -> ActionsDag {
        // k2 = k * 2 is independent of the array join; r = e + k2 is not.
        let mut dag = ActionsDag::new();
        dag.add_input("arr", DataType::list_of(DataType::Int32))
            .unwrap();
        dag.add_input("k", DataType::Int32).unwrap();
        dag.add_column(int_constant("2", 2)).unwrap();
        dag.add_function(&Mul, &["k", "2"], "k2").unwrap();
        dag.add_array_join("arr", "e").unwrap();
        dag.add_function(&Add, &["e", "k2"], "r").unwrap();
        dag.remove_unused_actions(&["r".to_string()]).unwrap();
        dag
    }

    #[test]
    fn split_before_array_join_structure() {
        let mut dag = split_fixture();
        let pre = dag
            .split_before_array_join(&HashSet::from(["arr".to_string()]))
            .unwrap()
            .expect("splittable");

        // The extracted part exposes the multiply alongside the array
        // source and requires the original inputs.
        let pre_outputs = pre.output_names();
        assert!(pre_outputs.contains(&"arr".to_string()));
        assert!(pre_outputs.contains(&"k2".to_string()));
        let pre_required: Vec<String> = pre
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert_eq!(pre_required, vec!["k".to_string(), "arr".to_string()]);

        // The remainder takes the cut columns as inputs and keeps the
        // array join and the add.
        let post_required: Vec<String> = dag
            .required_columns()
            .into_iter()
            .map(|col| col.name)
            .collect();
        assert!(post_required.contains(&"arr".to_string()));
        assert!(post_required.contains(&"k2".to_string()));
        assert!(dag.has_array_join());
        assert!(dag
            .nodes()
            .iter()
            .all(|node| node.function.as_ref().map(|f| f.name()) != Some("*")));
        assert_eq!(dag.output_names(), vec!["r".to_string()]);
    }

    #[test]
    fn split_returns_none_when_everything_depends() {
        let mut dag = ActionsDag::new();
        dag.add_input("arr", DataType::list_of(DataType::Int32))
            .unwrap();
        dag.add_array_join("arr", "e").unwrap();
        let pre = dag
            .split_before_array_join(&HashSet::from(["arr".to_string()]))
            .unwrap();
        assert!(pre.is_none());
    }

    #[test]
    fn split_keeps_non_deterministic_functions() {
        let mut dag = ActionsDag::new();
        dag.add_input("arr", DataType::list_of(DataType::Int32))
            .unwrap();
        dag.add_function(&Random, &[], "rnd").unwrap();
        dag.add_array_join("arr", "e").unwrap();

        let pre = dag
            .split_before_array_join(&HashSet::from(["arr".to_string()]))
            .unwrap();
        // Nothing but the row-sensitive function could move, so nothing is
        // extracted.
        assert!(pre.is_none());
        assert!(dag
            .nodes()
            .iter()
            .any(|node| node.result_name == "rnd" && node.kind == NodeKind::Function));
    }

    #[test]
    fn compile_fuses_subgraph() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();
        dag.add_function(&Mul, &["s", "a"], "m").unwrap();
        dag.remove_unused_actions(&["m".to_string()]).unwrap();

        dag.settings_mut().compile_expressions = true;
        dag.settings_mut().min_count_to_compile_expression = 2;
        let cache = Arc::new(crate::compile::CompiledExpressionCache::new());
        dag.set_compilation_cache(cache.clone());

        dag.compile_expressions(&FragmentInterpreter).unwrap();

        let fused = dag
            .nodes()
            .iter()
            .find(|node| node.is_compiled)
            .expect("one fused node");
        assert_eq!(fused.result_name, "m");
        assert_eq!(fused.result_type, DataType::Int32);
        // The fused node reads the frontier inputs directly.
        assert_eq!(fused.children.len(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn compile_respects_min_count() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();

        dag.settings_mut().compile_expressions = true;
        dag.settings_mut().min_count_to_compile_expression = 2;
        dag.compile_expressions(&FragmentInterpreter).unwrap();

        assert!(dag.nodes().iter().all(|node| !node.is_compiled));
    }

    #[test]
    fn compile_disabled_is_noop() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "a"], "s").unwrap();
        dag.add_function(&Mul, &["s", "a"], "m").unwrap();

        dag.compile_expressions(&FragmentInterpreter).unwrap();
        assert!(dag.nodes().iter().all(|node| !node.is_compiled));
    }

    #[test]
    fn clone_is_independent() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "a"], "s").unwrap();

        let clone = dag.clone();
        dag.remove_unused_actions(&[]).unwrap();
        assert!(dag.nodes().is_empty());

        assert_eq!(clone.nodes().len(), 2);
        assert!(clone.output_node("s").is_some());
    }

    #[test]
    fn dump_formats_are_stable() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int32).unwrap();
        dag.add_input("b", DataType::Int32).unwrap();
        dag.add_function(&Add, &["a", "b"], "s").unwrap();

        assert_eq!(dag.dump_names(), "a, b, s");
        let dump = dag.dump_dag();
        assert!(dump.contains("0: INPUT a Int32"));
        assert!(dump.contains("2: FUNCTION s Int32 <- [0, 1]"));
        assert!(dump.contains("Output: [0, 1, 2]"));
    }

    #[test]
    fn from_columns_keeps_constants_unless_opted_out() {
        let columns = vec![
            ColumnWithType::new("a", DataType::Int32),
            ColumnWithType::with_column("c", Column::constant(ScalarValue::Int32(4), 1)),
        ];

        let dag = ActionsDag::from_columns(&columns, &HashSet::new()).unwrap();
        assert_eq!(dag.node(dag.output_node("a").unwrap()).kind, NodeKind::Input);
        assert_eq!(
            dag.node(dag.output_node("c").unwrap()).kind,
            NodeKind::Column
        );

        let dag = ActionsDag::from_columns(&columns, &HashSet::from(["c".to_string()]))
            .unwrap();
        assert_eq!(dag.node(dag.output_node("c").unwrap()).kind, NodeKind::Input);
    }
}
