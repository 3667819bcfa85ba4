use loamc_types::Type;

use crate::{
    graph::{Graph, GraphError, Input, NodeId, Output, RegionId},
    operation::StructuralOperation,
};

/// A γ node: a control predicate selects one of several alternative
/// sub-regions.
///
/// Input 0 is the predicate; every further input is an entry variable,
/// visible inside each branch as the argument with the same position.
/// Every output is an exit variable, fed by one result per branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GammaNode {
    node: NodeId,
}

/// The view of one γ entry variable: the outer input and the per-branch
/// arguments it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryVar {
    pub input: Input,
    pub arguments: Vec<Output>,
}

/// The view of one γ exit variable: the per-branch results and the outer
/// output they feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitVar {
    pub results: Vec<Input>,
    pub output: Output,
}

impl GammaNode {
    /// Create a γ in the predicate's region, with one empty sub-region per
    /// alternative of the predicate's control type.
    pub fn create(graph: &mut Graph, predicate: Output) -> Result<Self, GraphError> {
        let ty = graph.output_type(predicate);
        let Some(alternatives) = ty.alternatives() else {
            return Err(GraphError::PredicateType { found: ty });
        };
        let region = graph.output_region(predicate);
        let node = graph.add_structural_node(
            region,
            StructuralOperation::Gamma { alternatives },
            alternatives,
        );
        graph.add_input(node, predicate)?;
        Ok(Self { node })
    }

    /// View `node` as a γ, if it is one.
    pub fn try_from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        match graph.structural_op(node) {
            Some(StructuralOperation::Gamma { .. }) => Some(Self { node }),
            _ => None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn alternatives(&self, graph: &Graph) -> usize {
        graph.subregions(self.node).len()
    }

    pub fn subregion(&self, graph: &Graph, index: usize) -> RegionId {
        graph.subregions(self.node)[index]
    }

    pub fn predicate(&self, graph: &Graph) -> Input {
        graph.input(self.node, 0)
    }

    pub fn num_entry_vars(&self, graph: &Graph) -> usize {
        graph.num_inputs(self.node) - 1
    }

    pub fn num_exit_vars(&self, graph: &Graph) -> usize {
        graph.num_outputs(self.node)
    }

    /// Route a value from outside into every branch.
    pub fn add_entry_var(&self, graph: &mut Graph, origin: Output) -> Result<EntryVar, GraphError> {
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.output_type(origin);
        let subregions: Vec<RegionId> = graph.subregions(self.node).to_vec();
        let arguments = subregions
            .into_iter()
            .map(|sub| graph.add_argument(sub, ty.clone()))
            .collect();
        Ok(EntryVar { input, arguments })
    }

    /// Route one value per branch out of the γ. All origins must have the
    /// same type; `origins[i]` must be visible in branch `i`.
    pub fn add_exit_var(&self, graph: &mut Graph, origins: &[Output]) -> Result<ExitVar, GraphError> {
        let alternatives = self.alternatives(graph);
        if origins.len() != alternatives {
            return Err(GraphError::ArityMismatch {
                expected: alternatives,
                found: origins.len(),
            });
        }
        let ty = graph.output_type(origins[0]);
        for (index, origin) in origins.iter().enumerate().skip(1) {
            let found = graph.output_type(*origin);
            if found != ty {
                return Err(GraphError::TypeMismatch {
                    index,
                    expected: ty,
                    found,
                });
            }
        }
        let subregions: Vec<RegionId> = graph.subregions(self.node).to_vec();
        let mut results = Vec::with_capacity(alternatives);
        for (sub, origin) in subregions.into_iter().zip(origins) {
            results.push(graph.add_result(sub, *origin)?);
        }
        let output = graph.add_output(self.node, ty);
        Ok(ExitVar { results, output })
    }

    /// Recover the entry-variable view of one of this γ's inputs.
    pub fn entry_var(&self, graph: &Graph, input: Input) -> Option<EntryVar> {
        match input {
            Input::Node { node, index } if node == self.node && index >= 1 => {
                let arguments = graph
                    .subregions(self.node)
                    .iter()
                    .map(|sub| graph.argument(*sub, index - 1))
                    .collect();
                Some(EntryVar { input, arguments })
            }
            _ => None,
        }
    }

    /// Recover the exit-variable view of one of this γ's outputs.
    pub fn exit_var(&self, graph: &Graph, output: Output) -> Option<ExitVar> {
        match output {
            Output::Node { node, index } if node == self.node => {
                let results = graph
                    .subregions(self.node)
                    .iter()
                    .map(|sub| graph.result(*sub, index))
                    .collect();
                Some(ExitVar { results, output })
            }
            _ => None,
        }
    }

    pub fn entry_vars(&self, graph: &Graph) -> Vec<EntryVar> {
        (1..graph.num_inputs(self.node))
            .map(|index| {
                self.entry_var(graph, Input::Node {
                    node: self.node,
                    index,
                })
                .expect("entry variable index out of range")
            })
            .collect()
    }

    pub fn exit_vars(&self, graph: &Graph) -> Vec<ExitVar> {
        (0..graph.num_outputs(self.node))
            .map(|index| {
                self.exit_var(graph, Output::Node {
                    node: self.node,
                    index,
                })
                .expect("exit variable index out of range")
            })
            .collect()
    }

    /// Delete an entry variable whose branch arguments no longer have
    /// users.
    pub fn remove_entry_var(
        &self,
        graph: &mut Graph,
        entry_var: &EntryVar,
    ) -> Result<(), GraphError> {
        if entry_var.arguments.iter().any(|arg| graph.num_users(*arg) != 0) {
            return Err(GraphError::LiveUsers);
        }
        let position = entry_var.input.index() - 1;
        let subregions: Vec<RegionId> = graph.subregions(self.node).to_vec();
        for sub in subregions {
            graph.remove_argument(sub, position)?;
        }
        graph.remove_input(self.node, entry_var.input.index());
        Ok(())
    }

    /// Delete an exit variable whose output no longer has users.
    pub fn remove_exit_var(
        &self,
        graph: &mut Graph,
        exit_var: &ExitVar,
    ) -> Result<(), GraphError> {
        let position = exit_var.output.index();
        graph.remove_output(self.node, position)?;
        let subregions: Vec<RegionId> = graph.subregions(self.node).to_vec();
        for sub in subregions {
            graph.remove_result(sub, position);
        }
        Ok(())
    }

    /// The type routed through an entry variable.
    pub fn entry_var_type(&self, graph: &Graph, entry_var: &EntryVar) -> Type {
        graph.input_type(entry_var.input)
    }
}
