use loamc_types::Type;

use crate::{
    bitstring::{BitConstant, BitValue},
    graph::{Graph, GraphError, Input, NodeId, Output, RegionId},
    operation::StructuralOperation,
};

/// A θ node: a tail-controlled loop with a single body sub-region.
///
/// Loop variable `i` ties together input `i` (the value on entry), body
/// argument `i` (the value at the start of each iteration), body result
/// `i + 1` (the value at the end of each iteration, fed back), and output
/// `i` (the value after the final iteration). Body result 0 is the boolean
/// continue predicate: while it evaluates true, the loop iterates again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThetaNode {
    node: NodeId,
}

/// The view of one θ loop variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopVar {
    pub input: Input,
    pub argument: Output,
    pub result: Input,
    pub output: Output,
}

impl ThetaNode {
    /// Create a θ with an empty body in `region`.
    ///
    /// The continue predicate is seeded with a false constant, so a fresh θ
    /// runs its body exactly once until [set_predicate](Self::set_predicate)
    /// rewires it.
    pub fn create(graph: &mut Graph, region: RegionId) -> Result<Self, GraphError> {
        let node = graph.add_structural_node(region, StructuralOperation::Theta, 1);
        let body = graph.subregions(node)[0];
        let seed = graph.create_normalized(
            body,
            Box::new(BitConstant::new(BitValue::bool(false))),
            &[],
        )?;
        graph.add_result(body, seed[0])?;
        Ok(Self { node })
    }

    /// View `node` as a θ, if it is one.
    pub fn try_from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        match graph.structural_op(node) {
            Some(StructuralOperation::Theta) => Some(Self { node }),
            _ => None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.subregions(self.node)[0]
    }

    pub fn num_loop_vars(&self, graph: &Graph) -> usize {
        graph.num_inputs(self.node)
    }

    /// The body result holding the continue predicate.
    pub fn predicate(&self, graph: &Graph) -> Input {
        graph.result(self.subregion(graph), 0)
    }

    /// Rewire the continue predicate to `origin`, which must be boolean.
    pub fn set_predicate(&self, graph: &mut Graph, origin: Output) -> Result<(), GraphError> {
        let found = graph.output_type(origin);
        if found != Type::BOOL {
            return Err(GraphError::TypeMismatch {
                index: 0,
                expected: Type::BOOL,
                found,
            });
        }
        graph.divert_origin(self.predicate(graph), origin)
    }

    /// Add a loop variable entering with the value of `origin`. The body
    /// result is initially the argument itself, i.e. the variable starts
    /// out as a pass-through.
    pub fn add_loop_var(&self, graph: &mut Graph, origin: Output) -> Result<LoopVar, GraphError> {
        let body = self.subregion(graph);
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.output_type(origin);
        let argument = graph.add_argument(body, ty.clone());
        let result = graph.add_result(body, argument)?;
        let output = graph.add_output(self.node, ty);
        Ok(LoopVar {
            input,
            argument,
            result,
            output,
        })
    }

    pub fn loop_var(&self, graph: &Graph, index: usize) -> LoopVar {
        debug_assert!(index < self.num_loop_vars(graph));
        let body = self.subregion(graph);
        LoopVar {
            input: graph.input(self.node, index),
            argument: graph.argument(body, index),
            result: graph.result(body, index + 1),
            output: graph.output(self.node, index),
        }
    }

    pub fn loop_vars(&self, graph: &Graph) -> Vec<LoopVar> {
        (0..self.num_loop_vars(graph)).map(|index| self.loop_var(graph, index)).collect()
    }

    /// The loop variable bound to one of this θ's inputs.
    pub fn loop_var_for_input(&self, graph: &Graph, input: Input) -> Option<LoopVar> {
        match input {
            Input::Node { node, index } if node == self.node => Some(self.loop_var(graph, index)),
            _ => None,
        }
    }

    /// The loop variable bound to one of this θ's outputs.
    pub fn loop_var_for_output(&self, graph: &Graph, output: Output) -> Option<LoopVar> {
        match output {
            Output::Node { node, index } if node == self.node => Some(self.loop_var(graph, index)),
            _ => None,
        }
    }

    /// True if the variable flows through the body unchanged.
    pub fn is_pass_through(&self, graph: &Graph, loop_var: &LoopVar) -> bool {
        graph.origin(loop_var.result) == loop_var.argument
    }

    /// Delete a loop variable. Its argument and output must have no users
    /// left; the body result is detached as part of the removal.
    pub fn remove_loop_var(&self, graph: &mut Graph, loop_var: &LoopVar) -> Result<(), GraphError> {
        let body = self.subregion(graph);
        if graph.num_users(loop_var.output) != 0 {
            return Err(GraphError::LiveUsers);
        }
        graph.remove_result(body, loop_var.result.index());
        graph.remove_argument(body, loop_var.argument.index())?;
        graph.remove_input(self.node, loop_var.input.index());
        graph.remove_output(self.node, loop_var.output.index())?;
        Ok(())
    }
}
