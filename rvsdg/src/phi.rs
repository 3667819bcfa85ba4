use loamc_types::Type;

use crate::{
    graph::{Graph, GraphError, Input, NodeId, Output, RegionId},
    lambda::CtxVar,
    operation::StructuralOperation,
};

/// Builder for a φ node: a mutual-recursion binding group.
///
/// Recursion variables are declared first, each visible inside the body as
/// an argument; the definitions (typically λ outputs created inside the
/// body) are then bound to them, and finalizing exposes one node output
/// per recursion variable. Context variables may be captured after the
/// recursion variables. φ regions do not nest.
pub struct PhiBuilder {
    node: NodeId,
    bindings: Vec<Option<Output>>,
    ctx_vars: usize,
}

/// A finalized φ node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiNode {
    node: NodeId,
}

impl PhiBuilder {
    pub fn new(graph: &mut Graph, region: RegionId) -> Result<Self, GraphError> {
        // Walk the owner chain; a phi anywhere above makes this a nested one.
        let mut current = region;
        loop {
            if let Some(owner) = graph.region_owner(current) {
                if matches!(graph.structural_op(owner), Some(StructuralOperation::Phi)) {
                    return Err(GraphError::NestedPhi);
                }
                current = graph.node_region(owner);
            } else {
                break;
            }
        }
        let node = graph.add_structural_node(region, StructuralOperation::Phi, 1);
        Ok(Self {
            node,
            bindings: Vec::new(),
            ctx_vars: 0,
        })
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.subregions(self.node)[0]
    }

    /// Declare a recursion variable of the given type, returning the body
    /// argument through which the group members reference each other.
    pub fn add_recursion_var(&mut self, graph: &mut Graph, ty: Type) -> Output {
        assert_eq!(
            self.ctx_vars, 0,
            "recursion variables must be declared before context variables"
        );
        let body = self.subregion(graph);
        self.bindings.push(None);
        graph.add_argument(body, ty)
    }

    /// Capture a free variable from the surrounding region.
    pub fn add_context_var(
        &mut self,
        graph: &mut Graph,
        origin: Output,
    ) -> Result<CtxVar, GraphError> {
        let body = self.subregion(graph);
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.output_type(origin);
        let argument = graph.add_argument(body, ty);
        self.ctx_vars += 1;
        Ok(CtxVar { input, argument })
    }

    /// Bind the definition of recursion variable `index` to `origin`, an
    /// output inside the body.
    pub fn bind(
        &mut self,
        graph: &Graph,
        index: usize,
        origin: Output,
    ) -> Result<(), GraphError> {
        let body = self.subregion(graph);
        let expected = graph.output_type(graph.argument(body, index));
        let found = graph.output_type(origin);
        if found != expected {
            return Err(GraphError::TypeMismatch {
                index,
                expected,
                found,
            });
        }
        self.bindings[index] = Some(origin);
        Ok(())
    }

    /// Seal the group. Every recursion variable must be bound.
    pub fn finalize(self, graph: &mut Graph) -> Result<PhiNode, GraphError> {
        let body = self.subregion(graph);
        let nrec = self.bindings.len();
        let bound: Vec<Output> = self
            .bindings
            .iter()
            .copied()
            .flatten()
            .collect();
        if bound.len() != nrec {
            return Err(GraphError::ArityMismatch {
                expected: nrec,
                found: bound.len(),
            });
        }
        for origin in &bound {
            graph.add_result(body, *origin)?;
        }
        for index in 0..nrec {
            let ty = graph.output_type(graph.argument(body, index));
            graph.add_output(self.node, ty);
        }
        Ok(PhiNode { node: self.node })
    }
}

impl PhiNode {
    /// View `node` as a φ, if it is one.
    pub fn try_from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        match graph.structural_op(node) {
            Some(StructuralOperation::Phi) => Some(Self { node }),
            _ => None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.subregions(self.node)[0]
    }

    pub fn num_recursion_vars(&self, graph: &Graph) -> usize {
        graph.num_outputs(self.node)
    }

    /// The body argument of recursion variable `index`.
    pub fn recursion_argument(&self, graph: &Graph, index: usize) -> Output {
        debug_assert!(index < self.num_recursion_vars(graph));
        graph.argument(self.subregion(graph), index)
    }

    /// The definition bound to recursion variable `index`.
    pub fn recursion_definition(&self, graph: &Graph, index: usize) -> Output {
        graph.origin(graph.result(self.subregion(graph), index))
    }

    /// The outer output of recursion variable `index`.
    pub fn output(&self, graph: &Graph, index: usize) -> Output {
        graph.output(self.node, index)
    }

    /// One input per context variable, in declaration order.
    pub fn context_vars(&self, graph: &Graph) -> Vec<CtxVar> {
        let body = self.subregion(graph);
        let nrec = self.num_recursion_vars(graph);
        (0..graph.num_inputs(self.node))
            .map(|index| CtxVar {
                input: graph.input(self.node, index),
                argument: graph.argument(body, nrec + index),
            })
            .collect()
    }
}
