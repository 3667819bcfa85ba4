use loamc_types::Type;

use crate::{
    graph::{Graph, GraphError, NodeId, Output, RegionId},
    lambda::CtxVar,
    operation::{DeltaSignature, StructuralOperation},
};

/// A δ node: a global data definition.
///
/// The body computes the initializer; the output is a pointer to the
/// defined data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaNode {
    node: NodeId,
}

impl DeltaNode {
    pub fn create(graph: &mut Graph, region: RegionId, signature: DeltaSignature) -> Self {
        let node = graph.add_structural_node(region, StructuralOperation::Delta(signature), 1);
        Self { node }
    }

    /// View `node` as a δ, if it is one.
    pub fn try_from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        match graph.structural_op(node) {
            Some(StructuralOperation::Delta(_)) => Some(Self { node }),
            _ => None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.subregions(self.node)[0]
    }

    pub fn signature<'a>(&self, graph: &'a Graph) -> &'a DeltaSignature {
        match graph.structural_op(self.node) {
            Some(StructuralOperation::Delta(signature)) => signature,
            _ => unreachable!("delta node carries a non-delta operation"),
        }
    }

    pub fn add_context_var(&self, graph: &mut Graph, origin: Output) -> Result<CtxVar, GraphError> {
        let body = self.subregion(graph);
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.output_type(origin);
        let argument = graph.add_argument(body, ty);
        Ok(CtxVar { input, argument })
    }

    /// One input per context variable, in declaration order.
    pub fn context_vars(&self, graph: &Graph) -> Vec<CtxVar> {
        let body = self.subregion(graph);
        (0..graph.num_inputs(self.node))
            .map(|index| CtxVar {
                input: graph.input(self.node, index),
                argument: graph.argument(body, index),
            })
            .collect()
    }

    /// Seal the definition with its initializer value and produce the
    /// pointer output.
    pub fn finalize(&self, graph: &mut Graph, init: Output) -> Result<Output, GraphError> {
        let expected = self.signature(graph).ty.clone();
        let found = graph.output_type(init);
        if found != expected {
            return Err(GraphError::TypeMismatch {
                index: 0,
                expected,
                found,
            });
        }
        let body = self.subregion(graph);
        graph.add_result(body, init)?;
        Ok(graph.add_output(self.node, Type::pointer(self.signature(graph).ty.clone())))
    }

    /// The pointer to the defined data.
    pub fn output(&self, graph: &Graph) -> Output {
        graph.output(self.node, 0)
    }
}
