use loamc_types::Type;

use crate::{
    graph::{Graph, GraphError, Input, NodeId, Output, RegionId},
    operation::{LambdaSignature, StructuralOperation},
};

/// A λ node: a function definition.
///
/// The body's leading arguments are the function parameters; any captured
/// free variables follow as context-variable arguments. Finalizing the λ
/// seals the body results and produces the function-valued output that
/// calls and data definitions reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LambdaNode {
    node: NodeId,
}

/// The view of one captured free variable: the outer input and the body
/// argument it binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxVar {
    pub input: Input,
    pub argument: Output,
}

impl LambdaNode {
    pub fn create(
        graph: &mut Graph,
        region: RegionId,
        signature: LambdaSignature,
    ) -> Result<Self, GraphError> {
        let params: Vec<Type> = signature.ty.params().to_vec();
        let node =
            graph.add_structural_node(region, StructuralOperation::Lambda(signature), 1);
        let body = graph.subregions(node)[0];
        for param in params {
            graph.add_argument(body, param);
        }
        Ok(Self { node })
    }

    /// View `node` as a λ, if it is one.
    pub fn try_from_node(graph: &Graph, node: NodeId) -> Option<Self> {
        match graph.structural_op(node) {
            Some(StructuralOperation::Lambda(_)) => Some(Self { node }),
            _ => None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn subregion(&self, graph: &Graph) -> RegionId {
        graph.subregions(self.node)[0]
    }

    pub fn signature<'a>(&self, graph: &'a Graph) -> &'a LambdaSignature {
        match graph.structural_op(self.node) {
            Some(StructuralOperation::Lambda(signature)) => signature,
            _ => unreachable!("lambda node carries a non-lambda operation"),
        }
    }

    pub fn num_params(&self, graph: &Graph) -> usize {
        self.signature(graph).ty.params.len()
    }

    /// The body argument bound to parameter `index`.
    pub fn param(&self, graph: &Graph, index: usize) -> Output {
        debug_assert!(index < self.num_params(graph));
        graph.argument(self.subregion(graph), index)
    }

    /// Capture a free variable from the surrounding region.
    pub fn add_context_var(&self, graph: &mut Graph, origin: Output) -> Result<CtxVar, GraphError> {
        let body = self.subregion(graph);
        let input = graph.add_input(self.node, origin)?;
        let ty = graph.output_type(origin);
        let argument = graph.add_argument(body, ty);
        Ok(CtxVar { input, argument })
    }

    pub fn context_vars(&self, graph: &Graph) -> Vec<CtxVar> {
        let body = self.subregion(graph);
        let nparams = self.num_params(graph);
        (0..graph.num_inputs(self.node))
            .map(|index| CtxVar {
                input: graph.input(self.node, index),
                argument: graph.argument(body, nparams + index),
            })
            .collect()
    }

    /// Seal the body with its return values and produce the function
    /// output.
    pub fn finalize(&self, graph: &mut Graph, results: &[Output]) -> Result<Output, GraphError> {
        let signature = self.signature(graph);
        let expected: Vec<Type> = signature.ty.results().to_vec();
        let fn_ty = Type::Function(signature.ty.clone());
        if results.len() != expected.len() {
            return Err(GraphError::ArityMismatch {
                expected: expected.len(),
                found: results.len(),
            });
        }
        for (index, (origin, expected)) in results.iter().zip(expected).enumerate() {
            let found = graph.output_type(*origin);
            if found != expected {
                return Err(GraphError::TypeMismatch {
                    index,
                    expected,
                    found,
                });
            }
        }
        let body = self.subregion(graph);
        for origin in results {
            graph.add_result(body, *origin)?;
        }
        Ok(graph.add_output(self.node, fn_ty))
    }

    /// The function value produced by this λ.
    pub fn output(&self, graph: &Graph) -> Output {
        graph.output(self.node, 0)
    }
}
