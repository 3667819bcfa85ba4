use std::{any::Any, fmt, sync::Arc};

use loamc_types::{FunctionType, Type};

use crate::graph::{Graph, GraphError, NodeId, Output, RegionId};

/// The semantics of a simple node: a pure mapping from operand values to
/// result values, described by an ordered operand/result signature.
///
/// Implementations are plain value types; two nodes are congruent for CSE
/// purposes when their operations compare [equal](SimpleOperation::equals)
/// and their operands are identical outputs.
///
/// Reductions are optional capabilities: an operation that can simplify its
/// operands exposes them through [as_unary](SimpleOperation::as_unary) /
/// [as_binary](SimpleOperation::as_binary) rather than through the base
/// interface.
pub trait SimpleOperation: Any + fmt::Debug {
    fn num_operands(&self) -> usize;

    /// The declared type of operand `index`.
    fn operand_type(&self, index: usize) -> Type;

    fn num_results(&self) -> usize;

    /// The declared type of result `index`.
    fn result_type(&self, index: usize) -> Type;

    /// A short human-readable rendering used by diagnostics and dumps.
    fn debug_string(&self) -> String;

    fn equals(&self, other: &dyn SimpleOperation) -> bool;

    fn copy(&self) -> Box<dyn SimpleOperation>;

    fn as_any(&self) -> &dyn Any;

    /// True for nullary operations producing a statically-known value.
    fn is_constant(&self) -> bool {
        false
    }

    /// True for operations with side effects that must stay live even when
    /// no output has users (stores, calls).
    fn has_effects(&self) -> bool {
        false
    }

    fn as_unary(&self) -> Option<&dyn UnaryOperation> {
        None
    }

    fn as_binary(&self) -> Option<&dyn BinaryOperation> {
        None
    }
}

/// Compare a concrete operation against a type-erased one.
///
/// The standard body of [SimpleOperation::equals]:
///
/// ```ignore
/// fn equals(&self, other: &dyn SimpleOperation) -> bool {
///     dyn_eq(self, other)
/// }
/// ```
pub fn dyn_eq<T>(this: &T, other: &dyn SimpleOperation) -> bool
where
    T: SimpleOperation + PartialEq,
{
    other.as_any().downcast_ref::<T>().is_some_and(|other| other == this)
}

/// How a unary operation can simplify its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnopReduction {
    /// The operand is a constant; fold the operation into a new constant.
    Constant,
    /// The operand is this operation's own inverse applied to some value;
    /// yield that value directly.
    Inverse,
}

/// How a binary operation can simplify an operand pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinopReduction {
    /// Both operands are constants; fold into a new constant.
    Constants,
    /// The left operand is the neutral element; yield the right operand.
    LhsNeutral,
    /// The right operand is the neutral element; yield the left operand.
    RhsNeutral,
    /// One operand annihilates the other; fold into a new constant.
    Annihilator,
    /// Both operands are the same output and the operation cancels equal
    /// values: `x - x`, `x ^ x`, and comparisons that are statically false
    /// on equal operands. Folds to the zero/false constant.
    SelfInverse,
    /// Both operands are the same output and the operation leaves equal
    /// values alone: `x & x` and `x | x` yield the operand itself,
    /// comparisons that are statically true on equal operands fold to
    /// true.
    SelfIdempotent,
}

/// Outcome of statically deciding a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Undecidable,
    StaticTrue,
    StaticFalse,
}

/// Reduction capability of single-operand operations.
pub trait UnaryOperation: SimpleOperation {
    /// Check whether the operand admits a reduction, without mutating
    /// anything.
    fn can_reduce_operand(&self, graph: &Graph, operand: Output) -> Option<UnopReduction>;

    /// Apply a previously diagnosed reduction, returning the replacement
    /// output. May create nodes in `region`.
    fn reduce_operand(
        &self,
        graph: &mut Graph,
        region: RegionId,
        path: UnopReduction,
        operand: Output,
    ) -> Result<Output, GraphError>;
}

/// Reduction capability of two-operand operations.
pub trait BinaryOperation: SimpleOperation {
    fn is_associative(&self) -> bool {
        false
    }

    fn is_commutative(&self) -> bool {
        false
    }

    fn can_reduce_operand_pair(
        &self,
        graph: &Graph,
        lhs: Output,
        rhs: Output,
    ) -> Option<BinopReduction>;

    fn reduce_operand_pair(
        &self,
        graph: &mut Graph,
        region: RegionId,
        path: BinopReduction,
        lhs: Output,
        rhs: Output,
    ) -> Result<Output, GraphError>;
}

/// How a function or data definition is linked against other modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    Internal,
}

/// The signature carried by a λ node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaSignature {
    pub name: String,
    pub ty: Arc<FunctionType>,
    pub linkage: Linkage,
}

impl LambdaSignature {
    pub fn new(name: impl Into<String>, ty: FunctionType, linkage: Linkage) -> Self {
        Self {
            name: name.into(),
            ty: Arc::new(ty),
            linkage,
        }
    }
}

/// The signature carried by a δ node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSignature {
    pub name: String,
    pub ty: Type,
    pub linkage: Linkage,
    pub constant: bool,
}

/// The closed family of region-owning operators.
///
/// Unlike simple operations, the structural operators are known to every
/// part of the system (construction, passes, lowering), so they are a
/// sealed enum rather than trait objects.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralOperation {
    /// Multi-way select: a control predicate picks one of the alternative
    /// sub-regions.
    Gamma { alternatives: usize },
    /// Tail-controlled loop with a single body sub-region and a boolean
    /// continue predicate.
    Theta,
    /// Function definition producing a first-class function value.
    Lambda(LambdaSignature),
    /// Mutual-recursion binding group over λ definitions.
    Phi,
    /// Global data definition producing a pointer to the initialized value.
    Delta(DeltaSignature),
}

impl StructuralOperation {
    pub fn debug_string(&self) -> String {
        match self {
            Self::Gamma { alternatives } => format!("gamma[{alternatives}]"),
            Self::Theta => "theta".to_string(),
            Self::Lambda(sig) => format!("lambda {}", sig.name),
            Self::Phi => "phi".to_string(),
            Self::Delta(sig) => format!("delta {}", sig.name),
        }
    }
}

/// The operation slot of a node.
pub(crate) enum AnyOperation {
    Simple(Box<dyn SimpleOperation>),
    Structural(StructuralOperation),
}

impl AnyOperation {
    /// Assert the arity invariants tying a node's inputs/outputs to its
    /// operation and sub-regions. Called from [Graph::verify].
    pub(crate) fn verify_arity(&self, graph: &Graph, node: NodeId) {
        match self {
            Self::Simple(op) => {
                assert_eq!(graph.num_inputs(node), op.num_operands());
                assert_eq!(graph.num_outputs(node), op.num_results());
                assert!(graph.subregions(node).is_empty());
            }
            Self::Structural(StructuralOperation::Gamma { alternatives }) => {
                let subregions = graph.subregions(node);
                assert_eq!(subregions.len(), *alternatives);
                assert!(*alternatives >= 1, "gamma requires at least one alternative");
                let predicate = graph.input(node, 0);
                assert_eq!(
                    graph.input_type(predicate),
                    Type::Control(*alternatives),
                    "gamma predicate type does not match its alternative count"
                );
                let nentry = graph.num_inputs(node) - 1;
                let nexit = graph.num_outputs(node);
                for &sub in subregions {
                    assert_eq!(graph.num_arguments(sub), nentry, "gamma branch arity differs");
                    assert_eq!(graph.num_results(sub), nexit, "gamma branch arity differs");
                }
            }
            Self::Structural(StructuralOperation::Theta) => {
                let subregions = graph.subregions(node);
                assert_eq!(subregions.len(), 1);
                let body = subregions[0];
                let nvars = graph.num_inputs(node);
                assert_eq!(graph.num_outputs(node), nvars);
                assert_eq!(graph.num_arguments(body), nvars);
                assert_eq!(graph.num_results(body), nvars + 1);
                assert_eq!(
                    graph.input_type(graph.result(body, 0)),
                    Type::BOOL,
                    "theta continue predicate must be boolean"
                );
            }
            Self::Structural(StructuralOperation::Lambda(sig)) => {
                let subregions = graph.subregions(node);
                assert_eq!(subregions.len(), 1);
                let body = subregions[0];
                assert_eq!(
                    graph.num_arguments(body),
                    sig.ty.params.len() + graph.num_inputs(node),
                    "lambda arguments must be the parameters plus the context variables"
                );
                let nresults = graph.num_results(body);
                assert!(
                    nresults == 0 || nresults == sig.ty.results.len(),
                    "lambda body results do not match the signature"
                );
                assert!(graph.num_outputs(node) <= 1);
            }
            Self::Structural(StructuralOperation::Phi) => {
                let subregions = graph.subregions(node);
                assert_eq!(subregions.len(), 1);
                let body = subregions[0];
                let nrec = graph.num_outputs(node);
                assert_eq!(
                    graph.num_arguments(body),
                    nrec + graph.num_inputs(node),
                    "phi arguments must be the recursion variables plus the context variables"
                );
                let nresults = graph.num_results(body);
                assert!(nresults == 0 || nresults == nrec);
            }
            Self::Structural(StructuralOperation::Delta(_)) => {
                let subregions = graph.subregions(node);
                assert_eq!(subregions.len(), 1);
                assert!(graph.num_outputs(node) <= 1);
                assert!(graph.num_results(subregions[0]) <= 1);
            }
        }
    }
}
