//! The Loam RVSDG: a regionalized value-state dependence graph.
//!
//! A [Graph] owns a root [region](RegionId) of nodes connected by
//! typed value and state edges. Control flow is structural: conditionals
//! are [γ nodes](GammaNode), tail-controlled loops are [θ nodes](ThetaNode),
//! functions are [λ nodes](LambdaNode), mutual recursion is a
//! [φ group](PhiNode), and global data are [δ nodes](DeltaNode). Within a
//! region, edges form a DAG; the only back-edges in the system are the θ
//! results feeding the next iteration.
//!
//! Simple operations are inserted through [Graph::create_normalized], which
//! applies the operation's [normal form](NormalForm): identity reductions,
//! constant folding, and common-subexpression elimination, each of which can
//! be toggled per graph and per operation.

mod bitstring;
mod delta;
mod gamma;
mod graph;
mod lambda;
mod normal_form;
mod notifier;
mod operation;
mod ops;
mod phi;
mod subst;
mod theta;
mod traverser;
pub mod view;

pub use self::{
    bitstring::{
        BitBinary, BitBinaryKind, BitCompare, BitCompareKind, BitConstant, BitUnary, BitUnaryKind,
        BitValue, constant_value,
    },
    delta::DeltaNode,
    gamma::{EntryVar, ExitVar, GammaNode},
    graph::{Graph, GraphError, Input, NodeId, Output, RegionId},
    lambda::{CtxVar, LambdaNode},
    normal_form::NormalForm,
    notifier::{GraphEvent, GraphListener},
    operation::{
        BinaryOperation, BinopReduction, CompareResult, DeltaSignature, LambdaSignature, Linkage,
        SimpleOperation, StructuralOperation, UnaryOperation, UnopReduction, dyn_eq,
    },
    ops::{
        CallOperation, ControlConstant, LoadOperation, MatchOperation, MemStateMergeOperation,
        StoreOperation,
    },
    phi::{PhiBuilder, PhiNode},
    subst::{SubstitutionMap, copy_node, copy_region_contents},
    theta::{LoopVar, ThetaNode},
    traverser::{BottomUpTraverser, TopDownTraverser},
};
