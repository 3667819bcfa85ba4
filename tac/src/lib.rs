//! The three-address-code side of Loam: a conventional control-flow IR
//! used on the import and export paths.
//!
//! A [Module] owns an [inter-procedural graph](IpGraph) of function and
//! data definitions; each function body is a [Cfg] of basic blocks holding
//! [three-address codes](Tac) over module-level [variables](Variable).
//! Before a function can be lowered into the data-flow graph its SSA form
//! is [destroyed](destruct_ssa), the graph is [restructured](restructure)
//! into linear/branch/loop shape, [aggregated](aggregate) into a region
//! tree, and [annotated](annotate) with demand sets.

mod aggregation;
mod annotation;
mod cfg;
mod domtree;
mod ipgraph;
mod module;
mod ops;
mod ssa;
mod structure;
mod tac;

pub use self::{
    aggregation::{AggNode, aggregate},
    annotation::{DemandSet, DemandTree, VarSet, annotate},
    cfg::{Cfg, CfgEdge, CfgError, CfgNodeId, CfgNodeKind},
    domtree::{DomTreeNode, domtree, ipostdoms},
    ipgraph::{IpGraph, IpNode, IpNodeData},
    module::{Module, Variable},
    ops::{AssignmentOperation, BranchOperation, SsaPhiOperation, UndefOperation},
    ssa::destruct_ssa,
    structure::{is_linear, is_reducible, is_structured, restructure},
    tac::Tac,
};
