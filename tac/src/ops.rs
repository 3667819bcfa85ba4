//! Operations that only occur in three-address code, never in the data-flow
//! graph: SSA φs, plain assignments, undefined values, and block
//! terminators.

use std::any::Any;

use loamc_rvsdg::{SimpleOperation, dyn_eq};
use loamc_types::Type;

use crate::cfg::CfgNodeId;

/// Selects, at the head of a basic block, the operand contributed by the
/// predecessor the block was entered from.
///
/// Distinct from the structural φ of the data-flow graph, which binds
/// mutual recursion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsaPhiOperation {
    pub ty: Type,
    /// Predecessor block per operand, in operand order.
    pub predecessors: Vec<CfgNodeId>,
}

impl SsaPhiOperation {
    pub fn new(ty: Type, predecessors: Vec<CfgNodeId>) -> Self {
        Self { ty, predecessors }
    }

    pub fn predecessor(&self, index: usize) -> CfgNodeId {
        self.predecessors[index]
    }
}

impl SimpleOperation for SsaPhiOperation {
    fn num_operands(&self) -> usize {
        self.predecessors.len()
    }

    fn operand_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn debug_string(&self) -> String {
        "phi".to_string()
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Copies a value into a (non-SSA) variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentOperation {
    pub ty: Type,
}

impl AssignmentOperation {
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

impl SimpleOperation for AssignmentOperation {
    fn num_operands(&self) -> usize {
        1
    }

    fn operand_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn debug_string(&self) -> String {
        "assign".to_string()
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Produces an undefined value of the given type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndefOperation {
    pub ty: Type,
}

impl UndefOperation {
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

impl SimpleOperation for UndefOperation {
    fn num_operands(&self) -> usize {
        0
    }

    fn operand_type(&self, _index: usize) -> Type {
        unreachable!("undef has no operands")
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn debug_string(&self) -> String {
        "undef".to_string()
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Terminates a basic block, selecting the out-edge matching the control
/// operand's alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOperation {
    pub alternatives: usize,
}

impl BranchOperation {
    pub fn new(alternatives: usize) -> Self {
        assert!(alternatives >= 2);
        Self { alternatives }
    }
}

impl SimpleOperation for BranchOperation {
    fn num_operands(&self) -> usize {
        1
    }

    fn operand_type(&self, _index: usize) -> Type {
        Type::Control(self.alternatives)
    }

    fn num_results(&self) -> usize {
        0
    }

    fn result_type(&self, _index: usize) -> Type {
        unreachable!("branches produce no results")
    }

    fn debug_string(&self) -> String {
        format!("branch {}", self.alternatives)
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
