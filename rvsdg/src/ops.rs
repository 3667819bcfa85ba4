use std::{any::Any, collections::BTreeMap, sync::Arc};

use loamc_types::{FunctionType, Type};

use crate::{
    bitstring::{BitValue, constant_value},
    graph::{Graph, GraphError, Output, RegionId},
    operation::{SimpleOperation, UnaryOperation, UnopReduction, dyn_eq},
};

/// A control-token constant selecting one of `alternatives`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConstant {
    pub alternative: usize,
    pub alternatives: usize,
}

impl ControlConstant {
    pub fn new(alternative: usize, alternatives: usize) -> Self {
        assert!(alternative < alternatives);
        Self {
            alternative,
            alternatives,
        }
    }
}

impl SimpleOperation for ControlConstant {
    fn num_operands(&self) -> usize {
        0
    }

    fn operand_type(&self, _index: usize) -> Type {
        unreachable!("control constants have no operands")
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        Type::Control(self.alternatives)
    }

    fn debug_string(&self) -> String {
        format!("ctlconst {}", self.alternative)
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

    fn is_constant(&self) -> bool {
        true
    }
}

/// Maps a bitstring to a control token through a case table.
///
/// Values without a case fall through to the default alternative. The
/// produced token drives γ nodes and CFG branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOperation {
    pub width: u32,
    pub mapping: BTreeMap<u64, usize>,
    pub default_alternative: usize,
    pub alternatives: usize,
}

impl MatchOperation {
    pub fn new(
        width: u32,
        mapping: impl IntoIterator<Item = (u64, usize)>,
        default_alternative: usize,
        alternatives: usize,
    ) -> Self {
        let mapping: BTreeMap<u64, usize> = mapping.into_iter().collect();
        assert!(default_alternative < alternatives);
        assert!(mapping.values().all(|alt| *alt < alternatives));
        Self {
            width,
            mapping,
            default_alternative,
            alternatives,
        }
    }

    /// The standard two-way match on a boolean: false selects alternative 0,
    /// true selects alternative 1.
    pub fn on_bool() -> Self {
        Self::new(1, [(1, 1)], 0, 2)
    }

    pub fn alternative_for(&self, value: &BitValue) -> usize {
        value
            .to_u64()
            .and_then(|v| self.mapping.get(&v).copied())
            .unwrap_or(self.default_alternative)
    }
}

impl SimpleOperation for MatchOperation {
    fn num_operands(&self) -> usize {
        1
    }

    fn operand_type(&self, _index: usize) -> Type {
        Type::Bits(self.width)
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        Type::Control(self.alternatives)
    }

    fn debug_string(&self) -> String {
        format!("match{}[{}]", self.width, self.alternatives)
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

    fn as_unary(&self) -> Option<&dyn UnaryOperation> {
        Some(self)
    }
}

impl UnaryOperation for MatchOperation {
    fn can_reduce_operand(&self, graph: &Graph, operand: Output) -> Option<UnopReduction> {
        constant_value(graph, operand).map(|_| UnopReduction::Constant)
    }

    fn reduce_operand(
        &self,
        graph: &mut Graph,
        region: RegionId,
        path: UnopReduction,
        operand: Output,
    ) -> Result<Output, GraphError> {
        debug_assert_eq!(path, UnopReduction::Constant);
        let value = constant_value(graph, operand)
            .expect("constant reduction requires a constant operand")
            .clone();
        let alternative = self.alternative_for(&value);
        let outputs = graph.create_normalized(
            region,
            Box::new(ControlConstant::new(alternative, self.alternatives)),
            &[],
        )?;
        Ok(outputs[0])
    }
}

/// Loads a value of `loaded` type through a pointer, threading `nstates`
/// memory states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOperation {
    pub loaded: Type,
    pub nstates: usize,
    pub alignment: u32,
}

impl LoadOperation {
    pub fn new(loaded: Type, nstates: usize, alignment: u32) -> Self {
        Self {
            loaded,
            nstates,
            alignment,
        }
    }
}

impl SimpleOperation for LoadOperation {
    fn num_operands(&self) -> usize {
        1 + self.nstates
    }

    fn operand_type(&self, index: usize) -> Type {
        if index == 0 {
            Type::pointer(self.loaded.clone())
        } else {
            Type::MemoryState
        }
    }

    fn num_results(&self) -> usize {
        1 + self.nstates
    }

    fn result_type(&self, index: usize) -> Type {
        if index == 0 {
            self.loaded.clone()
        } else {
            Type::MemoryState
        }
    }

    fn debug_string(&self) -> String {
        format!("load {}", self.loaded)
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

/// Stores a value of `stored` type through a pointer, threading `nstates`
/// memory states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOperation {
    pub stored: Type,
    pub nstates: usize,
    pub alignment: u32,
}

impl StoreOperation {
    pub fn new(stored: Type, nstates: usize, alignment: u32) -> Self {
        Self {
            stored,
            nstates,
            alignment,
        }
    }
}

impl SimpleOperation for StoreOperation {
    fn num_operands(&self) -> usize {
        2 + self.nstates
    }

    fn operand_type(&self, index: usize) -> Type {
        match index {
            0 => Type::pointer(self.stored.clone()),
            1 => self.stored.clone(),
            _ => Type::MemoryState,
        }
    }

    fn num_results(&self) -> usize {
        self.nstates
    }

    fn result_type(&self, _index: usize) -> Type {
        Type::MemoryState
    }

    fn debug_string(&self) -> String {
        format!("store {}", self.stored)
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

    fn has_effects(&self) -> bool {
        true
    }
}

/// Merges several memory states into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemStateMergeOperation {
    pub noperands: usize,
}

impl MemStateMergeOperation {
    pub fn new(noperands: usize) -> Self {
        assert!(noperands >= 1);
        Self { noperands }
    }
}

impl SimpleOperation for MemStateMergeOperation {
    fn num_operands(&self) -> usize {
        self.noperands
    }

    fn operand_type(&self, _index: usize) -> Type {
        Type::MemoryState
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        Type::MemoryState
    }

    fn debug_string(&self) -> String {
        format!("statemerge {}", self.noperands)
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

/// Calls a first-class function value.
///
/// The callee is operand 0; the remaining operands and the results follow
/// the function signature, including any explicit state threading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOperation {
    pub ty: Arc<FunctionType>,
}

impl CallOperation {
    pub fn new(ty: Arc<FunctionType>) -> Self {
        Self { ty }
    }
}

impl SimpleOperation for CallOperation {
    fn num_operands(&self) -> usize {
        1 + self.ty.params.len()
    }

    fn operand_type(&self, index: usize) -> Type {
        if index == 0 {
            Type::Function(self.ty.clone())
        } else {
            self.ty.params[index - 1].clone()
        }
    }

    fn num_results(&self) -> usize {
        self.ty.results.len()
    }

    fn result_type(&self, index: usize) -> Type {
        self.ty.results[index].clone()
    }

    fn debug_string(&self) -> String {
        "call".to_string()
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

    fn has_effects(&self) -> bool {
        true
    }
}
