use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::{
    graph::{Graph, GraphError, NodeId, Output, RegionId},
    operation::{BinopReduction, SimpleOperation, UnopReduction},
    ops::{LoadOperation, MemStateMergeOperation},
    traverser::{BottomUpTraverser, TopDownTraverser},
};

bitflags::bitflags! {
    /// Per-operation rewriting policy applied when nodes are inserted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NormalForm: u8 {
        /// Master switch; when unset, nodes are created verbatim.
        const MUTABLE = 1 << 0;
        /// Reuse an existing congruent node instead of creating a new one.
        const CSE = 1 << 1;
        /// Fold operations whose operands are all constants.
        const CONSTANT_FOLD = 1 << 2;
        /// Apply identity reductions (neutral elements, inverses,
        /// compare-with-self).
        const REDUCE = 1 << 3;
        /// Fold a state merge feeding a load into the load's state list.
        const LOAD_MUX = 1 << 4;
    }
}

impl Default for NormalForm {
    fn default() -> Self {
        Self::all()
    }
}

/// Per-graph map from operation identity to its normal form.
///
/// Keyed by the concrete operation type; operations without an entry use
/// the default (everything enabled). There is deliberately no process-wide
/// state: two graphs can run different policies.
#[derive(Default)]
pub(crate) struct NormalFormRegistry {
    map: FxHashMap<TypeId, NormalForm>,
}

impl NormalFormRegistry {
    fn get(&self, id: TypeId) -> NormalForm {
        self.map.get(&id).copied().unwrap_or_default()
    }

    fn get_mut(&mut self, id: TypeId) -> &mut NormalForm {
        self.map.entry(id).or_default()
    }
}

impl Graph {
    /// The normal form of the operation type `T`.
    pub fn normal_form<T: SimpleOperation>(&self) -> NormalForm {
        self.normal_forms.get(TypeId::of::<T>())
    }

    /// Mutable access to the normal form of the operation type `T`.
    pub fn normal_form_mut<T: SimpleOperation>(&mut self) -> &mut NormalForm {
        self.normal_forms.get_mut(TypeId::of::<T>())
    }

    /// The normal form governing a concrete operation value.
    pub fn normal_form_of(&self, operation: &dyn SimpleOperation) -> NormalForm {
        self.normal_forms.get(operation.as_any().type_id())
    }

    /// Insert a simple node, first applying the operation's normal form.
    ///
    /// Reductions may satisfy the request without creating a node at all, in
    /// which case the returned outputs belong to existing producers. The
    /// returned vector always has one entry per operation result.
    pub fn create_normalized(
        &mut self,
        region: RegionId,
        operation: Box<dyn SimpleOperation>,
        operands: &[Output],
    ) -> Result<Vec<Output>, GraphError> {
        let nf = self.normal_form_of(operation.as_ref());
        if nf.contains(NormalForm::MUTABLE) {
            if let Some(output) = self.try_reduce(region, operation.as_ref(), operands, nf)? {
                return Ok(vec![output]);
            }
            if nf.contains(NormalForm::LOAD_MUX)
                && let Some(outputs) =
                    reduce_load_mux(self, region, operation.as_ref(), operands)?
            {
                return Ok(outputs);
            }
            if nf.contains(NormalForm::CSE)
                && let Some(outputs) =
                    find_congruent(self, region, operation.as_ref(), operands, None)
            {
                return Ok(outputs);
            }
        }
        let node = self.add_simple_node(region, operation, operands)?;
        Ok(self.outputs(node))
    }

    fn try_reduce(
        &mut self,
        region: RegionId,
        operation: &dyn SimpleOperation,
        operands: &[Output],
        nf: NormalForm,
    ) -> Result<Option<Output>, GraphError> {
        if !nf.intersects(NormalForm::REDUCE | NormalForm::CONSTANT_FOLD) {
            return Ok(None);
        }
        if let Some(unop) = operation.as_unary()
            && operands.len() == 1
            && let Some(path) = unop.can_reduce_operand(self, operands[0])
        {
            let enabled = match path {
                UnopReduction::Constant => nf.contains(NormalForm::CONSTANT_FOLD),
                _ => nf.contains(NormalForm::REDUCE),
            };
            if enabled {
                return unop.reduce_operand(self, region, path, operands[0]).map(Some);
            }
        }
        if let Some(binop) = operation.as_binary()
            && operands.len() == 2
            && let Some(path) = binop.can_reduce_operand_pair(self, operands[0], operands[1])
        {
            let enabled = match path {
                BinopReduction::Constants => nf.contains(NormalForm::CONSTANT_FOLD),
                _ => nf.contains(NormalForm::REDUCE),
            };
            if enabled {
                return binop
                    .reduce_operand_pair(self, region, path, operands[0], operands[1])
                    .map(Some);
            }
        }
        Ok(None)
    }

    /// Re-apply every operation's normal form to the nodes already in the
    /// graph, top-down, replacing nodes whose reductions now apply.
    pub fn normalize(&mut self) -> Result<(), GraphError> {
        let root = self.root();
        self.normalize_region(root)
    }

    fn normalize_region(&mut self, region: RegionId) -> Result<(), GraphError> {
        let mut traverser = TopDownTraverser::new(self, region);
        while let Some(node) = traverser.next(self) {
            if self.is_structural(node) {
                let subregions: Vec<RegionId> = self.subregions(node).to_vec();
                for sub in subregions {
                    self.normalize_region(sub)?;
                }
                continue;
            }
            self.normalize_node(region, node)?;
        }
        Ok(())
    }

    fn normalize_node(&mut self, region: RegionId, node: NodeId) -> Result<bool, GraphError> {
        let operation = match self.simple_op(node) {
            Some(op) => op.copy(),
            None => return Ok(false),
        };
        let operands = self.operands(node);
        let nf = self.normal_form_of(operation.as_ref());
        if !nf.contains(NormalForm::MUTABLE) {
            return Ok(false);
        }
        if let Some(output) = self.try_reduce(region, operation.as_ref(), &operands, nf)? {
            self.divert_users(self.output(node, 0), output)?;
            self.remove_node(node)?;
            return Ok(true);
        }
        if nf.contains(NormalForm::LOAD_MUX)
            && let Some(outputs) = reduce_load_mux(self, region, operation.as_ref(), &operands)?
        {
            for (index, replacement) in outputs.into_iter().enumerate() {
                self.divert_users(self.output(node, index), replacement)?;
            }
            self.remove_node(node)?;
            return Ok(true);
        }
        if nf.contains(NormalForm::CSE)
            && let Some(outputs) =
                find_congruent(self, region, operation.as_ref(), &operands, Some(node))
        {
            for (index, replacement) in outputs.into_iter().enumerate() {
                self.divert_users(self.output(node, index), replacement)?;
            }
            self.remove_node(node)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove dead nodes: nodes none of whose outputs have users and which
    /// carry no side effects (directly or, for structural nodes, anywhere
    /// in their sub-regions).
    pub fn prune(&mut self) -> Result<(), GraphError> {
        let root = self.root();
        self.prune_region(root)
    }

    fn prune_region(&mut self, region: RegionId) -> Result<(), GraphError> {
        let mut changed = true;
        while changed {
            changed = false;
            let mut traverser = BottomUpTraverser::new(self, region);
            while let Some(node) = traverser.next(self) {
                let dead = (0..self.num_outputs(node))
                    .all(|index| self.num_users(self.output(node, index)) == 0)
                    && !self.has_side_effects(node);
                if dead {
                    self.remove_node(node)?;
                    changed = true;
                }
            }
        }
        let nodes: Vec<NodeId> = self.region_nodes(region).to_vec();
        for node in nodes {
            let subregions: Vec<RegionId> = self.subregions(node).to_vec();
            for sub in subregions {
                self.prune_region(sub)?;
            }
        }
        Ok(())
    }

    /// True if removing `node` would discard an observable effect.
    pub fn has_side_effects(&self, node: NodeId) -> bool {
        if let Some(op) = self.simple_op(node) {
            return op.has_effects();
        }
        self.subregions(node).iter().any(|sub| self.region_has_side_effects(*sub))
    }

    fn region_has_side_effects(&self, region: RegionId) -> bool {
        self.region_nodes(region).iter().any(|node| self.has_side_effects(*node))
    }
}

/// Search `region` for an existing node congruent to the prospective one:
/// same operation (by value) and identical operand outputs.
///
/// Nullary operations are sought among the region's top nodes; anything
/// else only needs a scan of the first operand's users.
fn find_congruent(
    graph: &Graph,
    region: RegionId,
    operation: &dyn SimpleOperation,
    operands: &[Output],
    exclude: Option<NodeId>,
) -> Option<Vec<Output>> {
    let congruent = |node: NodeId| -> bool {
        if Some(node) == exclude {
            return false;
        }
        let Some(other) = graph.simple_op(node) else {
            return false;
        };
        if !other.equals(operation) {
            return false;
        }
        let node_operands = graph.operands(node);
        if node_operands == operands {
            return true;
        }
        // Commutative operations match with their operands swapped.
        operands.len() == 2
            && operation.as_binary().is_some_and(|binary| binary.is_commutative())
            && node_operands == [operands[1], operands[0]]
    };
    let found = if operands.is_empty() {
        graph.region_top_nodes(region).find(|node| congruent(*node))
    } else {
        graph
            .users(operands[0])
            .filter_map(|user| user.node())
            .filter(|node| graph.node_region(*node) == region)
            .find(|node| congruent(*node))
    };
    found.map(|node| graph.outputs(node))
}

/// The load-mux reduction: a load whose sole state operand comes from a
/// state merge reads the merged states directly.
///
/// Returns the load value plus a re-merged state so that the replacement
/// has the shape the caller asked for.
fn reduce_load_mux(
    graph: &mut Graph,
    region: RegionId,
    operation: &dyn SimpleOperation,
    operands: &[Output],
) -> Result<Option<Vec<Output>>, GraphError> {
    let Some(load) = operation.as_any().downcast_ref::<LoadOperation>() else {
        return Ok(None);
    };
    if load.nstates != 1 {
        return Ok(None);
    }
    let merge_node = {
        let Some((node, op)) = graph.producer(operands[1]) else {
            return Ok(None);
        };
        if op.as_any().downcast_ref::<MemStateMergeOperation>().is_none() {
            return Ok(None);
        }
        node
    };
    let states = graph.operands(merge_node);
    let mut new_operands = vec![operands[0]];
    new_operands.extend(states.iter().copied());
    let new_load = LoadOperation::new(load.loaded.clone(), states.len(), load.alignment);
    let outputs = graph.create_normalized(region, Box::new(new_load), &new_operands)?;
    let merged = graph.create_normalized(
        region,
        Box::new(MemStateMergeOperation::new(states.len())),
        &outputs[1..],
    )?;
    Ok(Some(vec![outputs[0], merged[0]]))
}
