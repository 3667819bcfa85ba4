use std::{cell::RefCell, rc::Rc};

use cranelift_entity::{PrimaryMap, entity_impl};
use loamc_types::Type;
use smallvec::SmallVec;
use std::collections::BTreeSet;

use crate::{
    normal_form::NormalFormRegistry,
    notifier::{GraphEvent, GraphListener},
    operation::{AnyOperation, SimpleOperation, StructuralOperation},
};

/// A node in some region of a [Graph].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

/// A region owned by a structural node, or the root region of a [Graph].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(u32);
entity_impl!(RegionId, "region");

/// A value producer: an output of a node, or an argument of a region.
///
/// Outputs are plain ids; all state lives in the graph's arenas, so an
/// `Output` held across mutations stays valid as long as its node (or
/// argument position) does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Output {
    Node { node: NodeId, index: usize },
    Argument { region: RegionId, index: usize },
}

impl Output {
    /// The node producing this output, unless it is a region argument.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node { node, .. } => Some(*node),
            Self::Argument { .. } => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Node { index, .. } | Self::Argument { index, .. } => *index,
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument { .. })
    }
}

/// A value consumer: an operand of a node, or a result of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Input {
    Node { node: NodeId, index: usize },
    Result { region: RegionId, index: usize },
}

impl Input {
    /// The node consuming this input, unless it is a region result.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node { node, .. } => Some(*node),
            Self::Result { .. } => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Node { index, .. } | Self::Result { index, .. } => *index,
        }
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}

/// Errors surfaced by the graph construction and rewrite surface.
///
/// These cover misuse that a caller can reasonably trigger with well-typed
/// code; violations of internal invariants are asserted instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("operand {index}: expected {expected}, found {found}")]
    TypeMismatch {
        index: usize,
        expected: Type,
        found: Type,
    },
    #[error("expected {expected} operands, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("origin is not visible from the target region")]
    ScopeViolation,
    #[error("cannot remove a producer that still has users")]
    LiveUsers,
    #[error("predicate must have control type, found {found}")]
    PredicateType { found: Type },
    #[error("phi regions cannot nest")]
    NestedPhi,
}

pub(crate) struct InputSlot {
    pub origin: Output,
    pub ty: Type,
}

pub(crate) struct OutputSlot {
    pub ty: Type,
    pub users: BTreeSet<Input>,
}

pub(crate) struct NodeData {
    pub region: RegionId,
    pub operation: AnyOperation,
    pub inputs: SmallVec<[InputSlot; 4]>,
    pub outputs: SmallVec<[OutputSlot; 4]>,
    pub subregions: SmallVec<[RegionId; 1]>,
}

pub(crate) struct ArgumentSlot {
    pub ty: Type,
    pub users: BTreeSet<Input>,
}

pub(crate) struct ResultSlot {
    pub ty: Type,
    pub origin: Output,
}

pub(crate) struct RegionData {
    pub owner: Option<NodeId>,
    pub arguments: Vec<ArgumentSlot>,
    pub results: Vec<ResultSlot>,
    /// Contained nodes in insertion order, the canonical top-down order.
    pub nodes: Vec<NodeId>,
    /// Nodes none of whose operands originate from a node in this region.
    pub top_nodes: BTreeSet<NodeId>,
}

/// An RVSDG: a forest of regions rooted at [Graph::root].
///
/// Nodes and regions are arena-allocated with stable ids; removal leaves a
/// tombstone, so ids are never reused within one graph. The graph is a
/// single-threaded mutable structure; all operations are synchronous.
pub struct Graph {
    nodes: PrimaryMap<NodeId, Option<NodeData>>,
    regions: PrimaryMap<RegionId, Option<RegionData>>,
    root: RegionId,
    pub(crate) normal_forms: NormalFormRegistry,
    listeners: Vec<Rc<RefCell<dyn GraphListener>>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Construct an empty graph with a fresh root region.
    pub fn new() -> Self {
        let mut regions = PrimaryMap::new();
        let root = regions.push(Some(RegionData {
            owner: None,
            arguments: Vec::new(),
            results: Vec::new(),
            nodes: Vec::new(),
            top_nodes: BTreeSet::new(),
        }));
        Self {
            nodes: PrimaryMap::new(),
            regions,
            root,
            normal_forms: NormalFormRegistry::default(),
            listeners: Vec::new(),
        }
    }

    pub fn root(&self) -> RegionId {
        self.root
    }

    /// Subscribe a listener to mutation events. Listeners are invoked
    /// synchronously, inline with the mutation that triggered them, and must
    /// not mutate the graph.
    pub fn add_listener(&mut self, listener: Rc<RefCell<dyn GraphListener>>) {
        self.listeners.push(listener);
    }

    pub(crate) fn notify(&self, event: GraphEvent) {
        for listener in &self.listeners {
            listener.borrow_mut().notify(self, &event);
        }
    }

    // ------------------------------------------------------------------
    // Accessors

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(|slot| slot.is_some())
    }

    pub fn contains_region(&self, region: RegionId) -> bool {
        self.regions.get(region).is_some_and(|slot| slot.is_some())
    }

    pub(crate) fn node_data(&self, node: NodeId) -> &NodeData {
        self.nodes[node].as_ref().expect("node was removed")
    }

    pub(crate) fn node_data_mut(&mut self, node: NodeId) -> &mut NodeData {
        self.nodes[node].as_mut().expect("node was removed")
    }

    pub(crate) fn region_data(&self, region: RegionId) -> &RegionData {
        self.regions[region].as_ref().expect("region was removed")
    }

    pub(crate) fn region_data_mut(&mut self, region: RegionId) -> &mut RegionData {
        self.regions[region].as_mut().expect("region was removed")
    }

    /// The region a node belongs to.
    pub fn node_region(&self, node: NodeId) -> RegionId {
        self.node_data(node).region
    }

    /// The structural node owning `region`, or `None` for the root region.
    pub fn region_owner(&self, region: RegionId) -> Option<NodeId> {
        self.region_data(region).owner
    }

    /// The nodes of `region` in insertion order.
    pub fn region_nodes(&self, region: RegionId) -> &[NodeId] {
        &self.region_data(region).nodes
    }

    /// The nodes of `region` whose operands all originate outside the
    /// region's node list (i.e. from region arguments).
    pub fn region_top_nodes(&self, region: RegionId) -> impl Iterator<Item = NodeId> + '_ {
        self.region_data(region).top_nodes.iter().copied()
    }

    pub fn num_arguments(&self, region: RegionId) -> usize {
        self.region_data(region).arguments.len()
    }

    pub fn num_results(&self, region: RegionId) -> usize {
        self.region_data(region).results.len()
    }

    pub fn argument(&self, region: RegionId, index: usize) -> Output {
        debug_assert!(index < self.num_arguments(region));
        Output::Argument { region, index }
    }

    pub fn result(&self, region: RegionId, index: usize) -> Input {
        debug_assert!(index < self.num_results(region));
        Input::Result { region, index }
    }

    pub fn num_inputs(&self, node: NodeId) -> usize {
        self.node_data(node).inputs.len()
    }

    pub fn num_outputs(&self, node: NodeId) -> usize {
        self.node_data(node).outputs.len()
    }

    pub fn input(&self, node: NodeId, index: usize) -> Input {
        debug_assert!(index < self.num_inputs(node));
        Input::Node { node, index }
    }

    pub fn output(&self, node: NodeId, index: usize) -> Output {
        debug_assert!(index < self.num_outputs(node));
        Output::Node { node, index }
    }

    /// All operand origins of `node`, in operand order.
    pub fn operands(&self, node: NodeId) -> Vec<Output> {
        self.node_data(node).inputs.iter().map(|slot| slot.origin).collect()
    }

    /// All outputs of `node`, in order.
    pub fn outputs(&self, node: NodeId) -> Vec<Output> {
        (0..self.num_outputs(node)).map(|index| Output::Node { node, index }).collect()
    }

    /// The origin of an input.
    pub fn origin(&self, input: Input) -> Output {
        match input {
            Input::Node { node, index } => self.node_data(node).inputs[index].origin,
            Input::Result { region, index } => self.region_data(region).results[index].origin,
        }
    }

    /// The users of an output, in deterministic order.
    pub fn users(&self, output: Output) -> impl Iterator<Item = Input> + '_ {
        self.users_set(output).iter().copied()
    }

    pub fn num_users(&self, output: Output) -> usize {
        self.users_set(output).len()
    }

    /// The type of a produced value.
    pub fn output_type(&self, output: Output) -> Type {
        match output {
            Output::Node { node, index } => self.node_data(node).outputs[index].ty.clone(),
            Output::Argument { region, index } => {
                self.region_data(region).arguments[index].ty.clone()
            }
        }
    }

    /// The type of a consumed value.
    pub fn input_type(&self, input: Input) -> Type {
        match input {
            Input::Node { node, index } => self.node_data(node).inputs[index].ty.clone(),
            Input::Result { region, index } => self.region_data(region).results[index].ty.clone(),
        }
    }

    /// The region a produced value is visible in.
    pub fn output_region(&self, output: Output) -> RegionId {
        match output {
            Output::Node { node, .. } => self.node_region(node),
            Output::Argument { region, .. } => region,
        }
    }

    /// The region a consumer lives in.
    pub fn input_region(&self, input: Input) -> RegionId {
        match input {
            Input::Node { node, .. } => self.node_region(node),
            Input::Result { region, .. } => region,
        }
    }

    /// The simple operation of `node`, if it is a simple node.
    pub fn simple_op(&self, node: NodeId) -> Option<&dyn SimpleOperation> {
        match &self.node_data(node).operation {
            AnyOperation::Simple(op) => Some(op.as_ref()),
            AnyOperation::Structural(_) => None,
        }
    }

    /// The structural operation of `node`, if it is a structural node.
    pub fn structural_op(&self, node: NodeId) -> Option<&StructuralOperation> {
        match &self.node_data(node).operation {
            AnyOperation::Simple(_) => None,
            AnyOperation::Structural(op) => Some(op),
        }
    }

    pub fn is_simple(&self, node: NodeId) -> bool {
        matches!(self.node_data(node).operation, AnyOperation::Simple(_))
    }

    pub fn is_structural(&self, node: NodeId) -> bool {
        matches!(self.node_data(node).operation, AnyOperation::Structural(_))
    }

    /// The sub-regions of a structural node (empty for simple nodes).
    pub fn subregions(&self, node: NodeId) -> &[RegionId] {
        &self.node_data(node).subregions
    }

    /// The node producing `output`, if the producer is a simple node.
    pub fn producer(&self, output: Output) -> Option<(NodeId, &dyn SimpleOperation)> {
        let node = output.node()?;
        let op = self.simple_op(node)?;
        Some((node, op))
    }

    /// A human-readable description of a node's operation.
    pub fn debug_string(&self, node: NodeId) -> String {
        match &self.node_data(node).operation {
            AnyOperation::Simple(op) => op.debug_string(),
            AnyOperation::Structural(op) => op.debug_string(),
        }
    }

    fn users_set(&self, output: Output) -> &BTreeSet<Input> {
        match output {
            Output::Node { node, index } => &self.node_data(node).outputs[index].users,
            Output::Argument { region, index } => &self.region_data(region).arguments[index].users,
        }
    }

    fn users_set_mut(&mut self, output: Output) -> &mut BTreeSet<Input> {
        match output {
            Output::Node { node, index } => &mut self.node_data_mut(node).outputs[index].users,
            Output::Argument { region, index } => {
                &mut self.region_data_mut(region).arguments[index].users
            }
        }
    }

    fn origin_slot_mut(&mut self, input: Input) -> &mut Output {
        match input {
            Input::Node { node, index } => &mut self.node_data_mut(node).inputs[index].origin,
            Input::Result { region, index } => {
                &mut self.region_data_mut(region).results[index].origin
            }
        }
    }

    // ------------------------------------------------------------------
    // Node construction and removal

    /// Append a simple node to `region`.
    ///
    /// Operand arity and types are validated against the operation
    /// signature; every operand must be visible in `region`.
    pub fn add_simple_node(
        &mut self,
        region: RegionId,
        operation: Box<dyn SimpleOperation>,
        operands: &[Output],
    ) -> Result<NodeId, GraphError> {
        if operation.num_operands() != operands.len() {
            return Err(GraphError::ArityMismatch {
                expected: operation.num_operands(),
                found: operands.len(),
            });
        }
        for (index, operand) in operands.iter().enumerate() {
            if self.output_region(*operand) != region {
                return Err(GraphError::ScopeViolation);
            }
            let expected = operation.operand_type(index);
            let found = self.output_type(*operand);
            if expected != found {
                return Err(GraphError::TypeMismatch {
                    index,
                    expected,
                    found,
                });
            }
        }

        let inputs = operands
            .iter()
            .enumerate()
            .map(|(index, origin)| InputSlot {
                origin: *origin,
                ty: operation.operand_type(index),
            })
            .collect();
        let outputs = (0..operation.num_results())
            .map(|index| OutputSlot {
                ty: operation.result_type(index),
                users: BTreeSet::new(),
            })
            .collect();

        let node = self.nodes.push(Some(NodeData {
            region,
            operation: AnyOperation::Simple(operation),
            inputs,
            outputs,
            subregions: SmallVec::new(),
        }));
        for (index, origin) in operands.iter().enumerate() {
            self.users_set_mut(*origin).insert(Input::Node { node, index });
        }
        self.region_data_mut(region).nodes.push(node);
        self.update_top_membership(node);
        self.notify(GraphEvent::NodeCreated(node));
        Ok(node)
    }

    /// Append a structural node with `nsubregions` fresh, empty sub-regions.
    ///
    /// The γ/θ/λ/φ/δ builders layer the entry/exit plumbing on top of this.
    pub(crate) fn add_structural_node(
        &mut self,
        region: RegionId,
        operation: StructuralOperation,
        nsubregions: usize,
    ) -> NodeId {
        let node = self.nodes.push(Some(NodeData {
            region,
            operation: AnyOperation::Structural(operation),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            subregions: SmallVec::new(),
        }));
        for _ in 0..nsubregions {
            let sub = self.regions.push(Some(RegionData {
                owner: Some(node),
                arguments: Vec::new(),
                results: Vec::new(),
                nodes: Vec::new(),
                top_nodes: BTreeSet::new(),
            }));
            self.node_data_mut(node).subregions.push(sub);
        }
        self.region_data_mut(region).nodes.push(node);
        self.update_top_membership(node);
        self.notify(GraphEvent::NodeCreated(node));
        node
    }

    /// Remove a node whose outputs have no users.
    ///
    /// The node's inputs are detached from their origins and any sub-regions
    /// are destroyed recursively.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        let data = self.node_data(node);
        if data.outputs.iter().any(|out| !out.users.is_empty()) {
            return Err(GraphError::LiveUsers);
        }
        self.notify(GraphEvent::NodeDestroyed(node));
        for index in 0..self.num_inputs(node) {
            let origin = self.node_data(node).inputs[index].origin;
            self.users_set_mut(origin).remove(&Input::Node { node, index });
        }
        let subregions: SmallVec<[RegionId; 1]> =
            self.node_data(node).subregions.iter().copied().collect();
        for sub in subregions {
            self.destroy_region(sub);
        }
        let region = self.node_region(node);
        let region_data = self.region_data_mut(region);
        let pos = region_data
            .nodes
            .iter()
            .position(|n| *n == node)
            .expect("node missing from its region's node list");
        region_data.nodes.remove(pos);
        region_data.top_nodes.remove(&node);
        self.nodes[node] = None;
        Ok(())
    }

    /// Tear down a region and everything inside it. Only used when the
    /// owning structural node is itself going away.
    fn destroy_region(&mut self, region: RegionId) {
        // Detach the results first so inner outputs lose their last users,
        // then destroy nodes bottom-up.
        for index in (0..self.num_results(region)).rev() {
            let origin = self.region_data(region).results[index].origin;
            self.users_set_mut(origin).remove(&Input::Result { region, index });
        }
        let nodes: Vec<NodeId> = self.region_data(region).nodes.clone();
        for node in nodes.into_iter().rev() {
            self.notify(GraphEvent::NodeDestroyed(node));
            for index in 0..self.num_inputs(node) {
                let origin = self.node_data(node).inputs[index].origin;
                self.users_set_mut(origin).remove(&Input::Node { node, index });
            }
            let subregions: SmallVec<[RegionId; 1]> =
                self.node_data(node).subregions.iter().copied().collect();
            for sub in subregions {
                self.destroy_region(sub);
            }
            self.nodes[node] = None;
        }
        self.regions[region] = None;
    }

    // ------------------------------------------------------------------
    // Edge rewrites

    /// Atomically rewrite every user of `old` to read from `new` instead.
    ///
    /// Both outputs must have the same type and be visible in the same
    /// region.
    pub fn divert_users(&mut self, old: Output, new: Output) -> Result<(), GraphError> {
        if old == new {
            return Ok(());
        }
        let expected = self.output_type(old);
        let found = self.output_type(new);
        if expected != found {
            return Err(GraphError::TypeMismatch {
                index: 0,
                expected,
                found,
            });
        }
        if self.output_region(old) != self.output_region(new) {
            return Err(GraphError::ScopeViolation);
        }
        let users = std::mem::take(self.users_set_mut(old));
        for user in &users {
            *self.origin_slot_mut(*user) = new;
            self.notify(GraphEvent::InputChanged {
                input: *user,
                old,
                new,
            });
        }
        let affected: Vec<NodeId> = users.iter().filter_map(|user| user.node()).collect();
        self.users_set_mut(new).extend(users);
        for node in affected {
            self.update_top_membership(node);
        }
        Ok(())
    }

    /// Rewrite a single input to read from `new_origin`.
    pub fn divert_origin(&mut self, input: Input, new_origin: Output) -> Result<(), GraphError> {
        let old = self.origin(input);
        if old == new_origin {
            return Ok(());
        }
        let expected = self.input_type(input);
        let found = self.output_type(new_origin);
        if expected != found {
            return Err(GraphError::TypeMismatch {
                index: input.index(),
                expected,
                found,
            });
        }
        if self.output_region(new_origin) != self.input_region(input) {
            return Err(GraphError::ScopeViolation);
        }
        self.users_set_mut(old).remove(&input);
        *self.origin_slot_mut(input) = new_origin;
        self.users_set_mut(new_origin).insert(input);
        self.notify(GraphEvent::InputChanged {
            input,
            old,
            new: new_origin,
        });
        if let Some(node) = input.node() {
            self.update_top_membership(node);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Region argument/result lists

    /// Append an argument of the given type to `region`.
    pub fn add_argument(&mut self, region: RegionId, ty: Type) -> Output {
        let data = self.region_data_mut(region);
        data.arguments.push(ArgumentSlot {
            ty,
            users: BTreeSet::new(),
        });
        Output::Argument {
            region,
            index: data.arguments.len() - 1,
        }
    }

    /// Remove the argument at `index`; it must have no users. Later
    /// arguments shift down and every reference to them is renumbered.
    pub fn remove_argument(&mut self, region: RegionId, index: usize) -> Result<(), GraphError> {
        if !self.region_data(region).arguments[index].users.is_empty() {
            return Err(GraphError::LiveUsers);
        }
        self.region_data_mut(region).arguments.remove(index);
        for j in index..self.num_arguments(region) {
            let users: Vec<Input> =
                self.region_data(region).arguments[j].users.iter().copied().collect();
            for user in users {
                *self.origin_slot_mut(user) = Output::Argument { region, index: j };
            }
        }
        Ok(())
    }

    /// Append a result to `region`, reading from `origin`.
    pub fn add_result(&mut self, region: RegionId, origin: Output) -> Result<Input, GraphError> {
        if self.output_region(origin) != region {
            return Err(GraphError::ScopeViolation);
        }
        let ty = self.output_type(origin);
        let data = self.region_data_mut(region);
        data.results.push(ResultSlot { ty, origin });
        let input = Input::Result {
            region,
            index: data.results.len() - 1,
        };
        self.users_set_mut(origin).insert(input);
        Ok(input)
    }

    /// Remove the result at `index`. Later results shift down and the
    /// user-set entries of their origins are renumbered.
    pub fn remove_result(&mut self, region: RegionId, index: usize) {
        let slot = self.region_data_mut(region).results.remove(index);
        self.users_set_mut(slot.origin).remove(&Input::Result { region, index });
        for j in index..self.num_results(region) {
            let origin = self.region_data(region).results[j].origin;
            let users = self.users_set_mut(origin);
            users.remove(&Input::Result {
                region,
                index: j + 1,
            });
            users.insert(Input::Result { region, index: j });
        }
    }

    // ------------------------------------------------------------------
    // Node input/output lists (structural entry/exit plumbing)

    /// Append an input to `node`, reading from `origin` in the node's
    /// containing region.
    pub fn add_input(&mut self, node: NodeId, origin: Output) -> Result<Input, GraphError> {
        if self.output_region(origin) != self.node_region(node) {
            return Err(GraphError::ScopeViolation);
        }
        let ty = self.output_type(origin);
        let data = self.node_data_mut(node);
        data.inputs.push(InputSlot { origin, ty });
        let input = Input::Node {
            node,
            index: data.inputs.len() - 1,
        };
        self.users_set_mut(origin).insert(input);
        self.update_top_membership(node);
        Ok(input)
    }

    /// Remove the input at `index`, detaching it from its origin. Later
    /// inputs shift down and the user-set entries referring to them are
    /// renumbered.
    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        let slot = self.node_data_mut(node).inputs.remove(index);
        self.users_set_mut(slot.origin).remove(&Input::Node { node, index });
        for j in index..self.num_inputs(node) {
            let origin = self.node_data(node).inputs[j].origin;
            let users = self.users_set_mut(origin);
            users.remove(&Input::Node {
                node,
                index: j + 1,
            });
            users.insert(Input::Node { node, index: j });
        }
        self.update_top_membership(node);
    }

    /// Append an output of the given type to `node`.
    pub fn add_output(&mut self, node: NodeId, ty: Type) -> Output {
        let data = self.node_data_mut(node);
        data.outputs.push(OutputSlot {
            ty,
            users: BTreeSet::new(),
        });
        Output::Node {
            node,
            index: data.outputs.len() - 1,
        }
    }

    /// Remove the output at `index`; it must have no users. Later outputs
    /// shift down and their users' stored origins are renumbered.
    pub fn remove_output(&mut self, node: NodeId, index: usize) -> Result<(), GraphError> {
        if !self.node_data(node).outputs[index].users.is_empty() {
            return Err(GraphError::LiveUsers);
        }
        self.node_data_mut(node).outputs.remove(index);
        for j in index..self.num_outputs(node) {
            let users: Vec<Input> =
                self.node_data(node).outputs[j].users.iter().copied().collect();
            for user in users {
                *self.origin_slot_mut(user) = Output::Node { node, index: j };
            }
        }
        Ok(())
    }

    fn update_top_membership(&mut self, node: NodeId) {
        if !self.contains_node(node) {
            return;
        }
        let is_top = self.node_data(node).inputs.iter().all(|slot| slot.origin.is_argument());
        let region = self.node_region(node);
        let data = self.region_data_mut(region);
        if is_top {
            data.top_nodes.insert(node);
        } else {
            data.top_nodes.remove(&node);
        }
    }

    // ------------------------------------------------------------------
    // Verification

    /// Assert the universal structural invariants. Panics on violation;
    /// intended for debug builds and tests at pass boundaries.
    pub fn verify(&self) {
        self.verify_region(self.root);
    }

    fn verify_region(&self, region: RegionId) {
        let data = self.region_data(region);
        for (index, arg) in data.arguments.iter().enumerate() {
            let output = Output::Argument { region, index };
            for user in &arg.users {
                assert_eq!(self.origin(*user), output, "stale user entry on {output:?}");
                assert_eq!(
                    self.input_region(*user),
                    region,
                    "user of {output:?} escapes its region"
                );
            }
        }
        for (index, slot) in data.results.iter().enumerate() {
            let input = Input::Result { region, index };
            assert_eq!(
                self.output_region(slot.origin),
                region,
                "result {index} of {region} reads across a region boundary"
            );
            assert!(
                self.users_set(slot.origin).contains(&input),
                "origin of result {index} of {region} does not know its user"
            );
        }
        for &node in &data.nodes {
            assert!(self.contains_node(node), "region lists a removed node");
            assert_eq!(self.node_region(node), region);
            let ndata = self.node_data(node);
            for (index, slot) in ndata.inputs.iter().enumerate() {
                let input = Input::Node { node, index };
                assert_eq!(
                    self.output_region(slot.origin),
                    region,
                    "input {index} of {node} reads across a region boundary"
                );
                assert!(
                    self.users_set(slot.origin).contains(&input),
                    "origin of input {index} of {node} does not know its user"
                );
                if let Some(producer) = slot.origin.node() {
                    assert!(
                        self.contains_node(producer),
                        "input {index} of {node} reads from a removed node"
                    );
                }
            }
            for (index, slot) in ndata.outputs.iter().enumerate() {
                let output = Output::Node { node, index };
                for user in &slot.users {
                    assert_eq!(self.origin(*user), output, "stale user entry on {output:?}");
                }
            }
            ndata.operation.verify_arity(self, node);
            for &sub in ndata.subregions.iter() {
                assert_eq!(self.region_owner(sub), Some(node));
                self.verify_region(sub);
            }
        }
    }
}
