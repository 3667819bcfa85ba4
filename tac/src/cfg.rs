use std::fmt::Write as _;

use cranelift_entity::{PrimaryMap, entity_impl};
use rustc_hash::FxHashSet;

use crate::{
    module::{Module, Variable},
    ops::BranchOperation,
    tac::Tac,
};

/// A node of a control-flow graph: the entry, the exit, or a basic block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CfgNodeId(u32);
entity_impl!(CfgNodeId, "bb");

/// The identity of a control-flow edge: the source node and the position
/// among its ordered out-edges. Branch order is significant; alternative
/// `i` of a terminating branch selects out-edge `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgEdge {
    pub source: CfgNodeId,
    pub index: usize,
}

pub enum CfgNodeKind {
    Entry { arguments: Vec<Variable> },
    Exit { results: Vec<Variable> },
    Block { tacs: Vec<Tac> },
}

struct CfgNodeData {
    kind: CfgNodeKind,
    out_edges: Vec<CfgNodeId>,
    in_edges: Vec<CfgEdge>,
}

/// Errors surfaced by CFG validation and the conversions built on it.
#[derive(Debug, thiserror::Error)]
pub enum CfgError {
    #[error("malformed control flow graph: {0}")]
    Malformed(String),
    #[error("control flow graph is not structured")]
    NotStructured,
    #[error("unsupported construct: {0}")]
    Unsupported(String),
}

/// A control-flow graph of basic blocks holding three-address codes.
///
/// A fresh graph has its entry wired straight to its exit. Edges are
/// ordered per source; all mutation goes through the edge API so that the
/// predecessor lists stay consistent.
pub struct Cfg {
    nodes: PrimaryMap<CfgNodeId, Option<CfgNodeData>>,
    entry: CfgNodeId,
    exit: CfgNodeId,
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

impl Cfg {
    pub fn new() -> Self {
        let mut nodes = PrimaryMap::new();
        let entry = nodes.push(Some(CfgNodeData {
            kind: CfgNodeKind::Entry {
                arguments: Vec::new(),
            },
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        }));
        let exit = nodes.push(Some(CfgNodeData {
            kind: CfgNodeKind::Exit {
                results: Vec::new(),
            },
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        }));
        let mut cfg = Self { nodes, entry, exit };
        cfg.add_outedge(entry, exit);
        cfg
    }

    pub fn entry(&self) -> CfgNodeId {
        self.entry
    }

    pub fn exit(&self) -> CfgNodeId {
        self.exit
    }

    pub fn add_basic_block(&mut self) -> CfgNodeId {
        self.nodes.push(Some(CfgNodeData {
            kind: CfgNodeKind::Block { tacs: Vec::new() },
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        }))
    }

    fn data(&self, node: CfgNodeId) -> &CfgNodeData {
        self.nodes[node].as_ref().expect("node was removed")
    }

    fn data_mut(&mut self, node: CfgNodeId) -> &mut CfgNodeData {
        self.nodes[node].as_mut().expect("node was removed")
    }

    pub fn contains(&self, node: CfgNodeId) -> bool {
        self.nodes.get(node).is_some_and(|slot| slot.is_some())
    }

    pub fn is_block(&self, node: CfgNodeId) -> bool {
        matches!(self.data(node).kind, CfgNodeKind::Block { .. })
    }

    /// All live nodes, entry and exit included.
    pub fn nodes(&self) -> impl Iterator<Item = CfgNodeId> + '_ {
        self.nodes.keys().filter(|node| self.contains(*node))
    }

    /// The number of live basic blocks (entry and exit not counted).
    pub fn num_blocks(&self) -> usize {
        self.nodes().filter(|node| self.is_block(*node)).count()
    }

    // ------------------------------------------------------------------
    // Entry/exit variable lists

    pub fn append_argument(&mut self, variable: Variable) {
        match &mut self.data_mut(self.entry).kind {
            CfgNodeKind::Entry { arguments } => arguments.push(variable),
            _ => unreachable!("entry node is not an entry"),
        }
    }

    pub fn arguments(&self) -> &[Variable] {
        match &self.data(self.entry).kind {
            CfgNodeKind::Entry { arguments } => arguments,
            _ => unreachable!("entry node is not an entry"),
        }
    }

    pub fn append_result(&mut self, variable: Variable) {
        match &mut self.data_mut(self.exit).kind {
            CfgNodeKind::Exit { results } => results.push(variable),
            _ => unreachable!("exit node is not an exit"),
        }
    }

    pub fn results(&self) -> &[Variable] {
        match &self.data(self.exit).kind {
            CfgNodeKind::Exit { results } => results,
            _ => unreachable!("exit node is not an exit"),
        }
    }

    // ------------------------------------------------------------------
    // Three-address codes

    pub fn tacs(&self, node: CfgNodeId) -> &[Tac] {
        match &self.data(node).kind {
            CfgNodeKind::Block { tacs } => tacs,
            _ => &[],
        }
    }

    pub fn append_last(&mut self, node: CfgNodeId, tac: Tac) {
        match &mut self.data_mut(node).kind {
            CfgNodeKind::Block { tacs } => tacs.push(tac),
            _ => unreachable!("only basic blocks hold code"),
        }
    }

    pub fn append_first(&mut self, node: CfgNodeId, tac: Tac) {
        match &mut self.data_mut(node).kind {
            CfgNodeKind::Block { tacs } => tacs.insert(0, tac),
            _ => unreachable!("only basic blocks hold code"),
        }
    }

    pub fn drop_first(&mut self, node: CfgNodeId) -> Tac {
        match &mut self.data_mut(node).kind {
            CfgNodeKind::Block { tacs } => tacs.remove(0),
            _ => unreachable!("only basic blocks hold code"),
        }
    }

    pub(crate) fn take_tacs(&mut self, node: CfgNodeId) -> Vec<Tac> {
        match &mut self.data_mut(node).kind {
            CfgNodeKind::Block { tacs } => std::mem::take(tacs),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Edges

    pub fn out_edges(&self, node: CfgNodeId) -> &[CfgNodeId] {
        &self.data(node).out_edges
    }

    pub fn num_out_edges(&self, node: CfgNodeId) -> usize {
        self.data(node).out_edges.len()
    }

    pub fn successor(&self, node: CfgNodeId, index: usize) -> CfgNodeId {
        self.data(node).out_edges[index]
    }

    pub fn in_edges(&self, node: CfgNodeId) -> &[CfgEdge] {
        &self.data(node).in_edges
    }

    pub fn num_in_edges(&self, node: CfgNodeId) -> usize {
        self.data(node).in_edges.len()
    }

    pub fn add_outedge(&mut self, source: CfgNodeId, sink: CfgNodeId) {
        let index = self.data(source).out_edges.len();
        self.data_mut(source).out_edges.push(sink);
        self.data_mut(sink).in_edges.push(CfgEdge { source, index });
    }

    /// Point the edge `(source, index)` at a different sink.
    pub fn divert_edge(&mut self, edge: CfgEdge, new_sink: CfgNodeId) {
        let old_sink = self.data(edge.source).out_edges[edge.index];
        self.data_mut(old_sink).in_edges.retain(|e| *e != edge);
        self.data_mut(edge.source).out_edges[edge.index] = new_sink;
        self.data_mut(new_sink).in_edges.push(edge);
    }

    /// Point every in-edge of `old_sink` at `new_sink` instead.
    pub fn divert_inedges(&mut self, old_sink: CfgNodeId, new_sink: CfgNodeId) {
        let edges: Vec<CfgEdge> = self.data(old_sink).in_edges.clone();
        for edge in edges {
            self.divert_edge(edge, new_sink);
        }
    }

    /// Interpose a fresh, empty basic block on the edge `(source, index)`.
    pub fn split_edge(&mut self, edge: CfgEdge) -> CfgNodeId {
        let block = self.add_basic_block();
        let sink = self.data(edge.source).out_edges[edge.index];
        self.divert_edge(edge, block);
        self.add_outedge(block, sink);
        block
    }

    /// Remove a node that no edge points at any more.
    pub fn remove_node(&mut self, node: CfgNodeId) {
        assert!(
            self.data(node).in_edges.is_empty(),
            "cannot remove a node with incoming edges"
        );
        let out_edges = std::mem::take(&mut self.data_mut(node).out_edges);
        for (index, sink) in out_edges.into_iter().enumerate() {
            self.data_mut(sink).in_edges.retain(|e| !(e.source == node && e.index == index));
        }
        self.nodes[node] = None;
    }

    // ------------------------------------------------------------------
    // Cleanup

    /// Remove everything unreachable from the entry, then merge trivial
    /// chains of basic blocks.
    pub fn prune(&mut self) {
        let mut reachable: FxHashSet<CfgNodeId> = FxHashSet::default();
        let mut stack = vec![self.entry];
        while let Some(node) = stack.pop() {
            if !reachable.insert(node) {
                continue;
            }
            stack.extend(self.data(node).out_edges.iter().copied());
        }
        let dead: Vec<CfgNodeId> = self.nodes().filter(|n| !reachable.contains(n)).collect();
        // Detach in-edges among dead nodes first so removal sees none left.
        for &node in &dead {
            self.data_mut(node).in_edges.clear();
        }
        for node in dead {
            self.remove_node(node);
        }
        self.straighten();
    }

    /// Merge every basic block with a unique successor that is a basic
    /// block with a unique predecessor.
    pub fn straighten(&mut self) {
        loop {
            let candidate = self.nodes().find(|&node| {
                self.is_block(node)
                    && self.num_out_edges(node) == 1
                    && {
                        let succ = self.successor(node, 0);
                        succ != node && self.is_block(succ) && self.num_in_edges(succ) == 1
                    }
            });
            let Some(node) = candidate else {
                break;
            };
            let succ = self.successor(node, 0);
            let mut tacs = self.take_tacs(succ);
            match &mut self.data_mut(node).kind {
                CfgNodeKind::Block { tacs: dest } => dest.append(&mut tacs),
                _ => unreachable!(),
            }
            // Node takes over the successor's out-edges.
            let succ_outs = std::mem::take(&mut self.data_mut(succ).out_edges);
            self.data_mut(succ).in_edges.clear();
            self.data_mut(node).out_edges.clear();
            self.nodes[succ] = None;
            for (index, sink) in succ_outs.into_iter().enumerate() {
                self.data_mut(sink)
                    .in_edges
                    .retain(|e| !(e.source == succ && e.index == index));
                self.add_outedge(node, sink);
            }
        }
    }

    // ------------------------------------------------------------------
    // Validation

    /// Structural sanity: a single out-edge everywhere except after a
    /// terminating branch, whose alternative count must match; the exit has
    /// no out-edges; only the entry lacks predecessors.
    pub fn is_valid(&self) -> bool {
        for node in self.nodes() {
            let data = self.data(node);
            match &data.kind {
                CfgNodeKind::Entry { .. } => {
                    if data.out_edges.len() != 1 || !data.in_edges.is_empty() {
                        return false;
                    }
                }
                CfgNodeKind::Exit { .. } => {
                    if !data.out_edges.is_empty() || data.in_edges.is_empty() {
                        return false;
                    }
                }
                CfgNodeKind::Block { tacs } => {
                    let expected = tacs
                        .last()
                        .and_then(|tac| {
                            tac.operation().as_any().downcast_ref::<BranchOperation>()
                        })
                        .map(|branch| branch.alternatives)
                        .unwrap_or(1);
                    if data.out_edges.len() != expected {
                        return false;
                    }
                    if data.in_edges.is_empty() {
                        return false;
                    }
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Diagnostics

    /// A line-per-block ASCII dump.
    pub fn to_ascii(&self, module: &Module) -> String {
        let mut out = String::new();
        for node in self.nodes() {
            let data = self.data(node);
            match &data.kind {
                CfgNodeKind::Entry { arguments } => {
                    let args: Vec<String> =
                        arguments.iter().map(|v| module.variable_name(*v).to_string()).collect();
                    let _ = writeln!(out, "{node} entry <{}>", args.join(", "));
                }
                CfgNodeKind::Exit { results } => {
                    let results: Vec<String> =
                        results.iter().map(|v| module.variable_name(*v).to_string()).collect();
                    let _ = writeln!(out, "{node} exit <{}>", results.join(", "));
                }
                CfgNodeKind::Block { tacs } => {
                    let _ = writeln!(out, "{node}:");
                    for tac in tacs {
                        let _ = writeln!(out, "  {tac:?}");
                    }
                }
            }
            let succs: Vec<String> =
                data.out_edges.iter().map(|sink| format!("{sink}")).collect();
            if !succs.is_empty() {
                let _ = writeln!(out, "  -> {}", succs.join(", "));
            }
        }
        out
    }
}
