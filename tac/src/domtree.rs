use petgraph::{algo::dominators, graphmap::DiGraphMap};
use rustc_hash::FxHashMap;

use crate::cfg::{Cfg, CfgNodeId};

/// A node of the dominator tree.
pub struct DomTreeNode {
    node: CfgNodeId,
    children: Vec<DomTreeNode>,
}

impl DomTreeNode {
    pub fn node(&self) -> CfgNodeId {
        self.node
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, index: usize) -> &DomTreeNode {
        &self.children[index]
    }

    pub fn children(&self) -> &[DomTreeNode] {
        &self.children
    }

    /// Depth-first lookup of the subtree rooted at `node`.
    pub fn find(&self, node: CfgNodeId) -> Option<&DomTreeNode> {
        if self.node == node {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(node))
    }
}

fn forward_graph(cfg: &Cfg) -> DiGraphMap<CfgNodeId, ()> {
    let mut graph = DiGraphMap::new();
    for node in cfg.nodes() {
        graph.add_node(node);
    }
    for node in cfg.nodes() {
        for &sink in cfg.out_edges(node) {
            graph.add_edge(node, sink, ());
        }
    }
    graph
}

fn tree_from_idoms(
    root: CfgNodeId,
    idoms: &FxHashMap<CfgNodeId, CfgNodeId>,
) -> DomTreeNode {
    let mut children: FxHashMap<CfgNodeId, Vec<CfgNodeId>> = FxHashMap::default();
    for (&node, &idom) in idoms {
        if node != root {
            children.entry(idom).or_default().push(node);
        }
    }
    for list in children.values_mut() {
        list.sort();
    }
    fn build(node: CfgNodeId, children: &FxHashMap<CfgNodeId, Vec<CfgNodeId>>) -> DomTreeNode {
        DomTreeNode {
            node,
            children: children
                .get(&node)
                .map(|kids| kids.iter().map(|&kid| build(kid, children)).collect())
                .unwrap_or_default(),
        }
    }
    build(root, &children)
}

/// The dominator tree of `cfg`, rooted at its entry node.
pub fn domtree(cfg: &Cfg) -> DomTreeNode {
    let graph = forward_graph(cfg);
    let dominators = dominators::simple_fast(&graph, cfg.entry());
    let mut idoms: FxHashMap<CfgNodeId, CfgNodeId> = FxHashMap::default();
    for node in cfg.nodes() {
        if let Some(idom) = dominators.immediate_dominator(node) {
            idoms.insert(node, idom);
        }
    }
    idoms.insert(cfg.entry(), cfg.entry());
    tree_from_idoms(cfg.entry(), &idoms)
}

/// Immediate postdominators, computed on the reversed graph from the exit.
///
/// Nodes that cannot reach the exit are absent from the result.
pub fn ipostdoms(cfg: &Cfg) -> FxHashMap<CfgNodeId, CfgNodeId> {
    let mut graph: DiGraphMap<CfgNodeId, ()> = DiGraphMap::new();
    for node in cfg.nodes() {
        graph.add_node(node);
    }
    for node in cfg.nodes() {
        for &sink in cfg.out_edges(node) {
            graph.add_edge(sink, node, ());
        }
    }
    let dominators = dominators::simple_fast(&graph, cfg.exit());
    let mut result = FxHashMap::default();
    for node in cfg.nodes() {
        if node != cfg.exit()
            && let Some(ipdom) = dominators.immediate_dominator(node)
        {
            result.insert(node, ipdom);
        }
    }
    result
}
