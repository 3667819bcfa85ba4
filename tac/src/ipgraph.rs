use std::sync::Arc;

use cranelift_entity::{PrimaryMap, entity_impl};
use loamc_rvsdg::Linkage;
use loamc_types::{FunctionType, Type};
use petgraph::{graphmap::DiGraphMap, algo::tarjan_scc};

use crate::{cfg::Cfg, tac::Tac};

/// A node of the inter-procedural graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpNode(u32);
entity_impl!(IpNode, "ip");

pub enum IpNodeData {
    Function {
        name: String,
        ty: Arc<FunctionType>,
        linkage: Linkage,
        /// The body; absent for external declarations. Detached with
        /// [IpGraph::take_cfg] while a pass needs to mutate it alongside
        /// the module.
        cfg: Option<Cfg>,
    },
    Data {
        name: String,
        ty: Type,
        linkage: Linkage,
        constant: bool,
        /// Straight-line code computing the initializer; the last code's
        /// result is the initial value.
        initializer: Vec<Tac>,
    },
}

impl IpNodeData {
    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } | Self::Data { name, .. } => name,
        }
    }

    pub fn linkage(&self) -> Linkage {
        match self {
            Self::Function { linkage, .. } | Self::Data { linkage, .. } => *linkage,
        }
    }
}

/// Functions and global data of a module, with their reference edges.
///
/// An edge from `a` to `b` means `a`'s body mentions `b` (a call or an
/// address-taken global). Strongly connected components of this graph are
/// the mutual-recursion groups that construction binds into φ nodes.
#[derive(Default)]
pub struct IpGraph {
    nodes: PrimaryMap<IpNode, IpNodeData>,
    dependencies: PrimaryMap<IpNode, Vec<IpNode>>,
}

impl IpGraph {
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        ty: FunctionType,
        linkage: Linkage,
        cfg: Option<Cfg>,
    ) -> IpNode {
        let node = self.nodes.push(IpNodeData::Function {
            name: name.into(),
            ty: Arc::new(ty),
            linkage,
            cfg,
        });
        let edges = self.dependencies.push(Vec::new());
        debug_assert_eq!(node, edges);
        node
    }

    pub fn add_data(
        &mut self,
        name: impl Into<String>,
        ty: Type,
        linkage: Linkage,
        constant: bool,
        initializer: Vec<Tac>,
    ) -> IpNode {
        let node = self.nodes.push(IpNodeData::Data {
            name: name.into(),
            ty,
            linkage,
            constant,
            initializer,
        });
        let edges = self.dependencies.push(Vec::new());
        debug_assert_eq!(node, edges);
        node
    }

    pub fn add_dependency(&mut self, from: IpNode, to: IpNode) {
        let edges = &mut self.dependencies[from];
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    pub fn node(&self, node: IpNode) -> &IpNodeData {
        &self.nodes[node]
    }

    pub fn nodes(&self) -> impl Iterator<Item = IpNode> + '_ {
        self.nodes.keys()
    }

    pub fn dependencies(&self, node: IpNode) -> &[IpNode] {
        &self.dependencies[node]
    }

    pub fn lookup(&self, name: &str) -> Option<IpNode> {
        self.nodes.iter().find(|(_, data)| data.name() == name).map(|(node, _)| node)
    }

    pub fn set_initializer(&mut self, node: IpNode, tacs: Vec<Tac>) {
        match &mut self.nodes[node] {
            IpNodeData::Data { initializer, .. } => *initializer = tacs,
            IpNodeData::Function { .. } => panic!("function nodes have no initializer"),
        }
    }

    /// Detach a data node's initializer codes.
    pub fn take_initializer(&mut self, node: IpNode) -> Vec<Tac> {
        match &mut self.nodes[node] {
            IpNodeData::Data { initializer, .. } => std::mem::take(initializer),
            IpNodeData::Function { .. } => Vec::new(),
        }
    }

    /// Detach a function's body for mutation alongside the module.
    pub fn take_cfg(&mut self, node: IpNode) -> Option<Cfg> {
        match &mut self.nodes[node] {
            IpNodeData::Function { cfg, .. } => cfg.take(),
            IpNodeData::Data { .. } => None,
        }
    }

    pub fn replace_cfg(&mut self, node: IpNode, body: Cfg) {
        match &mut self.nodes[node] {
            IpNodeData::Function { cfg, .. } => *cfg = Some(body),
            IpNodeData::Data { .. } => panic!("data nodes have no control flow graph"),
        }
    }

    /// Strongly connected components, callees before callers.
    ///
    /// Each component is a mutual-recursion group; singleton components
    /// without a self-edge are plain definitions.
    pub fn find_sccs(&self) -> Vec<Vec<IpNode>> {
        let mut graph: DiGraphMap<IpNode, ()> = DiGraphMap::new();
        for node in self.nodes.keys() {
            graph.add_node(node);
        }
        for node in self.nodes.keys() {
            for dep in &self.dependencies[node] {
                graph.add_edge(node, *dep, ());
            }
        }
        // Components come out with callers before callees when edges point
        // caller -> callee; tarjan yields them in reverse topological order
        // of the condensation, which is exactly callees-first.
        tarjan_scc(&graph)
    }

    /// True if `node` participates in a recursion (a self-edge or a larger
    /// component).
    pub fn is_recursive(&self, node: IpNode, scc: &[IpNode]) -> bool {
        scc.len() > 1 || self.dependencies[node].contains(&node)
    }
}
