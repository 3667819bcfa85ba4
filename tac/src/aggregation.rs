//! Aggregation: collapsing a structured CFG into a tree of canonical
//! regions.
//!
//! The graph is reduced to a single node by repeatedly applying three
//! rules: a self-loop becomes a [Loop](AggNode::Loop) region, a node with
//! a unique successor that has a unique predecessor merges into a
//! [Linear](AggNode::Linear) region, and a fan-out whose arms reconverge
//! on one target folds into a [Branch](AggNode::Branch) region. A graph on
//! which no rule applies is not structured.

use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::{
    cfg::{Cfg, CfgError, CfgNodeId},
    module::Variable,
    tac::Tac,
};

/// A node of the aggregation tree.
pub enum AggNode {
    Entry { arguments: Vec<Variable> },
    Exit { results: Vec<Variable> },
    Block { tacs: Vec<Tac> },
    Linear { children: Vec<AggNode> },
    Branch { branches: Vec<AggNode> },
    Loop { body: Box<AggNode> },
}

impl AggNode {
    /// An indented ASCII rendering for diagnostics.
    pub fn to_ascii(&self) -> String {
        let mut out = String::new();
        self.ascii_rec(0, &mut out);
        out
    }

    fn ascii_rec(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            Self::Entry { arguments } => {
                let _ = writeln!(out, "{indent}entry ({} arguments)", arguments.len());
            }
            Self::Exit { results } => {
                let _ = writeln!(out, "{indent}exit ({} results)", results.len());
            }
            Self::Block { tacs } => {
                let _ = writeln!(out, "{indent}block ({} tacs)", tacs.len());
            }
            Self::Linear { children } => {
                let _ = writeln!(out, "{indent}linear");
                for child in children {
                    child.ascii_rec(depth + 1, out);
                }
            }
            Self::Branch { branches } => {
                let _ = writeln!(out, "{indent}branch");
                for branch in branches {
                    branch.ascii_rec(depth + 1, out);
                }
            }
            Self::Loop { body } => {
                let _ = writeln!(out, "{indent}loop");
                body.ascii_rec(depth + 1, out);
            }
        }
    }
}

/// One reduction of the graph skeleton.
pub(crate) enum Step {
    /// Node had an edge to itself; it becomes a loop region.
    SelfLoop(CfgNodeId),
    /// Second node merges into the first.
    Linear(CfgNodeId, CfgNodeId),
    /// The node's arms (`None` marks an edge jumping straight to the join)
    /// merge into it as a branch region.
    Branch(CfgNodeId, Vec<Option<CfgNodeId>>),
}

type EdgeMap = FxHashMap<CfgNodeId, Vec<CfgNodeId>>;

/// Run the reduction to completion on an adjacency skeleton. Returns the
/// steps taken and whether a single node remained.
pub(crate) fn reduce(succs: &mut EdgeMap, preds: &mut EdgeMap) -> (Vec<Step>, bool) {
    let mut steps = Vec::new();
    loop {
        if succs.len() <= 1 {
            return (steps, true);
        }

        // Self-loop rule.
        if let Some(node) = succs
            .iter()
            .find(|(node, targets)| targets.contains(*node))
            .map(|(node, _)| *node)
        {
            succs.get_mut(&node).unwrap().retain(|t| *t != node);
            preds.get_mut(&node).unwrap().retain(|p| *p != node);
            steps.push(Step::SelfLoop(node));
            continue;
        }

        // Linear rule.
        let linear = succs.iter().find_map(|(&node, targets)| {
            if targets.len() != 1 {
                return None;
            }
            let succ = targets[0];
            (succ != node && preds[&succ].len() == 1).then_some((node, succ))
        });
        if let Some((node, succ)) = linear {
            let succ_targets = succs.remove(&succ).unwrap();
            preds.remove(&succ);
            for &target in &succ_targets {
                for pred in preds.get_mut(&target).unwrap() {
                    if *pred == succ {
                        *pred = node;
                    }
                }
            }
            *succs.get_mut(&node).unwrap() = succ_targets;
            steps.push(Step::Linear(node, succ));
            continue;
        }

        // Branch rule.
        let branch = succs.iter().find_map(|(&node, targets)| {
            if targets.len() < 2 {
                return None;
            }
            let mut join: Option<CfgNodeId> = None;
            let mut arms: Vec<Option<CfgNodeId>> = Vec::with_capacity(targets.len());
            let mut direct: Vec<usize> = Vec::new();
            for (position, &arm) in targets.iter().enumerate() {
                let dedicated = preds[&arm].len() == 1
                    && preds[&arm][0] == node
                    && succs[&arm].len() == 1;
                if dedicated {
                    let target = succs[&arm][0];
                    if target == node {
                        return None;
                    }
                    match join {
                        None => join = Some(target),
                        Some(j) if j == target => {}
                        Some(_) => return None,
                    }
                    arms.push(Some(arm));
                } else {
                    // Tentatively an empty arm straight to the join.
                    direct.push(position);
                    arms.push(None);
                }
            }
            let join = join.or_else(|| {
                // All edges jump to the same node directly.
                let first = targets[0];
                targets.iter().all(|&t| t == first).then_some(first)
            })?;
            if direct.iter().any(|&position| targets[position] != join) {
                return None;
            }
            Some((node, arms, join))
        });
        if let Some((node, arms, join)) = branch {
            for arm in arms.iter().flatten() {
                succs.remove(arm);
                preds.remove(arm);
            }
            let removed: Vec<CfgNodeId> = arms.iter().flatten().copied().collect();
            let join_preds = preds.get_mut(&join).unwrap();
            join_preds.retain(|p| *p != node && !removed.contains(p));
            join_preds.push(node);
            *succs.get_mut(&node).unwrap() = vec![join];
            steps.push(Step::Branch(node, arms));
            continue;
        }

        return (steps, false);
    }
}

/// True if the skeleton collapses to a single node.
pub(crate) fn reduces_to_single(succs: &mut EdgeMap, preds: &mut EdgeMap) -> bool {
    reduce(succs, preds).1
}

fn skeleton_of(cfg: &Cfg) -> (EdgeMap, EdgeMap) {
    let mut succs: EdgeMap = FxHashMap::default();
    let mut preds: EdgeMap = FxHashMap::default();
    for node in cfg.nodes() {
        succs.entry(node).or_default();
        preds.entry(node).or_default();
    }
    for node in cfg.nodes() {
        for &sink in cfg.out_edges(node) {
            succs.get_mut(&node).unwrap().push(sink);
            preds.get_mut(&sink).unwrap().push(node);
        }
    }
    (succs, preds)
}

/// Collapse a structured CFG into its aggregation tree, consuming the
/// graph's contents.
pub fn aggregate(mut cfg: Cfg) -> Result<AggNode, CfgError> {
    let (mut succs, mut preds) = skeleton_of(&cfg);
    let (steps, reduced) = reduce(&mut succs, &mut preds);
    if !reduced {
        return Err(CfgError::NotStructured);
    }

    let mut payload: FxHashMap<CfgNodeId, AggNode> = FxHashMap::default();
    let nodes: Vec<CfgNodeId> = cfg.nodes().collect();
    for node in nodes {
        let agg = if node == cfg.entry() {
            AggNode::Entry {
                arguments: cfg.arguments().to_vec(),
            }
        } else if node == cfg.exit() {
            AggNode::Exit {
                results: cfg.results().to_vec(),
            }
        } else {
            AggNode::Block {
                tacs: cfg.take_tacs(node),
            }
        };
        payload.insert(node, agg);
    }

    fn append(left: AggNode, right: AggNode) -> AggNode {
        let mut children = match left {
            AggNode::Linear { children } => children,
            other => vec![other],
        };
        match right {
            AggNode::Linear {
                children: mut trailing,
            } => children.append(&mut trailing),
            other => children.push(other),
        }
        AggNode::Linear { children }
    }

    let mut root = None;
    for step in steps {
        match step {
            Step::SelfLoop(node) => {
                let body = payload.remove(&node).expect("loop body payload missing");
                payload.insert(node, AggNode::Loop { body: Box::new(body) });
                root = Some(node);
            }
            Step::Linear(node, succ) => {
                let right = payload.remove(&succ).expect("linear payload missing");
                let left = payload.remove(&node).expect("linear payload missing");
                payload.insert(node, append(left, right));
                root = Some(node);
            }
            Step::Branch(node, arms) => {
                let branches: Vec<AggNode> = arms
                    .into_iter()
                    .map(|arm| match arm {
                        Some(arm) => payload.remove(&arm).expect("branch payload missing"),
                        None => AggNode::Block { tacs: Vec::new() },
                    })
                    .collect();
                let head = payload.remove(&node).expect("branch payload missing");
                payload.insert(node, append(head, AggNode::Branch { branches }));
                root = Some(node);
            }
        }
    }

    let root = root.unwrap_or(cfg.entry());
    Ok(payload.remove(&root).expect("aggregation root payload missing"))
}
