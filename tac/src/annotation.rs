//! Annotation: liveness-style demand sets over an aggregation tree.
//!
//! Two passes: a bottom-up collection of per-region read and write sets,
//! then a backward demand propagation computing, for every region, the
//! variables that must be live at its top and bottom. The construction
//! pass reads these sets to decide which variables become γ entry/exit
//! variables and θ loop variables.

use std::collections::BTreeSet;

use crate::{aggregation::AggNode, module::Variable};

/// Deterministically ordered variable set; the iteration order fixes the
/// order of γ and θ variables during construction.
pub type VarSet = BTreeSet<Variable>;

#[derive(Debug, Default, Clone)]
pub struct DemandSet {
    /// Variables read before any write within the region.
    pub reads: VarSet,
    /// Variables written anywhere within the region.
    pub writes: VarSet,
    /// Variables that must be live when the region is entered.
    pub top: VarSet,
    /// Variables demanded after the region.
    pub bottom: VarSet,
}

/// Demand sets arranged in the same shape as the aggregation tree.
pub struct DemandTree {
    pub set: DemandSet,
    pub children: Vec<DemandTree>,
}

/// Annotate an aggregation tree, assuming nothing is demanded after it.
pub fn annotate(root: &AggNode) -> DemandTree {
    let mut tree = read_write(root);
    demand(&mut tree, root, VarSet::new());
    tree
}

fn read_write(node: &AggNode) -> DemandTree {
    match node {
        AggNode::Entry { arguments } => DemandTree {
            set: DemandSet {
                writes: arguments.iter().copied().collect(),
                ..DemandSet::default()
            },
            children: Vec::new(),
        },
        AggNode::Exit { results } => DemandTree {
            set: DemandSet {
                reads: results.iter().copied().collect(),
                ..DemandSet::default()
            },
            children: Vec::new(),
        },
        AggNode::Block { tacs } => {
            let mut set = DemandSet::default();
            for tac in tacs {
                for operand in tac.operands() {
                    if !set.writes.contains(operand) {
                        set.reads.insert(*operand);
                    }
                }
                set.writes.extend(tac.results().iter().copied());
            }
            DemandTree {
                set,
                children: Vec::new(),
            }
        }
        AggNode::Linear { children } => {
            let children: Vec<DemandTree> = children.iter().map(read_write).collect();
            let mut set = DemandSet::default();
            for child in &children {
                for read in &child.set.reads {
                    if !set.writes.contains(read) {
                        set.reads.insert(*read);
                    }
                }
                set.writes.extend(child.set.writes.iter().copied());
            }
            DemandTree { set, children }
        }
        AggNode::Branch { branches } => {
            let children: Vec<DemandTree> = branches.iter().map(read_write).collect();
            let mut set = DemandSet::default();
            for child in &children {
                set.reads.extend(child.set.reads.iter().copied());
            }
            // Only writes on every path count as definitely written.
            if let Some(first) = children.first() {
                set.writes = children[1..].iter().fold(first.set.writes.clone(), |acc, child| {
                    acc.intersection(&child.set.writes).copied().collect()
                });
            }
            DemandTree { set, children }
        }
        AggNode::Loop { body } => {
            let child = read_write(body);
            let set = DemandSet {
                reads: child.set.reads.clone(),
                writes: child.set.writes.clone(),
                ..DemandSet::default()
            };
            DemandTree {
                set,
                children: vec![child],
            }
        }
    }
}

fn demand(tree: &mut DemandTree, node: &AggNode, bottom: VarSet) {
    tree.set.bottom = bottom.clone();
    match node {
        AggNode::Entry { .. } | AggNode::Exit { .. } | AggNode::Block { .. } => {
            tree.set.top = generic_top(&tree.set, &bottom);
        }
        AggNode::Linear { children } => {
            let mut running = bottom;
            for (child, agg) in tree.children.iter_mut().zip(children).rev() {
                demand(child, agg, running);
                running = child.set.top.clone();
            }
            tree.set.top = running;
        }
        AggNode::Branch { branches } => {
            // Everything demanded below and written by any arm must leave
            // the branch through every arm.
            let written: VarSet = tree
                .children
                .iter()
                .flat_map(|child| child.set.writes.iter().copied())
                .collect();
            let exits: VarSet = bottom.intersection(&written).copied().collect();
            let mut top: VarSet = bottom.difference(&written).copied().collect();
            for (child, agg) in tree.children.iter_mut().zip(branches) {
                demand(child, agg, exits.clone());
                top.extend(child.set.top.iter().copied());
            }
            tree.set.top = top;
        }
        AggNode::Loop { body } => {
            // Loop variables: everything the body reads, plus everything it
            // writes that is still demanded below. The body must carry
            // these through every iteration.
            let child = &tree.children[0];
            let mut loop_vars: VarSet = child.set.reads.clone();
            loop_vars.extend(bottom.intersection(&child.set.writes).copied());
            let bypass: VarSet = bottom.difference(&tree.set.writes).copied().collect();
            demand(&mut tree.children[0], body, loop_vars.clone());
            tree.set.top = loop_vars;
            tree.set.top.extend(bypass);
        }
    }
}

fn generic_top(set: &DemandSet, bottom: &VarSet) -> VarSet {
    let mut top = set.reads.clone();
    top.extend(bottom.difference(&set.writes).copied());
    top
}
