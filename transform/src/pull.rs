//! Code motion across γ boundaries.
//!
//! Pull-in moves work into the branches: a pure node consumed only by one
//! γ is cloned into every arm, so each arm can simplify it against its own
//! context. Pull-out is the dual: work performed identically in every arm
//! is hoisted in front of the γ, exposing it to CSE with the surrounding
//! region.

use loamc_rvsdg::{
    EntryVar, GammaNode, Graph, GraphError, Input, NodeId, Output, RegionId, SubstitutionMap,
    TopDownTraverser, copy_node,
};

/// Apply pull-in and pull-out to every γ in the graph, recursing into all
/// structural sub-regions.
pub fn pull(graph: &mut Graph) -> Result<(), GraphError> {
    let root = graph.root();
    pull_region(graph, root)
}

pub fn pull_region(graph: &mut Graph, region: RegionId) -> Result<(), GraphError> {
    let mut traverser = TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        if let Some(gamma) = GammaNode::try_from_node(graph, node) {
            pullin_top(graph, &gamma)?;
            pullin_bottom(graph, &gamma)?;
            pullout(graph, &gamma)?;
        }
        let subregions: Vec<RegionId> = graph.subregions(node).to_vec();
        for sub in subregions {
            pull_region(graph, sub)?;
        }
    }
    Ok(())
}

/// True if every user of every output of `node` is an entry input of this
/// γ (never the predicate).
fn only_feeds_gamma_entries(graph: &Graph, gamma: &GammaNode, node: NodeId) -> bool {
    (0..graph.num_outputs(node)).all(|index| {
        graph.users(graph.output(node, index)).all(|user| match user {
            Input::Node { node: consumer, index } => consumer == gamma.node() && index >= 1,
            Input::Result { .. } => false,
        })
    })
}

/// Clone nodes that only feed this γ's entries into every branch,
/// deleting the γ inputs they occupied.
pub fn pullin_top(graph: &mut Graph, gamma: &GammaNode) -> Result<bool, GraphError> {
    let mut changed = false;
    loop {
        let candidate = gamma.entry_vars(graph).into_iter().find_map(|entry| {
            let node = graph.origin(entry.input).node()?;
            (graph.is_simple(node)
                && !graph.has_side_effects(node)
                && only_feeds_gamma_entries(graph, gamma, node))
            .then_some(node)
        });
        let Some(node) = candidate else {
            return Ok(changed);
        };
        log::debug!(
            target: "pull",
            "pulling `{}` into {}",
            graph.debug_string(node),
            gamma.node()
        );
        pull_node_in(graph, gamma, node)?;
        changed = true;
    }
}

fn pull_node_in(graph: &mut Graph, gamma: &GammaNode, node: NodeId) -> Result<(), GraphError> {
    let alternatives = gamma.alternatives(graph);
    // Route the node's operands into every branch.
    let operands = graph.operands(node);
    let mut operand_entries: Vec<EntryVar> = Vec::with_capacity(operands.len());
    for &operand in &operands {
        operand_entries.push(gamma.add_entry_var(graph, operand)?);
    }
    for branch in 0..alternatives {
        let mut smap = SubstitutionMap::new();
        for (&operand, entry) in operands.iter().zip(&operand_entries) {
            smap.insert(operand, entry.arguments[branch]);
        }
        let subregion = gamma.subregion(graph, branch);
        let copy = copy_node(graph, node, subregion, &mut smap)?;
        // Wherever a branch argument carried one of the node's outputs,
        // read the local copy instead.
        for index in 0..graph.num_outputs(node) {
            let output = graph.output(node, index);
            let consumers: Vec<Input> = graph.users(output).collect();
            for consumer in consumers {
                let entry = gamma
                    .entry_var(graph, consumer)
                    .expect("user is not a gamma entry despite the candidate check");
                graph.divert_users(entry.arguments[branch], graph.output(copy, index))?;
            }
        }
    }
    // The entry variables that carried the outputs are now unused.
    loop {
        let stale = (0..graph.num_outputs(node)).find_map(|index| {
            graph.users(graph.output(node, index)).next()
        });
        let Some(user) = stale else {
            break;
        };
        let entry = gamma
            .entry_var(graph, user)
            .expect("user is not a gamma entry despite the candidate check");
        gamma.remove_entry_var(graph, &entry)?;
    }
    graph.remove_node(node)
}

/// Move pure nodes that consume this γ's outputs into the branches,
/// replacing their results with fresh exit variables.
pub fn pullin_bottom(graph: &mut Graph, gamma: &GammaNode) -> Result<bool, GraphError> {
    let region = graph.node_region(gamma.node());
    let mut changed = false;
    loop {
        // A candidate consumes at least one γ output, and every operand is
        // either a γ output or a value defined before the γ.
        let position = graph
            .region_nodes(region)
            .iter()
            .position(|&n| n == gamma.node())
            .expect("gamma left its region");
        let before: Vec<NodeId> = graph.region_nodes(region)[..position].to_vec();
        let candidate = (0..graph.num_outputs(gamma.node())).find_map(|index| {
            graph
                .users(graph.output(gamma.node(), index))
                .filter_map(|user| user.node())
                .find(|&consumer| {
                    graph.is_simple(consumer)
                        && !graph.has_side_effects(consumer)
                        && graph.operands(consumer).iter().all(|origin| {
                            origin.node().is_none_or(|producer| {
                                producer == gamma.node() || before.contains(&producer)
                            })
                        })
                })
        });
        let Some(node) = candidate else {
            return Ok(changed);
        };
        log::debug!(
            target: "pull",
            "pulling `{}` below into {}",
            graph.debug_string(node),
            gamma.node()
        );
        pull_node_in_below(graph, gamma, node)?;
        changed = true;
    }
}

fn pull_node_in_below(
    graph: &mut Graph,
    gamma: &GammaNode,
    node: NodeId,
) -> Result<(), GraphError> {
    let alternatives = gamma.alternatives(graph);
    let operands = graph.operands(node);

    // Per-branch operand values: γ outputs map to the branch results that
    // feed them, anything else is routed in through a fresh entry.
    let mut per_branch: Vec<Vec<Output>> = vec![Vec::with_capacity(operands.len()); alternatives];
    for &operand in &operands {
        if let Some(exit) = gamma.exit_var(graph, operand) {
            for (branch, values) in per_branch.iter_mut().enumerate() {
                values.push(graph.origin(exit.results[branch]));
            }
        } else {
            let entry = gamma.add_entry_var(graph, operand)?;
            for (branch, values) in per_branch.iter_mut().enumerate() {
                values.push(entry.arguments[branch]);
            }
        }
    }

    let mut copies: Vec<NodeId> = Vec::with_capacity(alternatives);
    for branch in 0..alternatives {
        let mut smap = SubstitutionMap::new();
        for (&operand, &value) in operands.iter().zip(&per_branch[branch]) {
            smap.insert(operand, value);
        }
        let subregion = gamma.subregion(graph, branch);
        copies.push(copy_node(graph, node, subregion, &mut smap)?);
    }
    for index in 0..graph.num_outputs(node) {
        let origins: Vec<Output> =
            copies.iter().map(|&copy| graph.output(copy, index)).collect();
        let exit = gamma.add_exit_var(graph, &origins)?;
        graph.divert_users(graph.output(node, index), exit.output)?;
    }
    graph.remove_node(node)
}

/// Hoist work performed identically in every arm out in front of the γ.
///
/// A γ whose arms are identical reduces to the common subgraph: every exit
/// is hoisted, the arms die, and dead-node elimination erases the rest.
pub fn pullout(graph: &mut Graph, gamma: &GammaNode) -> Result<bool, GraphError> {
    let region = graph.node_region(gamma.node());
    let mut changed = false;
    loop {
        let candidate = gamma.exit_vars(graph).into_iter().find_map(|exit| {
            hoistable_operands(graph, gamma, &exit.results).map(|plan| (exit, plan))
        });
        let Some((exit, (operation_of, outer_operands, output_index))) = candidate else {
            return Ok(changed);
        };
        let operation = graph
            .simple_op(operation_of)
            .expect("hoist candidate is not simple")
            .copy();
        log::debug!(
            target: "pull",
            "hoisting `{}` out of {}",
            operation.debug_string(),
            gamma.node()
        );
        let outputs = graph.create_normalized(region, operation, &outer_operands)?;
        graph.divert_users(exit.output, outputs[output_index])?;
        gamma.remove_exit_var(graph, &exit)?;
        changed = true;
    }
}

/// Check that the per-branch producers behind an exit variable are the
/// same pure operation applied to the same outer values; returns one
/// representative node, the outer operand list, and the produced output
/// index.
fn hoistable_operands(
    graph: &Graph,
    gamma: &GammaNode,
    results: &[Input],
) -> Option<(NodeId, Vec<Output>, usize)> {
    let mut representative: Option<(NodeId, usize)> = None;
    let mut outer: Vec<Output> = Vec::new();
    for (branch, &result) in results.iter().enumerate() {
        let origin = graph.origin(result);
        let node = origin.node()?;
        if graph.node_region(node) != gamma.subregion(graph, branch) {
            return None;
        }
        let operation = graph.simple_op(node)?;
        if operation.has_effects() {
            return None;
        }
        let mut operands: Vec<Output> = Vec::with_capacity(graph.num_inputs(node));
        for index in 0..graph.num_inputs(node) {
            // Operands must come straight from entry variables; their
            // outer origins are what the hoisted node reads.
            let argument = graph.origin(graph.input(node, index));
            let Output::Argument { index: position, .. } = argument else {
                return None;
            };
            let entry_input = graph.input(gamma.node(), position + 1);
            operands.push(graph.origin(entry_input));
        }
        match &representative {
            None => {
                representative = Some((node, origin.index()));
                outer = operands;
            }
            Some((first, output_index)) => {
                let first_op = graph.simple_op(*first)?;
                if !first_op.equals(operation)
                    || operands != outer
                    || origin.index() != *output_index
                {
                    return None;
                }
            }
        }
    }
    representative.map(|(node, output_index)| (node, outer, output_index))
}
