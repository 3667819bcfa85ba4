//! Loop inversion: rewriting `θ { if P { body } else { break } }` into
//! `if P { θ { body; P' } }`, so the loop is entered only when the first
//! iteration would actually run.
//!
//! The recognized shape is a θ whose body consists of pure condition
//! nodes plus a single two-armed γ, with the continue predicate read from
//! a γ exit variable: one arm ends the loop with a constant-false
//! predicate and passes every loop variable through, the other carries
//! the real body and recomputes the predicate. Anything else is left
//! untouched.

use loamc_rvsdg::{
    GammaNode, Graph, GraphError, NodeId, Output, RegionId, SubstitutionMap, ThetaNode,
    TopDownTraverser, copy_node, constant_value,
};
use rustc_hash::FxHashSet;

/// Invert every θ of the recognized shape, innermost first.
pub fn invert(graph: &mut Graph) -> Result<(), GraphError> {
    let root = graph.root();
    invert_region(graph, root)
}

fn invert_region(graph: &mut Graph, region: RegionId) -> Result<(), GraphError> {
    let mut traverser = TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        let subregions: Vec<RegionId> = graph.subregions(node).to_vec();
        for sub in subregions {
            invert_region(graph, sub)?;
        }
        if let Some(theta) = ThetaNode::try_from_node(graph, node) {
            try_invert(graph, &theta)?;
        }
    }
    Ok(())
}

struct InversionPlan {
    gamma: GammaNode,
    /// Body nodes other than the γ; all pure and simple.
    condition_nodes: Vec<NodeId>,
    /// The arm that exits the loop (constant-false predicate).
    exit_arm: usize,
    /// The arm that carries the loop body.
    continue_arm: usize,
}

fn recognize(graph: &Graph, theta: &ThetaNode) -> Option<InversionPlan> {
    let body = theta.subregion(graph);
    let mut gamma = None;
    let mut condition_nodes = Vec::new();
    for &node in graph.region_nodes(body) {
        if let Some(found) = GammaNode::try_from_node(graph, node) {
            if gamma.replace(found).is_some() {
                return None;
            }
        } else if graph.is_simple(node) && !graph.has_side_effects(node) {
            condition_nodes.push(node);
        } else {
            return None;
        }
    }
    let gamma = gamma?;
    if gamma.alternatives(graph) != 2 {
        return None;
    }

    // The continue predicate must be a γ exit variable, constant false in
    // exactly one arm.
    let predicate_origin = graph.origin(theta.predicate(graph));
    let exit = gamma.exit_var(graph, predicate_origin)?;
    let arm_flag = |arm: usize| -> Option<bool> {
        constant_value(graph, graph.origin(exit.results[arm]))
            .map(|value| !value.is_zero())
    };
    let (exit_arm, continue_arm) = match (arm_flag(0), arm_flag(1)) {
        (Some(false), None) | (Some(false), Some(true)) => (0, 1),
        (None, Some(false)) | (Some(true), Some(false)) => (1, 0),
        _ => return None,
    };

    // Skipping the exit arm must be indistinguishable from running it:
    // every loop variable routed through the γ must pass through that arm
    // unchanged.
    for loop_var in theta.loop_vars(graph) {
        let origin = graph.origin(loop_var.result);
        if origin == loop_var.argument {
            continue;
        }
        let through = gamma.exit_var(graph, origin)?;
        let exit_value = graph.origin(through.results[exit_arm]);
        let Output::Argument { index, .. } = exit_value else {
            return None;
        };
        let entry_input = graph.input(gamma.node(), index + 1);
        if graph.origin(entry_input) != loop_var.argument {
            return None;
        }
    }

    Some(InversionPlan {
        gamma,
        condition_nodes,
        exit_arm,
        continue_arm,
    })
}

/// The condition nodes the γ entries actually depend on.
fn needed_conditions(graph: &Graph, plan: &InversionPlan) -> Vec<NodeId> {
    let mut needed: FxHashSet<NodeId> = FxHashSet::default();
    let mut worklist: Vec<NodeId> = Vec::new();
    for entry in plan.gamma.entry_vars(graph) {
        if let Some(node) = graph.origin(entry.input).node() {
            if node != plan.gamma.node() {
                worklist.push(node);
            }
        }
    }
    while let Some(node) = worklist.pop() {
        if !needed.insert(node) {
            continue;
        }
        for index in 0..graph.num_inputs(node) {
            if let Some(producer) = graph.origin(graph.input(node, index)).node() {
                worklist.push(producer);
            }
        }
    }
    topo_order(graph, &needed.into_iter().collect::<Vec<_>>())
}

/// Order a set of nodes so that producers precede users; required before
/// copying, since passes may have disturbed the region list order.
fn topo_order(graph: &Graph, nodes: &[NodeId]) -> Vec<NodeId> {
    let members: FxHashSet<NodeId> = nodes.iter().copied().collect();
    let mut order: Vec<NodeId> = Vec::with_capacity(nodes.len());
    let mut done: FxHashSet<NodeId> = FxHashSet::default();
    let mut sorted = nodes.to_vec();
    sorted.sort();
    for &start in &sorted {
        let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];
        while let Some(&(node, cursor)) = stack.last() {
            if done.contains(&node) {
                stack.pop();
                continue;
            }
            if cursor < graph.num_inputs(node) {
                stack.last_mut().expect("stack vanished").1 += 1;
                if let Some(producer) = graph.origin(graph.input(node, cursor)).node() {
                    if members.contains(&producer) && !done.contains(&producer) {
                        stack.push((producer, 0));
                    }
                }
            } else {
                done.insert(node);
                order.push(node);
                stack.pop();
            }
        }
    }
    order
}

fn try_invert(graph: &mut Graph, theta: &ThetaNode) -> Result<bool, GraphError> {
    let Some(plan) = recognize(graph, theta) else {
        return Ok(false);
    };
    log::debug!(target: "invert", "inverting {}", theta.node());
    let region = graph.node_region(theta.node());
    let loop_vars = theta.loop_vars(graph);

    // Evaluate the condition once in front of the loop, on the entry
    // values.
    let mut outer_map = SubstitutionMap::new();
    for loop_var in &loop_vars {
        outer_map.insert(loop_var.argument, graph.origin(loop_var.input));
    }
    for node in topo_order(graph, &plan.condition_nodes) {
        copy_node(graph, node, region, &mut outer_map)?;
    }
    let outer_predicate =
        outer_map.resolve(graph.origin(plan.gamma.predicate(graph)));
    let new_gamma = GammaNode::create(graph, outer_predicate)?;

    // Route every loop variable's entry value into both arms.
    let mut arm_values: Vec<Vec<Output>> = vec![Vec::new(); 2];
    for loop_var in &loop_vars {
        let origin = graph.origin(loop_var.input);
        let entry = new_gamma.add_entry_var(graph, origin)?;
        arm_values[0].push(entry.arguments[0]);
        arm_values[1].push(entry.arguments[1]);
    }

    // The continuing arm wraps the old body in a fresh θ.
    let new_theta = ThetaNode::create(graph, new_gamma.subregion(graph, plan.continue_arm))?;
    let mut inner_map = SubstitutionMap::new();
    let mut new_loop_vars = Vec::with_capacity(loop_vars.len());
    for (loop_var, value) in loop_vars.iter().zip(&arm_values[plan.continue_arm]) {
        let new_var = new_theta.add_loop_var(graph, *value)?;
        inner_map.insert(loop_var.argument, new_var.argument);
        new_loop_vars.push(new_var);
    }
    let inner_region = new_theta.subregion(graph);
    for node in needed_conditions(graph, &plan) {
        copy_node(graph, node, inner_region, &mut inner_map)?;
    }
    // Copy the continuing arm's contents; its entry arguments resolve to
    // the θ arguments (or condition copies).
    for entry in plan.gamma.entry_vars(graph) {
        let origin = graph.origin(entry.input);
        inner_map.insert(
            entry.arguments[plan.continue_arm],
            inner_map.resolve(origin),
        );
    }
    let arm_region = plan.gamma.subregion(graph, plan.continue_arm);
    let arm_nodes = topo_order(graph, graph.region_nodes(arm_region));
    for node in arm_nodes {
        copy_node(graph, node, inner_region, &mut inner_map)?;
    }
    // Map the old γ outputs to the continuing arm's result values.
    for index in 0..graph.num_outputs(plan.gamma.node()) {
        let result = graph.result(arm_region, index);
        let mapped = inner_map.resolve(graph.origin(result));
        inner_map.insert(graph.output(plan.gamma.node(), index), mapped);
    }
    // Wire the new θ: results and the recomputed predicate.
    for (loop_var, new_var) in loop_vars.iter().zip(&new_loop_vars) {
        let value = inner_map.resolve(graph.origin(loop_var.result));
        graph.divert_origin(new_var.result, value)?;
    }
    let new_predicate = inner_map.resolve(graph.origin(theta.predicate(graph)));
    new_theta.set_predicate(graph, new_predicate)?;

    // Exit variables: the skipped arm passes the entry values through.
    for (index, loop_var) in loop_vars.iter().enumerate() {
        let pass = arm_values[plan.exit_arm][index];
        let looped = new_loop_vars[index].output;
        let origins = if plan.exit_arm == 0 {
            [pass, looped]
        } else {
            [looped, pass]
        };
        let exit = new_gamma.add_exit_var(graph, &origins)?;
        graph.divert_users(loop_var.output, exit.output)?;
    }
    graph.remove_node(theta.node())?;
    Ok(true)
}
