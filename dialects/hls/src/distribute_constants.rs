//! Constant distribution: push constants down into γ branches and θ
//! bodies. A materialized constant is cheaper than the fork and buffer
//! hardware needed to route one value to many places.

use loamc_rvsdg::{
    GammaNode, Graph, GraphError, Output, RegionId, ThetaNode, TopDownTraverser,
};

/// Distribute every constant in the graph as far down as it will go.
pub fn distribute_constants(graph: &mut Graph) -> Result<(), GraphError> {
    let root = graph.root();
    distribute_in_region(graph, root)
}

fn distribute_in_region(graph: &mut Graph, region: RegionId) -> Result<(), GraphError> {
    let mut traverser = TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        if graph.is_structural(node) {
            let subregions: Vec<RegionId> = graph.subregions(node).to_vec();
            for sub in subregions {
                distribute_in_region(graph, sub)?;
            }
        } else if graph.simple_op(node).is_some_and(|op| op.is_constant()) {
            let output = graph.output(node, 0);
            distribute_constant(graph, output)?;
        }
    }
    Ok(())
}

/// Push one constant output through θ and γ boundaries until no user is a
/// structural input any more.
pub fn distribute_constant(graph: &mut Graph, output: Output) -> Result<(), GraphError> {
    let operation = graph
        .producer(output)
        .expect("constant distribution requires a producing node")
        .1
        .copy();
    debug_assert!(operation.is_constant());

    let mut changed = true;
    while changed {
        changed = false;
        let users: Vec<_> = graph.users(output).collect();
        for user in users {
            let Some(consumer) = user.node() else {
                continue;
            };
            if let Some(theta) = ThetaNode::try_from_node(graph, consumer) {
                let loop_var = theta
                    .loop_var_for_input(graph, user)
                    .expect("theta input is not a loop variable");
                if !theta.is_pass_through(graph, &loop_var) {
                    continue;
                }
                log::debug!(
                    target: "distribute-constants",
                    "collapsing pass-through loop variable of {consumer}"
                );
                let body = theta.subregion(graph);
                let inner = graph.create_normalized(body, operation.copy(), &[])?[0];
                let region = graph.node_region(consumer);
                let outer = graph.create_normalized(region, operation.copy(), &[])?[0];
                graph.divert_users(loop_var.output, outer)?;
                graph.divert_users(loop_var.argument, inner)?;
                distribute_constant(graph, inner)?;
                theta.remove_loop_var(graph, &loop_var)?;
                changed = true;
                break;
            }
            if let Some(gamma) = GammaNode::try_from_node(graph, consumer) {
                // The predicate stays put; everything else is an entry.
                let Some(entry) = gamma.entry_var(graph, user) else {
                    continue;
                };
                log::debug!(
                    target: "distribute-constants",
                    "cloning into the branches of {consumer}"
                );
                for argument in &entry.arguments {
                    if graph.num_users(*argument) == 0 {
                        continue;
                    }
                    let branch = graph.output_region(*argument);
                    let replacement =
                        graph.create_normalized(branch, operation.copy(), &[])?[0];
                    graph.divert_users(*argument, replacement)?;
                    distribute_constant(graph, replacement)?;
                }
                gamma.remove_entry_var(graph, &entry)?;
                changed = true;
                break;
            }
        }
    }
    Ok(())
}
