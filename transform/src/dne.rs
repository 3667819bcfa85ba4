use loamc_rvsdg::{BottomUpTraverser, Graph, GraphError, NodeId, RegionId};
use rustc_hash::FxHashSet;

/// Dead-node elimination: mark everything reachable bottom-up from the
/// region results, keep operations with side effects alive, sweep the
/// rest. Applied recursively to every structural sub-region.
pub fn dead_node_elimination(graph: &mut Graph) -> Result<(), GraphError> {
    let root = graph.root();
    eliminate_in_region(graph, root)
}

fn eliminate_in_region(graph: &mut Graph, region: RegionId) -> Result<(), GraphError> {
    log::debug!(target: "dne", "sweeping {region}");
    let mut live: FxHashSet<NodeId> = FxHashSet::default();
    let mut worklist: Vec<NodeId> = Vec::new();
    for index in 0..graph.num_results(region) {
        if let Some(node) = graph.origin(graph.result(region, index)).node() {
            worklist.push(node);
        }
    }
    for &node in graph.region_nodes(region) {
        if graph.has_side_effects(node) {
            worklist.push(node);
        }
    }
    while let Some(node) = worklist.pop() {
        if !live.insert(node) {
            continue;
        }
        for index in 0..graph.num_inputs(node) {
            if let Some(producer) = graph.origin(graph.input(node, index)).node() {
                worklist.push(producer);
            }
        }
    }

    // Sweep until nothing changes; dead nodes may momentarily keep each
    // other alive through user edges.
    let mut changed = true;
    while changed {
        changed = false;
        let mut traverser = BottomUpTraverser::new(graph, region);
        while let Some(node) = traverser.next(graph) {
            if live.contains(&node) {
                continue;
            }
            let removable = (0..graph.num_outputs(node))
                .all(|index| graph.num_users(graph.output(node, index)) == 0);
            if removable {
                log::debug!(target: "dne", "removing {node} `{}`", graph.debug_string(node));
                graph.remove_node(node)?;
                changed = true;
            }
        }
    }

    let survivors: Vec<NodeId> = graph.region_nodes(region).to_vec();
    for node in survivors {
        let subregions: Vec<RegionId> = graph.subregions(node).to_vec();
        for sub in subregions {
            eliminate_in_region(graph, sub)?;
        }
    }
    Ok(())
}
