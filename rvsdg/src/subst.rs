use rustc_hash::FxHashMap;

use crate::graph::{Graph, GraphError, NodeId, Output, RegionId};

/// Maps outputs of a source subgraph to their copies in a target subgraph.
#[derive(Debug, Default)]
pub struct SubstitutionMap {
    map: FxHashMap<Output, Output>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: Output, new: Output) {
        self.map.insert(old, new);
    }

    pub fn lookup(&self, old: Output) -> Option<Output> {
        self.map.get(&old).copied()
    }

    /// The mapping for `old`, falling back to `old` itself for values the
    /// copy shares with its source (same-region operands).
    pub fn resolve(&self, old: Output) -> Output {
        self.lookup(old).unwrap_or(old)
    }
}

/// Copy `node` into `target`, mapping operands through `smap` and
/// recording the copied outputs in it.
///
/// Structural nodes are copied recursively: fresh sub-regions, arguments,
/// body nodes in order, and results. Operands without a mapping are used
/// as-is, which is only legal when source and target share a region.
pub fn copy_node(
    graph: &mut Graph,
    node: NodeId,
    target: RegionId,
    smap: &mut SubstitutionMap,
) -> Result<NodeId, GraphError> {
    let operands: Vec<Output> = graph
        .operands(node)
        .into_iter()
        .map(|origin| smap.resolve(origin))
        .collect();
    if graph.is_simple(node) {
        let operation = graph
            .simple_op(node)
            .expect("simple node without a simple operation")
            .copy();
        let copy = graph.add_simple_node(target, operation, &operands)?;
        for index in 0..graph.num_outputs(node) {
            smap.insert(graph.output(node, index), graph.output(copy, index));
        }
        return Ok(copy);
    }

    let operation = match graph.structural_op(node) {
        Some(op) => op.clone(),
        None => unreachable!("node is neither simple nor structural"),
    };
    let subregions: Vec<RegionId> = graph.subregions(node).to_vec();
    let copy = graph.add_structural_node(target, operation, subregions.len());
    for origin in operands {
        graph.add_input(copy, origin)?;
    }
    for (position, source) in subregions.into_iter().enumerate() {
        let dest = graph.subregions(copy)[position];
        for index in 0..graph.num_arguments(source) {
            let ty = graph.output_type(graph.argument(source, index));
            let argument = graph.add_argument(dest, ty);
            smap.insert(graph.argument(source, index), argument);
        }
        copy_region_contents(graph, source, dest, smap)?;
        for index in 0..graph.num_results(source) {
            let origin = graph.origin(graph.result(source, index));
            graph.add_result(dest, smap.resolve(origin))?;
        }
    }
    for index in 0..graph.num_outputs(node) {
        let ty = graph.output_type(graph.output(node, index));
        let output = graph.add_output(copy, ty);
        smap.insert(graph.output(node, index), output);
    }
    Ok(copy)
}

/// Copy every node of `source` into `dest`, in order. The caller maps the
/// source region's arguments beforehand; results are not copied.
pub fn copy_region_contents(
    graph: &mut Graph,
    source: RegionId,
    dest: RegionId,
    smap: &mut SubstitutionMap,
) -> Result<(), GraphError> {
    let nodes: Vec<NodeId> = graph.region_nodes(source).to_vec();
    for node in nodes {
        copy_node(graph, node, dest, smap)?;
    }
    Ok(())
}
