//! Diagnostic dumps. The formats are for humans and tests only; nothing
//! parses them back.

use std::fmt::Write;

use crate::graph::{Graph, Input, Output, RegionId};

/// An indented ASCII tree of a region, its nodes, and their sub-regions.
pub fn region_tree(graph: &Graph, region: RegionId) -> String {
    let mut out = String::new();
    region_tree_rec(graph, region, 0, &mut out);
    out
}

fn region_tree_rec(graph: &Graph, region: RegionId, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{indent}{region}: {} arguments, {} results",
        graph.num_arguments(region),
        graph.num_results(region)
    );
    for &node in graph.region_nodes(region) {
        let _ = writeln!(out, "{indent}  {node} {}", graph.debug_string(node));
        for &sub in graph.subregions(node) {
            region_tree_rec(graph, sub, depth + 2, out);
        }
    }
}

/// A Graphviz rendering of one region: a record node per graph node plus
/// entry/exit records for the region's arguments and results.
pub fn to_dot(graph: &Graph, region: RegionId) -> String {
    let mut out = String::from("digraph region {\n  rankdir=TB;\n  node [shape=box];\n");
    if graph.num_arguments(region) > 0 {
        let _ = writeln!(out, "  args [label=\"arguments\", shape=plaintext];");
    }
    for &node in graph.region_nodes(region) {
        let _ = writeln!(
            out,
            "  \"{node}\" [label=\"{}\"];",
            graph.debug_string(node).replace('"', "\\\"")
        );
        for index in 0..graph.num_inputs(node) {
            let origin = graph.origin(graph.input(node, index));
            let _ = match origin {
                Output::Node { node: source, .. } => {
                    writeln!(out, "  \"{source}\" -> \"{node}\";")
                }
                Output::Argument { .. } => writeln!(out, "  args -> \"{node}\";"),
            };
        }
    }
    if graph.num_results(region) > 0 {
        let _ = writeln!(out, "  results [label=\"results\", shape=plaintext];");
        for index in 0..graph.num_results(region) {
            let origin = graph.origin(Input::Result { region, index });
            let _ = match origin {
                Output::Node { node: source, .. } => {
                    writeln!(out, "  \"{source}\" -> results;")
                }
                Output::Argument { .. } => writeln!(out, "  args -> results;"),
            };
        }
    }
    out.push_str("}\n");
    out
}
