use loamc_rvsdg::{
    BitBinary, BitCompare, BitConstant, BitValue, GammaNode, Graph, MatchOperation, NodeId,
    RegionId, StoreOperation, StructuralOperation, ThetaNode,
};
use loamc_transform::{dead_node_elimination, invert, pull};
use loamc_types::Type;
use pretty_assertions::assert_eq;

fn constant(graph: &mut Graph, region: RegionId, width: u32, value: u64) -> loamc_rvsdg::Output {
    graph
        .create_normalized(region, Box::new(BitConstant::from_u64(width, value)), &[])
        .unwrap()[0]
}

fn gammas_in(graph: &Graph, region: RegionId) -> Vec<NodeId> {
    graph
        .region_nodes(region)
        .iter()
        .copied()
        .filter(|&node| matches!(graph.structural_op(node), Some(StructuralOperation::Gamma { .. })))
        .collect()
}

#[test]
fn dne_empty_region_is_a_noop() {
    let mut graph = Graph::new();
    dead_node_elimination(&mut graph).unwrap();
    assert!(graph.region_nodes(graph.root()).is_empty());
}

#[test]
fn dne_sweeps_dead_chains_and_keeps_effects() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));
    let address = graph.add_argument(root, Type::pointer(Type::Bits(32)));
    let state = graph.add_argument(root, Type::MemoryState);

    // A dead chain: add feeding a mul that nothing uses.
    let dead_add = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, x]).unwrap();
    let dead_mul = graph
        .add_simple_node(root, Box::new(BitBinary::mul(32)), &[graph.output(dead_add, 0), x])
        .unwrap();

    // A live node reaching the region results.
    let live = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, x]).unwrap();
    graph.add_result(root, graph.output(live, 0)).unwrap();

    // A store with no used outputs is still an effect.
    let store = graph
        .add_simple_node(
            root,
            Box::new(StoreOperation::new(Type::Bits(32), 1, 4)),
            &[address, x, state],
        )
        .unwrap();

    dead_node_elimination(&mut graph).unwrap();
    assert!(!graph.contains_node(dead_add));
    assert!(!graph.contains_node(dead_mul));
    assert!(graph.contains_node(live));
    assert!(graph.contains_node(store));
    graph.verify();
}

/// Counting loop inversion: `θ { i = 0; if i < n { i' = i + 1; repeat } }`
/// becomes an outer γ over `0 < n` whose taken arm holds a θ with body
/// `{ i' = i + 1; i' < n }`.
#[test]
fn loop_inversion() {
    let mut graph = Graph::new();
    let root = graph.root();
    let n = graph.add_argument(root, Type::Bits(32));
    let zero = constant(&mut graph, root, 32, 0);

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let i = theta.add_loop_var(&mut graph, zero).unwrap();
    let bound = theta.add_loop_var(&mut graph, n).unwrap();
    let body = theta.subregion(&graph);

    let compare = graph
        .create_normalized(body, Box::new(BitCompare::ult(32)), &[i.argument, bound.argument])
        .unwrap()[0];
    let matched = graph
        .create_normalized(body, Box::new(MatchOperation::on_bool()), &[compare])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, matched).unwrap();
    let entry_i = gamma.add_entry_var(&mut graph, i.argument).unwrap();
    let entry_n = gamma.add_entry_var(&mut graph, bound.argument).unwrap();

    // Arm 0 exits: the predicate goes constant-false, i passes through.
    let arm0 = gamma.subregion(&graph, 0);
    let stop = graph
        .create_normalized(arm0, Box::new(BitConstant::new(BitValue::bool(false))), &[])
        .unwrap()[0];
    // Arm 1 repeats: i' = i + 1 and the predicate is i' < n.
    let arm1 = gamma.subregion(&graph, 1);
    let one = constant(&mut graph, arm1, 32, 1);
    let next = graph
        .create_normalized(arm1, Box::new(BitBinary::add(32)), &[entry_i.arguments[1], one])
        .unwrap()[0];
    let repeat = graph
        .create_normalized(arm1, Box::new(BitCompare::ult(32)), &[next, entry_n.arguments[1]])
        .unwrap()[0];

    let exit_i = gamma.add_exit_var(&mut graph, &[entry_i.arguments[0], next]).unwrap();
    let exit_pred = gamma.add_exit_var(&mut graph, &[stop, repeat]).unwrap();
    graph.divert_origin(i.result, exit_i.output).unwrap();
    theta.set_predicate(&mut graph, exit_pred.output).unwrap();
    graph.add_result(root, i.output).unwrap();
    graph.verify();

    invert(&mut graph).unwrap();
    graph.verify();
    assert!(!graph.contains_node(theta.node()));

    // The root now holds a γ whose predicate checks the condition on the
    // initial values.
    let outer = gammas_in(&graph, root);
    assert_eq!(outer.len(), 1);
    let outer = GammaNode::try_from_node(&graph, outer[0]).unwrap();
    let predicate_origin = graph.origin(outer.predicate(&graph));
    let (match_node, match_op) = graph.producer(predicate_origin).unwrap();
    assert_eq!(match_op.debug_string(), "match1[2]");
    let condition = graph.origin(graph.input(match_node, 0));
    let (_, compare_op) = graph.producer(condition).unwrap();
    assert_eq!(compare_op.debug_string(), "bitult32");

    // The untaken arm is empty; the taken arm holds the inverted θ with
    // body { i' = i + 1; i' < n }.
    assert!(graph.region_nodes(outer.subregion(&graph, 0)).is_empty());
    let arm = outer.subregion(&graph, 1);
    let thetas: Vec<NodeId> = graph
        .region_nodes(arm)
        .iter()
        .copied()
        .filter(|&node| matches!(graph.structural_op(node), Some(StructuralOperation::Theta)))
        .collect();
    assert_eq!(thetas.len(), 1);
    let inner = ThetaNode::try_from_node(&graph, thetas[0]).unwrap();
    let inner_body = inner.subregion(&graph);
    let kinds: Vec<String> = graph
        .region_nodes(inner_body)
        .iter()
        .map(|&node| graph.debug_string(node))
        .collect();
    assert!(kinds.contains(&"bitadd32".to_string()), "{kinds:?}");
    assert!(kinds.contains(&"bitult32".to_string()), "{kinds:?}");
    let inner_pred = graph.origin(inner.predicate(&graph));
    let (_, op) = graph.producer(inner_pred).unwrap();
    assert_eq!(op.debug_string(), "bitult32");
}

/// A node whose only consumers are one γ's entries is cloned into the
/// arms and the original deleted.
#[test]
fn pull_in_top() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));
    let sum = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, y]).unwrap();

    let matched = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, matched).unwrap();
    let sum_out = graph.output(sum, 0);
    let entry = gamma.add_entry_var(&mut graph, sum_out).unwrap();
    let exit = gamma
        .add_exit_var(&mut graph, &[entry.arguments[0], entry.arguments[1]])
        .unwrap();
    graph.add_result(root, exit.output).unwrap();

    pull(&mut graph).unwrap();
    graph.verify();

    // The add moved into both arms; the original is gone.
    assert!(!graph.contains_node(sum));
    for index in 0..2 {
        let arm = gamma.subregion(&graph, index);
        let kinds: Vec<String> =
            graph.region_nodes(arm).iter().map(|&n| graph.debug_string(n)).collect();
        assert!(kinds.contains(&"bitadd32".to_string()), "{kinds:?}");
    }
}

/// A pure node consuming a γ output moves into the arms, fed by the
/// per-arm results, and becomes a fresh exit variable.
#[test]
fn pull_in_bottom() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let x = graph.add_argument(root, Type::Bits(32));

    let matched = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, matched).unwrap();
    let entry = gamma.add_entry_var(&mut graph, x).unwrap();
    let arm1 = gamma.subregion(&graph, 1);
    let doubled = graph
        .create_normalized(
            arm1,
            Box::new(BitBinary::add(32)),
            &[entry.arguments[1], entry.arguments[1]],
        )
        .unwrap()[0];
    let exit = gamma.add_exit_var(&mut graph, &[entry.arguments[0], doubled]).unwrap();

    // A consumer below the gamma, reading its output and a pre-gamma
    // value.
    let below = graph
        .add_simple_node(root, Box::new(BitBinary::mul(32)), &[exit.output, x])
        .unwrap();
    let result = graph.add_result(root, graph.output(below, 0)).unwrap();
    graph.verify();

    pull(&mut graph).unwrap();
    graph.verify();

    assert!(!graph.contains_node(below));
    // The result now reads a fresh gamma exit fed by per-arm multiplies.
    let origin = graph.origin(result);
    let exit = gamma.exit_var(&graph, origin).expect("result no longer reads the gamma");
    for (index, arm_result) in exit.results.iter().enumerate() {
        let (node, op) = graph.producer(graph.origin(*arm_result)).unwrap();
        assert_eq!(op.debug_string(), "bitmul32");
        assert_eq!(graph.node_region(node), gamma.subregion(&graph, index));
    }
}

/// A γ whose arms do identical work reduces to the common subgraph.
#[test]
fn pull_out_identical_branches() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));

    let matched = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, matched).unwrap();
    let ex = gamma.add_entry_var(&mut graph, x).unwrap();
    let ey = gamma.add_entry_var(&mut graph, y).unwrap();
    let mut arm_sums = Vec::new();
    for index in 0..2 {
        let arm = gamma.subregion(&graph, index);
        let sum = graph
            .add_simple_node(
                arm,
                Box::new(BitBinary::add(32)),
                &[ex.arguments[index], ey.arguments[index]],
            )
            .unwrap();
        arm_sums.push(graph.output(sum, 0));
    }
    let exit = gamma.add_exit_var(&mut graph, &arm_sums).unwrap();
    let result = graph.add_result(root, exit.output).unwrap();
    graph.verify();

    pull(&mut graph).unwrap();
    dead_node_elimination(&mut graph).unwrap();
    graph.verify();

    // The γ collapsed away entirely; the result reads the hoisted add.
    assert!(gammas_in(&graph, root).is_empty());
    let (node, op) = graph.producer(graph.origin(result)).unwrap();
    assert_eq!(op.debug_string(), "bitadd32");
    assert_eq!(graph.operands(node), vec![x, y]);
}
