use loamc_dialect_hls::{
    BufferOperation, ForkOperation, HlsBranchOperation, LocalLoadOperation, distribute_constants,
    remove_redundant_buffers,
};
use loamc_rvsdg::{
    BitBinary, BitCompare, BitConstant, GammaNode, Graph, MatchOperation, ThetaNode,
};
use loamc_types::Type;
use pretty_assertions::assert_eq;

/// A `const 7` feeding both a γ entry and a pass-through θ loop variable
/// is distributed: per-branch copies replace the γ entry, the loop
/// variable disappears, and the θ body gets its own constant.
#[test]
fn constants_are_distributed() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let seven = graph
        .create_normalized(root, Box::new(BitConstant::from_u64(32, 7)), &[])
        .unwrap()[0];

    // Gamma: both arms read the entry carrying the constant.
    let matched = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, matched).unwrap();
    let entry = gamma.add_entry_var(&mut graph, seven).unwrap();
    let doubled = graph
        .create_normalized(
            gamma.subregion(&graph, 0),
            Box::new(BitBinary::add(32)),
            &[entry.arguments[0], entry.arguments[0]],
        )
        .unwrap()[0];
    let exit = gamma.add_exit_var(&mut graph, &[doubled, entry.arguments[1]]).unwrap();
    graph.add_result(root, exit.output).unwrap();

    // Theta: the constant rides a pass-through loop variable that the
    // body reads.
    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let constant_var = theta.add_loop_var(&mut graph, seven).unwrap();
    let counter = theta.add_loop_var(&mut graph, seven).unwrap();
    let body = theta.subregion(&graph);
    let next = graph
        .create_normalized(
            body,
            Box::new(BitBinary::add(32)),
            &[counter.argument, constant_var.argument],
        )
        .unwrap()[0];
    graph.divert_origin(counter.result, next).unwrap();
    let repeat = graph
        .create_normalized(body, Box::new(BitCompare::ult(32)), &[next, constant_var.argument])
        .unwrap()[0];
    theta.set_predicate(&mut graph, repeat).unwrap();
    graph.add_result(root, counter.output).unwrap();
    graph.verify();

    distribute_constants(&mut graph).unwrap();
    graph.verify();

    // The gamma lost the entry; arm 0 has its own constant, arm 1 (whose
    // argument had no users beyond the exit) feeds the exit from a local
    // constant as well.
    assert_eq!(gamma.num_entry_vars(&graph), 0);
    let arm0: Vec<String> = graph
        .region_nodes(gamma.subregion(&graph, 0))
        .iter()
        .map(|&n| graph.debug_string(n))
        .collect();
    assert!(arm0.contains(&"const 7".to_string()), "{arm0:?}");

    // The pass-through loop variable is gone; the body computes with a
    // local constant.
    assert_eq!(theta.num_loop_vars(&graph), 1);
    let inner: Vec<String> = graph
        .region_nodes(theta.subregion(&graph))
        .iter()
        .map(|&n| graph.debug_string(n))
        .collect();
    assert!(inner.contains(&"const 7".to_string()), "{inner:?}");
}

/// `buf(capacity = 2, pass_through = false)` fed from
/// `local_load -> fork -> branch` is demoted to a pass-through buffer.
#[test]
fn redundant_buffer_is_demoted() {
    let mut graph = Graph::new();
    let root = graph.root();
    let address = graph.add_argument(root, Type::pointer(Type::Bits(32)));
    let state = graph.add_argument(root, Type::MemoryState);
    let selector = graph.add_argument(root, Type::Control(2));

    let load = graph
        .add_simple_node(
            root,
            Box::new(LocalLoadOperation::new(Type::Bits(32), 1)),
            &[address, state],
        )
        .unwrap();
    let fork = graph
        .add_simple_node(
            root,
            Box::new(ForkOperation::new(2, Type::MemoryState)),
            &[graph.output(load, 1)],
        )
        .unwrap();
    let branch = graph
        .add_simple_node(
            root,
            Box::new(HlsBranchOperation::new(2, Type::MemoryState)),
            &[selector, graph.output(fork, 0)],
        )
        .unwrap();
    let buffer = graph
        .add_simple_node(
            root,
            Box::new(BufferOperation::new(Type::MemoryState, 2, false)),
            &[graph.output(branch, 0)],
        )
        .unwrap();
    let exported = graph.add_result(root, graph.output(buffer, 0)).unwrap();
    graph.verify();

    remove_redundant_buffers(&mut graph).unwrap();
    graph.verify();

    assert!(!graph.contains_node(buffer));
    let (replacement, operation) = graph.producer(graph.origin(exported)).unwrap();
    let demoted = operation.as_any().downcast_ref::<BufferOperation>().unwrap();
    assert!(demoted.pass_through);
    assert_eq!(demoted.capacity, 2);
    assert_eq!(graph.origin(graph.input(replacement, 0)), graph.output(branch, 0));
}

/// A buffer whose chain does not reach a memory port stays untouched.
#[test]
fn non_redundant_buffer_is_kept() {
    let mut graph = Graph::new();
    let root = graph.root();
    let state = graph.add_argument(root, Type::MemoryState);
    let buffer = graph
        .add_simple_node(
            root,
            Box::new(BufferOperation::new(Type::MemoryState, 4, false)),
            &[state],
        )
        .unwrap();
    graph.add_result(root, graph.output(buffer, 0)).unwrap();

    remove_redundant_buffers(&mut graph).unwrap();
    assert!(graph.contains_node(buffer));
    let operation = graph.simple_op(buffer).unwrap();
    let kept = operation.as_any().downcast_ref::<BufferOperation>().unwrap();
    assert!(!kept.pass_through);
}
