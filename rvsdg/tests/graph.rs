use std::{cell::RefCell, rc::Rc};

use loamc_rvsdg::{
    BitBinary, BitCompare, BitConstant, BitUnary, GammaNode, Graph, GraphError,
    GraphListener, Input, LambdaNode, LambdaSignature, Linkage, LoadOperation, MatchOperation,
    MemStateMergeOperation, NodeId, NormalForm, Output, PhiBuilder, StoreOperation,
    SubstitutionMap, ThetaNode, TopDownTraverser, copy_node,
};
use loamc_types::{FunctionType, Type};
use pretty_assertions::assert_eq;

fn constant(graph: &mut Graph, region: loamc_rvsdg::RegionId, width: u32, value: u64) -> Output {
    graph
        .create_normalized(region, Box::new(BitConstant::from_u64(width, value)), &[])
        .unwrap()[0]
}

#[test]
fn edge_symmetry() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));
    let add = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, y]).unwrap();

    assert_eq!(graph.origin(graph.input(add, 0)), x);
    assert_eq!(graph.origin(graph.input(add, 1)), y);
    let users: Vec<Input> = graph.users(x).collect();
    assert_eq!(users, vec![graph.input(add, 0)]);

    graph.add_result(root, graph.output(add, 0)).unwrap();
    graph.verify();

    // A producer with users cannot be removed.
    assert_eq!(graph.remove_node(add), Err(GraphError::LiveUsers));
}

#[test]
fn type_and_scope_checks() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));
    let narrow = graph.add_argument(root, Type::Bits(16));

    let err = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, narrow]);
    assert_eq!(
        err.err(),
        Some(GraphError::TypeMismatch {
            index: 1,
            expected: Type::Bits(32),
            found: Type::Bits(16),
        })
    );

    let err = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x]);
    assert_eq!(err.err(), Some(GraphError::ArityMismatch { expected: 2, found: 1 }));

    // An origin from inside a gamma branch is not visible at the root.
    let flag = constant(&mut graph, root, 1, 1);
    let pred = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let ev = gamma.add_entry_var(&mut graph, x).unwrap();
    let err = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[ev.arguments[0], x]);
    assert_eq!(err.err(), Some(GraphError::ScopeViolation));
}

#[test]
fn divert_users_rewrites_every_user() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));
    let a = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, x]).unwrap();
    let b = graph
        .add_simple_node(root, Box::new(BitBinary::mul(32)), &[graph.output(a, 0), x])
        .unwrap();
    let result = graph.add_result(root, graph.output(a, 0)).unwrap();

    graph.divert_users(graph.output(a, 0), y).unwrap();
    assert_eq!(graph.origin(graph.input(b, 0)), y);
    assert_eq!(graph.origin(result), y);
    assert_eq!(graph.num_users(graph.output(a, 0)), 0);
    graph.verify();

    // Now dead, the add can go.
    graph.remove_node(a).unwrap();
    graph.verify();
}

/// Two identical `add(x, y)` nodes reduce to one under CSE, shared by both
/// original users.
#[test]
fn common_subexpressions_are_merged() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));

    let first = graph
        .create_normalized(root, Box::new(BitBinary::add(32)), &[x, y])
        .unwrap()[0];
    let second = graph
        .create_normalized(root, Box::new(BitBinary::add(32)), &[x, y])
        .unwrap()[0];
    assert_eq!(first, second);

    // Addition commutes, so the swapped operand order matches too.
    let swapped = graph
        .create_normalized(root, Box::new(BitBinary::add(32)), &[y, x])
        .unwrap()[0];
    assert_eq!(first, swapped);

    // CSE is idempotent: normalizing again changes nothing.
    let nodes_before = graph.region_nodes(root).to_vec();
    graph.normalize().unwrap();
    assert_eq!(graph.region_nodes(root), nodes_before.as_slice());

    // With CSE off, a separate node is created.
    graph.normal_form_mut::<BitBinary>().remove(NormalForm::CSE);
    let third = graph
        .create_normalized(root, Box::new(BitBinary::add(32)), &[x, y])
        .unwrap()[0];
    assert_ne!(first, third);
}

#[test]
fn constant_folding_and_identities() {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));

    let three = constant(&mut graph, root, 32, 3);
    let four = constant(&mut graph, root, 32, 4);
    let sum = graph
        .create_normalized(root, Box::new(BitBinary::add(32)), &[three, four])
        .unwrap()[0];
    let (_, op) = graph.producer(sum).unwrap();
    assert_eq!(op.debug_string(), "const 7");

    // x + 0 reduces to x itself.
    let zero = constant(&mut graph, root, 32, 0);
    let same = graph
        .create_normalized(root, Box::new(BitBinary::add(32)), &[x, zero])
        .unwrap()[0];
    assert_eq!(same, x);

    // x * 0 annihilates.
    let product = graph
        .create_normalized(root, Box::new(BitBinary::mul(32)), &[x, zero])
        .unwrap()[0];
    assert_eq!(product, zero);

    // x <= x is statically true.
    let le = graph
        .create_normalized(root, Box::new(BitCompare::ule(32)), &[x, x])
        .unwrap()[0];
    let (_, op) = graph.producer(le).unwrap();
    assert_eq!(op.debug_string(), "const 1");

    // not(not(x)) collapses to x; not of a constant folds.
    let inverted = graph
        .create_normalized(root, Box::new(BitUnary::not(32)), &[x])
        .unwrap()[0];
    let back = graph
        .create_normalized(root, Box::new(BitUnary::not(32)), &[inverted])
        .unwrap()[0];
    assert_eq!(back, x);
    let folded = graph
        .create_normalized(root, Box::new(BitUnary::not(32)), &[three])
        .unwrap()[0];
    let (_, op) = graph.producer(folded).unwrap();
    assert_eq!(op.debug_string(), "const 4294967292");

    // A match over a constant folds to a control constant.
    let bit = constant(&mut graph, root, 1, 1);
    let selected = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[bit])
        .unwrap()[0];
    let (_, op) = graph.producer(selected).unwrap();
    assert_eq!(op.debug_string(), "ctlconst 1");

    // A gamma cannot be predicated on a non-control value.
    assert!(matches!(
        GammaNode::create(&mut graph, x),
        Err(GraphError::PredicateType { .. })
    ));
}

/// The load-mux reduction: a load fed by `state_merge(s1, s2, s3)` ends up
/// reading the three states directly.
#[test]
fn load_mux_reduction() {
    let mut graph = Graph::new();
    let root = graph.root();
    let address = graph.add_argument(root, Type::pointer(Type::Bits(32)));
    let s1 = graph.add_argument(root, Type::MemoryState);
    let s2 = graph.add_argument(root, Type::MemoryState);
    let s3 = graph.add_argument(root, Type::MemoryState);

    graph.normal_form_mut::<LoadOperation>().remove(NormalForm::MUTABLE);

    let mux = graph
        .create_normalized(root, Box::new(MemStateMergeOperation::new(3)), &[s1, s2, s3])
        .unwrap()[0];
    let load = graph
        .add_simple_node(
            root,
            Box::new(LoadOperation::new(Type::Bits(32), 1, 4)),
            &[address, mux],
        )
        .unwrap();
    let exported = graph.add_result(root, graph.output(load, 0)).unwrap();

    graph.normal_form_mut::<LoadOperation>().insert(NormalForm::MUTABLE);
    graph.normalize().unwrap();
    graph.prune().unwrap();

    let reduced = graph.origin(exported).node().unwrap();
    assert_eq!(graph.num_inputs(reduced), 4);
    assert_eq!(graph.origin(graph.input(reduced, 1)), s1);
    assert_eq!(graph.origin(graph.input(reduced, 2)), s2);
    assert_eq!(graph.origin(graph.input(reduced, 3)), s3);
    graph.verify();
}

#[test]
fn gamma_round_trip() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let x = graph.add_argument(root, Type::Bits(32));
    let pred = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    assert_eq!(gamma.alternatives(&graph), 2);
    let ev = gamma.add_entry_var(&mut graph, x).unwrap();

    // Branch 0 passes the value through; branch 1 doubles it.
    let doubled = graph
        .create_normalized(
            gamma.subregion(&graph, 1),
            Box::new(BitBinary::add(32)),
            &[ev.arguments[1], ev.arguments[1]],
        )
        .unwrap()[0];
    let xv = gamma.add_exit_var(&mut graph, &[ev.arguments[0], doubled]).unwrap();
    graph.add_result(root, xv.output).unwrap();
    graph.verify();

    // The views recovered from ids match the ones handed out on creation.
    assert_eq!(gamma.entry_var(&graph, ev.input), Some(ev));
    assert_eq!(gamma.exit_var(&graph, xv.output), Some(xv));

    // Diagnostics render without fuss.
    let tree = loamc_rvsdg::view::region_tree(&graph, root);
    assert!(tree.contains("gamma[2]"), "{tree}");
    let dot = loamc_rvsdg::view::to_dot(&graph, root);
    assert!(dot.starts_with("digraph"), "{dot}");
    assert!(dot.contains("match1[2]"), "{dot}");
}

#[test]
fn gamma_entry_var_removal_renumbers() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let a = graph.add_argument(root, Type::Bits(8));
    let b = graph.add_argument(root, Type::Bits(8));
    let c = graph.add_argument(root, Type::Bits(8));
    let pred = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];

    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let _ea = gamma.add_entry_var(&mut graph, a).unwrap();
    let eb = gamma.add_entry_var(&mut graph, b).unwrap();
    let ec = gamma.add_entry_var(&mut graph, c).unwrap();
    // Only the third entry is used inside the branches.
    let xv = gamma.add_exit_var(&mut graph, &[ec.arguments[0], ec.arguments[1]]).unwrap();
    graph.add_result(root, xv.output).unwrap();

    gamma.remove_entry_var(&mut graph, &eb).unwrap();
    graph.verify();

    // The surviving last entry variable shifted down by one.
    let vars = gamma.entry_vars(&graph);
    assert_eq!(vars.len(), 2);
    assert_eq!(graph.origin(vars[1].input), c);
    assert_eq!(graph.origin(graph.result(gamma.subregion(&graph, 0), 0)), vars[1].arguments[0]);
}

#[test]
fn theta_loop_vars() {
    let mut graph = Graph::new();
    let root = graph.root();
    let n = graph.add_argument(root, Type::Bits(32));
    let zero = constant(&mut graph, root, 32, 0);

    let theta = ThetaNode::create(&mut graph, root).unwrap();
    let i = theta.add_loop_var(&mut graph, zero).unwrap();
    let bound = theta.add_loop_var(&mut graph, n).unwrap();
    assert!(theta.is_pass_through(&graph, &i));
    assert!(theta.is_pass_through(&graph, &bound));

    let body = theta.subregion(&graph);
    let one = constant(&mut graph, body, 32, 1);
    let next = graph
        .create_normalized(body, Box::new(BitBinary::add(32)), &[i.argument, one])
        .unwrap()[0];
    graph.divert_origin(i.result, next).unwrap();
    let repeat = graph
        .create_normalized(body, Box::new(BitCompare::ult(32)), &[next, bound.argument])
        .unwrap()[0];
    theta.set_predicate(&mut graph, repeat).unwrap();
    graph.add_result(root, i.output).unwrap();

    graph.verify();
    assert!(!theta.is_pass_through(&graph, &i));
    assert!(theta.is_pass_through(&graph, &bound));
    assert_eq!(graph.origin(theta.predicate(&graph)), repeat);
}

#[test]
fn lambda_and_phi() {
    let mut graph = Graph::new();
    let root = graph.root();
    let fn_ty = FunctionType::new([Type::Bits(32)], [Type::Bits(32)]);

    // A plain lambda: f(x) = x + 1.
    let lambda = LambdaNode::create(
        &mut graph,
        root,
        LambdaSignature::new("inc", fn_ty.clone(), Linkage::External),
    )
    .unwrap();
    let body = lambda.subregion(&graph);
    let one = constant(&mut graph, body, 32, 1);
    let sum = graph
        .create_normalized(body, Box::new(BitBinary::add(32)), &[lambda.param(&graph, 0), one])
        .unwrap()[0];
    let output = lambda.finalize(&mut graph, &[sum]).unwrap();
    graph.add_result(root, output).unwrap();
    graph.verify();

    // A self-recursive function bound through a phi group.
    let mut builder = PhiBuilder::new(&mut graph, root).unwrap();
    let rec = builder.add_recursion_var(&mut graph, Type::Function(fn_ty.clone().into()));
    let phi_body = builder.subregion(&graph);
    let inner = LambdaNode::create(
        &mut graph,
        phi_body,
        LambdaSignature::new("loop", fn_ty.clone(), Linkage::Internal),
    )
    .unwrap();
    let self_ref = inner.add_context_var(&mut graph, rec).unwrap();
    let call = graph
        .add_simple_node(
            inner.subregion(&graph),
            Box::new(loamc_rvsdg::CallOperation::new(fn_ty.clone().into())),
            &[self_ref.argument, inner.param(&graph, 0)],
        )
        .unwrap();
    let call_out = graph.output(call, 0);
    let inner_out = inner.finalize(&mut graph, &[call_out]).unwrap();
    builder.bind(&graph, 0, inner_out).unwrap();
    let phi = builder.finalize(&mut graph).unwrap();
    graph.add_result(root, phi.output(&graph, 0)).unwrap();
    graph.verify();

    // Phi groups reject nesting.
    let nested = phi.subregion(&graph);
    let err = PhiBuilder::new(&mut graph, nested);
    assert!(matches!(err, Err(GraphError::NestedPhi)));
}

#[test]
fn traverser_survives_deletion_of_current() {
    let mut graph = Graph::new();
    let root = graph.root();
    let c0 = constant(&mut graph, root, 8, 10);
    let c1 = constant(&mut graph, root, 8, 11);
    let c2 = constant(&mut graph, root, 8, 12);
    let victim = c1.node().unwrap();

    let mut seen: Vec<NodeId> = Vec::new();
    let mut traverser = TopDownTraverser::new(&graph, root);
    while let Some(node) = traverser.next(&graph) {
        seen.push(node);
        if node == victim {
            graph.remove_node(node).unwrap();
        }
    }
    assert_eq!(seen, vec![c0.node().unwrap(), victim, c2.node().unwrap()]);
    graph.verify();
}

#[derive(Default)]
struct Recorder {
    created: Vec<NodeId>,
    destroyed: Vec<NodeId>,
    rewired: usize,
}

impl GraphListener for Recorder {
    fn on_node_create(&mut self, _graph: &Graph, node: NodeId) {
        self.created.push(node);
    }

    fn on_node_destroy(&mut self, _graph: &Graph, node: NodeId) {
        self.destroyed.push(node);
    }

    fn on_input_change(&mut self, _graph: &Graph, _input: Input, _old: Output, _new: Output) {
        self.rewired += 1;
    }
}

#[test]
fn notifier_bus_sees_mutations() {
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    let mut graph = Graph::new();
    graph.add_listener(recorder.clone());

    let root = graph.root();
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));
    let add = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, y]).unwrap();
    let mul = graph
        .add_simple_node(root, Box::new(BitBinary::mul(32)), &[graph.output(add, 0), y])
        .unwrap();

    graph.divert_users(graph.output(add, 0), x).unwrap();
    graph.remove_node(add).unwrap();

    let recorder = recorder.borrow();
    assert_eq!(recorder.created, vec![add, mul]);
    assert_eq!(recorder.destroyed, vec![add]);
    assert_eq!(recorder.rewired, 1);
}

#[test]
fn copying_into_a_branch() {
    let mut graph = Graph::new();
    let root = graph.root();
    let flag = graph.add_argument(root, Type::BOOL);
    let x = graph.add_argument(root, Type::Bits(32));
    let y = graph.add_argument(root, Type::Bits(32));
    let add = graph.add_simple_node(root, Box::new(BitBinary::add(32)), &[x, y]).unwrap();

    let pred = graph
        .create_normalized(root, Box::new(MatchOperation::on_bool()), &[flag])
        .unwrap()[0];
    let gamma = GammaNode::create(&mut graph, pred).unwrap();
    let ex = gamma.add_entry_var(&mut graph, x).unwrap();
    let ey = gamma.add_entry_var(&mut graph, y).unwrap();

    let mut smap = SubstitutionMap::new();
    smap.insert(x, ex.arguments[0]);
    smap.insert(y, ey.arguments[0]);
    let gamma_subregion = gamma.subregion(&graph, 0);
    let copy = copy_node(&mut graph, add, gamma_subregion, &mut smap).unwrap();

    assert_eq!(graph.node_region(copy), gamma.subregion(&graph, 0));
    assert_eq!(graph.origin(graph.input(copy, 0)), ex.arguments[0]);
    assert_eq!(smap.lookup(graph.output(add, 0)), Some(graph.output(copy, 0)));
    graph.verify();
}

#[test]
fn prune_keeps_effectful_nodes() {
    let mut graph = Graph::new();
    let root = graph.root();
    let address = graph.add_argument(root, Type::pointer(Type::Bits(8)));
    let value = graph.add_argument(root, Type::Bits(8));
    let state = graph.add_argument(root, Type::MemoryState);

    // Empty-ish region: pruning with nothing dead is a no-op.
    graph.prune().unwrap();

    let dead = graph.add_simple_node(root, Box::new(BitBinary::add(8)), &[value, value]).unwrap();
    let store = graph
        .add_simple_node(
            root,
            Box::new(StoreOperation::new(Type::Bits(8), 1, 1)),
            &[address, value, state],
        )
        .unwrap();

    graph.prune().unwrap();
    assert!(!graph.contains_node(dead));
    assert!(graph.contains_node(store));
    graph.verify();
}
