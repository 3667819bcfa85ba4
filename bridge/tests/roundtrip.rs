use loamc_bridge::{construct, destruct};
use loamc_rvsdg::{
    BitBinary, BitCompare, BitConstant, CallOperation, Graph, Linkage, MatchOperation, NodeId,
    RegionId, StructuralOperation,
};
use loamc_tac::{
    BranchOperation, Cfg, Module, SsaPhiOperation, Tac, is_structured,
};
use loamc_types::{FunctionType, Type};

fn contains_structural(graph: &Graph, region: RegionId, want: &str) -> bool {
    graph.region_nodes(region).iter().any(|&node| {
        let here = match graph.structural_op(node) {
            Some(StructuralOperation::Gamma { .. }) => want == "gamma",
            Some(StructuralOperation::Theta) => want == "theta",
            Some(StructuralOperation::Lambda(_)) => want == "lambda",
            Some(StructuralOperation::Phi) => want == "phi",
            Some(StructuralOperation::Delta(_)) => want == "delta",
            None => false,
        };
        here || graph.subregions(node).iter().any(|&sub| contains_structural(graph, sub, want))
    })
}

fn find_lambda(graph: &Graph) -> NodeId {
    fn walk(graph: &Graph, region: RegionId) -> Option<NodeId> {
        for &node in graph.region_nodes(region) {
            if matches!(graph.structural_op(node), Some(StructuralOperation::Lambda(_))) {
                return Some(node);
            }
            for &sub in graph.subregions(node) {
                if let Some(found) = walk(graph, sub) {
                    return Some(found);
                }
            }
        }
        None
    }
    walk(graph, graph.root()).expect("no lambda in graph")
}

/// Build `count(n) = { i = 0; while (i < n) i = i + 1; return i; }` as an
/// SSA-form CFG with a head-controlled loop.
fn counting_module() -> Module {
    let mut module = Module::new();
    let bit32 = Type::Bits(32);
    let n = module.create_named_variable(bit32.clone(), "n");

    let mut cfg = Cfg::new();
    cfg.append_argument(n);

    let preheader = cfg.add_basic_block();
    let header = cfg.add_basic_block();
    let body = cfg.add_basic_block();
    let after = cfg.add_basic_block();

    let zero = Tac::new(&mut module, Box::new(BitConstant::from_u64(32, 0)), vec![]);
    let i0 = zero.result(0);
    cfg.append_last(preheader, zero);
    let one = Tac::new(&mut module, Box::new(BitConstant::from_u64(32, 1)), vec![]);
    let one_v = one.result(0);
    cfg.append_last(preheader, one);

    // header: i = phi(preheader -> i0, body -> i2); branch on i < n
    let i2 = module.create_named_variable(bit32.clone(), "i2");
    let phi = Tac::new(
        &mut module,
        Box::new(SsaPhiOperation::new(bit32.clone(), vec![preheader, body])),
        vec![i0, i2],
    );
    let i = phi.result(0);
    cfg.append_last(header, phi);
    let compare = Tac::new(&mut module, Box::new(BitCompare::ult(32)), vec![i, n]);
    let c = compare.result(0);
    cfg.append_last(header, compare);
    let matched = Tac::new(&mut module, Box::new(MatchOperation::on_bool()), vec![c]);
    let m = matched.result(0);
    cfg.append_last(header, matched);
    cfg.append_last(
        header,
        Tac::with_results(Box::new(BranchOperation::new(2)), vec![m], vec![]),
    );

    // body: i2 = i + 1
    let add = Tac::with_results(Box::new(BitBinary::add(32)), vec![i, one_v], vec![i2]);
    cfg.append_last(body, add);

    cfg.divert_inedges(cfg.exit(), preheader);
    cfg.add_outedge(preheader, header);
    cfg.add_outedge(header, after);
    cfg.add_outedge(header, body);
    cfg.add_outedge(body, header);
    cfg.add_outedge(after, cfg.exit());
    cfg.append_result(i);
    assert!(cfg.is_valid());

    let ty = FunctionType::new([bit32.clone()], [bit32]);
    module.ipgraph_mut().add_function("count", ty, Linkage::External, Some(cfg));
    module
}

#[test]
fn construct_builds_a_theta() {
    let mut module = counting_module();
    let graph = construct(&mut module).unwrap();
    graph.verify();

    assert!(contains_structural(&graph, graph.root(), "lambda"));
    assert!(contains_structural(&graph, graph.root(), "theta"));
    // The exported function is a root-region result.
    assert_eq!(graph.num_results(graph.root()), 1);

    let tree = loamc_rvsdg::view::region_tree(&graph, graph.root());
    assert!(tree.contains("lambda count"), "{tree}");
    assert!(tree.contains("theta"), "{tree}");
}

#[test]
fn round_trip_preserves_structure() {
    let mut module = counting_module();
    let graph = construct(&mut module).unwrap();
    graph.verify();

    // Lower back out: the CFG must be valid SSA in structured form.
    let mut lowered = destruct(&graph).unwrap();
    let f = lowered.ipgraph().lookup("count").expect("function lost in lowering");
    let cfg = lowered.ipgraph_mut().take_cfg(f).expect("function body lost");
    assert!(cfg.is_valid());
    assert!(is_structured(&cfg));
    lowered.ipgraph_mut().replace_cfg(f, cfg);

    // And construct again: same structural shape.
    let again = construct(&mut lowered).unwrap();
    again.verify();
    assert!(contains_structural(&again, again.root(), "theta"));
    let lambda = find_lambda(&again);
    assert_eq!(
        match graph.structural_op(find_lambda(&graph)) {
            Some(StructuralOperation::Lambda(sig)) => sig.ty.clone(),
            _ => unreachable!(),
        },
        match again.structural_op(lambda) {
            Some(StructuralOperation::Lambda(sig)) => sig.ty.clone(),
            _ => unreachable!(),
        }
    );
}

/// A self-recursive function is bound through a φ group and survives the
/// round trip.
#[test]
fn recursion_binds_through_phi() {
    let mut module = Module::new();
    let bit32 = Type::Bits(32);
    let ty = FunctionType::new([bit32.clone()], [bit32.clone()]);

    let mut cfg = Cfg::new();
    let n = module.create_named_variable(bit32.clone(), "n");
    cfg.append_argument(n);

    let f = module.ipgraph_mut().add_function("spin", ty.clone(), Linkage::External, None);
    module.ipgraph_mut().add_dependency(f, f);
    let callee = module.symbol_variable(f);

    let block = cfg.add_basic_block();
    let call = Tac::new(
        &mut module,
        Box::new(CallOperation::new(ty.clone().into())),
        vec![callee, n],
    );
    let result = call.result(0);
    cfg.append_last(block, call);
    cfg.divert_inedges(cfg.exit(), block);
    cfg.add_outedge(block, cfg.exit());
    cfg.append_result(result);
    module.ipgraph_mut().replace_cfg(f, cfg);

    let graph = construct(&mut module).unwrap();
    graph.verify();
    assert!(contains_structural(&graph, graph.root(), "phi"));

    let lowered = destruct(&graph).unwrap();
    let f2 = lowered.ipgraph().lookup("spin").expect("function lost in lowering");
    assert!(lowered.ipgraph().dependencies(f2).contains(&f2));
}
