use loamc_rvsdg::{BitConstant, MatchOperation};
use loamc_tac::{
    AggNode, AssignmentOperation, BranchOperation, Cfg, CfgEdge, Module, SsaPhiOperation, Tac,
    UndefOperation, aggregate, annotate, destruct_ssa, domtree, ipostdoms, is_linear,
    is_reducible, is_structured, restructure,
};
use loamc_types::Type;
use pretty_assertions::assert_eq;

/// A double diamond: bb1 branches to bb2/bb3, bb2 also reaches bb4
/// directly, all paths reconverge on bb4.
#[test]
fn dominator_tree() {
    let mut cfg = Cfg::new();
    let bb1 = cfg.add_basic_block();
    let bb2 = cfg.add_basic_block();
    let bb3 = cfg.add_basic_block();
    let bb4 = cfg.add_basic_block();

    cfg.divert_inedges(cfg.exit(), bb1);
    cfg.add_outedge(bb1, bb2);
    cfg.add_outedge(bb1, bb3);
    cfg.add_outedge(bb2, bb3);
    cfg.add_outedge(bb2, bb4);
    cfg.add_outedge(bb3, bb4);
    cfg.add_outedge(bb4, cfg.exit());

    let root = domtree(&cfg);
    assert_eq!(root.node(), cfg.entry());
    assert_eq!(root.num_children(), 1);

    let dom_bb1 = root.child(0);
    assert_eq!(dom_bb1.node(), bb1);
    assert_eq!(dom_bb1.num_children(), 3);
    for child in [bb2, bb3, bb4] {
        assert!(dom_bb1.children().iter().any(|c| c.node() == child));
    }
    assert_eq!(dom_bb1.children().iter().map(|c| c.num_children()).sum::<usize>(), 1);

    let dom_bb4 = root.find(bb4).unwrap();
    assert_eq!(dom_bb4.num_children(), 1);
    assert_eq!(dom_bb4.child(0).node(), cfg.exit());

    // All paths from bb1 reconverge on bb4.
    let postdoms = ipostdoms(&cfg);
    assert_eq!(postdoms[&bb1], bb4);
    assert_eq!(postdoms[&bb4], cfg.exit());
    assert!(!is_linear(&cfg));
}

/// SSA destruction on a diamond whose join opens with a φ: the φ
/// disappears, each in-edge gets an assignment of the fresh temporary,
/// an undef definition of the φ result is hoisted into the entry's first
/// block, and the join is rewritten to read the temporary.
#[test]
fn ssa_destruction() {
    let mut module = Module::new();
    let mut cfg = Cfg::new();
    let vt = Type::Bits(32);

    let head = cfg.add_basic_block();
    let left = cfg.add_basic_block();
    let right = cfg.add_basic_block();
    let join = cfg.add_basic_block();

    cfg.divert_inedges(cfg.exit(), head);
    branch_tac(&mut module, &mut cfg, head);
    cfg.add_outedge(head, left);
    cfg.add_outedge(head, right);

    let lhs = Tac::new(&mut module, Box::new(BitConstant::from_u64(32, 9)), vec![]);
    let x = lhs.result(0);
    cfg.append_last(left, lhs);
    let rhs = Tac::new(&mut module, Box::new(BitConstant::from_u64(32, 7)), vec![]);
    let y = rhs.result(0);
    cfg.append_last(right, rhs);

    let phi = Tac::new(
        &mut module,
        Box::new(SsaPhiOperation::new(vt.clone(), vec![left, right])),
        vec![x, y],
    );
    let phi_result = phi.result(0);
    cfg.append_last(join, phi);

    cfg.add_outedge(left, join);
    cfg.add_outedge(right, join);
    cfg.add_outedge(join, cfg.exit());
    cfg.append_result(phi_result);
    assert!(cfg.is_valid());

    destruct_ssa(&mut module, &mut cfg);
    cfg.prune();

    let ascii = cfg.to_ascii(&module);
    assert!(ascii.contains("entry"), "{ascii}");
    for node in cfg.nodes() {
        for tac in cfg.tacs(node) {
            assert!(
                tac.operation().as_any().downcast_ref::<SsaPhiOperation>().is_none(),
                "phi survived destruction"
            );
        }
    }

    // The undef definition of the phi result opens the entry's first
    // block.
    let first = cfg.successor(cfg.entry(), 0);
    let hoisted = cfg.tacs(first).first().expect("first block is empty");
    assert!(hoisted.operation().as_any().downcast_ref::<UndefOperation>().is_some());
    assert_eq!(hoisted.result(0), phi_result);

    // Both split edges assign the same temporary; the join assigns the
    // phi result from it.
    let mut edge_targets = Vec::new();
    let mut join_source = None;
    for node in cfg.nodes() {
        for tac in cfg.tacs(node) {
            if tac.operation().as_any().downcast_ref::<AssignmentOperation>().is_some() {
                if tac.result(0) == phi_result {
                    join_source = Some(tac.operand(0));
                } else {
                    edge_targets.push(tac.result(0));
                }
            }
        }
    }
    let temporary = join_source.expect("join assignment missing");
    assert_eq!(edge_targets, vec![temporary, temporary]);

    // head, the two merged arms, and the assignment block fused with the
    // join.
    assert_eq!(cfg.num_blocks(), 4);
    assert!(cfg.is_valid());
    assert!(is_structured(&cfg));
}

fn branch_tac(module: &mut Module, cfg: &mut Cfg, block: loamc_tac::CfgNodeId) {
    let cond = Tac::new(module, Box::new(BitConstant::from_u64(1, 1)), vec![]);
    let c = cond.result(0);
    cfg.append_last(block, cond);
    let matched = Tac::new(module, Box::new(MatchOperation::on_bool()), vec![c]);
    let m = matched.result(0);
    cfg.append_last(block, matched);
    cfg.append_last(
        block,
        Tac::with_results(Box::new(BranchOperation::new(2)), vec![m], vec![]),
    );
}

/// A hand-built diamond is already structured; aggregation yields a
/// linear region containing a branch region.
#[test]
fn diamond_aggregates() {
    let mut module = Module::new();
    let mut cfg = Cfg::new();
    let head = cfg.add_basic_block();
    let then_arm = cfg.add_basic_block();
    let else_arm = cfg.add_basic_block();
    let join = cfg.add_basic_block();

    cfg.divert_inedges(cfg.exit(), head);
    branch_tac(&mut module, &mut cfg, head);
    cfg.add_outedge(head, then_arm);
    cfg.add_outedge(head, else_arm);
    cfg.add_outedge(then_arm, join);
    cfg.add_outedge(else_arm, join);
    cfg.add_outedge(join, cfg.exit());

    assert!(cfg.is_valid());
    assert!(is_structured(&cfg));
    assert!(is_reducible(&cfg));

    let tree = aggregate(cfg).unwrap();
    let ascii = tree.to_ascii();
    assert!(ascii.contains("branch"), "{ascii}");
    match &tree {
        AggNode::Linear { children } => {
            assert!(matches!(children.first(), Some(AggNode::Entry { .. })));
            assert!(matches!(children.last(), Some(AggNode::Exit { .. })));
            assert!(children.iter().any(|c| matches!(c, AggNode::Branch { .. })));
        }
        _ => panic!("expected a linear aggregation root"),
    }
}

/// A head-controlled while loop is not structured; restructuring demotes
/// it to tail-controlled form, after which it aggregates with a loop
/// region.
#[test]
fn while_loop_restructures() {
    let mut module = Module::new();
    let mut cfg = Cfg::new();
    let header = cfg.add_basic_block();
    let body = cfg.add_basic_block();
    let after = cfg.add_basic_block();

    cfg.divert_inedges(cfg.exit(), header);
    branch_tac(&mut module, &mut cfg, header);
    cfg.add_outedge(header, after);
    cfg.add_outedge(header, body);
    cfg.add_outedge(body, header);
    cfg.add_outedge(after, cfg.exit());

    assert!(cfg.is_valid());
    assert!(!is_structured(&cfg));
    assert!(is_reducible(&cfg));

    restructure(&mut module, &mut cfg);
    assert!(is_structured(&cfg));
    assert!(cfg.is_valid());

    let tree = aggregate(cfg).unwrap();
    let ascii = tree.to_ascii();
    assert!(ascii.contains("loop"), "{ascii}");
}

/// An irreducible two-entry cycle still restructures into a single
/// demultiplexed loop.
#[test]
fn irreducible_cycle_restructures() {
    let mut module = Module::new();
    let mut cfg = Cfg::new();
    let head = cfg.add_basic_block();
    let a = cfg.add_basic_block();
    let b = cfg.add_basic_block();

    cfg.divert_inedges(cfg.exit(), head);
    branch_tac(&mut module, &mut cfg, head);
    cfg.add_outedge(head, a);
    cfg.add_outedge(head, b);
    branch_tac(&mut module, &mut cfg, a);
    cfg.add_outedge(a, b);
    cfg.add_outedge(a, cfg.exit());
    branch_tac(&mut module, &mut cfg, b);
    cfg.add_outedge(b, a);
    cfg.add_outedge(b, cfg.exit());

    assert!(!is_reducible(&cfg));
    assert!(!is_structured(&cfg));

    restructure(&mut module, &mut cfg);
    assert!(is_structured(&cfg));
}

/// Splitting an edge preserves the edge identity and interposes a block.
#[test]
fn edge_splitting() {
    let mut cfg = Cfg::new();
    let edge = CfgEdge {
        source: cfg.entry(),
        index: 0,
    };
    let block = cfg.split_edge(edge);
    assert_eq!(cfg.successor(cfg.entry(), 0), block);
    assert_eq!(cfg.successor(block, 0), cfg.exit());
    assert_eq!(cfg.num_in_edges(block), 1);
    assert_eq!(cfg.num_in_edges(cfg.exit()), 1);
}

/// Demand annotation: a variable written in one arm and demanded below
/// the branch must leave through both arms, and be live into the branch
/// for the arm that only passes it through.
#[test]
fn branch_demand_sets() {
    let mut module = Module::new();
    let v = module.create_named_variable(Type::Bits(32), "v");
    let w = module.create_named_variable(Type::Bits(32), "w");

    let write_v = AggNode::Block {
        tacs: vec![Tac::with_results(
            Box::new(BitConstant::from_u64(32, 1)),
            vec![],
            vec![v],
        )],
    };
    let empty = AggNode::Block { tacs: vec![] };
    let branch = AggNode::Branch {
        branches: vec![write_v, empty],
    };
    let exit = AggNode::Exit { results: vec![v, w] };
    let root = AggNode::Linear {
        children: vec![
            AggNode::Entry {
                arguments: vec![v, w],
            },
            branch,
            exit,
        ],
    };

    let tree = annotate(&root);
    let branch_demand = &tree.children[1];
    // v is written in an arm and demanded below: it exits the branch.
    assert!(branch_demand.children[0].set.bottom.contains(&v));
    assert!(branch_demand.children[1].set.bottom.contains(&v));
    // The pass-through arm needs v live on entry; the writing arm does not.
    assert!(branch_demand.children[1].set.top.contains(&v));
    assert!(!branch_demand.children[0].set.top.contains(&v));
    // w is untouched by the branch and bypasses it entirely.
    assert!(!branch_demand.children[0].set.bottom.contains(&w));
    assert!(branch_demand.set.top.contains(&w));
}
