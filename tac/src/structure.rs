//! Structural analysis and restructuring of control-flow graphs.
//!
//! A CFG is *structured* when it decomposes into linear, branch, and
//! tail-controlled loop regions; only structured graphs can be aggregated
//! and lowered into the data-flow graph. [restructure] rewrites an
//! arbitrary graph into that shape: loops are demoted to single-entry,
//! single-exit, tail-controlled form with auxiliary predicate variables,
//! and branch arms are funneled into a unique continuation point.

use loamc_rvsdg::{BitConstant, MatchOperation};
use loamc_types::Type;
use petgraph::{algo::dominators, algo::tarjan_scc, graphmap::DiGraphMap};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    cfg::{Cfg, CfgEdge, CfgNodeId},
    module::Module,
    ops::BranchOperation,
    tac::Tac,
};

/// True if every node has at most one successor: no branching at all.
pub fn is_linear(cfg: &Cfg) -> bool {
    cfg.nodes().all(|node| cfg.num_out_edges(node) <= 1)
}

/// True if the graph reduces to a single node under T1/T2 interval
/// reduction: every loop has a unique entry point.
pub fn is_reducible(cfg: &Cfg) -> bool {
    let mut succs: FxHashMap<CfgNodeId, FxHashSet<CfgNodeId>> = FxHashMap::default();
    let mut preds: FxHashMap<CfgNodeId, FxHashSet<CfgNodeId>> = FxHashMap::default();
    for node in cfg.nodes() {
        succs.entry(node).or_default();
        preds.entry(node).or_default();
    }
    for node in cfg.nodes() {
        for &sink in cfg.out_edges(node) {
            succs.get_mut(&node).unwrap().insert(sink);
            preds.get_mut(&sink).unwrap().insert(node);
        }
    }
    let entry = cfg.entry();
    loop {
        // T1: remove self-loops.
        let nodes: Vec<CfgNodeId> = succs.keys().copied().collect();
        for node in &nodes {
            succs.get_mut(node).unwrap().remove(node);
            preds.get_mut(node).unwrap().remove(node);
        }
        // T2: merge any node with a unique predecessor into it.
        let candidate = nodes
            .iter()
            .copied()
            .find(|&node| node != entry && preds[&node].len() == 1);
        let Some(node) = candidate else {
            break;
        };
        let parent = *preds[&node].iter().next().unwrap();
        let outs: Vec<CfgNodeId> = succs.remove(&node).unwrap().into_iter().collect();
        preds.remove(&node);
        succs.get_mut(&parent).unwrap().remove(&node);
        for out in outs {
            if out != node {
                succs.get_mut(&parent).unwrap().insert(out);
                let p = preds.get_mut(&out).unwrap();
                p.remove(&node);
                p.insert(parent);
            }
        }
    }
    succs.len() == 1
}

/// True if the graph decomposes into linear/branch/loop canonical regions,
/// i.e. the aggregation reduction collapses it to a single node.
pub fn is_structured(cfg: &Cfg) -> bool {
    let mut succs: FxHashMap<CfgNodeId, Vec<CfgNodeId>> = FxHashMap::default();
    let mut preds: FxHashMap<CfgNodeId, Vec<CfgNodeId>> = FxHashMap::default();
    for node in cfg.nodes() {
        succs.entry(node).or_default();
        preds.entry(node).or_default();
    }
    for node in cfg.nodes() {
        for &sink in cfg.out_edges(node) {
            succs.get_mut(&node).unwrap().push(sink);
            preds.get_mut(&sink).unwrap().push(node);
        }
    }
    crate::aggregation::reduces_to_single(&mut succs, &mut preds)
}

/// Edges that close a cycle: targets already on the DFS stack.
fn back_edges(cfg: &Cfg) -> FxHashSet<(CfgNodeId, usize)> {
    let mut back = FxHashSet::default();
    let mut state: FxHashMap<CfgNodeId, u8> = FxHashMap::default(); // 1 = on stack, 2 = done
    // Iterative DFS with explicit phases so the on-stack set is exact.
    let mut stack: Vec<(CfgNodeId, usize)> = vec![(cfg.entry(), 0)];
    state.insert(cfg.entry(), 1);
    while let Some(top) = stack.len().checked_sub(1) {
        let (node, index) = stack[top];
        if index < cfg.num_out_edges(node) {
            stack[top].1 += 1;
            let sink = cfg.successor(node, index);
            match state.get(&sink) {
                Some(1) => {
                    back.insert((node, index));
                }
                Some(_) => {}
                None => {
                    state.insert(sink, 1);
                    stack.push((sink, 0));
                }
            }
        } else {
            state.insert(node, 2);
            stack.pop();
        }
    }
    back
}

fn skeleton(cfg: &Cfg, back: &FxHashSet<(CfgNodeId, usize)>) -> DiGraphMap<CfgNodeId, ()> {
    let mut graph = DiGraphMap::new();
    for node in cfg.nodes() {
        graph.add_node(node);
    }
    for node in cfg.nodes() {
        for (index, &sink) in cfg.out_edges(node).iter().enumerate() {
            if !back.contains(&(node, index)) {
                graph.add_edge(node, sink, ());
            }
        }
    }
    graph
}

/// Rewrite `cfg` into structured form.
pub fn restructure(module: &mut Module, cfg: &mut Cfg) {
    if is_structured(cfg) {
        return;
    }
    log::debug!(target: "restructure", "restructuring an unstructured control flow graph");
    let scope: FxHashSet<CfgNodeId> = cfg.nodes().collect();
    restructure_loops_in(module, cfg, &scope);
    restructure_branches(module, cfg);
    debug_assert!(is_structured(cfg), "restructuring left the graph unstructured");
}

fn restructure_loops_in(module: &mut Module, cfg: &mut Cfg, scope: &FxHashSet<CfgNodeId>) {
    let mut graph: DiGraphMap<CfgNodeId, ()> = DiGraphMap::new();
    for &node in scope {
        graph.add_node(node);
    }
    for &node in scope {
        for &sink in cfg.out_edges(node) {
            if scope.contains(&sink) {
                graph.add_edge(node, sink, ());
            }
        }
    }
    for scc in tarjan_scc(&graph) {
        let is_loop = scc.len() > 1
            || (scc.len() == 1 && cfg.out_edges(scc[0]).contains(&scc[0]));
        if !is_loop {
            continue;
        }
        let members: FxHashSet<CfgNodeId> = scc.iter().copied().collect();
        restructure_loop(module, cfg, &members);
        // Rewiring removed this loop's repetition edges, but inner loops
        // are still there.
        restructure_loops_in(module, cfg, &members);
    }
}

/// Demote one strongly connected component to a tail-controlled loop.
///
/// Auxiliary variables: `q` demultiplexes multiple entry or exit points,
/// `r` is the boolean repeat flag tested by the new loop tail.
fn restructure_loop(module: &mut Module, cfg: &mut Cfg, members: &FxHashSet<CfgNodeId>) {
    let mut entry_nodes: Vec<CfgNodeId> = Vec::new();
    let mut entry_edges: Vec<CfgEdge> = Vec::new();
    for &node in members {
        for &edge in cfg.in_edges(node) {
            if !members.contains(&edge.source) {
                if !entry_nodes.contains(&node) {
                    entry_nodes.push(node);
                }
                entry_edges.push(edge);
            }
        }
    }
    entry_nodes.sort();

    let mut exit_nodes: Vec<CfgNodeId> = Vec::new();
    let mut exit_edges: Vec<CfgEdge> = Vec::new();
    let mut repetition_edges: Vec<CfgEdge> = Vec::new();
    for &node in members {
        for (index, &sink) in cfg.out_edges(node).iter().enumerate() {
            if !members.contains(&sink) {
                if !exit_nodes.contains(&sink) {
                    exit_nodes.push(sink);
                }
                exit_edges.push(CfgEdge { source: node, index });
            } else if entry_nodes.contains(&sink) {
                repetition_edges.push(CfgEdge { source: node, index });
            }
        }
    }
    exit_nodes.sort();
    log::debug!(
        target: "restructure",
        "loop with {} members, {} entries, {} exits",
        members.len(),
        entry_nodes.len(),
        exit_nodes.len()
    );

    let needs_q = entry_nodes.len() > 1 || exit_nodes.len() > 1;
    let q = needs_q.then(|| module.create_named_variable(Type::Bits(32), "q"));
    let r = module.create_named_variable(Type::BOOL, "r");

    // Loop head: demultiplexes q onto the entry nodes.
    let head = cfg.add_basic_block();
    if entry_nodes.len() > 1 {
        let matched = Tac::new(
            module,
            Box::new(MatchOperation::new(
                32,
                (0..entry_nodes.len()).map(|i| (i as u64, i)),
                0,
                entry_nodes.len(),
            )),
            vec![q.unwrap()],
        );
        let selector = matched.result(0);
        cfg.append_last(head, matched);
        cfg.append_last(
            head,
            Tac::with_results(
                Box::new(BranchOperation::new(entry_nodes.len())),
                vec![selector],
                vec![],
            ),
        );
        for &target in &entry_nodes {
            cfg.add_outedge(head, target);
        }
    } else {
        cfg.add_outedge(head, entry_nodes[0]);
    }

    // Exit landing pad: demultiplexes q onto the exit targets.
    let landing = cfg.add_basic_block();
    if exit_nodes.len() > 1 {
        let matched = Tac::new(
            module,
            Box::new(MatchOperation::new(
                32,
                (0..exit_nodes.len()).map(|i| (i as u64, i)),
                0,
                exit_nodes.len(),
            )),
            vec![q.unwrap()],
        );
        let selector = matched.result(0);
        cfg.append_last(landing, matched);
        cfg.append_last(
            landing,
            Tac::with_results(
                Box::new(BranchOperation::new(exit_nodes.len())),
                vec![selector],
                vec![],
            ),
        );
        for &target in &exit_nodes {
            cfg.add_outedge(landing, target);
        }
    } else {
        cfg.add_outedge(landing, exit_nodes[0]);
    }

    // Loop tail: tests r, exiting to the landing pad or repeating.
    let tail = cfg.add_basic_block();
    let matched = Tac::new(module, Box::new(MatchOperation::on_bool()), vec![r]);
    let selector = matched.result(0);
    cfg.append_last(tail, matched);
    cfg.append_last(
        tail,
        Tac::with_results(Box::new(BranchOperation::new(2)), vec![selector], vec![]),
    );
    cfg.add_outedge(tail, landing);
    cfg.add_outedge(tail, head);

    let set_q = |cfg: &mut Cfg, block: CfgNodeId, value: usize| {
        if let Some(q) = q {
            cfg.append_last(
                block,
                Tac::with_results(
                    Box::new(BitConstant::from_u64(32, value as u64)),
                    vec![],
                    vec![q],
                ),
            );
        }
    };
    let set_r = |cfg: &mut Cfg, block: CfgNodeId, value: bool| {
        cfg.append_last(
            block,
            Tac::with_results(
                Box::new(BitConstant::from_u64(1, value as u64)),
                vec![],
                vec![r],
            ),
        );
    };

    for edge in entry_edges {
        let target = cfg.successor(edge.source, edge.index);
        let block = cfg.split_edge(edge);
        let position = entry_nodes.iter().position(|&n| n == target).unwrap();
        set_q(cfg, block, position);
        cfg.divert_edge(CfgEdge { source: block, index: 0 }, head);
    }
    for edge in repetition_edges {
        let target = cfg.successor(edge.source, edge.index);
        let block = cfg.split_edge(edge);
        let position = entry_nodes.iter().position(|&n| n == target).unwrap();
        set_q(cfg, block, position);
        set_r(cfg, block, true);
        cfg.divert_edge(CfgEdge { source: block, index: 0 }, tail);
    }
    for edge in exit_edges {
        let target = cfg.successor(edge.source, edge.index);
        let block = cfg.split_edge(edge);
        let position = exit_nodes.iter().position(|&n| n == target).unwrap();
        set_q(cfg, block, position);
        set_r(cfg, block, false);
        cfg.divert_edge(CfgEdge { source: block, index: 0 }, tail);
    }
}

/// Funnel every branch's arms into a unique continuation point.
fn restructure_branches(module: &mut Module, cfg: &mut Cfg) {
    // Give every forward branch edge landing on a shared node a dedicated
    // (empty) arm block, so arm regions are disjoint and single-entry.
    // Back edges stay untouched: they must collapse into loop self-edges.
    let back = back_edges(cfg);
    let shared: Vec<CfgEdge> = cfg
        .nodes()
        .filter(|&node| cfg.num_out_edges(node) >= 2)
        .flat_map(|node| {
            cfg.out_edges(node)
                .iter()
                .enumerate()
                .filter(|(index, sink)| {
                    cfg.num_in_edges(**sink) >= 2 && !back.contains(&(node, *index))
                })
                .map(move |(index, _)| CfgEdge {
                    source: node,
                    index,
                })
                .collect::<Vec<_>>()
        })
        .collect();
    for edge in shared {
        cfg.split_edge(edge);
    }

    // Funneling inserts nodes, so iterate to a fixed point. Each pass
    // reduces the number of branches with scattered continuations.
    let mut budget = cfg.nodes().count() * 4 + 16;
    loop {
        assert!(budget > 0, "branch restructuring failed to converge");
        budget -= 1;
        let back = back_edges(cfg);
        let graph = skeleton(cfg, &back);
        let doms = dominators::simple_fast(&graph, cfg.entry());

        let branch = cfg.nodes().find_map(|node| {
            let forward: Vec<(usize, CfgNodeId)> = cfg
                .out_edges(node)
                .iter()
                .enumerate()
                .filter(|(index, _)| !back.contains(&(node, *index)))
                .map(|(index, &sink)| (index, sink))
                .collect();
            if forward.len() < 2 {
                return None;
            }
            let continuations = continuation_points(cfg, &doms, node, &forward, &back);
            (continuations.len() > 1).then_some((node, forward, continuations))
        });
        let Some((node, forward, continuations)) = branch else {
            break;
        };
        funnel(module, cfg, node, &forward, &continuations, &back, &doms);
    }
}

/// The nodes where control leaving `branch`'s arm regions converges.
///
/// An arm region is everything dominated by the arm's head; any edge out
/// of the arm regions (or a branch edge pointing past every arm) names a
/// continuation point. A structured branch has exactly one.
fn continuation_points(
    cfg: &Cfg,
    doms: &dominators::Dominators<CfgNodeId>,
    branch: CfgNodeId,
    forward: &[(usize, CfgNodeId)],
    back: &FxHashSet<(CfgNodeId, usize)>,
) -> Vec<CfgNodeId> {
    let mut continuations: Vec<CfgNodeId> = Vec::new();
    let mut note = |target: CfgNodeId| {
        if !continuations.contains(&target) {
            continuations.push(target);
        }
    };
    for &(_, head) in forward {
        if cfg.num_in_edges(head) > 1 {
            // The branch jumps straight to a join shared with others.
            note(head);
            continue;
        }
        // Walk the arm region; edges leaving it name continuations.
        let mut seen: FxHashSet<CfgNodeId> = FxHashSet::default();
        let mut stack = vec![head];
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            for (index, &sink) in cfg.out_edges(node).iter().enumerate() {
                if back.contains(&(node, index)) {
                    continue;
                }
                if dominates(doms, head, sink) {
                    stack.push(sink);
                } else {
                    note(sink);
                }
            }
        }
    }
    continuations
}

fn dominates(
    doms: &dominators::Dominators<CfgNodeId>,
    dominator: CfgNodeId,
    node: CfgNodeId,
) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if n == dominator {
            return true;
        }
        let next = doms.immediate_dominator(n);
        if next == Some(n) {
            return false;
        }
        current = next;
    }
    false
}

/// Insert a demultiplexer block so that every arm of `branch` exits to a
/// single continuation: edges to the scattered continuation targets are
/// split to set a selector variable `p` and rerouted through the new
/// block.
fn funnel(
    module: &mut Module,
    cfg: &mut Cfg,
    branch: CfgNodeId,
    forward: &[(usize, CfgNodeId)],
    continuations: &[CfgNodeId],
    back: &FxHashSet<(CfgNodeId, usize)>,
    doms: &dominators::Dominators<CfgNodeId>,
) {
    log::debug!(
        target: "restructure",
        "funneling {branch}: {} continuation points",
        continuations.len()
    );
    let p = module.create_named_variable(Type::Bits(32), "p");
    let junction = cfg.add_basic_block();
    let matched = Tac::new(
        module,
        Box::new(MatchOperation::new(
            32,
            (0..continuations.len()).map(|i| (i as u64, i)),
            0,
            continuations.len(),
        )),
        vec![p],
    );
    let selector = matched.result(0);
    cfg.append_last(junction, matched);
    cfg.append_last(
        junction,
        Tac::with_results(
            Box::new(BranchOperation::new(continuations.len())),
            vec![selector],
            vec![],
        ),
    );
    for &target in continuations {
        cfg.add_outedge(junction, target);
    }

    // Reroute every edge into a continuation from the branch head or its
    // arm regions. Edges between continuation targets are downstream of
    // the branch and stay untouched.
    let region_of = |node: CfgNodeId| {
        node == branch
            || forward.iter().any(|&(_, head)| {
                cfg.num_in_edges(head) == 1 && dominates(doms, head, node)
            })
    };
    let mut rerouted: Vec<CfgEdge> = Vec::new();
    for &target in continuations {
        for &edge in cfg.in_edges(target) {
            if edge.source != junction && region_of(edge.source) && !back.contains(&(edge.source, edge.index))
            {
                rerouted.push(edge);
            }
        }
    }
    for edge in rerouted {
        let target = cfg.successor(edge.source, edge.index);
        let position = continuations.iter().position(|&n| n == target).unwrap();
        let block = cfg.split_edge(edge);
        cfg.append_last(
            block,
            Tac::with_results(
                Box::new(BitConstant::from_u64(32, position as u64)),
                vec![],
                vec![p],
            ),
        );
        cfg.divert_edge(CfgEdge { source: block, index: 0 }, junction);
    }
}
