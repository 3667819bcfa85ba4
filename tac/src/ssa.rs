use rustc_hash::FxHashMap;

use crate::{
    cfg::{Cfg, CfgEdge, CfgNodeId},
    module::Module,
    ops::{AssignmentOperation, SsaPhiOperation, UndefOperation},
    tac::Tac,
};

/// Destroy SSA form: eliminate every φ by materializing its selections as
/// assignments on the incoming edges.
///
/// For each block opening with φs, every in-edge is split; each φ gets a
/// fresh variable `t` that the split blocks assign the matching operand
/// to. An undef definition of the φ result is hoisted into the entry's
/// first block, and a fresh assignment block writes the φ result from `t`
/// and takes over the φ block's in-edges.
pub fn destruct_ssa(module: &mut Module, cfg: &mut Cfg) {
    debug_assert!(cfg.is_valid());

    let phi_blocks: Vec<CfgNodeId> = cfg
        .nodes()
        .filter(|&node| {
            cfg.tacs(node)
                .first()
                .is_some_and(|tac| {
                    tac.operation().as_any().downcast_ref::<SsaPhiOperation>().is_some()
                })
        })
        .collect();
    if phi_blocks.is_empty() {
        return;
    }

    let first_block = cfg.successor(cfg.entry(), 0);

    for phi_block in phi_blocks {
        log::debug!(target: "destruct-ssa", "eliminating phis in {phi_block}");
        let assignment_block = cfg.add_basic_block();

        // The in-edges of the phi block, keyed by their source. Splitting
        // inserts blocks without disturbing the edge identities.
        let mut edges: FxHashMap<CfgNodeId, CfgEdge> = FxHashMap::default();
        let mut splits: FxHashMap<CfgNodeId, CfgNodeId> = FxHashMap::default();
        for edge in cfg.in_edges(phi_block).to_vec() {
            let previous = edges.insert(edge.source, edge);
            debug_assert!(previous.is_none(), "duplicate in-edge source at a phi block");
        }

        let mut hoisted: Vec<Tac> = Vec::new();
        while let Some(first) = cfg.tacs(phi_block).first() {
            let Some(phi) = first.operation().as_any().downcast_ref::<SsaPhiOperation>() else {
                break;
            };
            let phi = phi.clone();
            let tac = cfg.drop_first(phi_block);
            let temporary = module.create_variable(phi.ty.clone());

            for (index, operand) in tac.operands().iter().enumerate() {
                let predecessor = phi.predecessor(index);
                let split = *splits.entry(predecessor).or_insert_with(|| {
                    cfg.split_edge(edges[&predecessor])
                });
                cfg.append_last(
                    split,
                    Tac::with_results(
                        Box::new(AssignmentOperation::new(phi.ty.clone())),
                        vec![*operand],
                        vec![temporary],
                    ),
                );
            }

            hoisted.push(Tac::with_results(
                Box::new(UndefOperation::new(phi.ty.clone())),
                vec![],
                vec![tac.result(0)],
            ));
            cfg.append_last(
                assignment_block,
                Tac::with_results(
                    Box::new(AssignmentOperation::new(phi.ty.clone())),
                    vec![temporary],
                    vec![tac.result(0)],
                ),
            );
        }
        // Hoist after the phis are gone; the first block may itself have
        // been the phi block.
        for tac in hoisted.into_iter().rev() {
            cfg.append_first(first_block, tac);
        }

        cfg.divert_inedges(phi_block, assignment_block);
        cfg.add_outedge(assignment_block, phi_block);
    }
}
