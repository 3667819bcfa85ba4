//! Redundant buffer elimination.
//!
//! A non-pass-through buffer on a memory-state channel exists to decouple
//! a producer that may stall. When the state already comes out of a
//! memory port (directly, or through forks and the value side of
//! branches), that port provides the buffering, and the buffer can be
//! demoted to a pass-through of the same capacity.

use loamc_rvsdg::{Graph, GraphError, Output, RegionId, TopDownTraverser};
use loamc_types::Type;

use crate::ops::{
    BufferOperation, ForkOperation, HlsBranchOperation, HlsLoadOperation, HlsStoreOperation,
    LocalLoadOperation, LocalStoreOperation,
};

/// Demote every buffer whose input chain already guarantees buffering.
pub fn remove_redundant_buffers(graph: &mut Graph) -> Result<(), GraphError> {
    let root = graph.root();
    remove_in_region(graph, root)
}

fn remove_in_region(graph: &mut Graph, region: RegionId) -> Result<(), GraphError> {
    let mut traverser = TopDownTraverser::new(graph, region);
    while let Some(node) = traverser.next(graph) {
        if graph.is_structural(node) {
            let subregions: Vec<RegionId> = graph.subregions(node).to_vec();
            for sub in subregions {
                remove_in_region(graph, sub)?;
            }
            continue;
        }
        let Some(buffer) = graph
            .simple_op(node)
            .and_then(|op| op.as_any().downcast_ref::<BufferOperation>())
            .cloned()
        else {
            continue;
        };
        if buffer.ty != Type::MemoryState || buffer.pass_through {
            continue;
        }
        let origin = graph.origin(graph.input(node, 0));
        if !reaches_memory_port(graph, origin) {
            continue;
        }
        log::debug!(target: "remove-redundant-buf", "demoting {node} to pass-through");
        let replacement = graph.create_normalized(
            region,
            Box::new(BufferOperation::new(buffer.ty.clone(), buffer.capacity, true)),
            &[origin],
        )?[0];
        graph.divert_users(graph.output(node, 0), replacement)?;
        graph.remove_node(node)?;
    }
    Ok(())
}

/// Trace a state edge backwards through forks and the value operand of
/// branches; true if it originates at a memory port.
///
/// Only the branch's value operand is followed: whether an unselected
/// branch side with state effects would also uphold the buffering
/// guarantee is deliberately not assumed.
fn reaches_memory_port(graph: &Graph, output: Output) -> bool {
    let Some((node, operation)) = graph.producer(output) else {
        return false;
    };
    let any = operation.as_any();
    if any.downcast_ref::<HlsBranchOperation>().is_some() {
        return reaches_memory_port(graph, graph.origin(graph.input(node, 1)));
    }
    if any.downcast_ref::<ForkOperation>().is_some() {
        return reaches_memory_port(graph, graph.origin(graph.input(node, 0)));
    }
    any.downcast_ref::<LocalLoadOperation>().is_some()
        || any.downcast_ref::<LocalStoreOperation>().is_some()
        || any.downcast_ref::<HlsLoadOperation>().is_some()
        || any.downcast_ref::<HlsStoreOperation>().is_some()
}
