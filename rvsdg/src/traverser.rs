use crate::graph::{Graph, NodeId, RegionId};

/// Iterates a region's nodes in insertion order, the canonical top-down
/// order.
///
/// The traverser stays valid when the node it just yielded is deleted and
/// when new nodes are appended behind the cursor: the next candidate is
/// recorded before yielding, and on each step the candidate is re-validated
/// against the region's node list, falling back to its recorded position if
/// it has been removed in the meantime.
pub struct TopDownTraverser {
    region: RegionId,
    next: Option<NodeId>,
    pos: usize,
}

impl TopDownTraverser {
    pub fn new(graph: &Graph, region: RegionId) -> Self {
        Self {
            region,
            next: graph.region_nodes(region).first().copied(),
            pos: 0,
        }
    }

    pub fn next(&mut self, graph: &Graph) -> Option<NodeId> {
        let nodes = graph.region_nodes(self.region);
        let candidate = self.next?;
        let current = if graph.contains_node(candidate) {
            // Earlier deletions may have shifted it; re-locate by id.
            if nodes.get(self.pos).copied() != Some(candidate) {
                self.pos = nodes.iter().position(|n| *n == candidate)?;
            }
            candidate
        } else {
            // The candidate was deleted after being recorded; whatever now
            // sits at its position is the next node in order.
            nodes.get(self.pos).copied()?
        };
        self.next = nodes.get(self.pos + 1).copied();
        self.pos += 1;
        Some(current)
    }
}

/// Iterates a region's nodes in reverse insertion order.
///
/// Deleting the yielded node leaves earlier positions untouched, so the
/// reverse cursor only needs re-seeking when nodes before it disappear.
pub struct BottomUpTraverser {
    region: RegionId,
    next: Option<NodeId>,
    pos: usize,
}

impl BottomUpTraverser {
    pub fn new(graph: &Graph, region: RegionId) -> Self {
        let nodes = graph.region_nodes(region);
        Self {
            region,
            next: nodes.last().copied(),
            pos: nodes.len().saturating_sub(1),
        }
    }

    pub fn next(&mut self, graph: &Graph) -> Option<NodeId> {
        let nodes = graph.region_nodes(self.region);
        let candidate = self.next?;
        let current = if graph.contains_node(candidate) {
            if nodes.get(self.pos).copied() != Some(candidate) {
                self.pos = nodes.iter().position(|n| *n == candidate)?;
            }
            candidate
        } else {
            // Deletions at or above the recorded position leave earlier
            // positions untouched, so step down one slot.
            self.pos = self.pos.checked_sub(1)?;
            nodes.get(self.pos).copied()?
        };
        if self.pos == 0 {
            self.next = None;
        } else {
            self.pos -= 1;
            self.next = nodes.get(self.pos).copied();
        }
        Some(current)
    }
}
