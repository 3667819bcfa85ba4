use crate::graph::{Graph, Input, NodeId, Output};

/// A mutation published on the graph's notifier bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    NodeCreated(NodeId),
    /// Published before the node's edges are detached, so listeners may
    /// still inspect it.
    NodeDestroyed(NodeId),
    /// An input was rewired from `old` to `new`.
    InputChanged { input: Input, old: Output, new: Output },
}

/// Observer of graph mutations, typically used by passes to maintain
/// worklists.
///
/// Listeners run synchronously, inline with the mutation. They receive the
/// graph immutably and must not mutate it; a pass that wants to react to an
/// event records it and acts after the mutating call returns.
pub trait GraphListener {
    fn notify(&mut self, graph: &Graph, event: &GraphEvent) {
        match *event {
            GraphEvent::NodeCreated(node) => self.on_node_create(graph, node),
            GraphEvent::NodeDestroyed(node) => self.on_node_destroy(graph, node),
            GraphEvent::InputChanged { input, old, new } => {
                self.on_input_change(graph, input, old, new)
            }
        }
    }

    fn on_node_create(&mut self, graph: &Graph, node: NodeId) {
        let _ = (graph, node);
    }

    fn on_node_destroy(&mut self, graph: &Graph, node: NodeId) {
        let _ = (graph, node);
    }

    fn on_input_change(&mut self, graph: &Graph, input: Input, old: Output, new: Output) {
        let _ = (graph, input, old, new);
    }
}
