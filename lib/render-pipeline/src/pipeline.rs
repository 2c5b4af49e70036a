use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, error};

use crate::node::{ExecuteCallback, RenderPipelineNode};
use crate::registry::{NodeDependency, Registry};

struct NodeContext {
    node_index: usize,
    name: String,
    execute: ExecuteCallback,
    /// Exponential moving average of the CPU recording time.
    avg_cpu_time: Duration,
}

/// An ordered collection of nodes plus the per-construction execute
/// contexts. Nodes run in declaration order; the dependency set collected
/// by the registry is only used to detect cycles (see DESIGN.md).
#[derive(Default)]
pub struct RenderPipeline {
    nodes: Vec<Box<dyn RenderPipelineNode>>,
    contexts: Vec<NodeContext>,
}

impl RenderPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Box<dyn RenderPipelineNode>) {
        assert!(
            self.contexts.is_empty(),
            "nodes must be added before the pipeline is constructed"
        );
        assert!(
            !self.nodes.iter().any(|n| n.name() == node.name()),
            "duplicate node name '{}'",
            node.name()
        );
        self.nodes.push(node);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_constructed(&self) -> bool {
        !self.contexts.is_empty()
    }

    /// Runs every node's construct phase against `registry`, in
    /// declaration order, and stores the produced execute callbacks. Any
    /// contexts from a previous construction are dropped first; that drop
    /// is the single destruction point for callback-captured resources
    /// (the frame driver forces a device idle before calling this).
    pub fn construct_all(&mut self, registry: &mut Registry) {
        self.contexts.clear();

        for (node_index, node) in self.nodes.iter_mut().enumerate() {
            let name = node.name().to_string();
            debug!("constructing render pipeline node '{name}'");

            registry.set_current_node(Some(name.clone()));
            let execute = node.construct(registry);
            registry.set_current_node(None);

            self.contexts.push(NodeContext {
                node_index,
                name,
                execute,
                avg_cpu_time: Duration::ZERO,
            });
        }

        if let Some(cycle_node) = find_dependency_cycle(registry.node_dependencies()) {
            error!(
                "render pipeline dependency graph has a cycle through node '{cycle_node}'; \
                 execution continues in declaration order but the output is suspect"
            );
        }
    }

    /// Visits `(name, callback)` for every constructed node, in resolved
    /// order (= declaration order).
    pub fn for_each_node_in_resolved_order(
        &mut self,
        mut f: impl FnMut(&str, &mut ExecuteCallback),
    ) {
        for context in &mut self.contexts {
            f(&context.name, &mut context.execute);
        }
    }

    /// Folds one frame's CPU recording time of a node into its moving
    /// average, for the diagnostics overlay.
    pub fn report_node_cpu_time(&mut self, name: &str, elapsed: Duration) {
        if let Some(context) = self.contexts.iter_mut().find(|c| c.name == name) {
            if context.avg_cpu_time.is_zero() {
                context.avg_cpu_time = elapsed;
            } else {
                context.avg_cpu_time = (context.avg_cpu_time * 7 + elapsed) / 8;
            }
        }
    }

    pub fn node_cpu_time(&self, name: &str) -> Option<Duration> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.avg_cpu_time)
    }

    pub fn node_names_in_order(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name())
    }

    /// Index of the node within declaration order, for stable diagnostics
    /// labels.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.node_index)
    }
}

/// DFS cycle detection over the collected dependency edges. Returns a node
/// on a cycle, if any.
fn find_dependency_cycle(dependencies: &HashSet<NodeDependency>) -> Option<String> {
    // consumer -> producers: a node depends on its producers
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for dep in dependencies {
        edges
            .entry(dep.consumer.as_str())
            .or_default()
            .push(dep.producer.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => return Some(node.to_string()),
            None => {}
        }
        marks.insert(node, Mark::InProgress);
        if let Some(producers) = edges.get(node) {
            for producer in producers {
                if let Some(cycle) = visit(producer, edges, marks) {
                    return Some(cycle);
                }
            }
        }
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for node in edges.keys() {
        if let Some(cycle) = visit(node, &edges, &mut marks) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(consumer: &str, producer: &str) -> NodeDependency {
        NodeDependency {
            consumer: consumer.to_string(),
            producer: producer.to_string(),
        }
    }

    #[test]
    fn acyclic_dependency_sets_pass() {
        let deps: HashSet<_> = [edge("forward", "shadow"), edge("post", "forward")]
            .into_iter()
            .collect();
        assert!(find_dependency_cycle(&deps).is_none());
    }

    #[test]
    fn cycles_are_detected() {
        let deps: HashSet<_> = [
            edge("a", "b"),
            edge("b", "c"),
            edge("c", "a"),
        ]
        .into_iter()
        .collect();
        assert!(find_dependency_cycle(&deps).is_some());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let deps: HashSet<_> = [edge("a", "a")].into_iter().collect();
        assert!(find_dependency_cycle(&deps).is_some());
    }
}
