//! Scopes bridging graph state into the expression evaluator.
//!
//! Reads resolve against a local write-cache first and fall through to
//! the graph's observables (pool state, edge rate). Writes only ever
//! touch the cache, so evaluating an expression cannot mutate the
//! graph.

use std::collections::HashMap;

use fluxgraph_expr::Scope;

use crate::graph::Graph;

fn read(graph: &Graph, cache: &HashMap<String, f64>, name: &str) -> Option<f64> {
    cache
        .get(name)
        .copied()
        .or_else(|| graph.observable(name))
}

fn keys(graph: &Graph, cache: &HashMap<String, f64>) -> Vec<String> {
    let mut all: Vec<String> = graph
        .elements()
        .map(|(_, el)| el.label().to_owned())
        .filter(|label| graph.observable(label).is_some())
        .collect();
    for key in cache.keys() {
        if !all.contains(key) {
            all.push(key.clone());
        }
    }
    all
}

/// The public scope handed out by [`Graph::variable_scope`]; owns its
/// write-cache.
#[derive(Debug)]
pub struct GraphScope<'g> {
    graph: &'g Graph,
    cache: HashMap<String, f64>,
}

impl<'g> GraphScope<'g> {
    pub(crate) fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            cache: HashMap::new(),
        }
    }
}

impl Scope for GraphScope<'_> {
    fn get(&self, name: &str) -> Option<f64> {
        read(self.graph, &self.cache, name)
    }

    fn set(&mut self, name: &str, value: f64) {
        self.cache.insert(name.to_owned(), value);
    }

    fn keys(&self) -> Vec<String> {
        keys(self.graph, &self.cache)
    }
}

/// The executor's scope: one shared write-cache per tick, borrowed
/// around each evaluation so pool advances and guards see each other's
/// scope writes within the tick.
pub(crate) struct TickScope<'g, 'c> {
    graph: &'g Graph,
    cache: &'c mut HashMap<String, f64>,
}

impl<'g, 'c> TickScope<'g, 'c> {
    pub(crate) fn new(graph: &'g Graph, cache: &'c mut HashMap<String, f64>) -> Self {
        Self { graph, cache }
    }
}

impl Scope for TickScope<'_, '_> {
    fn get(&self, name: &str) -> Option<f64> {
        read(self.graph, self.cache, name)
    }

    fn set(&mut self, name: &str, value: f64) {
        self.cache.insert(name.to_owned(), value);
    }

    fn keys(&self) -> Vec<String> {
        keys(self.graph, self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeKind;

    #[test]
    fn reads_pool_state_and_edge_rate() {
        let mut graph = Graph::new();
        let p0 = graph
            .add_node_with(NodeKind::Pool, Some("p0"), Some("lake"))
            .unwrap();
        let p1 = graph
            .add_node_with(NodeKind::Pool, Some("p1"), Some("sink"))
            .unwrap();
        let e = graph.add_edge(&p0, &p1, 2.5).unwrap();
        graph.set_label(&e, "flow").unwrap();
        graph.pool_mut(&p0).unwrap().set_state(7.0);

        let scope = graph.variable_scope();
        assert_eq!(scope.get("lake"), Some(7.0));
        assert_eq!(scope.get("flow"), Some(2.5));
        assert_eq!(scope.get("sink"), Some(0.0));
        assert_eq!(scope.get("nothing"), None);
    }

    #[test]
    fn writes_shadow_reads_without_touching_the_graph() {
        let mut graph = Graph::new();
        let p0 = graph
            .add_node_with(NodeKind::Pool, Some("p0"), Some("lake"))
            .unwrap();
        graph.pool_mut(&p0).unwrap().set_state(7.0);

        let mut scope = graph.variable_scope();
        scope.set("lake", 100.0);
        scope.set("scratch", 1.0);
        assert_eq!(scope.get("lake"), Some(100.0));
        assert_eq!(scope.get("scratch"), Some(1.0));
        drop(scope);

        assert_eq!(graph.pool(&p0).unwrap().state(), 7.0);
    }

    #[test]
    fn keys_union_graph_and_cache() {
        let mut graph = Graph::new();
        graph
            .add_node_with(NodeKind::Pool, Some("p0"), Some("lake"))
            .unwrap();
        // Gates expose no observable, so their labels don't appear.
        graph.add_node(NodeKind::Gate).unwrap();

        let mut scope = graph.variable_scope();
        scope.set("scratch", 1.0);
        let mut keys = scope.keys();
        keys.sort();
        assert_eq!(keys, vec!["lake".to_owned(), "scratch".to_owned()]);
    }
}
