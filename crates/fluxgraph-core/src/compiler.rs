//! The per-tick graph compiler.
//!
//! A tick compiles the live topology into independently executable
//! units before anything moves:
//!
//! 1. **Activate** -- advance every pool, sample every gate, and
//!    disable the gate outputs that lost the draw.
//! 2. **Cut at pool inputs** -- connected components of the active set,
//!    where a pool connects to its output edge but not its input edge.
//!    Each component is a parallel group.
//! 3. **Cut at converter outputs** -- re-partition each group so a
//!    converter and the edge it sources land in different subgroups.
//! 4. **Order** -- build a DAG over subgroups from converter-sourced
//!    entry edges and Kahn-sort it; leftovers mean the converters form
//!    a dependency cycle and the group runs with the Cyclic strategy.
//!
//! Swaps never seed a component: they are entered per-pipe, so one
//! exchanger can splice several otherwise independent pipelines and
//! appear in each of their groups.
//!
//! Check mode performs the same partition without touching state: pools
//! are not advanced, and a gate disables only its zero-weight outputs
//! so every feasible selection stays visible.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::element::Element;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{ElementId, ElementKind};
use crate::scope::TickScope;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// The smallest unit of executor work: at most one converter, plus the
/// edges and routing elements around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Subgroup {
    /// Member element ids in discovery order (an element may appear in
    /// several subgroups only if it is a swap).
    pub members: Vec<ElementId>,
    /// The single converter inside this subgroup, if any.
    pub converter: Option<ElementId>,
    /// Member edges whose source is a pool or a converter; traversal
    /// starts here.
    pub entry_edges: Vec<ElementId>,
}

/// How a parallel group's subgroups execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOrder {
    /// Topological order over subgroup indices: producers first.
    Ordered(Vec<usize>),
    /// The converters inside depend on each other; every subgroup runs
    /// against tick-start state.
    Cyclic,
}

/// One cut-at-pool-inputs component, further cut into subgroups.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelGroup {
    pub subgroups: Vec<Subgroup>,
    pub order: GroupOrder,
}

/// The compiled tick plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph {
    pub groups: Vec<ParallelGroup>,
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

/// Advance pools and sample gates; returns the disabled edge set.
pub(crate) fn activate(
    graph: &mut Graph,
    cache: &mut HashMap<String, f64>,
) -> Result<HashSet<ElementId>, GraphError> {
    let ids: Vec<ElementId> = graph.elements.keys().cloned().collect();
    let mut disabled = HashSet::new();
    for id in &ids {
        match graph.elements.get(id).map(|el| el.kind()) {
            Some(ElementKind::Pool) => advance_pool(graph, cache, id)?,
            Some(ElementKind::Gate) => {
                // SimRng is 8 bytes; round-tripping it through a clone
                // sidesteps borrowing the graph twice.
                let mut rng = graph.rng.clone();
                let gate = graph.gate_mut(id)?;
                gate.advance(&mut rng);
                let selected = gate.selected_output().cloned();
                let outputs: Vec<ElementId> = gate.output_weights().map(|(e, _)| e.clone()).collect();
                graph.rng = rng;
                for edge in outputs {
                    if selected.as_ref() != Some(&edge) {
                        disabled.insert(edge);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(disabled)
}

/// Evaluate a pool's guarded action and clamp the result back into the
/// pool. `x` is bound to the current state first.
fn advance_pool(
    graph: &mut Graph,
    cache: &mut HashMap<String, f64>,
    id: &ElementId,
) -> Result<(), GraphError> {
    use fluxgraph_expr::Scope;
    let next = {
        let pool = graph.pool(id)?;
        let mut scope = TickScope::new(graph, cache);
        scope.set("x", pool.state());
        if pool.condition().eval(&mut scope)? {
            Some(pool.action().eval(&mut scope)?)
        } else {
            None
        }
    };
    if let Some(state) = next {
        graph.pool_mut(id)?.set_state(state);
    }
    Ok(())
}

/// The disabled set for check mode: zero-weight gate outputs only, so
/// structure is judged across every feasible selection.
fn disabled_for_check(graph: &Graph) -> HashSet<ElementId> {
    let mut disabled = HashSet::new();
    for (_, element) in graph.elements() {
        if let Element::Gate(gate) = element {
            for (edge, weight) in gate.output_weights() {
                if weight <= 0.0 {
                    disabled.insert(edge.clone());
                }
            }
        }
    }
    disabled
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Compile for execution: advances reservoir/gate state as a side
/// effect, per the activation phase.
pub(crate) fn compile_live(
    graph: &mut Graph,
    cache: &mut HashMap<String, f64>,
) -> Result<CompiledGraph, GraphError> {
    let disabled = activate(graph, cache)?;
    Ok(partition(graph, &disabled))
}

/// Compile without mutating anything; used by the checker.
pub(crate) fn compile_check(graph: &Graph) -> CompiledGraph {
    let disabled = disabled_for_check(graph);
    partition(graph, &disabled)
}

// ---------------------------------------------------------------------------
// Component search
// ---------------------------------------------------------------------------

/// A DFS position: a plain element, or a swap entered through one
/// specific pipe slot. Keeping pipes distinct is what lets a single
/// exchanger splice several components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Site {
    Element(ElementId),
    Pipe(ElementId, usize),
}

impl Site {
    fn element_id(&self) -> &ElementId {
        match self {
            Site::Element(id) => id,
            Site::Pipe(id, _) => id,
        }
    }
}

struct Partitioner<'g> {
    graph: &'g Graph,
    disabled: &'g HashSet<ElementId>,
}

impl<'g> Partitioner<'g> {
    fn edge_active(&self, id: &ElementId) -> bool {
        !self.disabled.contains(id) && self.graph.get_element(id).is_some()
    }

    /// Adjacency for the component search. `cut_converter_output`
    /// additionally severs each converter from the edge it sources
    /// (the phase-C subgroup cut). The relation is symmetric, so the
    /// components are independent of traversal order.
    fn neighbors(&self, site: &Site, cut_converter_output: bool) -> Vec<Site> {
        let mut out = Vec::new();
        match site {
            Site::Element(id) => match self.graph.get_element(id) {
                Some(Element::Pool(pool)) => {
                    // The input edge is the cut: a pool only connects forward.
                    if let Some(edge) = pool.output_edge() {
                        if self.edge_active(edge) {
                            out.push(Site::Element(edge.clone()));
                        }
                    }
                }
                Some(Element::Gate(gate)) => {
                    if let Some(edge) = gate.input_edge() {
                        if self.edge_active(edge) {
                            out.push(Site::Element(edge.clone()));
                        }
                    }
                    for (edge, _) in gate.output_weights() {
                        if self.edge_active(edge) {
                            out.push(Site::Element(edge.clone()));
                        }
                    }
                }
                Some(Element::Converter(conv)) => {
                    for edge in conv.input_edges() {
                        if self.edge_active(edge) {
                            out.push(Site::Element(edge.clone()));
                        }
                    }
                    if !cut_converter_output {
                        if let Some(edge) = conv.output_edge() {
                            if self.edge_active(edge) {
                                out.push(Site::Element(edge.clone()));
                            }
                        }
                    }
                }
                Some(Element::Edge(edge)) => {
                    // Source half.
                    match self.graph.get_element(edge.from()).map(|el| el.kind()) {
                        Some(ElementKind::Swap) => {
                            if let Some(index) = edge.swap_input_index() {
                                out.push(Site::Pipe(edge.from().clone(), index));
                            }
                        }
                        Some(ElementKind::Converter) if cut_converter_output => {}
                        Some(_) => out.push(Site::Element(edge.from().clone())),
                        None => {}
                    }
                    // Destination half; dropped for pools (the cut).
                    match self.graph.get_element(edge.to()).map(|el| el.kind()) {
                        Some(ElementKind::Pool) => {}
                        Some(ElementKind::Swap) => {
                            if let Some(index) = edge.swap_input_index() {
                                out.push(Site::Pipe(edge.to().clone(), index));
                            }
                        }
                        Some(_) => out.push(Site::Element(edge.to().clone())),
                        None => {}
                    }
                }
                _ => {}
            },
            Site::Pipe(swap_id, index) => {
                if let Ok(swap) = self.graph.swap(swap_id) {
                    if let Some(pipe) = swap.pipes().get(*index) {
                        for edge in [pipe.input_edge(), pipe.output_edge()].into_iter().flatten() {
                            if self.edge_active(edge) {
                                out.push(Site::Element(edge.clone()));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Iterative DFS from `root`, constrained to `universe` when given.
    fn component(
        &self,
        root: Site,
        visited: &mut HashSet<Site>,
        cut_converter_output: bool,
        universe: Option<&HashSet<Site>>,
    ) -> Vec<Site> {
        let mut sites = Vec::new();
        let mut stack = vec![root];
        while let Some(site) = stack.pop() {
            if !visited.insert(site.clone()) {
                continue;
            }
            for next in self.neighbors(&site, cut_converter_output) {
                if visited.contains(&next) {
                    continue;
                }
                if let Some(universe) = universe {
                    if !universe.contains(&next) {
                        continue;
                    }
                }
                stack.push(next);
            }
            sites.push(site);
        }
        sites
    }

    /// Whether a site can seed a component: active, and never a swap.
    fn is_root(&self, id: &ElementId, element: &Element) -> bool {
        match element.kind() {
            ElementKind::Swap => false,
            ElementKind::Edge => self.edge_active(id),
            _ => true,
        }
    }
}

/// Slice the active set into parallel groups and subgroups.
fn partition(graph: &Graph, disabled: &HashSet<ElementId>) -> CompiledGraph {
    let partitioner = Partitioner { graph, disabled };

    // Phase B: parallel groups.
    let mut visited: HashSet<Site> = HashSet::new();
    let mut group_sites: Vec<Vec<Site>> = Vec::new();
    for (id, element) in graph.elements() {
        if !partitioner.is_root(id, element) {
            continue;
        }
        let root = Site::Element(id.clone());
        if visited.contains(&root) {
            continue;
        }
        group_sites.push(partitioner.component(root, &mut visited, false, None));
    }

    // Phase C: subgroups within each group.
    let mut groups = Vec::with_capacity(group_sites.len());
    for sites in group_sites {
        let universe: HashSet<Site> = sites.iter().cloned().collect();
        let mut sub_visited: HashSet<Site> = HashSet::new();
        let mut subgroups = Vec::new();
        for site in &sites {
            if matches!(site, Site::Pipe(..)) || sub_visited.contains(site) {
                continue;
            }
            let component =
                partitioner.component(site.clone(), &mut sub_visited, true, Some(&universe));
            subgroups.push(build_subgroup(graph, component));
        }
        let order = order_subgroups(graph, &subgroups);
        groups.push(ParallelGroup { subgroups, order });
    }

    CompiledGraph { groups }
}

/// Collapse a site list into a subgroup: deduplicated members, the
/// single converter, and the pool/converter-sourced entry edges.
fn build_subgroup(graph: &Graph, sites: Vec<Site>) -> Subgroup {
    let mut members = Vec::new();
    let mut seen: HashSet<ElementId> = HashSet::new();
    let mut converter = None;
    let mut entry_edges = Vec::new();
    for site in &sites {
        let id = site.element_id();
        if !seen.insert(id.clone()) {
            continue;
        }
        members.push(id.clone());
        match graph.get_element(id) {
            Some(Element::Converter(_)) => converter = Some(id.clone()),
            Some(Element::Edge(edge)) => {
                let source_kind = graph.get_element(edge.from()).map(|el| el.kind());
                if matches!(
                    source_kind,
                    Some(ElementKind::Pool) | Some(ElementKind::Converter)
                ) {
                    entry_edges.push(id.clone());
                }
            }
            _ => {}
        }
    }
    Subgroup {
        members,
        converter,
        entry_edges,
    }
}

/// Phase D: Kahn's algorithm over the producer->consumer DAG. An entry
/// edge sourced at a converter means "run that converter's subgroup
/// first"; leftover nodes (including self-dependencies) mean the group
/// is cyclic.
fn order_subgroups(graph: &Graph, subgroups: &[Subgroup]) -> GroupOrder {
    let owner_of: HashMap<&ElementId, usize> = subgroups
        .iter()
        .enumerate()
        .filter_map(|(i, sub)| sub.converter.as_ref().map(|c| (c, i)))
        .collect();

    let n = subgroups.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, sub) in subgroups.iter().enumerate() {
        for entry in &sub.entry_edges {
            let Some(Element::Edge(edge)) = graph.get_element(entry) else {
                continue;
            };
            if let Some(&owner) = owner_of.get(edge.from()) {
                adjacency[owner].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == n {
        GroupOrder::Ordered(order)
    } else {
        GroupOrder::Cyclic
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeKind;

    fn compile(graph: &Graph) -> CompiledGraph {
        compile_check(graph)
    }

    // -----------------------------------------------------------------------
    // Test 1: pool chain splits at pool inputs
    // -----------------------------------------------------------------------
    #[test]
    fn pool_chain_forms_one_group_per_pool() {
        let mut graph = Graph::new();
        let p0 = graph.add_node(NodeKind::Pool).unwrap();
        let p1 = graph.add_node(NodeKind::Pool).unwrap();
        let p2 = graph.add_node(NodeKind::Pool).unwrap();
        graph.add_edge(&p0, &p1, 1.0).unwrap();
        graph.add_edge(&p1, &p2, 1.0).unwrap();

        let compiled = compile(&graph);
        // Each pool+output-edge pair is its own group (edge into a pool
        // is cut); p2 has no output so it sits alone.
        assert_eq!(compiled.groups.len(), 3);
        for group in &compiled.groups {
            assert_eq!(group.subgroups.len(), 1);
            assert!(matches!(group.order, GroupOrder::Ordered(_)));
        }
    }

    // -----------------------------------------------------------------------
    // Test 2: converter splits into its own subgroup at the output edge
    // -----------------------------------------------------------------------
    #[test]
    fn converter_output_edge_starts_a_new_subgroup() {
        let mut graph = Graph::new();
        let p0 = graph.add_node(NodeKind::Pool).unwrap();
        let p1 = graph.add_node(NodeKind::Pool).unwrap();
        let c = graph.add_node(NodeKind::Converter).unwrap();
        let sink = graph.add_node(NodeKind::Gate).unwrap();
        graph.add_edge(&p0, &c, 1.0).unwrap();
        graph.add_edge(&p1, &c, 1.0).unwrap();
        let out = graph.add_edge(&c, &sink, 1.0).unwrap();

        let compiled = compile(&graph);
        assert_eq!(compiled.groups.len(), 1);
        let group = &compiled.groups[0];
        assert_eq!(group.subgroups.len(), 2);

        let with_conv = group
            .subgroups
            .iter()
            .find(|s| s.converter.is_some())
            .unwrap();
        assert_eq!(with_conv.converter.as_ref(), Some(&c));
        // Both pools feed the converter subgroup.
        assert_eq!(with_conv.entry_edges.len(), 2);

        let downstream = group
            .subgroups
            .iter()
            .find(|s| s.converter.is_none())
            .unwrap();
        assert_eq!(downstream.entry_edges, vec![out.clone()]);

        // Producer subgroup must be ordered before the consumer.
        let GroupOrder::Ordered(order) = &group.order else {
            panic!("expected ordered group");
        };
        let conv_pos = order
            .iter()
            .position(|&i| group.subgroups[i].converter.is_some())
            .unwrap();
        let down_pos = order
            .iter()
            .position(|&i| group.subgroups[i].converter.is_none())
            .unwrap();
        assert!(conv_pos < down_pos);
    }

    // -----------------------------------------------------------------------
    // Test 3: converter cycle is reported as cyclic
    // -----------------------------------------------------------------------
    #[test]
    fn mutually_feeding_converters_are_cyclic() {
        let mut graph = Graph::new();
        let c0 = graph.add_node(NodeKind::Converter).unwrap();
        let c1 = graph.add_node(NodeKind::Converter).unwrap();
        graph.add_edge(&c0, &c1, 1.0).unwrap();
        graph.add_edge(&c1, &c0, 1.0).unwrap();

        let compiled = compile(&graph);
        assert_eq!(compiled.groups.len(), 1);
        assert_eq!(compiled.groups[0].order, GroupOrder::Cyclic);
        assert_eq!(compiled.groups[0].subgroups.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Test 4: zero-weight gate outputs are disabled in check mode
    // -----------------------------------------------------------------------
    #[test]
    fn check_mode_disables_only_zero_weight_outputs() {
        let mut graph = Graph::new();
        let p = graph.add_node(NodeKind::Pool).unwrap();
        let g = graph.add_node(NodeKind::Gate).unwrap();
        let a = graph.add_node(NodeKind::Pool).unwrap();
        let b = graph.add_node(NodeKind::Pool).unwrap();
        graph.add_edge(&p, &g, 1.0).unwrap();
        let ea = graph.add_edge(&g, &a, 1.0).unwrap();
        let eb = graph.add_edge(&g, &b, 1.0).unwrap();
        graph.set_gate_output_weight(&g, &eb, 0.0).unwrap();

        let compiled = compile(&graph);
        let all_members: Vec<&ElementId> = compiled
            .groups
            .iter()
            .flat_map(|gr| gr.subgroups.iter())
            .flat_map(|s| s.members.iter())
            .collect();
        assert!(all_members.contains(&&ea));
        assert!(!all_members.contains(&&eb));
    }

    // -----------------------------------------------------------------------
    // Test 5: a swap splices two independent pipelines
    // -----------------------------------------------------------------------
    #[test]
    fn swap_pipes_live_in_separate_groups() {
        let mut graph = Graph::new();
        let p0 = graph.add_node(NodeKind::Pool).unwrap();
        let p1 = graph.add_node(NodeKind::Pool).unwrap();
        let p2 = graph.add_node(NodeKind::Pool).unwrap();
        let p3 = graph.add_node(NodeKind::Pool).unwrap();
        let s = graph.add_node(NodeKind::Swap).unwrap();
        // Pipe 0: p0 -> swap -> p1. Pipe 1: p2 -> swap -> p3.
        graph.add_edge_with(None, &p0, &s, 1.0, Some(0), None).unwrap();
        graph.add_edge_with(None, &s, &p1, 1.0, Some(0), None).unwrap();
        graph.add_edge_with(None, &p2, &s, 1.0, Some(1), None).unwrap();
        graph.add_edge_with(None, &s, &p3, 1.0, Some(1), None).unwrap();

        let compiled = compile(&graph);
        // Two pipelines (plus the isolated destination pools).
        let groups_with_swap: Vec<_> = compiled
            .groups
            .iter()
            .filter(|gr| {
                gr.subgroups
                    .iter()
                    .any(|sub| sub.members.contains(&s))
            })
            .collect();
        assert_eq!(groups_with_swap.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Test 6: dead subgroup without entries
    // -----------------------------------------------------------------------
    #[test]
    fn gate_cycle_has_no_entry_edges() {
        let mut graph = Graph::new();
        let g0 = graph.add_node(NodeKind::Gate).unwrap();
        let g1 = graph.add_node(NodeKind::Gate).unwrap();
        graph.add_edge(&g0, &g1, 1.0).unwrap();
        graph.add_edge(&g1, &g0, 1.0).unwrap();

        let compiled = compile(&graph);
        assert_eq!(compiled.groups.len(), 1);
        let group = &compiled.groups[0];
        assert_eq!(group.subgroups.len(), 1);
        assert!(group.subgroups[0].entry_edges.is_empty());
        assert!(matches!(group.order, GroupOrder::Ordered(_)));
    }
}
