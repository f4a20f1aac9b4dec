//! The graph model: element store, label index, and edit operations.
//!
//! # Architecture
//!
//! Elements are stored in a single `IndexMap` keyed by [`ElementId`];
//! the bidirectional node/edge links are plain ids on both sides, so
//! the id -> element map is the only source of truth and deletion
//! cascades are worklists over ids. Iteration order is insertion order,
//! which keeps compilation and execution deterministic.
//!
//! Every public operation leaves the referential-integrity invariants
//! intact: edges always join two live non-edge elements, slot
//! cardinalities hold (connecting a conflicting edge displaces the old
//! one), and deleting anything clears every reference to it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;

use crate::checker::{self, CheckResult};
use crate::converter::Converter;
use crate::edge::Edge;
use crate::element::Element;
use crate::error::GraphError;
use crate::executor;
use crate::gate::Gate;
use crate::id::{ElementId, ElementKind, NodeKind};
use crate::label::is_valid_identifier;
use crate::pool::Pool;
use crate::rng::SimRng;
use crate::scope::GraphScope;
use crate::swap::Swap;

const DEFAULT_SEED: u64 = 0x5EED_0F10;

/// The resource-flow graph: typed nodes joined by rate-limited edges,
/// advanced one atomic tick at a time.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) elements: IndexMap<ElementId, Element>,
    /// label -> id, bijective with the live labels.
    pub(crate) labels: HashMap<String, ElementId>,
    /// Per-kind counters feeding the `kind$<n>` auto-labels.
    pub(crate) auto_counters: BTreeMap<ElementKind, u64>,
    /// Gate sampling source; seeded, serialized, and clone-shared so
    /// tick streams reproduce.
    pub(crate) rng: SimRng,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            elements: IndexMap::new(),
            labels: HashMap::new(),
            auto_counters: BTreeMap::new(),
            rng: SimRng::new(seed),
        }
    }

    /// Reset the gate-sampling RNG.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = SimRng::new(seed);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_element(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn get_element_mut(&mut self, id: &ElementId) -> Option<&mut Element> {
        self.elements.get_mut(id)
    }

    pub fn get_element_by_label(&self, label: &str) -> Option<&Element> {
        self.labels.get(label).and_then(|id| self.elements.get(id))
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    /// All elements in insertion order.
    pub fn elements(&self) -> impl Iterator<Item = (&ElementId, &Element)> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The numeric observable a label exposes to expressions: pools
    /// read as their state, edges as their rate.
    pub(crate) fn observable(&self, name: &str) -> Option<f64> {
        match self.labels.get(name).and_then(|id| self.elements.get(id)) {
            Some(Element::Pool(p)) => Some(p.state()),
            Some(Element::Edge(e)) => Some(e.rate()),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    fn element(&self, id: &ElementId) -> Result<&Element, GraphError> {
        self.elements
            .get(id)
            .ok_or_else(|| GraphError::IdNotFound(id.clone()))
    }

    pub fn pool(&self, id: &ElementId) -> Result<&Pool, GraphError> {
        self.element(id)?.as_pool().ok_or(GraphError::WrongKind {
            id: id.clone(),
            expected: ElementKind::Pool,
        })
    }

    pub fn pool_mut(&mut self, id: &ElementId) -> Result<&mut Pool, GraphError> {
        let err = GraphError::WrongKind {
            id: id.clone(),
            expected: ElementKind::Pool,
        };
        match self.elements.get_mut(id) {
            Some(Element::Pool(p)) => Ok(p),
            Some(_) => Err(err),
            None => Err(GraphError::IdNotFound(id.clone())),
        }
    }

    pub fn gate(&self, id: &ElementId) -> Result<&Gate, GraphError> {
        self.element(id)?.as_gate().ok_or(GraphError::WrongKind {
            id: id.clone(),
            expected: ElementKind::Gate,
        })
    }

    pub fn gate_mut(&mut self, id: &ElementId) -> Result<&mut Gate, GraphError> {
        match self.elements.get_mut(id) {
            Some(Element::Gate(g)) => Ok(g),
            Some(_) => Err(GraphError::WrongKind {
                id: id.clone(),
                expected: ElementKind::Gate,
            }),
            None => Err(GraphError::IdNotFound(id.clone())),
        }
    }

    pub fn converter(&self, id: &ElementId) -> Result<&Converter, GraphError> {
        self.element(id)?
            .as_converter()
            .ok_or(GraphError::WrongKind {
                id: id.clone(),
                expected: ElementKind::Converter,
            })
    }

    pub fn converter_mut(&mut self, id: &ElementId) -> Result<&mut Converter, GraphError> {
        match self.elements.get_mut(id) {
            Some(Element::Converter(c)) => Ok(c),
            Some(_) => Err(GraphError::WrongKind {
                id: id.clone(),
                expected: ElementKind::Converter,
            }),
            None => Err(GraphError::IdNotFound(id.clone())),
        }
    }

    pub fn swap(&self, id: &ElementId) -> Result<&Swap, GraphError> {
        self.element(id)?.as_swap().ok_or(GraphError::WrongKind {
            id: id.clone(),
            expected: ElementKind::Swap,
        })
    }

    pub fn swap_mut(&mut self, id: &ElementId) -> Result<&mut Swap, GraphError> {
        match self.elements.get_mut(id) {
            Some(Element::Swap(s)) => Ok(s),
            Some(_) => Err(GraphError::WrongKind {
                id: id.clone(),
                expected: ElementKind::Swap,
            }),
            None => Err(GraphError::IdNotFound(id.clone())),
        }
    }

    pub fn edge(&self, id: &ElementId) -> Result<&Edge, GraphError> {
        self.element(id)?.as_edge().ok_or(GraphError::WrongKind {
            id: id.clone(),
            expected: ElementKind::Edge,
        })
    }

    pub fn edge_mut(&mut self, id: &ElementId) -> Result<&mut Edge, GraphError> {
        match self.elements.get_mut(id) {
            Some(Element::Edge(e)) => Ok(e),
            Some(_) => Err(GraphError::WrongKind {
                id: id.clone(),
                expected: ElementKind::Edge,
            }),
            None => Err(GraphError::IdNotFound(id.clone())),
        }
    }

    // -----------------------------------------------------------------------
    // Auto-naming
    // -----------------------------------------------------------------------

    /// Next `kind$<n>` name that is free both as a label and as an id.
    /// The counter only moves forward, so names never repeat even after
    /// deletions.
    fn next_auto(&mut self, kind: ElementKind) -> String {
        let counter = self.auto_counters.entry(kind).or_insert(0);
        loop {
            let candidate = format!("{}${}", kind.as_str(), *counter);
            *counter += 1;
            if !self.labels.contains_key(candidate.as_str())
                && !self.elements.contains_key(candidate.as_str())
            {
                return candidate;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Node creation
    // -----------------------------------------------------------------------

    /// Add a node with an auto-generated id and label.
    pub fn add_node(&mut self, kind: NodeKind) -> Result<ElementId, GraphError> {
        self.add_node_with(kind, None, None)
    }

    /// Add a node. A missing id or label is synthesized from the
    /// per-kind counter (`pool$0`, `gate$1`, ...).
    pub fn add_node_with(
        &mut self,
        kind: NodeKind,
        id: Option<&str>,
        label: Option<&str>,
    ) -> Result<ElementId, GraphError> {
        if let Some(label) = label {
            if !is_valid_identifier(label) {
                return Err(GraphError::InvalidLabel(label.to_owned()));
            }
            if self.labels.contains_key(label) {
                return Err(GraphError::DuplicateLabel(label.to_owned()));
            }
        }
        if let Some(id) = id {
            if self.elements.contains_key(id) {
                return Err(GraphError::IdExists(ElementId::from(id)));
            }
        }

        let label = match label {
            Some(label) => label.to_owned(),
            None => self.next_auto(kind.into()),
        };
        let id = match id {
            Some(id) => ElementId::from(id),
            // Reuse the auto label as the id when both are synthesized;
            // otherwise draw a fresh auto name for the id alone.
            None if !self.elements.contains_key(label.as_str()) => ElementId::new(label.clone()),
            None => ElementId::new(self.next_auto(kind.into())),
        };

        let element = match kind {
            NodeKind::Pool => Element::Pool(Pool::new(id.clone(), label.clone())),
            NodeKind::Gate => Element::Gate(Gate::new(id.clone(), label.clone())),
            NodeKind::Converter => Element::Converter(Converter::new(id.clone(), label.clone())),
            NodeKind::Swap => Element::Swap(Swap::new(id.clone(), label.clone())),
        };
        self.elements.insert(id.clone(), element);
        self.labels.insert(label, id.clone());
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Edge creation
    // -----------------------------------------------------------------------

    /// Connect `from` to `to` with the given rate (negative =
    /// unlimited), auto-generating id and label. Neither endpoint may
    /// be a swap (those need a pipe index; use [`Graph::add_edge_with`]).
    pub fn add_edge(
        &mut self,
        from: &ElementId,
        to: &ElementId,
        rate: f64,
    ) -> Result<ElementId, GraphError> {
        self.add_edge_with(None, from, to, rate, None, None)
    }

    /// Connect `from` to `to`.
    ///
    /// When the new edge conflicts with a single-edge slot (pool
    /// input/output, gate input, converter output, or a swap pipe
    /// half), the previously connected edge is displaced: deleted, with
    /// its other endpoint's linkage cleared.
    pub fn add_edge_with(
        &mut self,
        id: Option<&str>,
        from: &ElementId,
        to: &ElementId,
        rate: f64,
        swap_input_index: Option<usize>,
        label: Option<&str>,
    ) -> Result<ElementId, GraphError> {
        if from == to {
            return Err(GraphError::SelfLoop);
        }
        let from_kind = match self.elements.get(from) {
            Some(el) => el.kind(),
            None => return Err(GraphError::MissingEndpoint(from.clone())),
        };
        let to_kind = match self.elements.get(to) {
            Some(el) => el.kind(),
            None => return Err(GraphError::MissingEndpoint(to.clone())),
        };
        if from_kind == ElementKind::Edge {
            return Err(GraphError::EdgeFromEdge);
        }
        if to_kind == ElementKind::Edge {
            return Err(GraphError::EdgeToEdge);
        }
        let touches_swap = from_kind == ElementKind::Swap || to_kind == ElementKind::Swap;
        if touches_swap && swap_input_index.is_none() {
            return Err(GraphError::MissingSwapInputIndex);
        }
        if let Some(index) = swap_input_index {
            // Pipe indices must stay contiguous; validate before any
            // mutation so a failed add leaves the graph untouched.
            for (endpoint, kind) in [(from, from_kind), (to, to_kind)] {
                if kind == ElementKind::Swap && index > self.swap(endpoint)?.pipes().len() {
                    return Err(GraphError::SwapIndexOutOfRange(index));
                }
            }
        }
        if let Some(id) = id {
            if self.elements.contains_key(id) {
                return Err(GraphError::EdgeIdExists(ElementId::from(id)));
            }
        }
        if let Some(label) = label {
            if !is_valid_identifier(label) {
                return Err(GraphError::InvalidLabel(label.to_owned()));
            }
            if self.labels.contains_key(label) {
                return Err(GraphError::DuplicateLabel(label.to_owned()));
            }
        }

        let label = match label {
            Some(label) => label.to_owned(),
            None => self.next_auto(ElementKind::Edge),
        };
        let id = match id {
            Some(id) => ElementId::from(id),
            None if !self.elements.contains_key(label.as_str()) => ElementId::new(label.clone()),
            None => ElementId::new(self.next_auto(ElementKind::Edge)),
        };

        let edge = Edge::new(
            id.clone(),
            label.clone(),
            from.clone(),
            to.clone(),
            rate,
            swap_input_index,
        );
        self.elements.insert(id.clone(), Element::Edge(edge));
        self.labels.insert(label, id.clone());

        // Link both endpoints, displacing whatever was in the slot.
        let displaced_out = self.link_source(from, &id, swap_input_index)?;
        let displaced_in = self.link_dest(to, &id, swap_input_index)?;
        for old in [displaced_out, displaced_in].into_iter().flatten() {
            let mut removed = Vec::new();
            self.remove_edge_cascade(&old, &mut removed);
        }

        Ok(id)
    }

    /// Attach `edge_id` to the source slot of `from`; returns the
    /// displaced edge, if any.
    fn link_source(
        &mut self,
        from: &ElementId,
        edge_id: &ElementId,
        swap_input_index: Option<usize>,
    ) -> Result<Option<ElementId>, GraphError> {
        match self.elements.get_mut(from) {
            Some(Element::Pool(p)) => Ok(p.output_edge.replace(edge_id.clone())),
            Some(Element::Gate(g)) => {
                g.weights.insert(edge_id.clone(), 1.0);
                Ok(None)
            }
            Some(Element::Converter(c)) => Ok(c.output_edge.replace(edge_id.clone())),
            Some(Element::Swap(s)) => {
                let index = swap_input_index.ok_or(GraphError::MissingSwapInputIndex)?;
                let pipe = s.get_or_create_pipe(index)?;
                Ok(pipe.output_edge.replace(edge_id.clone()))
            }
            _ => Err(GraphError::MissingEndpoint(from.clone())),
        }
    }

    /// Attach `edge_id` to the destination slot of `to`; returns the
    /// displaced edge, if any.
    fn link_dest(
        &mut self,
        to: &ElementId,
        edge_id: &ElementId,
        swap_input_index: Option<usize>,
    ) -> Result<Option<ElementId>, GraphError> {
        match self.elements.get_mut(to) {
            Some(Element::Pool(p)) => Ok(p.input_edge.replace(edge_id.clone())),
            Some(Element::Gate(g)) => Ok(g.input_edge.replace(edge_id.clone())),
            Some(Element::Converter(c)) => {
                c.input_edges.push(edge_id.clone());
                Ok(None)
            }
            Some(Element::Swap(s)) => {
                let index = swap_input_index.ok_or(GraphError::MissingSwapInputIndex)?;
                let pipe = s.get_or_create_pipe(index)?;
                Ok(pipe.input_edge.replace(edge_id.clone()))
            }
            _ => Err(GraphError::MissingEndpoint(to.clone())),
        }
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete an element. Deleting a node removes every incident edge;
    /// deleting an edge clears the matching slots on both endpoints.
    /// Returns every id removed, in deletion order.
    pub fn delete_element(&mut self, id: &ElementId) -> Result<Vec<ElementId>, GraphError> {
        let element = self.element(id)?;
        let mut removed = Vec::new();
        if element.is_edge() {
            self.remove_edge_cascade(id, &mut removed);
            return Ok(removed);
        }

        let incident: Vec<ElementId> = match element {
            Element::Pool(p) => p
                .input_edge
                .iter()
                .chain(p.output_edge.iter())
                .cloned()
                .collect(),
            Element::Gate(g) => g
                .input_edge
                .iter()
                .cloned()
                .chain(g.weights.keys().cloned())
                .collect(),
            Element::Converter(c) => c
                .input_edges
                .iter()
                .chain(c.output_edge.iter())
                .cloned()
                .collect(),
            Element::Swap(s) => s
                .pipes
                .iter()
                .flat_map(|p| p.input_edge.iter().chain(p.output_edge.iter()))
                .cloned()
                .collect(),
            Element::Edge(_) => Vec::new(),
        };
        for edge in incident {
            self.remove_edge_cascade(&edge, &mut removed);
        }
        if let Some(element) = self.elements.shift_remove(id) {
            self.labels.remove(element.label());
            removed.push(id.clone());
        }
        Ok(removed)
    }

    /// Remove a single edge: clear the slots that still reference it on
    /// both endpoints, then drop it from the store and label index.
    fn remove_edge_cascade(&mut self, edge_id: &ElementId, removed: &mut Vec<ElementId>) {
        let Some(Element::Edge(edge)) = self.elements.get(edge_id) else {
            return;
        };
        let from = edge.from.clone();
        let to = edge.to.clone();
        let pipe_index = edge.swap_input_index;

        // Source side.
        match self.elements.get_mut(&from) {
            Some(Element::Pool(p)) => {
                if p.output_edge.as_ref() == Some(edge_id) {
                    p.output_edge = None;
                }
            }
            Some(Element::Gate(g)) => {
                g.weights.shift_remove(edge_id);
                if g.selected_output.as_ref() == Some(edge_id) {
                    g.selected_output = None;
                }
            }
            Some(Element::Converter(c)) => {
                if c.output_edge.as_ref() == Some(edge_id) {
                    c.output_edge = None;
                }
            }
            Some(Element::Swap(s)) => {
                if let Some(pipe) = pipe_index.and_then(|i| s.pipes.get_mut(i)) {
                    if pipe.output_edge.as_ref() == Some(edge_id) {
                        pipe.output_edge = None;
                    }
                }
            }
            _ => {}
        }

        // Destination side.
        match self.elements.get_mut(&to) {
            Some(Element::Pool(p)) => {
                if p.input_edge.as_ref() == Some(edge_id) {
                    p.input_edge = None;
                }
            }
            Some(Element::Gate(g)) => {
                if g.input_edge.as_ref() == Some(edge_id) {
                    g.input_edge = None;
                }
            }
            Some(Element::Converter(c)) => {
                c.input_edges.retain(|e| e != edge_id);
            }
            Some(Element::Swap(s)) => {
                if let Some(pipe) = pipe_index.and_then(|i| s.pipes.get_mut(i)) {
                    if pipe.input_edge.as_ref() == Some(edge_id) {
                        pipe.input_edge = None;
                    }
                }
            }
            _ => {}
        }

        if let Some(element) = self.elements.shift_remove(edge_id) {
            self.labels.remove(element.label());
            removed.push(edge_id.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Setters
    // -----------------------------------------------------------------------

    /// Rename an element, keeping the label index coherent.
    pub fn set_label(&mut self, id: &ElementId, label: &str) -> Result<(), GraphError> {
        if !is_valid_identifier(label) {
            return Err(GraphError::InvalidLabel(label.to_owned()));
        }
        let element = self.element(id)?;
        if element.label() == label {
            return Ok(());
        }
        if self.labels.contains_key(label) {
            return Err(GraphError::DuplicateLabel(label.to_owned()));
        }
        let old = element.label().to_owned();
        self.labels.remove(&old);
        self.labels.insert(label.to_owned(), id.clone());
        if let Some(element) = self.elements.get_mut(id) {
            element.set_label(label.to_owned());
        }
        Ok(())
    }

    /// Set the token a pool or converter produces.
    pub fn set_token(&mut self, id: &ElementId, token: &str) -> Result<(), GraphError> {
        if !is_valid_identifier(token) {
            return Err(GraphError::InvalidToken(token.to_owned()));
        }
        match self.elements.get_mut(id) {
            Some(Element::Pool(p)) => {
                p.token = token.to_owned();
                Ok(())
            }
            Some(Element::Converter(c)) => {
                c.token = token.to_owned();
                Ok(())
            }
            Some(_) => Err(GraphError::WrongKind {
                id: id.clone(),
                expected: ElementKind::Pool,
            }),
            None => Err(GraphError::IdNotFound(id.clone())),
        }
    }

    /// Set (positive amount) or delete (non-positive amount) one entry
    /// of a converter's recipe. The token must be producible by
    /// something upstream of the converter.
    pub fn set_converter_required_input_per_unit(
        &mut self,
        converter: &ElementId,
        token: &str,
        amount: f64,
    ) -> Result<(), GraphError> {
        if !is_valid_identifier(token) {
            return Err(GraphError::InvalidToken(token.to_owned()));
        }
        self.converter(converter)?;
        if amount <= 0.0 {
            self.converter_mut(converter)?.required.shift_remove(token);
            return Ok(());
        }
        let upstream = self.upstream_tokens_of(converter)?;
        if !upstream.iter().any(|(_, tokens)| tokens.contains(token)) {
            return Err(GraphError::UnknownToken(token.to_owned()));
        }
        self.converter_mut(converter)?
            .required
            .insert(token.to_owned(), amount);
        Ok(())
    }

    /// Set the sampling weight of one of a gate's output edges.
    pub fn set_gate_output_weight(
        &mut self,
        gate: &ElementId,
        edge: &ElementId,
        weight: f64,
    ) -> Result<(), GraphError> {
        self.gate_mut(gate)?.set_output_weight(edge, weight)
    }

    /// Configure a swap's constant-product token pair.
    pub fn set_swap_tokens(
        &mut self,
        swap: &ElementId,
        token_a: &str,
        amount_a: f64,
        token_b: &str,
        amount_b: f64,
    ) -> Result<(), GraphError> {
        self.swap_mut(swap)?
            .set_tokens(token_a, amount_a, token_b, amount_b)
    }

    // -----------------------------------------------------------------------
    // Upstream token discovery
    // -----------------------------------------------------------------------

    /// For each input edge of a converter, the set of tokens that could
    /// flow in: walk each edge backward, taking a pool's or converter's
    /// token, recursing through a gate's input, and both tokens of a
    /// configured swap. Missing endpoints end the walk.
    pub fn upstream_tokens_of(
        &self,
        converter: &ElementId,
    ) -> Result<Vec<(ElementId, BTreeSet<String>)>, GraphError> {
        let conv = self.converter(converter)?;
        let mut result = Vec::with_capacity(conv.input_edges.len());
        for edge_id in &conv.input_edges {
            let mut tokens = BTreeSet::new();
            let mut visited = HashSet::new();
            self.collect_upstream_tokens(edge_id, &mut tokens, &mut visited);
            result.push((edge_id.clone(), tokens));
        }
        Ok(result)
    }

    fn collect_upstream_tokens(
        &self,
        edge_id: &ElementId,
        tokens: &mut BTreeSet<String>,
        visited: &mut HashSet<ElementId>,
    ) {
        if !visited.insert(edge_id.clone()) {
            return;
        }
        let Some(Element::Edge(edge)) = self.elements.get(edge_id) else {
            return;
        };
        match self.elements.get(&edge.from) {
            Some(Element::Pool(p)) => {
                tokens.insert(p.token.clone());
            }
            Some(Element::Converter(c)) => {
                tokens.insert(c.token.clone());
            }
            Some(Element::Gate(g)) => {
                if let Some(input) = &g.input_edge {
                    self.collect_upstream_tokens(input, tokens, visited);
                }
            }
            Some(Element::Swap(s)) => {
                if let Some(config) = s.config() {
                    tokens.insert(config.token_a().to_owned());
                    tokens.insert(config.token_b().to_owned());
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Simulation entry points
    // -----------------------------------------------------------------------

    /// Advance the whole graph by one atomic tick.
    pub fn next_tick(&mut self) -> Result<(), GraphError> {
        executor::run_tick(self)
    }

    /// Structurally check the graph without mutating it.
    pub fn check_graph(&self) -> CheckResult {
        checker::check(self)
    }

    /// A scope exposing the graph's observables to expressions: reads
    /// pass through to live state, writes land in a local cache.
    pub fn variable_scope(&self) -> GraphScope<'_> {
        GraphScope::new(self)
    }

    /// Serialize to a JSON value. Fails only when a state became
    /// non-finite (JSON has no representation for it).
    pub fn to_json(&self) -> Result<serde_json::Value, GraphError> {
        crate::json::to_json(self)
    }

    /// Rebuild a graph from [`Graph::to_json`] output, recompiling all
    /// expression sources.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, GraphError> {
        crate::json::from_json(value)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
