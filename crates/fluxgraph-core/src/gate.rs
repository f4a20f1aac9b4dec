//! Gate: weighted random routing, one output per tick.

use fluxgraph_expr::BooleanProgram;
use indexmap::IndexMap;

use crate::error::GraphError;
use crate::id::ElementId;
use crate::rng::{pick_weighted, SimRng};

/// A routing node: holds a weight per output edge and, each tick,
/// samples exactly one of them. Zero-weight outputs are never chosen;
/// if every weight is zero (or there are no outputs), nothing is
/// selected and no packets leave the gate that tick.
///
/// The weight map's insertion order is the edge attach order, which
/// keeps sampling deterministic under a pinned seed.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    pub(crate) id: ElementId,
    pub(crate) label: String,
    /// Gates forwarding at execution time.
    pub(crate) condition: BooleanProgram,
    pub(crate) input_edge: Option<ElementId>,
    /// Output edge id -> non-negative weight.
    pub(crate) weights: IndexMap<ElementId, f64>,
    /// This tick's sampled output. Runtime state, not persisted.
    pub(crate) selected_output: Option<ElementId>,
}

impl Gate {
    pub(crate) fn new(id: ElementId, label: String) -> Self {
        Self {
            id,
            label,
            condition: BooleanProgram::always(true),
            input_edge: None,
            weights: IndexMap::new(),
            selected_output: None,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn condition(&self) -> &BooleanProgram {
        &self.condition
    }

    pub fn input_edge(&self) -> Option<&ElementId> {
        self.input_edge.as_ref()
    }

    /// Output edges and their weights, in attach order.
    pub fn output_weights(&self) -> impl Iterator<Item = (&ElementId, f64)> {
        self.weights.iter().map(|(id, w)| (id, *w))
    }

    pub fn selected_output(&self) -> Option<&ElementId> {
        self.selected_output.as_ref()
    }

    /// Set the weight of an attached output edge. Rejects negative
    /// weights and edges that are not outputs of this gate.
    pub fn set_output_weight(
        &mut self,
        edge: &ElementId,
        weight: f64,
    ) -> Result<(), GraphError> {
        if weight < 0.0 {
            return Err(GraphError::NegativeWeight);
        }
        match self.weights.get_mut(edge) {
            Some(w) => {
                *w = weight;
                Ok(())
            }
            None => Err(GraphError::EdgeNotOnGate),
        }
    }

    pub fn set_condition(&mut self, source: &str) -> Result<(), GraphError> {
        self.condition = BooleanProgram::compile(source)?;
        Ok(())
    }

    /// Sample this tick's output.
    pub(crate) fn advance(&mut self, rng: &mut SimRng) {
        let weights: Vec<f64> = self.weights.values().copied().collect();
        self.selected_output = pick_weighted(rng, &weights)
            .and_then(|i| self.weights.get_index(i).map(|(id, _)| id.clone()));
    }
}
