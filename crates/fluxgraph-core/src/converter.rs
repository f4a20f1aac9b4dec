//! Converter: a multi-input recipe node with a token buffer.

use fluxgraph_expr::{BooleanProgram, Scope};
use indexmap::IndexMap;

use crate::error::GraphError;
use crate::id::ElementId;

/// A recipe node: accumulates incoming tokens in a buffer and produces
/// one unit of its own token per complete recipe's worth of buffer.
///
/// `required_input_per_unit` maps input token -> amount needed per
/// produced unit. An empty recipe produces nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Converter {
    pub(crate) id: ElementId,
    pub(crate) label: String,
    pub(crate) token: String,
    pub(crate) condition: BooleanProgram,
    /// Input edges in attach order.
    pub(crate) input_edges: Vec<ElementId>,
    pub(crate) output_edge: Option<ElementId>,
    /// Input token -> positive amount required per produced unit.
    pub(crate) required: IndexMap<String, f64>,
    /// Input token -> accumulated amount.
    pub(crate) buffer: IndexMap<String, f64>,
}

impl Converter {
    pub(crate) fn new(id: ElementId, label: String) -> Self {
        let token = format!("{label}_token");
        Self {
            id,
            label,
            token,
            condition: BooleanProgram::always(true),
            input_edges: Vec::new(),
            output_edge: None,
            required: IndexMap::new(),
            buffer: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn condition(&self) -> &BooleanProgram {
        &self.condition
    }

    pub fn input_edges(&self) -> &[ElementId] {
        &self.input_edges
    }

    pub fn output_edge(&self) -> Option<&ElementId> {
        self.output_edge.as_ref()
    }

    pub fn required_input_per_unit(&self) -> impl Iterator<Item = (&str, f64)> {
        self.required.iter().map(|(t, a)| (t.as_str(), *a))
    }

    pub fn buffer(&self) -> impl Iterator<Item = (&str, f64)> {
        self.buffer.iter().map(|(t, a)| (t.as_str(), *a))
    }

    pub fn buffered(&self, token: &str) -> f64 {
        self.buffer.get(token).copied().unwrap_or(0.0)
    }

    pub fn set_condition(&mut self, source: &str) -> Result<(), GraphError> {
        self.condition = BooleanProgram::compile(source)?;
        Ok(())
    }

    /// Accumulate `amount` of `token` into the buffer.
    pub fn add_to_buffer(&mut self, token: &str, amount: f64) -> Result<(), GraphError> {
        if amount < 0.0 {
            return Err(GraphError::NegativeAmount);
        }
        *self.buffer.entry(token.to_owned()).or_insert(0.0) += amount;
        Ok(())
    }

    /// How many output units the current buffer can pay for.
    ///
    /// Zero when the condition fails, the recipe is empty, or any
    /// required token is missing from the buffer.
    pub fn maximum_convertable(&self, scope: &mut dyn Scope) -> Result<f64, GraphError> {
        if self.required.is_empty() || !self.condition.eval(scope)? {
            return Ok(0.0);
        }
        let mut max = f64::INFINITY;
        for (token, needed) in &self.required {
            let have = self.buffered(token);
            max = max.min(have / needed);
        }
        Ok(max)
    }

    /// Produce up to `amount` units, consuming the buffer accordingly.
    /// Returns how much was actually produced.
    pub fn take_from_state(
        &mut self,
        amount: f64,
        scope: &mut dyn Scope,
    ) -> Result<f64, GraphError> {
        if amount < 0.0 {
            return Err(GraphError::NegativeAmount);
        }
        let produced = amount.min(self.maximum_convertable(scope)?);
        self.consume_for(produced);
        Ok(produced)
    }

    /// Drain `required[t] * produced` of each token from the buffer.
    /// Callers have already established that the buffer covers it.
    pub(crate) fn consume_for(&mut self, produced: f64) {
        if produced <= 0.0 {
            return;
        }
        for (token, needed) in &self.required {
            if let Some(have) = self.buffer.get_mut(token) {
                *have = (*have - needed * produced).max(0.0);
            }
        }
    }
}
