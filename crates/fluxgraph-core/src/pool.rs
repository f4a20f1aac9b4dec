//! Pool: a bounded quantity container.

use fluxgraph_expr::{BooleanProgram, NumericProgram, Scope};

use crate::error::GraphError;
use crate::id::ElementId;

/// A quantity container with a non-negative state, an optional
/// capacity, and a per-tick action formula guarded by a condition.
///
/// A pool has at most one input edge and at most one output edge; the
/// graph maintains those slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub(crate) id: ElementId,
    pub(crate) label: String,
    pub(crate) token: String,
    pub(crate) state: f64,
    /// Negative means unbounded.
    pub(crate) capacity: f64,
    /// Numeric formula evaluated each tick to produce the next state.
    /// `x` is bound to the current state before evaluation.
    pub(crate) action: NumericProgram,
    /// Guard for the action; when false the state is left alone.
    pub(crate) condition: BooleanProgram,
    pub(crate) input_edge: Option<ElementId>,
    pub(crate) output_edge: Option<ElementId>,
}

impl Pool {
    pub(crate) fn new(id: ElementId, label: String) -> Self {
        let token = format!("{label}_token");
        Self {
            id,
            label,
            token,
            state: 0.0,
            capacity: -1.0,
            action: NumericProgram::variable("x"),
            condition: BooleanProgram::always(true),
            input_edge: None,
            output_edge: None,
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

    pub fn state(&self) -> f64 {
        self.state
    }

    /// Negative means unbounded.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn is_unbounded(&self) -> bool {
        self.capacity < 0.0
    }

    pub fn action(&self) -> &NumericProgram {
        &self.action
    }

    pub fn condition(&self) -> &BooleanProgram {
        &self.condition
    }

    pub fn input_edge(&self) -> Option<&ElementId> {
        self.input_edge.as_ref()
    }

    pub fn output_edge(&self) -> Option<&ElementId> {
        self.output_edge.as_ref()
    }

    /// Clamp `value` into `[0, capacity]` (or `[0, ∞)` if unbounded).
    fn clamped(&self, value: f64) -> f64 {
        let floored = value.max(0.0);
        if self.is_unbounded() {
            floored
        } else {
            floored.min(self.capacity)
        }
    }

    /// Add up to `amount` to the pool; returns how much was actually
    /// added after the capacity clamp.
    pub fn add_to_pool(&mut self, amount: f64) -> Result<f64, GraphError> {
        if amount < 0.0 {
            return Err(GraphError::NegativeAmount);
        }
        let before = self.state;
        self.state = self.clamped(self.state + amount);
        Ok(self.state - before)
    }

    /// Take up to `amount` from the pool; returns how much was actually
    /// taken.
    pub fn take_from_pool(&mut self, amount: f64) -> Result<f64, GraphError> {
        if amount < 0.0 {
            return Err(GraphError::NegativeAmount);
        }
        let taken = amount.min(self.state);
        self.state -= taken;
        Ok(taken)
    }

    pub fn set_state(&mut self, state: f64) {
        self.state = self.clamped(state);
    }

    /// Set the capacity; truncates the state when it no longer fits.
    /// Negative means unbounded.
    pub fn set_capacity(&mut self, capacity: f64) {
        self.capacity = capacity;
        if !self.is_unbounded() && self.state > self.capacity {
            self.state = self.capacity;
        }
    }

    pub fn set_action(&mut self, source: &str) -> Result<(), GraphError> {
        self.action = NumericProgram::compile(source)?;
        Ok(())
    }

    pub fn set_condition(&mut self, source: &str) -> Result<(), GraphError> {
        self.condition = BooleanProgram::compile(source)?;
        Ok(())
    }

    /// Run the guarded action: bind `x` to the current state, evaluate
    /// the condition, and on success clamp the action's result back in
    /// as the next state.
    pub fn advance(&mut self, scope: &mut dyn Scope) -> Result<(), GraphError> {
        scope.set("x", self.state);
        if self.condition.eval(scope)? {
            let next = self.action.eval(scope)?;
            self.set_state(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Pool {
        Pool::new(ElementId::from("p0"), "p0".to_owned())
    }

    #[test]
    fn defaults() {
        let p = pool();
        assert_eq!(p.state(), 0.0);
        assert!(p.is_unbounded());
        assert_eq!(p.token(), "p0_token");
        assert_eq!(p.action().source(), "x");
        assert_eq!(p.condition().source(), "true");
    }

    #[test]
    fn add_and_take_clamp() {
        let mut p = pool();
        assert_eq!(p.add_to_pool(10.0).unwrap(), 10.0);
        assert_eq!(p.take_from_pool(4.0).unwrap(), 4.0);
        // Taking more than available drains to zero.
        assert_eq!(p.take_from_pool(100.0).unwrap(), 6.0);
        assert_eq!(p.state(), 0.0);
    }

    #[test]
    fn capacity_limits_additions() {
        let mut p = pool();
        p.set_capacity(5.0);
        assert_eq!(p.add_to_pool(8.0).unwrap(), 5.0);
        assert_eq!(p.state(), 5.0);
        // Shrinking the capacity truncates the state.
        p.set_capacity(3.0);
        assert_eq!(p.state(), 3.0);
        // Back to unbounded.
        p.set_capacity(-1.0);
        assert_eq!(p.add_to_pool(100.0).unwrap(), 100.0);
    }

    #[test]
    fn set_state_clamps_both_ends() {
        let mut p = pool();
        p.set_capacity(10.0);
        p.set_state(-5.0);
        assert_eq!(p.state(), 0.0);
        p.set_state(25.0);
        assert_eq!(p.state(), 10.0);
    }

    #[test]
    fn advance_runs_guarded_action() {
        use fluxgraph_expr::MapScope;
        let mut p = pool();
        p.set_state(4.0);
        p.set_action("x * 2").unwrap();
        let mut scope = MapScope::new();
        p.advance(&mut scope).unwrap();
        assert_eq!(p.state(), 8.0);

        p.set_condition("x < 8").unwrap();
        p.advance(&mut scope).unwrap();
        assert_eq!(p.state(), 8.0, "guard blocks the action");
    }

    #[test]
    fn negative_amounts_rejected() {
        let mut p = pool();
        assert!(matches!(
            p.add_to_pool(-1.0),
            Err(GraphError::NegativeAmount)
        ));
        assert!(matches!(
            p.take_from_pool(-1.0),
            Err(GraphError::NegativeAmount)
        ));
    }
}
