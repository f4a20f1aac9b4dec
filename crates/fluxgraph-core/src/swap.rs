//! Swap: a constant-product two-token exchanger with spliced pipes.

use fluxgraph_expr::{BooleanProgram, Scope};

use crate::error::GraphError;
use crate::id::ElementId;
use crate::label::is_valid_identifier;

/// One splice through the exchanger: an input edge feeding one side of
/// the pair and an output edge carrying the other side's delta. A pipe
/// is valid once both ends are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapPipe {
    pub(crate) input_edge: Option<ElementId>,
    pub(crate) output_edge: Option<ElementId>,
}

impl SwapPipe {
    pub fn input_edge(&self) -> Option<&ElementId> {
        self.input_edge.as_ref()
    }

    pub fn output_edge(&self) -> Option<&ElementId> {
        self.output_edge.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.input_edge.is_some() && self.output_edge.is_some()
    }
}

/// The configured token pair. `constraint` is fixed when the pair is
/// set: `constraint = amount_a * amount_b`, and every swap preserves it.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapConfig {
    pub(crate) token_a: String,
    pub(crate) token_b: String,
    pub(crate) amount_a: f64,
    pub(crate) amount_b: f64,
    pub(crate) constraint: f64,
}

/// A constant-product exchanger. Until `set_tokens` configures the
/// pair, `swap` silently yields nothing and `check_graph` reports the
/// element as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Swap {
    pub(crate) id: ElementId,
    pub(crate) label: String,
    pub(crate) condition: BooleanProgram,
    pub(crate) config: Option<SwapConfig>,
    pub(crate) pipes: Vec<SwapPipe>,
}

impl Swap {
    pub(crate) fn new(id: ElementId, label: String) -> Self {
        Self {
            id,
            label,
            condition: BooleanProgram::always(true),
            config: None,
            pipes: Vec::new(),
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

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&SwapConfig> {
        self.config.as_ref()
    }

    pub fn pipes(&self) -> &[SwapPipe] {
        &self.pipes
    }

    pub fn set_condition(&mut self, source: &str) -> Result<(), GraphError> {
        self.condition = BooleanProgram::compile(source)?;
        Ok(())
    }

    /// Configure the token pair. Amounts must be positive, tokens must
    /// be distinct valid identifiers. Fixes the constant product.
    pub fn set_tokens(
        &mut self,
        token_a: &str,
        amount_a: f64,
        token_b: &str,
        amount_b: f64,
    ) -> Result<(), GraphError> {
        for token in [token_a, token_b] {
            if !is_valid_identifier(token) {
                return Err(GraphError::InvalidToken(token.to_owned()));
            }
        }
        if token_a == token_b {
            return Err(GraphError::DuplicateTokens);
        }
        if amount_a <= 0.0 || amount_b <= 0.0 {
            return Err(GraphError::NonPositiveTokenAmount);
        }
        self.config = Some(SwapConfig {
            token_a: token_a.to_owned(),
            token_b: token_b.to_owned(),
            amount_a,
            amount_b,
            constraint: amount_a * amount_b,
        });
        Ok(())
    }

    /// Re-pin the constant product, rescaling the `b` side so the pair
    /// satisfies the new constraint. Requires a configured pair.
    pub fn set_constraint(&mut self, constraint: f64) -> Result<(), GraphError> {
        if constraint <= 0.0 {
            return Err(GraphError::NonPositiveConstraint);
        }
        match &mut self.config {
            Some(config) => {
                config.constraint = constraint;
                config.amount_b = constraint / config.amount_a;
                Ok(())
            }
            None => Err(GraphError::NonPositiveTokenAmount),
        }
    }

    /// Pipe slots must stay contiguous from zero: an existing index is
    /// returned as-is, `index == pipes.len()` appends a fresh slot, and
    /// anything beyond is rejected.
    pub fn get_or_create_pipe(&mut self, index: usize) -> Result<&mut SwapPipe, GraphError> {
        if index > self.pipes.len() {
            return Err(GraphError::SwapIndexOutOfRange(index));
        }
        if index == self.pipes.len() {
            self.pipes.push(SwapPipe::default());
        }
        Ok(&mut self.pipes[index])
    }

    /// The pipe whose input edge is `edge`, if any.
    pub(crate) fn pipe_with_input(&self, edge: &ElementId) -> Option<&SwapPipe> {
        self.pipes.iter().find(|p| p.input_edge.as_ref() == Some(edge))
    }

    /// Exchange `amount` of `token_in` against the pair.
    ///
    /// Yields `None` (produce nothing) when the pair is unconfigured,
    /// the amount is zero, the condition fails, or the token is foreign
    /// to the pair. Negative amounts are an error.
    pub fn swap(
        &mut self,
        amount: f64,
        token_in: &str,
        scope: &mut dyn Scope,
    ) -> Result<Option<(String, f64)>, GraphError> {
        if amount < 0.0 {
            return Err(GraphError::NegativeSwapAmount);
        }
        if !self.condition.eval(scope)? {
            return Ok(None);
        }
        self.swap_unguarded(amount, token_in)
    }

    /// The swap arithmetic without the condition guard; the executor
    /// evaluates the guard separately against the live graph scope.
    pub(crate) fn swap_unguarded(
        &mut self,
        amount: f64,
        token_in: &str,
    ) -> Result<Option<(String, f64)>, GraphError> {
        if amount < 0.0 {
            return Err(GraphError::NegativeSwapAmount);
        }
        let Some(config) = &mut self.config else {
            return Ok(None);
        };
        if amount == 0.0 {
            return Ok(None);
        }
        if token_in == config.token_a {
            config.amount_a += amount;
            let new_b = config.constraint / config.amount_a;
            let out = config.amount_b - new_b;
            config.amount_b = new_b;
            Ok(Some((config.token_b.clone(), out)))
        } else if token_in == config.token_b {
            config.amount_b += amount;
            let new_a = config.constraint / config.amount_b;
            let out = config.amount_a - new_a;
            config.amount_a = new_a;
            Ok(Some((config.token_a.clone(), out)))
        } else {
            Ok(None)
        }
    }
}

impl SwapConfig {
    pub fn token_a(&self) -> &str {
        &self.token_a
    }

    pub fn token_b(&self) -> &str {
        &self.token_b
    }

    pub fn amount_a(&self) -> f64 {
        self.amount_a
    }

    pub fn amount_b(&self) -> f64 {
        self.amount_b
    }

    pub fn constraint(&self) -> f64 {
        self.constraint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use fluxgraph_expr::MapScope;

    fn swap() -> Swap {
        Swap::new(ElementId::from("s0"), "s0".to_owned())
    }

    fn configured() -> Swap {
        let mut s = swap();
        s.set_tokens("metal", 100.0, "wood", 100.0).unwrap();
        s
    }

    #[test]
    fn unconfigured_swap_yields_nothing() {
        let mut s = swap();
        let mut scope = MapScope::new();
        assert_eq!(s.swap(5.0, "metal", &mut scope).unwrap(), None);
    }

    #[test]
    fn configuration_validation() {
        let mut s = swap();
        assert!(matches!(
            s.set_tokens("1bad", 1.0, "wood", 1.0),
            Err(GraphError::InvalidToken(_))
        ));
        assert!(matches!(
            s.set_tokens("metal", 1.0, "metal", 1.0),
            Err(GraphError::DuplicateTokens)
        ));
        assert!(matches!(
            s.set_tokens("metal", 0.0, "wood", 1.0),
            Err(GraphError::NonPositiveTokenAmount)
        ));
        s.set_tokens("metal", 4.0, "wood", 25.0).unwrap();
        assert_eq!(s.config().unwrap().constraint(), 100.0);
    }

    #[test]
    fn swap_preserves_constant_product() {
        let mut s = configured();
        let mut scope = MapScope::new();
        let (token, out) = s.swap(10.0, "metal", &mut scope).unwrap().unwrap();
        assert_eq!(token, "wood");
        // 100*100 = 10000; metal 110 -> wood 10000/110.
        assert_approx_eq!(f64, out, 100.0 - 10_000.0 / 110.0);
        let config = s.config().unwrap();
        assert_approx_eq!(f64, config.amount_a() * config.amount_b(), 10_000.0);
    }

    #[test]
    fn swap_in_the_other_direction() {
        let mut s = configured();
        let mut scope = MapScope::new();
        let (token, out) = s.swap(25.0, "wood", &mut scope).unwrap().unwrap();
        assert_eq!(token, "metal");
        assert_approx_eq!(f64, out, 100.0 - 10_000.0 / 125.0);
    }

    #[test]
    fn foreign_token_and_zero_amount_yield_nothing() {
        let mut s = configured();
        let mut scope = MapScope::new();
        assert_eq!(s.swap(5.0, "stone", &mut scope).unwrap(), None);
        assert_eq!(s.swap(0.0, "metal", &mut scope).unwrap(), None);
    }

    #[test]
    fn negative_amount_is_an_error() {
        let mut s = configured();
        let mut scope = MapScope::new();
        assert!(matches!(
            s.swap(-1.0, "metal", &mut scope),
            Err(GraphError::NegativeSwapAmount)
        ));
    }

    #[test]
    fn failed_condition_yields_nothing() {
        let mut s = configured();
        s.set_condition("false").unwrap();
        let mut scope = MapScope::new();
        assert_eq!(s.swap(5.0, "metal", &mut scope).unwrap(), None);
    }

    #[test]
    fn pipes_are_contiguous_from_zero() {
        let mut s = swap();
        assert!(matches!(
            s.get_or_create_pipe(1),
            Err(GraphError::SwapIndexOutOfRange(1))
        ));
        s.get_or_create_pipe(0).unwrap();
        s.get_or_create_pipe(1).unwrap();
        // Existing indices are fine.
        s.get_or_create_pipe(0).unwrap();
        assert_eq!(s.pipes().len(), 2);
        assert!(matches!(
            s.get_or_create_pipe(3),
            Err(GraphError::SwapIndexOutOfRange(3))
        ));
    }

    #[test]
    fn set_constraint_rescales() {
        let mut s = configured();
        s.set_constraint(20_000.0).unwrap();
        let config = s.config().unwrap();
        assert_eq!(config.amount_a(), 100.0);
        assert_eq!(config.amount_b(), 200.0);
        assert!(matches!(
            s.set_constraint(0.0),
            Err(GraphError::NonPositiveConstraint)
        ));
    }
}
