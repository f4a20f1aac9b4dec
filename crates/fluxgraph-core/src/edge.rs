//! Edge: a rate-limited directed connection.

use fluxgraph_expr::BooleanProgram;

use crate::error::GraphError;
use crate::id::ElementId;

/// A directed, rate-limited connection between two non-edge elements.
///
/// A negative rate means "unlimited": the edge carries everything its
/// source can provide. `swap_input_index` names the pipe slot when
/// either endpoint is a swap.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub(crate) id: ElementId,
    pub(crate) label: String,
    pub(crate) from: ElementId,
    pub(crate) to: ElementId,
    pub(crate) rate: f64,
    pub(crate) condition: Option<BooleanProgram>,
    pub(crate) swap_input_index: Option<usize>,
}

impl Edge {
    pub(crate) fn new(
        id: ElementId,
        label: String,
        from: ElementId,
        to: ElementId,
        rate: f64,
        swap_input_index: Option<usize>,
    ) -> Self {
        Self {
            id,
            label,
            from,
            to,
            rate,
            condition: None,
            swap_input_index,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn from(&self) -> &ElementId {
        &self.from
    }

    pub fn to(&self) -> &ElementId {
        &self.to
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate < 0.0
    }

    pub fn condition(&self) -> Option<&BooleanProgram> {
        self.condition.as_ref()
    }

    pub fn swap_input_index(&self) -> Option<usize> {
        self.swap_input_index
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    /// Set or clear the gating condition.
    pub fn set_condition(&mut self, source: Option<&str>) -> Result<(), GraphError> {
        self.condition = match source {
            Some(src) => Some(BooleanProgram::compile(src)?),
            None => None,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_sign_encodes_unlimited() {
        let mut edge = Edge::new(
            ElementId::from("e0"),
            "e0".to_owned(),
            ElementId::from("a"),
            ElementId::from("b"),
            1.0,
            None,
        );
        assert!(!edge.is_unlimited());
        edge.set_rate(-1.0);
        assert!(edge.is_unlimited());
        edge.set_rate(0.0);
        assert!(!edge.is_unlimited());
    }

    #[test]
    fn condition_set_and_clear() {
        let mut edge = Edge::new(
            ElementId::from("e0"),
            "e0".to_owned(),
            ElementId::from("a"),
            ElementId::from("b"),
            1.0,
            None,
        );
        assert!(edge.condition().is_none());
        edge.set_condition(Some("x > 0")).unwrap();
        assert!(edge.condition().is_some());
        edge.set_condition(None).unwrap();
        assert!(edge.condition().is_none());
        assert!(edge.set_condition(Some("1 +")).is_err());
    }
}
