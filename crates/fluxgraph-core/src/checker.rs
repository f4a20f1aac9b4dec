//! Structural checking: run the compiler without mutating the graph
//! and report what it finds.

use std::collections::BTreeSet;

use crate::compiler::{self, GroupOrder};
use crate::element::Element;
use crate::graph::Graph;
use crate::id::ElementId;

/// Result of [`Graph::check_graph`].
///
/// A malformed swap is an error (simulation over it would silently
/// produce nothing); converter dependency cycles are warnings -- the
/// tick still runs, using the cyclic strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    NoError,
    Warning {
        /// One set of converter ids per cyclic parallel group.
        cycles: Vec<BTreeSet<ElementId>>,
    },
    Error {
        message: String,
    },
}

impl CheckResult {
    /// The result's kind tag: `no-error`, `warning`, or `error`.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckResult::NoError => "no-error",
            CheckResult::Warning { .. } => "warning",
            CheckResult::Error { .. } => "error",
        }
    }
}

pub(crate) fn check(graph: &Graph) -> CheckResult {
    for (_, element) in graph.elements() {
        if let Element::Swap(swap) = element {
            if !swap.is_configured() {
                return CheckResult::Error {
                    message: format!("swap `{}` has no token pair configured", swap.label()),
                };
            }
        }
    }

    let compiled = compiler::compile_check(graph);
    let cycles: Vec<BTreeSet<ElementId>> = compiled
        .groups
        .iter()
        .filter(|group| group.order == GroupOrder::Cyclic)
        .map(|group| {
            group
                .subgroups
                .iter()
                .filter_map(|sub| sub.converter.clone())
                .collect()
        })
        .collect();

    if cycles.is_empty() {
        CheckResult::NoError
    } else {
        CheckResult::Warning { cycles }
    }
}
