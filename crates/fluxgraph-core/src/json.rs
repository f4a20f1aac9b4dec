//! JSON persistence.
//!
//! Every element serializes to a tagged object; expressions travel as
//! their source strings and are recompiled on load. The auto-counters
//! and RNG state ride along so future auto-labels cannot collide and
//! tick streams reproduce after a round-trip.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use fluxgraph_expr::{BooleanProgram, NumericProgram};

use crate::converter::Converter;
use crate::edge::Edge;
use crate::element::Element;
use crate::error::GraphError;
use crate::gate::Gate;
use crate::graph::Graph;
use crate::id::{ElementId, ElementKind};
use crate::label::is_valid_identifier;
use crate::pool::Pool;
use crate::rng::SimRng;
use crate::swap::{Swap, SwapConfig, SwapPipe};

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SwapConfigDto {
    token_a: String,
    token_b: String,
    amount_a: f64,
    amount_b: f64,
    constraint: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PipeDto {
    input_edge: Option<String>,
    output_edge: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ElementDto {
    Pool {
        id: String,
        label: String,
        token: String,
        state: f64,
        capacity: f64,
        action: String,
        condition: String,
        input_edge: Option<String>,
        output_edge: Option<String>,
    },
    Gate {
        id: String,
        label: String,
        condition: String,
        input_edge: Option<String>,
        /// Output edge id -> weight, in attach order.
        weights: Vec<(String, f64)>,
    },
    Converter {
        id: String,
        label: String,
        token: String,
        condition: String,
        input_edges: Vec<String>,
        output_edge: Option<String>,
        required: Vec<(String, f64)>,
        buffer: Vec<(String, f64)>,
    },
    Swap {
        id: String,
        label: String,
        condition: String,
        config: Option<SwapConfigDto>,
        pipes: Vec<PipeDto>,
    },
    Edge {
        id: String,
        label: String,
        from: String,
        to: String,
        rate: f64,
        condition: Option<String>,
        swap_input_index: Option<usize>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphDto {
    elements: Vec<ElementDto>,
    auto_counters: BTreeMap<ElementKind, u64>,
    rng: SimRng,
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn id_of(id: Option<&ElementId>) -> Option<String> {
    id.map(|id| id.as_str().to_owned())
}

fn element_to_dto(element: &Element) -> ElementDto {
    match element {
        Element::Pool(p) => ElementDto::Pool {
            id: p.id().to_string(),
            label: p.label().to_owned(),
            token: p.token().to_owned(),
            state: p.state(),
            capacity: p.capacity(),
            action: p.action().source().to_owned(),
            condition: p.condition().source().to_owned(),
            input_edge: id_of(p.input_edge()),
            output_edge: id_of(p.output_edge()),
        },
        Element::Gate(g) => ElementDto::Gate {
            id: g.id().to_string(),
            label: g.label().to_owned(),
            condition: g.condition().source().to_owned(),
            input_edge: id_of(g.input_edge()),
            weights: g
                .output_weights()
                .map(|(edge, w)| (edge.to_string(), w))
                .collect(),
        },
        Element::Converter(c) => ElementDto::Converter {
            id: c.id().to_string(),
            label: c.label().to_owned(),
            token: c.token().to_owned(),
            condition: c.condition().source().to_owned(),
            input_edges: c.input_edges().iter().map(ElementId::to_string).collect(),
            output_edge: id_of(c.output_edge()),
            required: c
                .required_input_per_unit()
                .map(|(t, a)| (t.to_owned(), a))
                .collect(),
            buffer: c.buffer().map(|(t, a)| (t.to_owned(), a)).collect(),
        },
        Element::Swap(s) => ElementDto::Swap {
            id: s.id().to_string(),
            label: s.label().to_owned(),
            condition: s.condition().source().to_owned(),
            config: s.config().map(|config| SwapConfigDto {
                token_a: config.token_a().to_owned(),
                token_b: config.token_b().to_owned(),
                amount_a: config.amount_a(),
                amount_b: config.amount_b(),
                constraint: config.constraint(),
            }),
            pipes: s
                .pipes()
                .iter()
                .map(|pipe| PipeDto {
                    input_edge: id_of(pipe.input_edge()),
                    output_edge: id_of(pipe.output_edge()),
                })
                .collect(),
        },
        Element::Edge(e) => ElementDto::Edge {
            id: e.id().to_string(),
            label: e.label().to_owned(),
            from: e.from().to_string(),
            to: e.to().to_string(),
            rate: e.rate(),
            condition: e.condition().map(|c| c.source().to_owned()),
            swap_input_index: e.swap_input_index(),
        },
    }
}

pub(crate) fn to_json(graph: &Graph) -> Result<serde_json::Value, GraphError> {
    let dto = GraphDto {
        elements: graph
            .elements()
            .map(|(_, element)| element_to_dto(element))
            .collect(),
        auto_counters: graph.auto_counters.clone(),
        rng: graph.rng.clone(),
    };
    Ok(serde_json::to_value(dto)?)
}

// ---------------------------------------------------------------------------
// Deserialization
// ---------------------------------------------------------------------------

fn opt_id(id: Option<String>) -> Option<ElementId> {
    id.map(ElementId::from)
}

fn element_from_dto(dto: ElementDto) -> Result<Element, GraphError> {
    Ok(match dto {
        ElementDto::Pool {
            id,
            label,
            token,
            state,
            capacity,
            action,
            condition,
            input_edge,
            output_edge,
        } => {
            let mut pool = Pool::new(ElementId::from(id), label);
            pool.token = token;
            pool.capacity = capacity;
            pool.state = state;
            pool.action = NumericProgram::compile(&action)?;
            pool.condition = BooleanProgram::compile(&condition)?;
            pool.input_edge = opt_id(input_edge);
            pool.output_edge = opt_id(output_edge);
            Element::Pool(pool)
        }
        ElementDto::Gate {
            id,
            label,
            condition,
            input_edge,
            weights,
        } => {
            let mut gate = Gate::new(ElementId::from(id), label);
            gate.condition = BooleanProgram::compile(&condition)?;
            gate.input_edge = opt_id(input_edge);
            gate.weights = weights
                .into_iter()
                .map(|(edge, w)| (ElementId::from(edge), w))
                .collect();
            Element::Gate(gate)
        }
        ElementDto::Converter {
            id,
            label,
            token,
            condition,
            input_edges,
            output_edge,
            required,
            buffer,
        } => {
            let mut converter = Converter::new(ElementId::from(id), label);
            converter.token = token;
            converter.condition = BooleanProgram::compile(&condition)?;
            converter.input_edges = input_edges.into_iter().map(ElementId::from).collect();
            converter.output_edge = opt_id(output_edge);
            converter.required = required.into_iter().collect();
            converter.buffer = buffer.into_iter().collect();
            Element::Converter(converter)
        }
        ElementDto::Swap {
            id,
            label,
            condition,
            config,
            pipes,
        } => {
            let mut swap = Swap::new(ElementId::from(id), label);
            swap.condition = BooleanProgram::compile(&condition)?;
            swap.config = config.map(|c| SwapConfig {
                token_a: c.token_a,
                token_b: c.token_b,
                amount_a: c.amount_a,
                amount_b: c.amount_b,
                constraint: c.constraint,
            });
            swap.pipes = pipes
                .into_iter()
                .map(|p| SwapPipe {
                    input_edge: opt_id(p.input_edge),
                    output_edge: opt_id(p.output_edge),
                })
                .collect();
            Element::Swap(swap)
        }
        ElementDto::Edge {
            id,
            label,
            from,
            to,
            rate,
            condition,
            swap_input_index,
        } => {
            let mut edge = Edge::new(
                ElementId::from(id),
                label,
                ElementId::from(from),
                ElementId::from(to),
                rate,
                swap_input_index,
            );
            edge.condition = match condition {
                Some(source) => Some(BooleanProgram::compile(&source)?),
                None => None,
            };
            Element::Edge(edge)
        }
    })
}

pub(crate) fn from_json(value: &serde_json::Value) -> Result<Graph, GraphError> {
    let dto = GraphDto::deserialize(value)?;
    let mut graph = Graph::new();
    graph.auto_counters = dto.auto_counters;
    graph.rng = dto.rng;

    for element_dto in dto.elements {
        let element = element_from_dto(element_dto)?;
        let id = element.id().clone();
        let label = element.label().to_owned();
        if !is_valid_identifier(&label) {
            return Err(GraphError::InvalidLabel(label));
        }
        if graph.elements.contains_key(&id) {
            return Err(GraphError::IdExists(id));
        }
        if graph.labels.contains_key(&label) {
            return Err(GraphError::DuplicateLabel(label));
        }
        graph.labels.insert(label, id.clone());
        graph.elements.insert(id, element);
    }
    Ok(graph)
}
