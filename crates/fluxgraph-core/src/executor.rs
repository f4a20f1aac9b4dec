//! The tick executor: pulls packets out of sources, forwards them
//! through gates and swaps, and commits them to their destinations.
//!
//! Sources are drained live as packets are pulled, but destination
//! writes are staged and flushed only at commit, so a consumer's state
//! is never observable by an upstream pull in the same tick. The one
//! exception is deliberate: inside an Ordered group, packets addressed
//! to a subgroup's own converter land in its buffer immediately, which
//! is what lets a pool -> converter -> pool chain move material through
//! the converter within a single tick. Cyclic groups skip that routing,
//! so every subgroup of a cycle reads tick-start converter state.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::compiler::{self, GroupOrder, Subgroup};
use crate::element::Element;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{ElementId, ElementKind};
use crate::scope::TickScope;

/// An in-flight quantity moving along edges during a tick.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Packet {
    pub from: ElementId,
    pub token: String,
    pub value: f64,
}

/// Destination id -> packets staged for it, in arrival order.
type StagedOutputs = IndexMap<ElementId, Vec<Packet>>;

/// Advance the whole graph by one tick: compile, execute every parallel
/// group, then flush the staged outputs.
pub(crate) fn run_tick(graph: &mut Graph) -> Result<(), GraphError> {
    let mut cache: HashMap<String, f64> = HashMap::new();
    let compiled = compiler::compile_live(graph, &mut cache)?;

    let mut outputs = StagedOutputs::new();
    for group in &compiled.groups {
        match &group.order {
            GroupOrder::Ordered(order) => {
                for &index in order {
                    let subgroup = &group.subgroups[index];
                    let mut staged = StagedOutputs::new();
                    run_subgroup(graph, subgroup, &mut cache, &mut staged)?;
                    // In-tick propagation: this subgroup's converter
                    // sees its deliveries before downstream subgroups
                    // pull from it.
                    if let Some(converter_id) = &subgroup.converter {
                        if let Some(packets) = staged.shift_remove(converter_id) {
                            let converter = graph.converter_mut(converter_id)?;
                            for packet in packets {
                                converter.add_to_buffer(&packet.token, packet.value)?;
                            }
                        }
                    }
                    merge(&mut outputs, staged);
                }
            }
            GroupOrder::Cyclic => {
                // No mid-group routing: each subgroup reads tick-start
                // converter buffers; everything flushes at commit.
                for subgroup in &group.subgroups {
                    let mut staged = StagedOutputs::new();
                    run_subgroup(graph, subgroup, &mut cache, &mut staged)?;
                    merge(&mut outputs, staged);
                }
            }
        }
    }

    commit(graph, outputs)
}

/// Depth-first traversal from each entry edge, with a per-subgroup
/// visited set so router/exchanger cycles terminate.
fn run_subgroup(
    graph: &mut Graph,
    subgroup: &Subgroup,
    cache: &mut HashMap<String, f64>,
    staged: &mut StagedOutputs,
) -> Result<(), GraphError> {
    let mut visited: HashSet<ElementId> = HashSet::new();
    for entry in &subgroup.entry_edges {
        traverse(graph, entry, None, &mut visited, cache, staged)?;
    }
    Ok(())
}

/// Process one edge: resolve a packet from its source, then hand it to
/// its destination. Semantic dead-ends (failed guards, empty sources,
/// unselected gates, foreign swap tokens) just end the branch.
fn traverse(
    graph: &mut Graph,
    edge_id: &ElementId,
    inbound: Option<Packet>,
    visited: &mut HashSet<ElementId>,
    cache: &mut HashMap<String, f64>,
    staged: &mut StagedOutputs,
) -> Result<(), GraphError> {
    if !visited.insert(edge_id.clone()) {
        return Ok(());
    }

    let (from, to, rate) = {
        let Some(Element::Edge(edge)) = graph.get_element(edge_id) else {
            return Ok(());
        };
        let passes = match edge.condition() {
            Some(condition) => {
                let mut scope = TickScope::new(graph, cache);
                condition.eval(&mut scope)?
            }
            None => true,
        };
        if !passes {
            return Ok(());
        }
        (edge.from().clone(), edge.to().clone(), edge.rate())
    };

    let packet = match graph.get_element(&from).map(|el| el.kind()) {
        Some(ElementKind::Pool) => {
            let requested = {
                let pool = graph.pool(&from)?;
                if rate < 0.0 {
                    pool.state()
                } else {
                    rate
                }
            };
            let pool = graph.pool_mut(&from)?;
            let value = pool.take_from_pool(requested)?;
            let token = pool.token().to_owned();
            Packet {
                from: from.clone(),
                token,
                value,
            }
        }
        Some(ElementKind::Converter) => {
            let maximum = {
                let converter = graph.converter(&from)?;
                let mut scope = TickScope::new(graph, cache);
                converter.maximum_convertable(&mut scope)?
            };
            let produced = if rate < 0.0 { maximum } else { rate.min(maximum) };
            let converter = graph.converter_mut(&from)?;
            converter.consume_for(produced);
            Packet {
                from: from.clone(),
                token: converter.token().to_owned(),
                value: produced,
            }
        }
        Some(ElementKind::Gate) => {
            let Some(packet) = inbound else {
                return Ok(());
            };
            let passes = {
                let gate = graph.gate(&from)?;
                let mut scope = TickScope::new(graph, cache);
                gate.condition().eval(&mut scope)?
            };
            if !passes {
                return Ok(());
            }
            let value = if rate < 0.0 {
                packet.value
            } else {
                packet.value.min(rate)
            };
            Packet { value, ..packet }
        }
        Some(ElementKind::Swap) => {
            let Some(packet) = inbound else {
                return Ok(());
            };
            let passes = {
                let swap = graph.swap(&from)?;
                let mut scope = TickScope::new(graph, cache);
                swap.condition().eval(&mut scope)?
            };
            if !passes {
                return Ok(());
            }
            let swap = graph.swap_mut(&from)?;
            match swap.swap_unguarded(packet.value, &packet.token)? {
                Some((token, value)) => Packet {
                    from: packet.from,
                    token,
                    value,
                },
                None => return Ok(()),
            }
        }
        _ => return Ok(()),
    };

    if packet.value <= 0.0 {
        return Ok(());
    }

    match graph.get_element(&to).map(|el| el.kind()) {
        Some(ElementKind::Gate) => {
            let next = graph.gate(&to)?.selected_output().cloned();
            if let Some(next) = next {
                traverse(graph, &next, Some(packet), visited, cache, staged)?;
            }
        }
        Some(ElementKind::Swap) => {
            let next = graph
                .swap(&to)?
                .pipe_with_input(edge_id)
                .and_then(|pipe| pipe.output_edge().cloned());
            if let Some(next) = next {
                traverse(graph, &next, Some(packet), visited, cache, staged)?;
            }
        }
        Some(ElementKind::Pool) | Some(ElementKind::Converter) => {
            staged.entry(to.clone()).or_default().push(packet);
        }
        _ => {}
    }

    Ok(())
}

/// Concatenate staged packets per destination, preserving arrival order
/// across subgroups.
fn merge(all: &mut StagedOutputs, next: StagedOutputs) {
    for (destination, mut packets) in next {
        all.entry(destination).or_default().append(&mut packets);
    }
}

/// Flush the tick-wide output map: pools add their single packet's
/// value, converters buffer every packet.
fn commit(graph: &mut Graph, outputs: StagedOutputs) -> Result<(), GraphError> {
    for (destination, packets) in outputs {
        match graph.get_element_mut(&destination) {
            Some(Element::Pool(pool)) => {
                debug_assert_eq!(
                    packets.len(),
                    1,
                    "a pool has at most one input edge and so one packet per tick"
                );
                for packet in packets {
                    pool.add_to_pool(packet.value)?;
                }
            }
            Some(Element::Converter(converter)) => {
                for packet in packets {
                    converter.add_to_buffer(&packet.token, packet.value)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
