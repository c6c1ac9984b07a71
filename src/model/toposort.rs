//! Topological sort into run order (spec §4.3), grounded on
//! `ModelBuilder::sortIntoRunOrder`: operations become runnable once every
//! input operand that is itself operation-produced has been produced, and
//! ties are broken by original declaration order so the result is
//! deterministic.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::Model;
use crate::error::{Error, Result};
use crate::operand::Lifetime;

/// Reorder `model.operations` in place into a valid run order: every
/// operation appears after all operations that produce its inputs.
pub(super) fn sort_into_run_order(model: &mut Model) -> Result<()> {
    let op_count = model.operations.len();
    let mut producer = vec![None; model.operands.len()];
    for (op_idx, operation) in model.operations.iter().enumerate() {
        for &out in &operation.outputs {
            producer[out as usize] = Some(op_idx);
        }
    }

    let mut graph = DiGraph::<usize, ()>::with_capacity(op_count, op_count);
    let nodes: Vec<NodeIndex> = (0..op_count).map(|i| graph.add_node(i)).collect();
    for (op_idx, operation) in model.operations.iter().enumerate() {
        for &input in &operation.inputs {
            if let Some(producer_idx) = producer[input as usize] {
                if producer_idx != op_idx {
                    graph.add_edge(nodes[producer_idx], nodes[op_idx], ());
                }
            } else if model.operands[input as usize].lifetime == Lifetime::TemporaryVariable {
                return Err(Error::bad_data(format!(
                    "operand {input} is read before any operation produces it"
                )));
            }
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        Error::bad_data(format!(
            "model graph has a cycle at operation {}",
            graph[cycle.node_id()]
        ))
    })?;

    let sorted: Vec<_> = order
        .into_iter()
        .map(|node| model.operations[graph[node]].clone())
        .collect();
    model.operations = sorted;
    Ok(())
}
