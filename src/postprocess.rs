//! Post-process DAG: a small directed acyclic graph of pulse-list
//! combinators — source, sum, delay, scale, filter, and a crosstalk matrix
//! that fans one set of sources out into a linear combination per output
//! row — executed in topological order so each node's inbox is complete
//! before it runs.
//!
//! [`DagBuilder`] only lets a node reference predecessors that already
//! exist (every `NodeId` it hands out is the index the node was pushed at),
//! so a cycle can never be constructed through the public API; `topo_order`
//! still runs a real Kahn's-algorithm pass and reports one if some future
//! caller manages to smuggle one in.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use hashbrown::HashMap;
use ndarray::Array2;

use crate::{
    pulse::{FilterSpec, List},
    quant::{Amplitude, Time},
    Complex64,
};

pub type NodeId = usize;

#[derive(Debug, Clone)]
enum NodeKind {
    Source(List),
    Simple,
    Delay(Time),
    Multiply(Complex64),
    Filter(FilterSpec),
    Matrix(Array2<Complex64>),
    /// Taps row `1` of the nearest `Matrix` predecessor (its only input).
    MatrixRow(usize),
}

#[derive(Debug, Clone)]
struct NodeDef {
    kind: NodeKind,
    predecessors: Vec<NodeId>,
}

#[derive(Debug, Clone)]
enum NodeValue {
    Single(List),
    Rows(Vec<List>),
}

impl NodeValue {
    fn as_single(&self) -> Option<&List> {
        match self {
            Self::Single(list) => Some(list),
            Self::Rows(_) => None,
        }
    }
}

/// Builds a post-process DAG node by node; every method returns the
/// [`NodeId`] of the node it just added.
#[derive(Debug, Clone, Default)]
pub struct DagBuilder {
    nodes: Vec<NodeDef>,
}

impl DagBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind, predecessors: Vec<NodeId>) -> NodeId {
        self.nodes.push(NodeDef { kind, predecessors });
        self.nodes.len() - 1
    }

    /// A source node: emits `list` unchanged on every outgoing edge.
    pub fn source(&mut self, list: List) -> NodeId {
        self.push(NodeKind::Source(list), vec![])
    }

    /// Sums all `inputs`' pulse lists and forwards the result.
    pub fn simple(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::Simple, inputs)
    }

    /// Sums all `inputs`, then time-shifts by `dt`.
    pub fn delay(&mut self, inputs: Vec<NodeId>, dt: Time) -> NodeId {
        self.push(NodeKind::Delay(dt), inputs)
    }

    /// Sums all `inputs`, then scales by `lambda`.
    pub fn multiply(&mut self, inputs: Vec<NodeId>, lambda: Complex64) -> NodeId {
        self.push(NodeKind::Multiply(lambda), inputs)
    }

    /// Sums all `inputs`, then appends `stage` to the result's filter chain.
    pub fn filter(&mut self, inputs: Vec<NodeId>, stage: FilterSpec) -> NodeId {
        self.push(NodeKind::Filter(stage), inputs)
    }

    /// A crosstalk matrix: `inputs[j]` is column `j`, and the returned
    /// `Vec<NodeId>` has one tap per output row `r`, each producing
    /// `sum_j matrix[r, j] * inputs[j]`.
    pub fn matrix(&mut self, inputs: Vec<NodeId>, matrix: Array2<Complex64>) -> Result<Vec<NodeId>> {
        if matrix.ncols() != inputs.len() {
            bail!(
                "crosstalk matrix has {} columns but {} inputs were given",
                matrix.ncols(),
                inputs.len()
            );
        }
        let rows = matrix.nrows();
        let matrix_id = self.push(NodeKind::Matrix(matrix), inputs);
        Ok((0..rows)
            .map(|row| self.push(NodeKind::MatrixRow(row), vec![matrix_id]))
            .collect())
    }

    /// Runs every node in topological order and returns the pulse list of
    /// each requested `terminal` id.
    pub fn execute(
        self,
        terminals: &[NodeId],
        time_tolerance: Time,
        amp_tolerance: Amplitude,
    ) -> Result<HashMap<NodeId, List>> {
        let order = topo_order(&self.nodes)?;
        let mut results: HashMap<NodeId, NodeValue> = HashMap::with_capacity(self.nodes.len());
        for id in order {
            let def = &self.nodes[id];
            let value = match &def.kind {
                NodeKind::Source(list) => NodeValue::Single(list.clone()),
                NodeKind::Simple => {
                    NodeValue::Single(sum_inputs(&def.predecessors, &results, time_tolerance, amp_tolerance)?)
                }
                NodeKind::Delay(dt) => NodeValue::Single(
                    sum_inputs(&def.predecessors, &results, time_tolerance, amp_tolerance)?.time_shifted(*dt),
                ),
                NodeKind::Multiply(lambda) => NodeValue::Single(
                    sum_inputs(&def.predecessors, &results, time_tolerance, amp_tolerance)?.scaled(*lambda),
                ),
                NodeKind::Filter(stage) => NodeValue::Single(
                    sum_inputs(&def.predecessors, &results, time_tolerance, amp_tolerance)?
                        .filtered(stage.clone()),
                ),
                NodeKind::Matrix(matrix) => {
                    let inputs: Vec<&List> = def
                        .predecessors
                        .iter()
                        .map(|p| {
                            results[p]
                                .as_single()
                                .expect("Matrix predecessors are always Simple-shaped nodes")
                        })
                        .collect();
                    let rows = (0..matrix.nrows())
                        .map(|row| {
                            let weighted: Vec<List> = (0..matrix.ncols())
                                .map(|col| inputs[col].scaled(matrix[(row, col)]))
                                .collect();
                            List::sum(weighted.iter(), time_tolerance, amp_tolerance)
                        })
                        .collect();
                    NodeValue::Rows(rows)
                }
                NodeKind::MatrixRow(row) => {
                    let matrix_id = def.predecessors[0];
                    match &results[&matrix_id] {
                        NodeValue::Rows(rows) => NodeValue::Single(rows[*row].clone()),
                        NodeValue::Single(_) => {
                            bail!("internal: MatrixRow's predecessor is not a Matrix node")
                        }
                    }
                }
            };
            results.insert(id, value);
        }
        terminals
            .iter()
            .map(|id| {
                let list = results
                    .remove(id)
                    .and_then(|v| match v {
                        NodeValue::Single(list) => Some(list),
                        NodeValue::Rows(_) => None,
                    })
                    .ok_or_else(|| anyhow::anyhow!("terminal node {id} did not produce a pulse list"))?;
                Ok((*id, list))
            })
            .collect()
    }
}

fn sum_inputs(
    predecessors: &[NodeId],
    results: &HashMap<NodeId, NodeValue>,
    time_tolerance: Time,
    amp_tolerance: Amplitude,
) -> Result<List> {
    let lists: Vec<&List> = predecessors
        .iter()
        .map(|p| {
            results[p]
                .as_single()
                .ok_or_else(|| anyhow::anyhow!("internal: predecessor {p} is a Matrix node, not a pulse list"))
        })
        .collect::<Result<_>>()?;
    Ok(List::sum(lists, time_tolerance, amp_tolerance))
}

/// Kahn's algorithm: processes nodes with satisfied predecessors in
/// insertion order, so the output order (and therefore any floating-point
/// summation order downstream) is deterministic for a given graph.
fn topo_order(nodes: &[NodeDef]) -> Result<Vec<NodeId>> {
    let n = nodes.len();
    let mut indegree = vec![0usize; n];
    let mut successors: Vec<Vec<NodeId>> = vec![vec![]; n];
    for (id, def) in nodes.iter().enumerate() {
        indegree[id] = def.predecessors.len();
        for &p in &def.predecessors {
            successors[p].push(id);
        }
    }
    let mut queue: VecDeque<NodeId> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for &succ in &successors[id] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                queue.push_back(succ);
            }
        }
    }
    if order.len() != n {
        bail!("post-process graph contains a cycle");
    }
    Ok(order)
}
