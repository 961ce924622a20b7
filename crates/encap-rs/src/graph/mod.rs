//! Arena-backed dataflow graph.
//!
//! Nodes live in a slot arena addressed by [`NodeId`]; ids are never reused, so
//! a removed node leaves a hole rather than shifting its neighbours. Edges are
//! kept in a single map keyed by [`EdgeId`], which gives every pass one stable
//! total order to iterate in.

mod shape;
mod types;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

pub use shape::{Dim, PartialShape, ShapeMismatch};
pub use types::{AttrValue, DType};

/// Stable identifier of a node inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable identifier of an edge; ascending order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Data { src_slot: usize, dst_slot: usize },
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_control(&self) -> bool {
        matches!(self.kind, EdgeKind::Control)
    }

    pub fn src_slot(&self) -> Option<usize> {
        match self.kind {
            EdgeKind::Data { src_slot, .. } => Some(src_slot),
            EdgeKind::Control => None,
        }
    }

    pub fn dst_slot(&self) -> Option<usize> {
        match self.kind {
            EdgeKind::Data { dst_slot, .. } => Some(dst_slot),
            EdgeKind::Control => None,
        }
    }
}

/// A single operation in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    pub name: String,
    pub op: String,
    pub device: String,
    pub attrs: BTreeMap<String, AttrValue>,
    pub input_types: Vec<DType>,
    pub output_types: Vec<DType>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn num_inputs(&self) -> usize {
        self.input_types.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_types.len()
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key.into(), value.into());
    }
}

/// Description of a node to insert; see [`Graph::add_node`].
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub name: String,
    pub op: String,
    pub device: String,
    pub attrs: BTreeMap<String, AttrValue>,
    pub input_types: Vec<DType>,
    pub output_types: Vec<DType>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            ..Self::default()
        }
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn inputs(mut self, types: impl IntoIterator<Item = DType>) -> Self {
        self.input_types = types.into_iter().collect();
        self
    }

    pub fn outputs(mut self, types: impl IntoIterator<Item = DType>) -> Self {
        self.output_types = types.into_iter().collect();
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node name '{name}' is already used by {existing}")]
    DuplicateName { name: String, existing: NodeId },
    #[error("node {0} does not exist")]
    MissingNode(NodeId),
    #[error("edge {0:?} does not exist")]
    MissingEdge(EdgeId),
    #[error("node '{node}' has {available} outputs, slot {slot} is out of range")]
    OutputSlotOutOfRange {
        node: String,
        slot: usize,
        available: usize,
    },
    #[error("node '{node}' has {available} inputs, slot {slot} is out of range")]
    InputSlotOutOfRange {
        node: String,
        slot: usize,
        available: usize,
    },
    #[error("input {slot} of node '{node}' is already fed by another edge")]
    InputAlreadyFed { node: String, slot: usize },
    #[error("input {slot} of node '{node}' has no incoming data edge")]
    InputNotFed { node: String, slot: usize },
    #[error("node name '{0}' is empty, starts with '^' or ends in ':<digits>'")]
    InvalidName(String),
    #[error("{0} ids exhausted")]
    IdsExhausted(&'static str),
}

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    by_name: HashMap<String, NodeId>,
    edges: BTreeMap<EdgeId, Edge>,
    in_edges: HashMap<NodeId, SmallVec<[EdgeId; 4]>>,
    out_edges: HashMap<NodeId, SmallVec<[EdgeId; 4]>>,
    next_edge: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> GraphResult<NodeId> {
        if !is_wire_name(&spec.name) {
            return Err(GraphError::InvalidName(spec.name));
        }
        if let Some(existing) = self.by_name.get(&spec.name) {
            return Err(GraphError::DuplicateName {
                name: spec.name,
                existing: *existing,
            });
        }
        let id = u32::try_from(self.nodes.len())
            .map(NodeId)
            .map_err(|_| GraphError::IdsExhausted("node"))?;
        self.by_name.insert(spec.name.clone(), id);
        self.nodes.push(Some(Node {
            id,
            name: spec.name,
            op: spec.op,
            device: spec.device,
            attrs: spec.attrs,
            input_types: spec.input_types,
            output_types: spec.output_types,
        }));
        Ok(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn require(&self, id: NodeId) -> GraphResult<&Node> {
        self.node(id).ok_or(GraphError::MissingNode(id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Live nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn num_nodes(&self) -> usize {
        self.by_name.len()
    }

    /// All edges in ascending [`EdgeId`] order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn in_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.incident(&self.in_edges, node)
    }

    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.incident(&self.out_edges, node)
    }

    fn incident<'a>(
        &'a self,
        map: &'a HashMap<NodeId, SmallVec<[EdgeId; 4]>>,
        node: NodeId,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        map.get(&node)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.edges.get(id))
    }

    /// Incoming data edges indexed by destination slot; unfed slots are `None`.
    pub fn data_inputs(&self, node: NodeId) -> GraphResult<Vec<Option<Edge>>> {
        let mut inputs = vec![None; self.require(node)?.num_inputs()];
        for edge in self.in_edges(node) {
            if let Some(entry) = edge.dst_slot().and_then(|slot| inputs.get_mut(slot)) {
                *entry = Some(*edge);
            }
        }
        Ok(inputs)
    }

    /// Sources of incoming control edges, in edge order.
    pub fn control_inputs(&self, node: NodeId) -> Vec<NodeId> {
        let mut edges = self
            .in_edges(node)
            .filter(|edge| edge.is_control())
            .copied()
            .collect::<Vec<_>>();
        edges.sort_by_key(|edge| edge.id);
        edges.into_iter().map(|edge| edge.src).collect()
    }

    /// Type of the value flowing along a data edge, as seen by its consumer.
    pub fn value_type(&self, edge: &Edge) -> Option<DType> {
        let EdgeKind::Data { src_slot, dst_slot } = edge.kind else {
            return None;
        };
        self.node(edge.dst)
            .and_then(|node| node.input_types.get(dst_slot).copied())
            .or_else(|| {
                self.node(edge.src)
                    .and_then(|node| node.output_types.get(src_slot).copied())
            })
    }

    pub fn add_edge(
        &mut self,
        src: NodeId,
        src_slot: usize,
        dst: NodeId,
        dst_slot: usize,
    ) -> GraphResult<EdgeId> {
        let src_node = self.require(src)?;
        if src_slot >= src_node.num_outputs() {
            return Err(GraphError::OutputSlotOutOfRange {
                node: src_node.name.clone(),
                slot: src_slot,
                available: src_node.num_outputs(),
            });
        }
        let dst_node = self.require(dst)?;
        if dst_slot >= dst_node.num_inputs() {
            return Err(GraphError::InputSlotOutOfRange {
                node: dst_node.name.clone(),
                slot: dst_slot,
                available: dst_node.num_inputs(),
            });
        }
        if self
            .in_edges(dst)
            .any(|edge| edge.dst_slot() == Some(dst_slot))
        {
            return Err(GraphError::InputAlreadyFed {
                node: dst_node.name.clone(),
                slot: dst_slot,
            });
        }
        self.insert_edge(src, dst, EdgeKind::Data { src_slot, dst_slot })
    }

    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> GraphResult<EdgeId> {
        self.require(src)?;
        self.require(dst)?;
        self.insert_edge(src, dst, EdgeKind::Control)
    }

    /// Returns an existing control edge `src -> dst`, if any.
    pub fn find_control_edge(&self, src: NodeId, dst: NodeId) -> Option<EdgeId> {
        self.out_edges(src)
            .find(|edge| edge.is_control() && edge.dst == dst)
            .map(|edge| edge.id)
    }

    fn insert_edge(&mut self, src: NodeId, dst: NodeId, kind: EdgeKind) -> GraphResult<EdgeId> {
        let id = EdgeId(self.next_edge);
        self.next_edge = self
            .next_edge
            .checked_add(1)
            .ok_or(GraphError::IdsExhausted("edge"))?;
        self.edges.insert(id, Edge { id, src, dst, kind });
        self.out_edges.entry(src).or_default().push(id);
        self.in_edges.entry(dst).or_default().push(id);
        Ok(id)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let edge = self.edges.remove(&id).ok_or(GraphError::MissingEdge(id))?;
        if let Some(list) = self.out_edges.get_mut(&edge.src) {
            list.retain(|existing| *existing != id);
        }
        if let Some(list) = self.in_edges.get_mut(&edge.dst) {
            list.retain(|existing| *existing != id);
        }
        Ok(edge)
    }

    /// Repoints the data edge feeding `(dst, dst_slot)` so it originates at `(new_src, new_src_slot)`.
    pub fn update_edge(
        &mut self,
        new_src: NodeId,
        new_src_slot: usize,
        dst: NodeId,
        dst_slot: usize,
    ) -> GraphResult<EdgeId> {
        let existing = self
            .in_edges(dst)
            .find(|edge| edge.dst_slot() == Some(dst_slot))
            .map(|edge| edge.id);
        let Some(existing) = existing else {
            return Err(GraphError::InputNotFed {
                node: self.require(dst)?.name.clone(),
                slot: dst_slot,
            });
        };
        let removed = self.remove_edge(existing)?;
        match self.add_edge(new_src, new_src_slot, dst, dst_slot) {
            Ok(id) => Ok(id),
            Err(err) => {
                // Restore the original edge under its old id.
                self.edges.insert(removed.id, removed);
                self.out_edges.entry(removed.src).or_default().push(removed.id);
                self.in_edges.entry(removed.dst).or_default().push(removed.id);
                Err(err)
            }
        }
    }

    /// Removes a node together with every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<Node> {
        self.require(id)?;
        let mut incident = self
            .in_edges
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .chain(self.out_edges.remove(&id).unwrap_or_default())
            .collect::<Vec<_>>();
        incident.sort();
        incident.dedup();
        for edge_id in incident {
            if let Some(edge) = self.edges.remove(&edge_id) {
                if let Some(list) = self.out_edges.get_mut(&edge.src) {
                    list.retain(|existing| *existing != edge_id);
                }
                if let Some(list) = self.in_edges.get_mut(&edge.dst) {
                    list.retain(|existing| *existing != edge_id);
                }
            }
        }
        let node = self.nodes[id.0 as usize]
            .take()
            .ok_or(GraphError::MissingNode(id))?;
        self.by_name.remove(&node.name);
        Ok(node)
    }
}

/// Names must read back unchanged from `name`, `name:k` and `^name` references.
fn is_wire_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('^') {
        return false;
    }
    !name
        .rsplit_once(':')
        .is_some_and(|(_, suffix)| suffix.parse::<usize>().is_ok())
}
