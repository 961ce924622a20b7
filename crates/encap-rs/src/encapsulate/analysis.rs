use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, trace};

use crate::cluster::{ClusterAssignment, ClusterId};
use crate::error::{EncapsulateError, EncapsulateResult};
use crate::graph::{DType, Edge, EdgeKind, Graph, GraphError, NodeId};

/// External value entering a cluster through one argument slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSlot {
    pub producer: NodeId,
    pub producer_name: String,
    pub slot: usize,
    pub dtype: DType,
}

/// In-cluster value leaving a cluster through one return slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnSlot {
    pub producer: NodeId,
    pub producer_name: String,
    pub slot: usize,
    pub dtype: DType,
}

/// How every edge of the graph was classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeCensus {
    pub args: usize,
    pub retvals: usize,
    pub both_arg_retval: usize,
    /// Boundary edges whose value already had its slots from an earlier edge.
    pub reused: usize,
    pub free: usize,
    pub encapsulated: usize,
    pub total: usize,
}

impl EdgeCensus {
    pub fn computed_total(&self) -> usize {
        self.args + self.retvals + self.both_arg_retval + self.reused + self.free + self.encapsulated
    }
}

impl fmt::Display for EdgeCensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "args: {}, retvals: {}, both arg and retval: {}, reused: {}, free: {}, encapsulated: {}, total: {}",
            self.args,
            self.retvals,
            self.both_arg_retval,
            self.reused,
            self.free,
            self.encapsulated,
            self.total
        )
    }
}

/// Read-only result of the boundary scan: cluster placement plus slot tables.
#[derive(Debug, Clone, Default)]
pub struct BoundaryAnalysis {
    membership: BTreeMap<NodeId, ClusterId>,
    devices: BTreeMap<ClusterId, String>,
    members: BTreeMap<ClusterId, Vec<NodeId>>,
    args: BTreeMap<ClusterId, Vec<ArgSlot>>,
    arg_index: HashMap<(ClusterId, NodeId, usize), usize>,
    returns: BTreeMap<ClusterId, Vec<ReturnSlot>>,
    return_index: HashMap<(NodeId, usize), (ClusterId, usize)>,
    census: EdgeCensus,
}

impl BoundaryAnalysis {
    /// Clusters in ascending id order.
    pub fn clusters(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.devices.keys().copied()
    }

    pub fn device(&self, cluster: ClusterId) -> Option<&str> {
        self.devices.get(&cluster).map(String::as_str)
    }

    pub fn cluster_of(&self, node: NodeId) -> Option<ClusterId> {
        self.membership.get(&node).copied()
    }

    /// Every clustered node, ascending.
    pub fn clustered_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.membership.keys().copied()
    }

    pub fn members(&self, cluster: ClusterId) -> &[NodeId] {
        self.members.get(&cluster).map_or(&[], Vec::as_slice)
    }

    pub fn args(&self, cluster: ClusterId) -> &[ArgSlot] {
        self.args.get(&cluster).map_or(&[], Vec::as_slice)
    }

    pub fn returns(&self, cluster: ClusterId) -> &[ReturnSlot] {
        self.returns.get(&cluster).map_or(&[], Vec::as_slice)
    }

    /// Argument slot of `cluster` carrying output `slot` of `producer`.
    pub fn arg_slot(&self, cluster: ClusterId, producer: NodeId, slot: usize) -> Option<usize> {
        self.arg_index.get(&(cluster, producer, slot)).copied()
    }

    /// Owning cluster and return slot for output `slot` of a clustered `producer`.
    pub fn return_slot(&self, producer: NodeId, slot: usize) -> Option<(ClusterId, usize)> {
        self.return_index.get(&(producer, slot)).copied()
    }

    pub fn census(&self) -> EdgeCensus {
        self.census
    }

    fn assign_return(
        &mut self,
        cluster: ClusterId,
        producer: NodeId,
        producer_name: &str,
        slot: usize,
        dtype: DType,
    ) -> bool {
        if self.return_index.contains_key(&(producer, slot)) {
            return false;
        }
        let table = self.returns.entry(cluster).or_default();
        self.return_index
            .insert((producer, slot), (cluster, table.len()));
        table.push(ReturnSlot {
            producer,
            producer_name: producer_name.to_string(),
            slot,
            dtype,
        });
        true
    }

    fn assign_arg(
        &mut self,
        cluster: ClusterId,
        producer: NodeId,
        producer_name: &str,
        slot: usize,
        dtype: DType,
    ) -> bool {
        if self.arg_index.contains_key(&(cluster, producer, slot)) {
            return false;
        }
        let table = self.args.entry(cluster).or_default();
        self.arg_index
            .insert((cluster, producer, slot), table.len());
        table.push(ArgSlot {
            producer,
            producer_name: producer_name.to_string(),
            slot,
            dtype,
        });
        true
    }
}

/// Scans `graph` once: checks per-cluster placement and assigns argument and
/// return slots in ascending edge order. Never mutates the graph.
pub fn analyze<A>(graph: &Graph, assignment: &A) -> EncapsulateResult<BoundaryAnalysis>
where
    A: ClusterAssignment + ?Sized,
{
    let mut analysis = BoundaryAnalysis::default();

    for node in graph.nodes() {
        let Some(cluster) = assignment.cluster_of(graph, node) else {
            continue;
        };
        match analysis.devices.get(&cluster) {
            Some(expected) if *expected != node.device => {
                return Err(EncapsulateError::PlacementMismatch {
                    node: node.name.clone(),
                    cluster,
                    device: node.device.clone(),
                    expected: expected.clone(),
                });
            }
            Some(_) => {}
            None => {
                debug!(%cluster, device = %node.device, "setting cluster requested device");
                analysis.devices.insert(cluster, node.device.clone());
            }
        }
        analysis.membership.insert(node.id(), cluster);
        analysis.members.entry(cluster).or_default().push(node.id());
    }

    let mut census = EdgeCensus::default();
    for edge in graph.edges() {
        census.total += 1;
        let EdgeKind::Data { src_slot, dst_slot } = edge.kind else {
            census.free += 1;
            continue;
        };
        let src_cluster = analysis.cluster_of(edge.src);
        let dst_cluster = analysis.cluster_of(edge.dst);
        if src_cluster == dst_cluster {
            census.encapsulated += 1;
            continue;
        }

        let (src, dst) = endpoints(graph, edge)?;
        let dtype = graph
            .value_type(edge)
            .ok_or_else(|| EncapsulateError::UntypedEdge {
                node: dst.to_string(),
                slot: dst_slot,
            })?;
        trace!(
            flow = flow_kind(src_cluster, dst_cluster),
            src = %src,
            src_slot,
            dst = %dst,
            dst_slot,
            ?src_cluster,
            ?dst_cluster,
            %dtype,
            "found boundary edge"
        );

        let is_retval = match src_cluster {
            Some(cluster) => analysis.assign_return(cluster, edge.src, src, src_slot, dtype),
            None => false,
        };
        let is_arg = match dst_cluster {
            Some(cluster) => analysis.assign_arg(cluster, edge.src, src, src_slot, dtype),
            None => false,
        };
        match (is_arg, is_retval) {
            (true, true) => census.both_arg_retval += 1,
            (true, false) => census.args += 1,
            (false, true) => census.retvals += 1,
            (false, false) => census.reused += 1,
        }
    }

    debug!(%census, "edge census");
    if census.computed_total() != census.total || census.total != graph.num_edges() {
        return Err(EncapsulateError::EdgeCensus {
            computed: census.computed_total(),
            total: graph.num_edges(),
            census: census.to_string(),
        });
    }
    analysis.census = census;
    Ok(analysis)
}

fn endpoints<'g>(graph: &'g Graph, edge: &Edge) -> EncapsulateResult<(&'g str, &'g str)> {
    let src = graph
        .node(edge.src)
        .ok_or(GraphError::MissingNode(edge.src))?;
    let dst = graph
        .node(edge.dst)
        .ok_or(GraphError::MissingNode(edge.dst))?;
    Ok((src.name.as_str(), dst.name.as_str()))
}

fn flow_kind(src: Option<ClusterId>, dst: Option<ClusterId>) -> &'static str {
    match (src, dst) {
        (Some(_), Some(_)) => "cross-flow",
        (None, Some(_)) => "in-flow",
        _ => "out-flow",
    }
}
