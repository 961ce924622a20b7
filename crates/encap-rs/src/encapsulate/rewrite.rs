use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::aot::{ATTR_AOT_EXEC_PREFIX, ATTR_AOT_FUNCTION_PREFIX};
use crate::cluster::{ClusterId, ATTR_CLUSTER};
use crate::config::EncapsulateConfig;
use crate::error::{EncapsulateError, EncapsulateResult};
use crate::graph::{AttrValue, EdgeKind, Graph, NodeId, NodeSpec};
use crate::library::{FunctionDef, FunctionLibrary, LibraryError};
use crate::store::SubgraphStore;

use super::analysis::BoundaryAnalysis;
use super::materialize::static_input_slots;
use super::{
    ATTR_ENCAP_CLUSTER, ATTR_GRAPH_ID, ATTR_STATIC_INPUTS, ATTR_TARGUMENTS, ATTR_TRESULTS,
    OP_ENCAPSULATE,
};

/// Attributes owned by the encapsulate node itself.
const CONTRACT_ATTRS: [&str; 6] = [
    ATTR_ENCAP_CLUSTER,
    ATTR_GRAPH_ID,
    ATTR_TARGUMENTS,
    ATTR_TRESULTS,
    ATTR_STATIC_INPUTS,
    ATTR_CLUSTER,
];

fn is_contract_attr(key: &str) -> bool {
    CONTRACT_ATTRS.contains(&key)
        || key.starts_with(ATTR_AOT_EXEC_PREFIX)
        || key.starts_with(ATTR_AOT_FUNCTION_PREFIX)
}

/// Everything needed to create one encapsulate node, computed before the
/// graph is touched.
struct PendingCluster {
    cluster: ClusterId,
    function: FunctionDef,
    static_inputs: Vec<i64>,
}

/// Collapses every analysed cluster into one encapsulate node and registers
/// the cluster bodies in `library`. Returns the new node of each cluster.
pub fn rewrite(
    graph: &mut Graph,
    analysis: &BoundaryAnalysis,
    store: &SubgraphStore,
    library: &mut FunctionLibrary,
    config: &EncapsulateConfig,
) -> EncapsulateResult<BTreeMap<ClusterId, NodeId>> {
    let pending = prepare(graph, analysis, store, library, config)?;
    let original_edges = graph.edges().copied().collect::<Vec<_>>();

    let mut encapsulates = BTreeMap::new();
    for entry in &pending {
        let id = graph.add_node(encapsulate_spec(analysis, entry, config))?;
        debug!(cluster = %entry.cluster, node = %id, "created encapsulate node");
        encapsulates.insert(entry.cluster, id);
    }

    for (&cluster, &encapsulate) in &encapsulates {
        for (index, arg) in analysis.args(cluster).iter().enumerate() {
            let (src, src_slot) = match analysis.cluster_of(arg.producer) {
                Some(_) => cluster_output(analysis, &encapsulates, arg.producer, arg.slot)?,
                None => (arg.producer, arg.slot),
            };
            graph.add_edge(src, src_slot, encapsulate, index)?;
        }
    }

    let mut control_edges = 0usize;
    let mut data_edges = 0usize;
    for edge in &original_edges {
        let src_cluster = analysis.cluster_of(edge.src);
        let dst_cluster = analysis.cluster_of(edge.dst);
        match edge.kind {
            EdgeKind::Control => {
                if src_cluster == dst_cluster {
                    continue;
                }
                let src = endpoint(&encapsulates, edge.src, src_cluster)?;
                let dst = endpoint(&encapsulates, edge.dst, dst_cluster)?;
                if graph.find_control_edge(src, dst).is_none() {
                    graph.add_control_edge(src, dst)?;
                    control_edges += 1;
                }
                trace!(src = %src, dst = %dst, "rewired control edge");
            }
            EdgeKind::Data { src_slot, dst_slot } => {
                if dst_cluster.is_some() || src_cluster.is_none() {
                    continue;
                }
                let (src, slot) = cluster_output(analysis, &encapsulates, edge.src, src_slot)?;
                graph.update_edge(src, slot, edge.dst, dst_slot)?;
                data_edges += 1;
                trace!(src = %src, slot, dst = %edge.dst, dst_slot, "rewired data edge");
            }
        }
    }
    debug!(control_edges, data_edges, "rewired boundary edges");

    let clustered = analysis.clustered_nodes().collect::<Vec<_>>();
    for id in &clustered {
        let node = graph.remove_node(*id)?;
        trace!(node = %node.name, "removed clustered node");
    }

    for entry in pending {
        library.insert(entry.function)?;
    }
    debug!(
        clusters = encapsulates.len(),
        removed = clustered.len(),
        "rewrite complete"
    );
    Ok(encapsulates)
}

/// Builds function bodies and checks every name the rewrite will claim.
fn prepare(
    graph: &Graph,
    analysis: &BoundaryAnalysis,
    store: &SubgraphStore,
    library: &FunctionLibrary,
    config: &EncapsulateConfig,
) -> EncapsulateResult<Vec<PendingCluster>> {
    if let Some(key) = config.device_config.keys().find(|key| is_contract_attr(key)) {
        return Err(EncapsulateError::ReservedDeviceConfig(key.clone()));
    }
    let mut pending = Vec::new();
    for cluster in analysis.clusters() {
        let name = cluster.function_name();
        if graph.find_by_name(&name).is_some() {
            return Err(EncapsulateError::EncapsulateNameTaken(name));
        }
        if library.contains(&name) {
            return Err(LibraryError::Duplicate(name).into());
        }
        let subgraph = store
            .get(cluster)
            .ok_or_else(|| EncapsulateError::MissingFunction(name.clone()))?;
        let function = FunctionDef::from_subgraph(name, subgraph)?;
        pending.push(PendingCluster {
            cluster,
            function,
            static_inputs: static_input_slots(subgraph),
        });
    }
    Ok(pending)
}

fn encapsulate_spec(
    analysis: &BoundaryAnalysis,
    entry: &PendingCluster,
    config: &EncapsulateConfig,
) -> NodeSpec {
    let cluster = entry.cluster;
    let arg_types = analysis
        .args(cluster)
        .iter()
        .map(|arg| arg.dtype)
        .collect::<Vec<_>>();
    let result_types = analysis
        .returns(cluster)
        .iter()
        .map(|ret| ret.dtype)
        .collect::<Vec<_>>();

    let mut spec = NodeSpec::new(entry.function.name.clone(), OP_ENCAPSULATE)
        .device(analysis.device(cluster).unwrap_or_default())
        .inputs(arg_types.iter().copied())
        .outputs(result_types.iter().copied())
        .attr(ATTR_ENCAP_CLUSTER, cluster.0)
        .attr(ATTR_GRAPH_ID, config.graph_id)
        .attr(ATTR_TARGUMENTS, arg_types)
        .attr(ATTR_TRESULTS, result_types)
        .attr(ATTR_STATIC_INPUTS, entry.static_inputs.clone());
    for (key, value) in &config.device_config {
        spec = spec.attr(key.clone(), AttrValue::String(value.clone()));
    }
    spec
}

/// Encapsulate output carrying `(producer, slot)` of a clustered producer.
fn cluster_output(
    analysis: &BoundaryAnalysis,
    encapsulates: &BTreeMap<ClusterId, NodeId>,
    producer: NodeId,
    slot: usize,
) -> EncapsulateResult<(NodeId, usize)> {
    let (cluster, index) = analysis
        .return_slot(producer, slot)
        .ok_or(EncapsulateError::UnassignedReturn { producer, slot })?;
    let node = encapsulates
        .get(&cluster)
        .copied()
        .ok_or(EncapsulateError::MissingEncapsulate(cluster))?;
    Ok((node, index))
}

fn endpoint(
    encapsulates: &BTreeMap<ClusterId, NodeId>,
    node: NodeId,
    cluster: Option<ClusterId>,
) -> EncapsulateResult<NodeId> {
    match cluster {
        Some(cluster) => encapsulates
            .get(&cluster)
            .copied()
            .ok_or(EncapsulateError::MissingEncapsulate(cluster)),
        None => Ok(node),
    }
}
