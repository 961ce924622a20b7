use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::cluster::ClusterId;
use crate::error::{EncapsulateError, EncapsulateResult};
use crate::graph::{AttrValue, Graph, GraphError, NodeId};
use crate::library::{ATTR_INDEX, ATTR_PROV_TAG, ATTR_TYPE, OP_ARG, OP_RETVAL};
use crate::store::{ClosureViolation, NodeDef, SubgraphDef, SubgraphStore, TensorRef};

use super::analysis::BoundaryAnalysis;

/// Member-node attribute listing input positions that must be compile-time constants.
pub const ATTR_STATIC_INPUT_INDICES: &str = "_static_input_indices";

pub fn arg_name(index: usize) -> String {
    format!("_cluster_input_{index}")
}

pub fn retval_name(index: usize) -> String {
    format!("_cluster_output_{index}")
}

/// Writes one closed subgraph per cluster into `store`.
///
/// All definitions are built before the first one is committed, so a failure
/// leaves the store untouched.
pub fn materialize(
    graph: &Graph,
    analysis: &BoundaryAnalysis,
    store: &mut SubgraphStore,
) -> EncapsulateResult<()> {
    let mut built = BTreeMap::new();
    for cluster in analysis.clusters() {
        if store.get(cluster).is_some_and(|def| !def.nodes.is_empty()) {
            return Err(EncapsulateError::ClusterAlreadyMaterialized(cluster));
        }
        let device = analysis.device(cluster).unwrap_or_default();
        let mut def = SubgraphDef::default();

        for (index, arg) in analysis.args(cluster).iter().enumerate() {
            let mut placeholder = NodeDef::new(arg_name(index), OP_ARG);
            placeholder.device = device.to_string();
            placeholder
                .attrs
                .insert(ATTR_TYPE.to_string(), AttrValue::Type(arg.dtype));
            placeholder
                .attrs
                .insert(ATTR_INDEX.to_string(), AttrValue::I64(index as i64));
            placeholder.attrs.insert(
                ATTR_PROV_TAG.to_string(),
                AttrValue::String(arg.producer_name.clone()),
            );
            def.push(placeholder);
        }

        for &member in analysis.members(cluster) {
            def.push(copy_member(graph, analysis, cluster, member)?);
        }

        for (index, ret) in analysis.returns(cluster).iter().enumerate() {
            let mut placeholder = NodeDef::new(retval_name(index), OP_RETVAL);
            placeholder.device = device.to_string();
            placeholder
                .inputs
                .push(TensorRef::output(ret.producer_name.clone(), ret.slot).to_string());
            placeholder
                .attrs
                .insert(ATTR_TYPE.to_string(), AttrValue::Type(ret.dtype));
            placeholder
                .attrs
                .insert(ATTR_INDEX.to_string(), AttrValue::I64(index as i64));
            def.push(placeholder);
        }

        def.validate_closed().map_err(|violation| match violation {
            ClosureViolation::Dangling { node, input } => EncapsulateError::OpenSubgraph {
                cluster,
                node,
                input,
            },
            ClosureViolation::DuplicateName { name } => {
                EncapsulateError::AmbiguousSubgraphName { cluster, name }
            }
        })?;
        debug!(
            %cluster,
            nodes = def.nodes.len(),
            args = analysis.args(cluster).len(),
            retvals = analysis.returns(cluster).len(),
            "materialized cluster subgraph"
        );
        built.insert(cluster, def);
    }

    for (cluster, def) in built {
        store.get_or_create(cluster).nodes.extend(def.nodes);
    }
    Ok(())
}

/// Copies a member node, renaming inputs that cross into the cluster to their
/// argument placeholders and keeping only intra-cluster control inputs.
fn copy_member(
    graph: &Graph,
    analysis: &BoundaryAnalysis,
    cluster: ClusterId,
    id: NodeId,
) -> EncapsulateResult<NodeDef> {
    let node = graph.node(id).ok_or(GraphError::MissingNode(id))?;
    let mut def = NodeDef::new(node.name.clone(), node.op.clone());
    def.device = node.device.clone();
    def.attrs = node.attrs.clone();

    for (dst_slot, edge) in graph.data_inputs(id)?.into_iter().enumerate() {
        let Some(edge) = edge else {
            return Err(GraphError::InputNotFed {
                node: node.name.clone(),
                slot: dst_slot,
            }
            .into());
        };
        let src_slot = edge.src_slot().unwrap_or_default();
        let input = match analysis.arg_slot(cluster, edge.src, src_slot) {
            Some(index) => arg_name(index),
            None => {
                let src = graph
                    .node(edge.src)
                    .ok_or(GraphError::MissingNode(edge.src))?;
                TensorRef::output(src.name.clone(), src_slot).to_string()
            }
        };
        def.inputs.push(input);
    }

    let mut seen = BTreeSet::new();
    for src in graph.control_inputs(id) {
        if analysis.cluster_of(src) != Some(cluster) || !seen.insert(src) {
            continue;
        }
        let src = graph.node(src).ok_or(GraphError::MissingNode(src))?;
        def.inputs.push(TensorRef::control(src.name.clone()).to_string());
    }
    Ok(def)
}

/// Argument slots of `def` read by a member at a constant-only input position.
pub fn static_input_slots(def: &SubgraphDef) -> Vec<i64> {
    let args = def
        .nodes_of_op(OP_ARG)
        .filter_map(|node| {
            let index = node.attr(ATTR_INDEX)?.as_i64()?;
            Some((node.name.as_str(), index))
        })
        .collect::<HashMap<_, _>>();

    let mut slots = BTreeSet::new();
    for node in &def.nodes {
        let Some(positions) = node
            .attr(ATTR_STATIC_INPUT_INDICES)
            .and_then(|value| value.as_i64_list())
        else {
            continue;
        };
        let inputs = node.data_inputs().collect::<Vec<_>>();
        for position in positions {
            let Some(input) = usize::try_from(*position)
                .ok()
                .and_then(|position| inputs.get(position))
            else {
                continue;
            };
            if let Some(index) = args.get(input.node()) {
                slots.insert(*index);
            }
        }
    }
    slots.into_iter().collect()
}
