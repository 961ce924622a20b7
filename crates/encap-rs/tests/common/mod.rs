#![allow(dead_code)]

use std::sync::Mutex;

use encap_rs::aot::{ATTR_SHAPE, OP_PLACEHOLDER};
use encap_rs::backend::{BackendCompiler, BackendError, BackendResult, CompiledArtifact};
use encap_rs::cluster::ATTR_CLUSTER;
use encap_rs::graph::{DType, Dim, Graph, NodeId, NodeSpec, PartialShape};
use encap_rs::library::FunctionDef;

pub const DEVICE: &str = "/device:CPU:0";

/// Graph input with a declared shape; `None` marks an unknown axis.
pub fn placeholder(graph: &mut Graph, name: &str, dims: &[Option<usize>]) -> NodeId {
    let shape = PartialShape::new(dims.iter().copied().map(Dim::from));
    graph
        .add_node(
            NodeSpec::new(name, OP_PLACEHOLDER)
                .device(DEVICE)
                .outputs([DType::F32])
                .attr(ATTR_SHAPE, shape),
        )
        .unwrap()
}

/// Graph input without any declared shape.
pub fn bare_placeholder(graph: &mut Graph, name: &str) -> NodeId {
    graph
        .add_node(
            NodeSpec::new(name, OP_PLACEHOLDER)
                .device(DEVICE)
                .outputs([DType::F32]),
        )
        .unwrap()
}

/// Unclustered f32 op.
pub fn op(graph: &mut Graph, name: &str, op: &str, inputs: usize, outputs: usize) -> NodeId {
    graph
        .add_node(
            NodeSpec::new(name, op)
                .device(DEVICE)
                .inputs(vec![DType::F32; inputs])
                .outputs(vec![DType::F32; outputs]),
        )
        .unwrap()
}

/// f32 op marked for `cluster` through the cluster attribute.
pub fn clustered(
    graph: &mut Graph,
    name: &str,
    cluster: i64,
    inputs: usize,
    outputs: usize,
) -> NodeId {
    clustered_on(graph, name, cluster, DEVICE, inputs, outputs)
}

pub fn clustered_on(
    graph: &mut Graph,
    name: &str,
    cluster: i64,
    device: &str,
    inputs: usize,
    outputs: usize,
) -> NodeId {
    graph
        .add_node(
            NodeSpec::new(name, "Op")
                .device(device)
                .inputs(vec![DType::F32; inputs])
                .outputs(vec![DType::F32; outputs])
                .attr(ATTR_CLUSTER, cluster),
        )
        .unwrap()
}

pub fn connect(graph: &mut Graph, src: NodeId, src_slot: usize, dst: NodeId, dst_slot: usize) {
    graph.add_edge(src, src_slot, dst, dst_slot).unwrap();
}

pub fn node_id(graph: &Graph, name: &str) -> NodeId {
    graph
        .find_by_name(name)
        .unwrap_or_else(|| panic!("node '{name}' not found"))
}

/// `(src name, src slot, dst name, dst slot)` for every data edge, sorted.
pub fn data_edges(graph: &Graph) -> Vec<(String, usize, String, usize)> {
    let mut edges = graph
        .edges()
        .filter_map(|edge| {
            let src = graph.node(edge.src)?.name.clone();
            let dst = graph.node(edge.dst)?.name.clone();
            Some((src, edge.src_slot()?, dst, edge.dst_slot()?))
        })
        .collect::<Vec<_>>();
    edges.sort();
    edges
}

/// `(src name, dst name)` for every control edge, in edge order.
pub fn control_edges(graph: &Graph) -> Vec<(String, String)> {
    graph
        .edges()
        .filter(|edge| edge.is_control())
        .map(|edge| {
            (
                graph.node(edge.src).unwrap().name.clone(),
                graph.node(edge.dst).unwrap().name.clone(),
            )
        })
        .collect()
}

/// Records every compile call; optionally fails them all.
#[derive(Default)]
pub struct RecordingCompiler {
    pub calls: Mutex<Vec<(String, Vec<Vec<usize>>)>>,
    pub fail_with: Option<BackendError>,
}

impl RecordingCompiler {
    pub fn failing(error: BackendError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_with: Some(error),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<Vec<usize>>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl BackendCompiler for RecordingCompiler {
    fn name(&self) -> &str {
        "recording"
    }

    fn compile(
        &self,
        function: &FunctionDef,
        input_shapes: &[Vec<usize>],
    ) -> BackendResult<CompiledArtifact> {
        self.calls
            .lock()
            .unwrap()
            .push((function.name.clone(), input_shapes.to_vec()));
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(CompiledArtifact::new(
            "recording",
            function.name.as_bytes().to_vec(),
        ))
    }
}
