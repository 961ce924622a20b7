//! Ahead-of-time specialization of encapsulate nodes for concrete input shapes.

mod shapes;

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::backend::BackendCompiler;
use crate::cluster::ClusterId;
use crate::config::{AotConfig, ShapeHintSet};
use crate::encapsulate::{ATTR_ENCAP_CLUSTER, ATTR_STATIC_INPUTS, OP_ENCAPSULATE};
use crate::error::{EncapsulateError, EncapsulateResult};
use crate::graph::{AttrValue, Graph, GraphError, NodeId};
use crate::library::FunctionLibrary;

pub use shapes::{
    combine_shape, declared_shape, hint_as_string, signature, ATTR_OUTPUT_SHAPES, ATTR_SHAPE,
    OP_PLACEHOLDER,
};

/// Prefix of the attribute holding a compiled artifact, followed by its signature.
pub const ATTR_AOT_EXEC_PREFIX: &str = "_aot_exec_";
/// Prefix of the attribute holding the serialized function a signature was compiled from.
pub const ATTR_AOT_FUNCTION_PREFIX: &str = "_aot_function_";

/// Signatures compiled per encapsulate node name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AotReport {
    pub hint_sets: usize,
    pub signatures: BTreeMap<String, Vec<String>>,
}

impl AotReport {
    pub fn signatures_for(&self, node: &str) -> &[String] {
        self.signatures.get(node).map_or(&[], Vec::as_slice)
    }
}

/// Compiles every encapsulate node of `graph` once per hint set.
///
/// Without hint sets the declared graph-input shapes are used. Any
/// unresolvable shape, static input or backend failure aborts the whole run.
pub fn perform_aot(
    graph: &mut Graph,
    library: &FunctionLibrary,
    config: &AotConfig,
    compiler: Option<&dyn BackendCompiler>,
) -> EncapsulateResult<AotReport> {
    let mut report = AotReport::default();
    if !config.requested {
        debug!("AOT not requested");
        return Ok(report);
    }
    let compiler = compiler.ok_or(EncapsulateError::NoCompiler)?;

    let inputs = graph
        .nodes()
        .filter(|node| node.op == OP_PLACEHOLDER)
        .map(|node| (node.id(), node.name.clone(), declared_shape(node)))
        .collect::<Vec<_>>();
    let encapsulates = graph
        .nodes()
        .filter(|node| node.op == OP_ENCAPSULATE)
        .map(|node| node.id())
        .collect::<Vec<_>>();

    // Refused as a whole before any node is touched.
    for node in graph.nodes().filter(|node| node.op == OP_ENCAPSULATE) {
        let static_inputs = node
            .attr(ATTR_STATIC_INPUTS)
            .and_then(|value| value.as_i64_list())
            .unwrap_or_default();
        if !static_inputs.is_empty() {
            return Err(EncapsulateError::StaticInputs {
                node: node.name.clone(),
                inputs: static_inputs.to_vec(),
            });
        }
    }

    let synthesized = [ShapeHintSet::new()];
    let hint_sets = if config.hint_sets.is_empty() {
        debug!("no shape hints supplied, using declared input shapes");
        &synthesized[..]
    } else {
        config.hint_sets.as_slice()
    };

    for hints in hint_sets {
        if let Some(unknown) = hints
            .keys()
            .find(|name| !inputs.iter().any(|(_, input, _)| input == *name))
        {
            return Err(EncapsulateError::UnknownHintNode {
                node: unknown.clone(),
            });
        }

        let mut resolved = HashMap::new();
        for (id, name, declared) in &inputs {
            let hint = hints.get(name).map(Vec::as_slice);
            let shape = combine_shape(name, declared.as_ref(), hint, hints)?;
            debug!(node = %name, ?shape, "resolved input shape");
            resolved.insert(*id, shape);
        }

        for &encapsulate in &encapsulates {
            let (name, sig) = compile_one(graph, library, compiler, encapsulate, &resolved)?;
            report.signatures.entry(name).or_default().push(sig);
        }
        report.hint_sets += 1;
    }

    for &encapsulate in &encapsulates {
        let node = graph
            .node(encapsulate)
            .ok_or(GraphError::MissingNode(encapsulate))?;
        if !node.attrs.keys().any(|key| key.starts_with(ATTR_AOT_EXEC_PREFIX)) {
            return Err(EncapsulateError::AotIncomplete(node.name.clone()));
        }
    }
    debug!(
        encapsulates = encapsulates.len(),
        hint_sets = report.hint_sets,
        "AOT complete"
    );
    Ok(report)
}

fn compile_one(
    graph: &mut Graph,
    library: &FunctionLibrary,
    compiler: &dyn BackendCompiler,
    encapsulate: NodeId,
    resolved: &HashMap<NodeId, Vec<usize>>,
) -> EncapsulateResult<(String, String)> {
    let node = graph
        .node(encapsulate)
        .ok_or(GraphError::MissingNode(encapsulate))?;
    let name = node.name.clone();

    let mut input_shapes = Vec::with_capacity(node.num_inputs());
    for (slot, edge) in graph.data_inputs(encapsulate)?.into_iter().enumerate() {
        let shape = edge.and_then(|edge| resolved.get(&edge.src));
        let Some(shape) = shape else {
            let producer = edge
                .and_then(|edge| graph.node(edge.src))
                .map_or_else(String::new, |node| node.name.clone());
            return Err(EncapsulateError::NonConcreteInput {
                node: name,
                slot,
                producer,
            });
        };
        input_shapes.push(shape.clone());
    }

    let function_name = node
        .attr(ATTR_ENCAP_CLUSTER)
        .and_then(|value| value.as_i64())
        .map_or_else(|| name.clone(), |id| ClusterId(id).function_name());
    let function = library
        .get(&function_name)
        .ok_or_else(|| EncapsulateError::MissingFunction(function_name.clone()))?;

    let sig = signature(&input_shapes);
    debug!(node = %name, signature = %sig, backend = compiler.name(), "compiling encapsulate");
    let artifact = compiler
        .compile(function, &input_shapes)
        .map_err(|source| EncapsulateError::Compile {
            node: name.clone(),
            backend: compiler.name().to_string(),
            source,
        })?;
    let serialized =
        serde_json::to_string(function).map_err(|source| EncapsulateError::Serialize {
            function: function_name.clone(),
            source,
        })?;

    let node = graph
        .node_mut(encapsulate)
        .ok_or(GraphError::MissingNode(encapsulate))?;
    node.set_attr(
        format!("{ATTR_AOT_EXEC_PREFIX}{sig}"),
        AttrValue::Bytes(artifact.bytes),
    );
    node.set_attr(
        format!("{ATTR_AOT_FUNCTION_PREFIX}{sig}"),
        AttrValue::String(serialized),
    );
    Ok((name, sig))
}
