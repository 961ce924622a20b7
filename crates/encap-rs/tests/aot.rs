mod common;

use common::{clustered, connect, node_id, op, placeholder, RecordingCompiler, DEVICE};
use encap_rs::aot::{perform_aot, ATTR_AOT_EXEC_PREFIX, ATTR_AOT_FUNCTION_PREFIX};
use encap_rs::backend::{BackendCompiler, BackendError};
use encap_rs::cluster::{AttrClusterAssignment, ATTR_CLUSTER};
use encap_rs::encapsulate::{encapsulate_clusters, ATTR_STATIC_INPUTS, ATTR_STATIC_INPUT_INDICES};
use encap_rs::graph::{AttrValue, DType, Graph, NodeId, NodeSpec};
use encap_rs::library::{FunctionDef, FunctionLibrary};
use encap_rs::store::SubgraphStore;
use encap_rs::{
    AotConfig, EncapsulateConfig, EncapsulateError, EncapsulateOutcome, EncapsulateResult,
    ShapeHintSet,
};

fn hints<const N: usize>(entries: [(&str, Vec<usize>); N]) -> ShapeHintSet {
    entries
        .into_iter()
        .map(|(name, dims)| (name.to_string(), dims))
        .collect()
}

fn aot_config(hint_sets: Vec<ShapeHintSet>) -> EncapsulateConfig {
    EncapsulateConfig::new(1).with_aot(AotConfig::with_hints(hint_sets))
}

fn run(
    graph: &mut Graph,
    config: &EncapsulateConfig,
    compiler: Option<&dyn BackendCompiler>,
) -> EncapsulateResult<EncapsulateOutcome> {
    let mut store = SubgraphStore::new();
    let mut library = FunctionLibrary::new();
    encapsulate_clusters(
        graph,
        &AttrClusterAssignment,
        &mut store,
        &mut library,
        config,
        compiler,
    )
}

/// x:[2,3] and y:[?,4] feed one cluster whose output goes to `sink`.
fn hinted_graph() -> Graph {
    let mut graph = Graph::new();
    let x = placeholder(&mut graph, "x", &[Some(2), Some(3)]);
    let y = placeholder(&mut graph, "y", &[None, Some(4)]);
    let a = clustered(&mut graph, "a", 0, 2, 1);
    let sink = op(&mut graph, "sink", "Identity", 1, 1);
    connect(&mut graph, x, 0, a, 0);
    connect(&mut graph, y, 0, a, 1);
    connect(&mut graph, a, 0, sink, 0);
    graph
}

fn concrete_graph() -> Graph {
    let mut graph = Graph::new();
    let x = placeholder(&mut graph, "x", &[Some(2), Some(3)]);
    let a = clustered(&mut graph, "a", 0, 1, 1);
    let sink = op(&mut graph, "sink", "Identity", 1, 1);
    connect(&mut graph, x, 0, a, 0);
    connect(&mut graph, a, 0, sink, 0);
    graph
}

fn aot_attrs(graph: &Graph, node: &str, prefix: &str) -> Vec<String> {
    graph
        .node(node_id(graph, node))
        .unwrap()
        .attrs
        .keys()
        .filter(|key| key.starts_with(prefix))
        .cloned()
        .collect()
}

#[test]
fn declared_shapes_are_used_without_hints() {
    let mut graph = concrete_graph();
    let compiler = RecordingCompiler::default();

    let outcome = run(&mut graph, &aot_config(Vec::new()), Some(&compiler)).unwrap();

    let report = outcome.aot.unwrap();
    assert_eq!(report.hint_sets, 1);
    assert_eq!(report.signatures_for("cluster_0"), ["2,3,;/"]);
    assert_eq!(compiler.calls(), [("cluster_0".to_string(), vec![vec![2, 3]])]);

    assert_eq!(aot_attrs(&graph, "cluster_0", ATTR_AOT_EXEC_PREFIX), ["_aot_exec_2,3,;/"]);
    let node = graph.node(node_id(&graph, "cluster_0")).unwrap();
    assert_eq!(
        node.attr("_aot_exec_2,3,;/"),
        Some(&AttrValue::Bytes(b"cluster_0".to_vec()))
    );
    let serialized = node
        .attr("_aot_function_2,3,;/")
        .and_then(|value| value.as_str())
        .unwrap();
    let function: FunctionDef = serde_json::from_str(serialized).unwrap();
    assert_eq!(function.name, "cluster_0");
    assert_eq!(function.args.len(), 1);
}

#[test]
fn hints_fill_unknown_dimensions() {
    let mut graph = hinted_graph();
    let compiler = RecordingCompiler::default();
    let config = aot_config(vec![hints([("y", vec![5, 4])])]);

    let outcome = run(&mut graph, &config, Some(&compiler)).unwrap();

    assert_eq!(
        outcome.aot.unwrap().signatures_for("cluster_0"),
        ["2,3,;5,4,;/"]
    );
    assert_eq!(compiler.calls()[0].1, vec![vec![2, 3], vec![5, 4]]);
}

#[test]
fn each_hint_set_attaches_its_own_artifact() {
    let mut graph = hinted_graph();
    let compiler = RecordingCompiler::default();
    let config = aot_config(vec![
        hints([("y", vec![8, 4])]),
        hints([("y", vec![1, 4])]),
        hints([("y", vec![8, 4])]),
    ]);

    let outcome = run(&mut graph, &config, Some(&compiler)).unwrap();

    let report = outcome.aot.unwrap();
    assert_eq!(report.hint_sets, 2, "duplicate hint sets are processed once");
    assert_eq!(
        report.signatures_for("cluster_0"),
        ["2,3,;1,4,;/", "2,3,;8,4,;/"]
    );
    assert_eq!(aot_attrs(&graph, "cluster_0", ATTR_AOT_EXEC_PREFIX).len(), 2);
    assert_eq!(aot_attrs(&graph, "cluster_0", ATTR_AOT_FUNCTION_PREFIX).len(), 2);
}

#[test]
fn conflicting_hint_names_the_node() {
    let mut graph = hinted_graph();
    let compiler = RecordingCompiler::default();
    let config = aot_config(vec![hints([("x", vec![2, 4]), ("y", vec![1, 4])])]);

    let err = run(&mut graph, &config, Some(&compiler)).unwrap_err();

    match err {
        EncapsulateError::ShapeHintConflict { node, hint, .. } => {
            assert_eq!(node, "x");
            assert_eq!(hint, "{x:[2,4], y:[1,4]}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(compiler.calls().is_empty());
}

#[test]
fn hint_for_unknown_input_is_rejected() {
    let mut graph = concrete_graph();
    let compiler = RecordingCompiler::default();
    let config = aot_config(vec![hints([("nope", vec![1])])]);

    let err = run(&mut graph, &config, Some(&compiler)).unwrap_err();
    assert!(matches!(err, EncapsulateError::UnknownHintNode { ref node } if node == "nope"));
}

#[test]
fn partial_shape_without_hint_is_not_concretized() {
    let mut graph = hinted_graph();
    let compiler = RecordingCompiler::default();

    let err = run(&mut graph, &aot_config(Vec::new()), Some(&compiler)).unwrap_err();
    assert!(matches!(err, EncapsulateError::NotConcretized { ref node, .. } if node == "y"));
}

/// `x` and `shape` feed a reshape in `cluster` whose second input must be constant.
fn static_reshape(graph: &mut Graph, name: &str, x: NodeId, cluster: i64) -> NodeId {
    let shape = placeholder(graph, &format!("{name}_shape"), &[Some(2)]);
    let reshape = graph
        .add_node(
            NodeSpec::new(name, "Reshape")
                .device(DEVICE)
                .inputs([DType::F32, DType::F32])
                .outputs([DType::F32])
                .attr(ATTR_STATIC_INPUT_INDICES, vec![1i64])
                .attr(ATTR_CLUSTER, cluster),
        )
        .unwrap();
    let sink = op(graph, &format!("{name}_sink"), "Identity", 1, 1);
    connect(graph, x, 0, reshape, 0);
    connect(graph, shape, 0, reshape, 1);
    connect(graph, reshape, 0, sink, 0);
    reshape
}

#[test]
fn static_inputs_refuse_aot() {
    let mut graph = Graph::new();
    let x = placeholder(&mut graph, "x", &[Some(6)]);
    static_reshape(&mut graph, "reshape", x, 4);
    let compiler = RecordingCompiler::default();

    let err = run(&mut graph, &aot_config(Vec::new()), Some(&compiler)).unwrap_err();

    match err {
        EncapsulateError::StaticInputs { node, inputs } => {
            assert_eq!(node, "cluster_4");
            assert_eq!(inputs, [1]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(compiler.calls().is_empty());
}

#[test]
fn static_inputs_in_a_later_cluster_refuse_aot_before_any_compile() {
    let mut graph = concrete_graph();
    let x = node_id(&graph, "x");
    static_reshape(&mut graph, "reshape", x, 4);
    let compiler = RecordingCompiler::default();

    let err = run(&mut graph, &aot_config(Vec::new()), Some(&compiler)).unwrap_err();

    assert!(matches!(err, EncapsulateError::StaticInputs { ref node, .. } if node == "cluster_4"));
    assert!(compiler.calls().is_empty());
    assert!(aot_attrs(&graph, "cluster_0", ATTR_AOT_EXEC_PREFIX).is_empty());
    assert!(aot_attrs(&graph, "cluster_0", ATTR_AOT_FUNCTION_PREFIX).is_empty());
}

#[test]
fn device_config_cannot_mask_static_inputs() {
    let mut graph = Graph::new();
    let x = placeholder(&mut graph, "x", &[Some(6)]);
    static_reshape(&mut graph, "reshape", x, 0);
    let compiler = RecordingCompiler::default();
    let config = aot_config(Vec::new())
        .with_device_config(ATTR_STATIC_INPUTS, "none")
        .with_device_config("cluster", "gpu");

    let err = run(&mut graph, &config, Some(&compiler)).unwrap_err();

    assert!(
        matches!(err, EncapsulateError::ReservedDeviceConfig(ref key) if key == ATTR_STATIC_INPUTS)
    );
    assert!(compiler.calls().is_empty());
    assert!(graph.find_by_name("reshape").is_some());
}

#[test]
fn input_from_computed_value_is_not_concrete() {
    let mut graph = Graph::new();
    let x = placeholder(&mut graph, "x", &[Some(2)]);
    let relu = op(&mut graph, "relu", "Relu", 1, 1);
    let a = clustered(&mut graph, "a", 0, 1, 1);
    let sink = op(&mut graph, "sink", "Identity", 1, 1);
    connect(&mut graph, x, 0, relu, 0);
    connect(&mut graph, relu, 0, a, 0);
    connect(&mut graph, a, 0, sink, 0);
    let compiler = RecordingCompiler::default();

    let err = run(&mut graph, &aot_config(Vec::new()), Some(&compiler)).unwrap_err();

    match err {
        EncapsulateError::NonConcreteInput {
            node,
            slot,
            producer,
        } => {
            assert_eq!(node, "cluster_0");
            assert_eq!(slot, 0);
            assert_eq!(producer, "relu");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn backend_failure_is_propagated() {
    let mut graph = concrete_graph();
    let compiler = RecordingCompiler::failing(BackendError::compilation("out of registers"));

    let err = run(&mut graph, &aot_config(Vec::new()), Some(&compiler)).unwrap_err();

    match err {
        EncapsulateError::Compile {
            node,
            backend,
            source,
        } => {
            assert_eq!(node, "cluster_0");
            assert_eq!(backend, "recording");
            assert_eq!(source, BackendError::compilation("out of registers"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(compiler.calls().len(), 1);
}

#[test]
fn aot_requires_a_compiler() {
    let mut graph = concrete_graph();
    let err = run(&mut graph, &aot_config(Vec::new()), None).unwrap_err();
    assert!(matches!(err, EncapsulateError::NoCompiler));
}

#[test]
fn aot_is_skipped_unless_requested() {
    let mut graph = concrete_graph();
    let compiler = RecordingCompiler::default();

    let outcome = run(&mut graph, &EncapsulateConfig::default(), Some(&compiler)).unwrap();

    assert!(outcome.aot.is_none());
    assert!(compiler.calls().is_empty());
    assert!(aot_attrs(&graph, "cluster_0", ATTR_AOT_EXEC_PREFIX).is_empty());

    let report = perform_aot(
        &mut graph,
        &FunctionLibrary::new(),
        &AotConfig::disabled(),
        Some(&compiler),
    )
    .unwrap();
    assert!(report.signatures.is_empty());
}
