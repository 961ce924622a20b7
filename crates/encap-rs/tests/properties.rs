//! Encapsulation invariants over generated graphs and cluster assignments.

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{clustered, connect, control_edges, data_edges, node_id, op, placeholder};
use encap_rs::cluster::{AttrClusterAssignment, ClusterId};
use encap_rs::encapsulate::{arg_name, encapsulate_clusters, retval_name, OP_ENCAPSULATE};
use encap_rs::graph::{Graph, NodeId};
use encap_rs::library::{FunctionLibrary, ValueSource};
use encap_rs::store::{SubgraphStore, TensorRef};
use encap_rs::{EncapsulateConfig, EncapsulateOutcome};
use proptest::prelude::*;

const GRAPH_INPUTS: [&str; 2] = ["in0", "in1"];

/// One generated node. Source picks are reduced modulo the nodes built so far,
/// so every edge points backwards.
#[derive(Debug, Clone)]
struct NodePlan {
    cluster: Option<i64>,
    outputs: usize,
    inputs: Vec<(usize, usize)>,
    control: Option<usize>,
}

fn node_plan() -> impl Strategy<Value = NodePlan> {
    (
        prop::option::of(0i64..3),
        1usize..=2,
        prop::collection::vec((any::<usize>(), any::<usize>()), 0..=2),
        prop::option::of(any::<usize>()),
    )
        .prop_map(|(cluster, outputs, inputs, control)| NodePlan {
            cluster,
            outputs,
            inputs,
            control,
        })
}

fn build(plan: &[NodePlan]) -> Graph {
    let mut graph = Graph::new();
    let mut built = Vec::<(NodeId, usize)>::new();
    for name in GRAPH_INPUTS {
        built.push((placeholder(&mut graph, name, &[Some(2)]), 1));
    }
    for (index, node) in plan.iter().enumerate() {
        let name = format!("n{index}");
        let id = match node.cluster {
            Some(cluster) => clustered(&mut graph, &name, cluster, node.inputs.len(), node.outputs),
            None => op(&mut graph, &name, "Op", node.inputs.len(), node.outputs),
        };
        for (slot, &(src, src_slot)) in node.inputs.iter().enumerate() {
            let (src, outputs) = built[src % built.len()];
            connect(&mut graph, src, src_slot % outputs, id, slot);
        }
        if let Some(src) = node.control {
            graph
                .add_control_edge(built[src % built.len()].0, id)
                .unwrap();
        }
        built.push((id, node.outputs));
    }
    graph
}

fn encapsulate(original: &Graph) -> (Graph, FunctionLibrary, EncapsulateOutcome) {
    let mut graph = original.clone();
    let mut store = SubgraphStore::new();
    let mut library = FunctionLibrary::new();
    let outcome = encapsulate_clusters(
        &mut graph,
        &AttrClusterAssignment,
        &mut store,
        &mut library,
        &EncapsulateConfig::default(),
        None,
    )
    .unwrap();
    (graph, library, outcome)
}

/// `(producer name, output slot)` of a value in the original graph.
type Origin = (String, usize);

/// Maps values of a rewritten graph back to their original producers.
struct Rewritten<'a> {
    graph: &'a Graph,
    library: &'a FunctionLibrary,
}

impl Rewritten<'_> {
    fn output(&self, node: NodeId, slot: usize) -> Origin {
        let node = self.graph.node(node).unwrap();
        if node.op != OP_ENCAPSULATE {
            return (node.name.clone(), slot);
        }
        let function = self.library.get(&node.name).unwrap();
        match TensorRef::parse(&function.results[slot].source) {
            TensorRef::Output { node, slot } => (node, slot),
            other => panic!("{} result {slot} reads {other:?}", function.name),
        }
    }

    fn input(&self, node: NodeId, slot: usize) -> Origin {
        let edge = self.graph.data_inputs(node).unwrap()[slot]
            .unwrap_or_else(|| panic!("input {slot} of {node} is not fed"));
        self.output(edge.src, edge.src_slot().unwrap())
    }

    /// Value read at input `slot` of the original node `name`.
    fn consumed(&self, name: &str, cluster: Option<i64>, slot: usize) -> Origin {
        let Some(cluster) = cluster else {
            return self.input(node_id(self.graph, name), slot);
        };
        let encapsulate = ClusterId(cluster).function_name();
        let function = self.library.get(&encapsulate).unwrap();
        let reference = function
            .node(name)
            .unwrap_or_else(|| panic!("{name} missing from {encapsulate}"))
            .data_inputs()
            .nth(slot)
            .unwrap();
        match function.resolve(&reference) {
            Some(ValueSource::Arg(index)) => self.input(node_id(self.graph, &encapsulate), index),
            Some(ValueSource::Node(_)) => match reference {
                TensorRef::Output { node, slot } => (node, slot),
                other => panic!("{name} reads {other:?}"),
            },
            None => panic!("{name} reads unknown {reference:?}"),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn encapsulation_preserves_value_flow(plan in prop::collection::vec(node_plan(), 1..10)) {
        let original = build(&plan);
        let clusters = plan
            .iter()
            .enumerate()
            .map(|(index, node)| (format!("n{index}"), node.cluster))
            .collect::<BTreeMap<_, _>>();
        let cluster_of = |name: &str| clusters.get(name).copied().flatten();

        let (graph, library, outcome) = encapsulate(&original);
        let rewritten = Rewritten { graph: &graph, library: &library };

        // One encapsulate and one library function per cluster.
        let expected = plan.iter().filter_map(|node| node.cluster).collect::<BTreeSet<_>>();
        assert_eq!(
            outcome.encapsulates.keys().map(|cluster| cluster.0).collect::<BTreeSet<_>>(),
            expected
        );
        let encapsulates = graph
            .nodes()
            .filter(|node| node.op == OP_ENCAPSULATE)
            .map(|node| node.name.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            encapsulates,
            expected
                .iter()
                .map(|cluster| ClusterId(*cluster).function_name())
                .collect::<Vec<_>>()
        );
        assert_eq!(library.len(), expected.len());
        for (name, cluster) in &clusters {
            assert_eq!(graph.find_by_name(name).is_none(), cluster.is_some(), "{name}");
        }
        assert_eq!(outcome.census.total, original.num_edges());
        assert_eq!(outcome.census.computed_total(), original.num_edges());

        // Every original consumer still reads the value it read before.
        for (producer, slot, consumer, dst_slot) in data_edges(&original) {
            assert_eq!(
                rewritten.consumed(&consumer, cluster_of(consumer.as_str()), dst_slot),
                (producer, slot),
                "{consumer} input {dst_slot}"
            );
        }
        for node in graph.nodes() {
            for (slot, input) in graph.data_inputs(node.id()).unwrap().iter().enumerate() {
                assert!(input.is_some(), "{} input {slot} lost its producer", node.name);
            }
        }

        // Slots are dense and carry each boundary value once.
        for function in library.iter() {
            let encapsulate = graph.node(node_id(&graph, &function.name)).unwrap();
            assert_eq!(encapsulate.num_inputs(), function.args.len());
            assert_eq!(encapsulate.num_outputs(), function.results.len());
            for (index, arg) in function.args.iter().enumerate() {
                assert_eq!(arg.name, arg_name(index));
            }
            for (index, result) in function.results.iter().enumerate() {
                assert_eq!(result.name, retval_name(index));
            }
            let args = (0..function.args.len())
                .map(|index| rewritten.input(encapsulate.id(), index))
                .collect::<BTreeSet<_>>();
            assert_eq!(args.len(), function.args.len(), "{} reads a value twice", function.name);
            let results = function
                .results
                .iter()
                .map(|result| result.source.as_str())
                .collect::<BTreeSet<_>>();
            assert_eq!(results.len(), function.results.len());
        }

        // Boundary control edges move to the encapsulates, once per pair.
        let endpoint = |name: &str| {
            cluster_of(name).map_or_else(|| name.to_string(), |cluster| ClusterId(cluster).function_name())
        };
        let expected_controls = control_edges(&original)
            .into_iter()
            .filter(|(src, dst)| {
                let src = cluster_of(src.as_str());
                src.is_none() || src != cluster_of(dst.as_str())
            })
            .map(|(src, dst)| (endpoint(src.as_str()), endpoint(dst.as_str())))
            .collect::<BTreeSet<_>>();
        let controls = control_edges(&graph);
        assert_eq!(controls.len(), expected_controls.len());
        assert_eq!(controls.iter().cloned().collect::<BTreeSet<_>>(), expected_controls);

        // Same input, same output.
        let (again, again_library, _) = encapsulate(&original);
        assert_eq!(data_edges(&again), data_edges(&graph));
        assert_eq!(control_edges(&again), controls);
        assert_eq!(again_library, library);
    }
}
