use thiserror::Error;

use crate::backend::BackendError;
use crate::cluster::ClusterId;
use crate::graph::{GraphError, NodeId, ShapeMismatch};
use crate::library::LibraryError;

/// Every way an encapsulation pass can stop. None of them are recoverable:
/// a partially rewritten graph must not be executed.
#[derive(Debug, Error)]
pub enum EncapsulateError {
    #[error(
        "node '{node}' in cluster {cluster} has assigned device '{device}' but another node \
         with assigned device '{expected}' has already been seen in the same cluster"
    )]
    PlacementMismatch {
        node: String,
        cluster: ClusterId,
        device: String,
        expected: String,
    },
    #[error("encapsulator protocol violation: {0}")]
    ProtocolOrder(&'static str),
    #[error(
        "edge census mismatch: categorised {computed} edges but the graph has {total} \
         ({census})"
    )]
    EdgeCensus {
        computed: usize,
        total: usize,
        census: String,
    },
    #[error("data edge into '{node}' input {slot} has no value type")]
    UntypedEdge { node: String, slot: usize },
    #[error("no encapsulate node was created for cluster {0}")]
    MissingEncapsulate(ClusterId),
    #[error("subgraph store already holds a body for cluster {0}")]
    ClusterAlreadyMaterialized(ClusterId),
    #[error("subgraph for cluster {cluster} is not closed: '{node}' reads unknown input '{input}'")]
    OpenSubgraph {
        cluster: ClusterId,
        node: String,
        input: String,
    },
    #[error("subgraph for cluster {cluster} defines '{name}' more than once")]
    AmbiguousSubgraphName { cluster: ClusterId, name: String },
    #[error("output {slot} of {producer} leaves its cluster but has no return slot")]
    UnassignedReturn { producer: NodeId, slot: usize },
    #[error("device config key '{0}' would overwrite an encapsulate contract attribute")]
    ReservedDeviceConfig(String),
    #[error("graph already contains a node named '{0}', cannot create encapsulate node")]
    EncapsulateNameTaken(String),
    #[error("passed shape hint for node '{node}' but there is no graph input with that name")]
    UnknownHintNode { node: String },
    #[error("cannot AOT using hint ({hint}): shape of '{node}' conflicts with hint: {source}")]
    ShapeHintConflict {
        node: String,
        hint: String,
        #[source]
        source: ShapeMismatch,
    },
    #[error("cannot AOT using hint ({hint}): '{node}' could not be concretized")]
    NotConcretized { node: String, hint: String },
    #[error("AOT requested, but encapsulate '{node}' has static inputs {inputs:?}, which is not supported")]
    StaticInputs { node: String, inputs: Vec<i64> },
    #[error("AOT requested, but encapsulate '{node}' has non-concrete input {slot} (fed by '{producer}')")]
    NonConcreteInput {
        node: String,
        slot: usize,
        producer: String,
    },
    #[error("AOT requested, but no function body is registered for '{0}'")]
    MissingFunction(String),
    #[error("backend '{backend}' failed to compile '{node}': {source}")]
    Compile {
        node: String,
        backend: String,
        #[source]
        source: BackendError,
    },
    #[error("AOT requested without a backend compiler")]
    NoCompiler,
    #[error("requested AOT, but did not perform AOT on '{0}'")]
    AotIncomplete(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error("failed to serialize function '{function}': {source}")]
    Serialize {
        function: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type EncapsulateResult<T> = Result<T, EncapsulateError>;
