pub mod aot;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod encapsulate;
pub mod error;
pub mod graph;
pub mod library;
pub mod store;

pub use backend::{BackendCompiler, BackendError, CompiledArtifact};
pub use cluster::{AttrClusterAssignment, ClusterAssignment, ClusterId};
pub use config::{AotConfig, EncapsulateConfig, ShapeHintSet};
pub use encapsulate::{encapsulate_clusters, EncapsulateOutcome, Encapsulator};
pub use error::{EncapsulateError, EncapsulateResult};
pub use graph::{DType, Graph, NodeId, NodeSpec};
pub use library::{FunctionDef, FunctionLibrary};
pub use store::{SubgraphDef, SubgraphStore};
