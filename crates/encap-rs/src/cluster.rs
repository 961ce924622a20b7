use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::{Graph, Node, NodeId};

/// Node attribute the marking heuristic uses to record cluster membership.
pub const ATTR_CLUSTER: &str = "_cluster";

/// Identifier of a cluster. Negative ids are reserved for "no cluster".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub i64);

impl ClusterId {
    /// Name used for the encapsulate node and the library function of this cluster.
    pub fn function_name(self) -> String {
        format!("cluster_{}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of per-node cluster membership.
///
/// Implementations must answer consistently for the duration of one
/// encapsulation pass.
pub trait ClusterAssignment {
    fn cluster_of(&self, graph: &Graph, node: &Node) -> Option<ClusterId>;
}

/// Reads membership from the [`ATTR_CLUSTER`] node attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrClusterAssignment;

impl ClusterAssignment for AttrClusterAssignment {
    fn cluster_of(&self, _graph: &Graph, node: &Node) -> Option<ClusterId> {
        node.attr(ATTR_CLUSTER)
            .and_then(|value| value.as_i64())
            .filter(|id| *id >= 0)
            .map(ClusterId)
    }
}

impl ClusterAssignment for HashMap<NodeId, ClusterId> {
    fn cluster_of(&self, _graph: &Graph, node: &Node) -> Option<ClusterId> {
        self.get(&node.id()).copied().filter(|id| id.0 >= 0)
    }
}
