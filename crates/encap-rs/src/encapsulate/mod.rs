//! Cluster encapsulation: boundary analysis, subgraph materialization and
//! graph rewriting.
//!
//! The passes run in a fixed order on one graph: [`Encapsulator::analysis_pass`]
//! scans the graph without mutating it and fills the subgraph store, then
//! [`Encapsulator::rewrite_pass`] replaces every cluster with a single
//! encapsulate node. Each pass runs at most once per encapsulator.

mod analysis;
mod materialize;
mod rewrite;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::aot::{perform_aot, AotReport};
use crate::backend::BackendCompiler;
use crate::cluster::{ClusterAssignment, ClusterId};
use crate::config::EncapsulateConfig;
use crate::error::{EncapsulateError, EncapsulateResult};
use crate::graph::{Graph, NodeId};
use crate::library::FunctionLibrary;
use crate::store::SubgraphStore;

pub use analysis::{analyze, ArgSlot, BoundaryAnalysis, EdgeCensus, ReturnSlot};
pub use materialize::{
    arg_name, materialize, retval_name, static_input_slots, ATTR_STATIC_INPUT_INDICES,
};
pub use rewrite::rewrite;

/// Op of the node standing in for a whole cluster.
pub const OP_ENCAPSULATE: &str = "Encapsulate";
pub const ATTR_ENCAP_CLUSTER: &str = "cluster";
pub const ATTR_GRAPH_ID: &str = "graph_id";
/// Positional argument types of an encapsulate node.
pub const ATTR_TARGUMENTS: &str = "Targuments";
/// Positional result types of an encapsulate node.
pub const ATTR_TRESULTS: &str = "Tresults";
/// Argument slots that must be fed by compile-time constants.
pub const ATTR_STATIC_INPUTS: &str = "_static_inputs";

/// Drives the analysis and rewrite passes over one graph.
pub struct Encapsulator<'g> {
    graph: &'g mut Graph,
    analysis: Option<BoundaryAnalysis>,
    rewrite_done: bool,
    encapsulates: BTreeMap<ClusterId, NodeId>,
}

impl<'g> Encapsulator<'g> {
    pub fn new(graph: &'g mut Graph) -> Self {
        Self {
            graph,
            analysis: None,
            rewrite_done: false,
            encapsulates: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Result of the analysis pass, once it has run.
    pub fn analysis(&self) -> Option<&BoundaryAnalysis> {
        self.analysis.as_ref()
    }

    /// Encapsulate node of each cluster; empty until the rewrite pass succeeds.
    pub fn encapsulates(&self) -> &BTreeMap<ClusterId, NodeId> {
        &self.encapsulates
    }

    pub fn analysis_pass<A>(
        &mut self,
        assignment: &A,
        store: &mut SubgraphStore,
    ) -> EncapsulateResult<()>
    where
        A: ClusterAssignment + ?Sized,
    {
        if self.rewrite_done {
            return Err(EncapsulateError::ProtocolOrder(
                "analysis pass requested after rewrite pass",
            ));
        }
        if self.analysis.is_some() {
            return Err(EncapsulateError::ProtocolOrder(
                "analysis pass requested twice",
            ));
        }

        debug!(
            nodes = self.graph.num_nodes(),
            edges = self.graph.num_edges(),
            "starting analysis pass"
        );
        let analysis = analyze(self.graph, assignment)?;
        materialize(self.graph, &analysis, store)?;
        self.analysis = Some(analysis);
        Ok(())
    }

    pub fn rewrite_pass(
        &mut self,
        store: &SubgraphStore,
        library: &mut FunctionLibrary,
        config: &EncapsulateConfig,
    ) -> EncapsulateResult<()> {
        if self.rewrite_done {
            return Err(EncapsulateError::ProtocolOrder(
                "rewrite pass requested twice",
            ));
        }
        let Some(analysis) = self.analysis.as_ref() else {
            return Err(EncapsulateError::ProtocolOrder(
                "rewrite pass requested before analysis pass",
            ));
        };

        self.rewrite_done = true;
        debug!(graph_id = config.graph_id, "starting rewrite pass");
        self.encapsulates = rewrite(self.graph, analysis, store, library, config)?;
        Ok(())
    }

    /// Clusters found by the analysis pass.
    pub fn new_cluster_ids(&self) -> EncapsulateResult<BTreeSet<ClusterId>> {
        let analysis = self.analysis.as_ref().ok_or(EncapsulateError::ProtocolOrder(
            "cluster ids requested before analysis pass",
        ))?;
        Ok(analysis.clusters().collect())
    }
}

/// What a full encapsulation run produced.
#[derive(Debug, Clone, Default)]
pub struct EncapsulateOutcome {
    pub encapsulates: BTreeMap<ClusterId, NodeId>,
    pub census: EdgeCensus,
    /// Present only when AOT was requested.
    pub aot: Option<AotReport>,
}

/// Runs analysis, rewrite and, when requested by `config`, AOT specialization.
pub fn encapsulate_clusters<A>(
    graph: &mut Graph,
    assignment: &A,
    store: &mut SubgraphStore,
    library: &mut FunctionLibrary,
    config: &EncapsulateConfig,
    compiler: Option<&dyn BackendCompiler>,
) -> EncapsulateResult<EncapsulateOutcome>
where
    A: ClusterAssignment + ?Sized,
{
    let (encapsulates, census) = {
        let mut encapsulator = Encapsulator::new(graph);
        encapsulator.analysis_pass(assignment, store)?;
        encapsulator.rewrite_pass(store, library, config)?;
        let census = encapsulator
            .analysis()
            .map(BoundaryAnalysis::census)
            .unwrap_or_default();
        (encapsulator.encapsulates, census)
    };

    let aot = if config.aot.requested {
        Some(perform_aot(graph, library, &config.aot, compiler)?)
    } else {
        None
    };
    Ok(EncapsulateOutcome {
        encapsulates,
        census,
        aot,
    })
}
