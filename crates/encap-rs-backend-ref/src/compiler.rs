use std::collections::{BTreeSet, HashMap};

use encap_rs::backend::{BackendCompiler, BackendError, BackendResult, CompiledArtifact};
use encap_rs::library::{FunctionDef, ValueSource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hashing::Fingerprint;

pub const BACKEND_NAME: &str = "ref";

/// One body node in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub node: String,
    pub op: String,
    pub inputs: Vec<String>,
}

/// Artifact payload produced by [`RefCompiler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefPlan {
    pub function: String,
    pub input_shapes: Vec<Vec<usize>>,
    pub schedule: Vec<PlanStep>,
    pub results: Vec<String>,
    pub fingerprint: u64,
}

impl RefPlan {
    pub fn to_bytes(&self) -> BackendResult<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|err| BackendError::compilation(format!("failed to encode plan: {err}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> BackendResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|err| BackendError::invalid_input(format!("failed to decode plan: {err}")))
    }
}

/// Reference compiler: validates a cluster function and records a
/// deterministic topological schedule for it.
#[derive(Debug, Clone, Default)]
pub struct RefCompiler {
    rejected_ops: BTreeSet<String>,
}

impl RefCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes compilation fail with `Unimplemented` whenever `op` appears in a body.
    pub fn with_rejected_op(mut self, op: impl Into<String>) -> Self {
        self.rejected_ops.insert(op.into());
        self
    }

    pub fn plan(&self, function: &FunctionDef, input_shapes: &[Vec<usize>]) -> BackendResult<RefPlan> {
        if input_shapes.len() != function.args.len() {
            return Err(BackendError::invalid_input(format!(
                "function '{}' takes {} arguments but {} shapes were supplied",
                function.name,
                function.args.len(),
                input_shapes.len()
            )));
        }
        if let Some(node) = function
            .body
            .iter()
            .find(|node| self.rejected_ops.contains(&node.op))
        {
            return Err(BackendError::unimplemented(
                node.op.clone(),
                format!("reference backend cannot compile node '{}'", node.name),
            ));
        }

        let schedule = schedule(function)?;
        let results = function
            .results
            .iter()
            .map(|result| result.source.clone())
            .collect::<Vec<_>>();

        let mut fingerprint = Fingerprint::new();
        fingerprint.write_str(&function.name);
        for step in &schedule {
            fingerprint.write_str(&step.node);
            fingerprint.write_str(&step.op);
        }
        for shape in input_shapes {
            fingerprint.write_usize(shape.len());
            for dim in shape {
                fingerprint.write_usize(*dim);
            }
        }

        Ok(RefPlan {
            function: function.name.clone(),
            input_shapes: input_shapes.to_vec(),
            schedule,
            results,
            fingerprint: fingerprint.finish(),
        })
    }
}

impl BackendCompiler for RefCompiler {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn compile(
        &self,
        function: &FunctionDef,
        input_shapes: &[Vec<usize>],
    ) -> BackendResult<CompiledArtifact> {
        let plan = self.plan(function, input_shapes)?;
        debug!(
            function = %plan.function,
            steps = plan.schedule.len(),
            fingerprint = plan.fingerprint,
            "compiled reference plan"
        );
        Ok(CompiledArtifact::new(BACKEND_NAME, plan.to_bytes()?))
    }
}

/// Kahn's algorithm over body nodes; ties break by body position.
fn schedule(function: &FunctionDef) -> BackendResult<Vec<PlanStep>> {
    let position = function
        .body
        .iter()
        .enumerate()
        .map(|(index, node)| (node.name.as_str(), index))
        .collect::<HashMap<_, _>>();

    let mut pending = vec![0usize; function.body.len()];
    let mut users = vec![Vec::new(); function.body.len()];
    for (index, node) in function.body.iter().enumerate() {
        for input in node.input_refs() {
            match function.resolve(&input) {
                Some(ValueSource::Arg(_)) => {}
                Some(ValueSource::Node(producer)) => {
                    let producer = position[producer.name.as_str()];
                    pending[index] += 1;
                    users[producer].push(index);
                }
                None => {
                    return Err(BackendError::invalid_input(format!(
                        "node '{}' reads unknown value '{input}'",
                        node.name
                    )));
                }
            }
        }
    }

    let mut ready = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| index)
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(function.body.len());
    while let Some(index) = ready.pop_first() {
        order.push(index);
        for &user in &users[index] {
            pending[user] -= 1;
            if pending[user] == 0 {
                ready.insert(user);
            }
        }
    }
    if order.len() != function.body.len() {
        return Err(BackendError::compilation(format!(
            "function '{}' has a dependency cycle",
            function.name
        )));
    }

    Ok(order
        .into_iter()
        .map(|index| {
            let node = &function.body[index];
            PlanStep {
                node: node.name.clone(),
                op: node.op.clone(),
                inputs: node.inputs.clone(),
            }
        })
        .collect())
}
