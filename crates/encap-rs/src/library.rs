//! Callable function definitions derived from cluster subgraphs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::DType;
use crate::store::{ClosureViolation, NodeDef, SubgraphDef, TensorRef};

/// Boundary-input placeholder op.
pub const OP_ARG: &str = "_Arg";
/// Boundary-output placeholder op.
pub const OP_RETVAL: &str = "_Retval";
/// Value type of a placeholder.
pub const ATTR_TYPE: &str = "T";
/// Positional slot of a placeholder.
pub const ATTR_INDEX: &str = "index";
/// Name of the external producer an argument was cut from.
pub const ATTR_PROV_TAG: &str = "_prov_tag";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    #[error("function '{function}': node '{node}' reads '{input}', which is not defined in the body")]
    Dangling {
        function: String,
        node: String,
        input: String,
    },
    #[error("function '{function}': more than one body node is named '{node}'")]
    AmbiguousName { function: String, node: String },
    #[error("function '{function}': placeholder '{node}' is missing attribute '{attr}'")]
    MissingPlaceholderAttr {
        function: String,
        node: String,
        attr: &'static str,
    },
    #[error("function '{function}': {kind} slots are not dense (expected index {expected}, found {found})")]
    SparseSlots {
        function: String,
        kind: &'static str,
        expected: usize,
        found: i64,
    },
    #[error("function '{function}': return placeholder '{node}' must have exactly one data input")]
    MalformedRetval { function: String, node: String },
    #[error("function '{0}' is already defined in the library")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub name: String,
    pub dtype: DType,
    /// Body value returned through this slot, in [`TensorRef`] wire form.
    pub source: String,
}

/// A named, independently callable body with positional arguments and results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub results: Vec<FunctionResult>,
    pub body: Vec<NodeDef>,
}

impl FunctionDef {
    /// Converts a closed subgraph into a function, ordering placeholders by slot index.
    pub fn from_subgraph(
        name: impl Into<String>,
        subgraph: &SubgraphDef,
    ) -> Result<Self, LibraryError> {
        let name = name.into();
        subgraph
            .validate_closed()
            .map_err(|violation| match violation {
                ClosureViolation::Dangling { node, input } => LibraryError::Dangling {
                    function: name.clone(),
                    node,
                    input,
                },
                ClosureViolation::DuplicateName { name: node } => LibraryError::AmbiguousName {
                    function: name.clone(),
                    node,
                },
            })?;

        let args = ordered_placeholders(&name, subgraph, OP_ARG, "argument")?
            .into_iter()
            .map(|(node, dtype)| FunctionArg {
                name: node.name.clone(),
                dtype,
            })
            .collect();

        let mut results = Vec::new();
        for (node, dtype) in ordered_placeholders(&name, subgraph, OP_RETVAL, "result")? {
            let mut data = node.data_inputs();
            let (Some(source), None) = (data.next(), data.next()) else {
                return Err(LibraryError::MalformedRetval {
                    function: name.clone(),
                    node: node.name.clone(),
                });
            };
            results.push(FunctionResult {
                name: node.name.clone(),
                dtype,
                source: source.to_string(),
            });
        }

        let body = subgraph
            .nodes
            .iter()
            .filter(|node| node.op != OP_ARG && node.op != OP_RETVAL)
            .cloned()
            .collect();

        Ok(Self {
            name,
            args,
            results,
            body,
        })
    }

    pub fn arg_index(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|arg| arg.name == name)
    }

    /// Looks up a body node by name.
    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.body.iter().find(|node| node.name == name)
    }

    /// Splits a reference into the body-node or argument it names.
    pub fn resolve(&self, reference: &TensorRef) -> Option<ValueSource<'_>> {
        if let Some(index) = self.arg_index(reference.node()) {
            return Some(ValueSource::Arg(index));
        }
        self.node(reference.node()).map(ValueSource::Node)
    }
}

/// What a [`TensorRef`] inside a function body resolves to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueSource<'a> {
    Arg(usize),
    Node(&'a NodeDef),
}

fn ordered_placeholders<'a>(
    function: &str,
    subgraph: &'a SubgraphDef,
    op: &'a str,
    kind: &'static str,
) -> Result<Vec<(&'a NodeDef, DType)>, LibraryError> {
    let missing = |node: &NodeDef, attr| LibraryError::MissingPlaceholderAttr {
        function: function.to_string(),
        node: node.name.clone(),
        attr,
    };
    let mut slots = Vec::new();
    for node in subgraph.nodes_of_op(op) {
        let index = node
            .attr(ATTR_INDEX)
            .and_then(|value| value.as_i64())
            .ok_or_else(|| missing(node, ATTR_INDEX))?;
        let dtype = node
            .attr(ATTR_TYPE)
            .and_then(|value| value.as_type())
            .ok_or_else(|| missing(node, ATTR_TYPE))?;
        slots.push((index, node, dtype));
    }
    slots.sort_by_key(|(index, _, _)| *index);
    for (expected, (index, _, _)) in slots.iter().enumerate() {
        if *index != expected as i64 {
            return Err(LibraryError::SparseSlots {
                function: function.to_string(),
                kind,
                expected,
                found: *index,
            });
        }
    }
    Ok(slots
        .into_iter()
        .map(|(_, node, dtype)| (node, dtype))
        .collect())
}

/// Name-keyed collection of callable cluster bodies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, FunctionDef>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, function: FunctionDef) -> Result<(), LibraryError> {
        if self.functions.contains_key(&function.name) {
            return Err(LibraryError::Duplicate(function.name));
        }
        self.functions.insert(function.name.clone(), function);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.functions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionDef> + '_ {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
