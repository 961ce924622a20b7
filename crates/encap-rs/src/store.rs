//! Per-cluster subgraph definitions under construction.
//!
//! A [`SubgraphStore`] is owned by whoever drives one compilation unit and is
//! lent to the encapsulation passes. Definitions are append-only: passes add
//! member copies and boundary placeholders, and later stages read them back.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterId;
use crate::graph::AttrValue;

/// Reference to a value or control dependency in node-definition wire form.
///
/// `name` reads output 0, `name:k` reads output `k`, `^name` orders after `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TensorRef {
    Output { node: String, slot: usize },
    Control { node: String },
}

impl TensorRef {
    pub fn output(node: impl Into<String>, slot: usize) -> Self {
        TensorRef::Output {
            node: node.into(),
            slot,
        }
    }

    pub fn control(node: impl Into<String>) -> Self {
        TensorRef::Control { node: node.into() }
    }

    /// Parses wire form. A suffix after `:` that is not a number is treated as part of the name.
    pub fn parse(text: &str) -> Self {
        if let Some(node) = text.strip_prefix('^') {
            return TensorRef::control(node);
        }
        if let Some((node, slot)) = text.rsplit_once(':') {
            if let Ok(slot) = slot.parse::<usize>() {
                return TensorRef::output(node, slot);
            }
        }
        TensorRef::output(text, 0)
    }

    pub fn node(&self) -> &str {
        match self {
            TensorRef::Output { node, .. } | TensorRef::Control { node } => node,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, TensorRef::Control { .. })
    }
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorRef::Output { node, slot: 0 } => f.write_str(node),
            TensorRef::Output { node, slot } => write!(f, "{node}:{slot}"),
            TensorRef::Control { node } => write!(f, "^{node}"),
        }
    }
}

/// Serializable copy of a node, with inputs spelled as [`TensorRef`] strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            device: String::new(),
            inputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn input_refs(&self) -> impl Iterator<Item = TensorRef> + '_ {
        self.inputs.iter().map(|input| TensorRef::parse(input))
    }

    /// Data inputs only, in position order.
    pub fn data_inputs(&self) -> impl Iterator<Item = TensorRef> + '_ {
        self.input_refs().filter(|input| !input.is_control())
    }
}

/// Why a definition is not self-contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureViolation {
    /// `node` reads `input`, which names no node of the definition.
    Dangling { node: String, input: String },
    /// More than one node is called `name`, so references to it are ambiguous.
    DuplicateName { name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphDef {
    pub nodes: Vec<NodeDef>,
}

impl SubgraphDef {
    pub fn push(&mut self, node: NodeDef) {
        self.nodes.push(node);
    }

    pub fn find(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn nodes_of_op<'a>(&'a self, op: &'a str) -> impl Iterator<Item = &'a NodeDef> + 'a {
        self.nodes.iter().filter(move |node| node.op == op)
    }

    /// Checks that node names are unique and every input names a node of
    /// this definition.
    pub fn validate_closed(&self) -> Result<(), ClosureViolation> {
        let mut names = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(ClosureViolation::DuplicateName {
                    name: node.name.clone(),
                });
            }
        }
        for node in &self.nodes {
            for input in &node.inputs {
                let reference = TensorRef::parse(input);
                if !names.contains(reference.node()) {
                    return Err(ClosureViolation::Dangling {
                        node: node.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubgraphStore {
    subgraphs: BTreeMap<ClusterId, SubgraphDef>,
}

impl SubgraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, cluster: ClusterId) -> &mut SubgraphDef {
        self.subgraphs.entry(cluster).or_default()
    }

    pub fn get(&self, cluster: ClusterId) -> Option<&SubgraphDef> {
        self.subgraphs.get(&cluster)
    }

    pub fn contains(&self, cluster: ClusterId) -> bool {
        self.subgraphs.contains_key(&cluster)
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.subgraphs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.subgraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subgraphs.is_empty()
    }
}
