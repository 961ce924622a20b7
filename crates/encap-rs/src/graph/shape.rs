use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single axis extent of a partially known shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Static(usize),
    Unknown,
}

impl Dim {
    pub fn as_static(self) -> Option<usize> {
        match self {
            Dim::Static(value) => Some(value),
            Dim::Unknown => None,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Static(value)
    }
}

impl From<Option<usize>> for Dim {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Dim::Unknown, Dim::Static)
    }
}

/// Shape as declared on a graph node: rank may be unknown, and so may any axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PartialShape {
    dims: Option<Vec<Dim>>,
}

/// Reasons a declared shape and a concrete hint cannot be merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeMismatch {
    #[error("rank mismatch: declared rank {declared} but hint has rank {hint}")]
    Rank { declared: usize, hint: usize },
    #[error("dimension {axis} is declared as {declared} but hint says {hint}")]
    Dim {
        axis: usize,
        declared: usize,
        hint: usize,
    },
}

impl PartialShape {
    /// Shape whose rank is not known.
    pub fn unknown_rank() -> Self {
        Self { dims: None }
    }

    pub fn new<I, D>(dims: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dim>,
    {
        Self {
            dims: Some(dims.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Self::new(dims.iter().copied())
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    /// Unknown rank and rank zero both carry no per-axis information.
    pub fn is_empty(&self) -> bool {
        self.rank().unwrap_or(0) == 0
    }

    /// Returns static dimensions when the rank and every axis are known.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims
            .as_ref()?
            .iter()
            .map(|dim| dim.as_static())
            .collect()
    }

    /// Fills unknown axes from `hint`; known axes must agree with it.
    pub fn concretize(&self, hint: &[usize]) -> Result<Vec<usize>, ShapeMismatch> {
        let Some(dims) = self.dims.as_ref() else {
            return Ok(hint.to_vec());
        };
        if dims.len() != hint.len() {
            return Err(ShapeMismatch::Rank {
                declared: dims.len(),
                hint: hint.len(),
            });
        }
        dims.iter()
            .zip(hint)
            .enumerate()
            .map(|(axis, (dim, &hinted))| match dim {
                Dim::Unknown => Ok(hinted),
                Dim::Static(declared) if *declared == hinted => Ok(hinted),
                Dim::Static(declared) => Err(ShapeMismatch::Dim {
                    axis,
                    declared: *declared,
                    hint: hinted,
                }),
            })
            .collect()
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = self.dims.as_ref() else {
            return f.write_str("[...]");
        };
        f.write_str("[")?;
        for (idx, dim) in dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            match dim {
                Dim::Static(value) => write!(f, "{value}")?,
                Dim::Unknown => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}
