use std::fmt;

use serde::{Deserialize, Serialize};

use crate::library::FunctionDef;

/// Opaque output of a backend compiler, attached verbatim to encapsulate nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub backend: String,
    pub bytes: Vec<u8>,
}

impl CompiledArtifact {
    pub fn new(backend: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            backend: backend.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Unimplemented { op: String, reason: String },
    InvalidInput { message: String },
    Compilation { message: String },
}

impl BackendError {
    pub fn unimplemented(op: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        BackendError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn compilation(message: impl Into<String>) -> Self {
        BackendError::Compilation {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::InvalidInput { message } => write!(f, "invalid compiler input: {message}"),
            BackendError::Compilation { message } => {
                write!(f, "backend compilation failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

pub type BackendResult<T> = Result<T, BackendError>;

/// Ahead-of-time compiler for one cluster body at fixed input shapes.
///
/// Calls are synchronous; the engine never retries a failed compile.
pub trait BackendCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// `input_shapes[i]` is the concrete shape of argument `i` of `function`.
    fn compile(
        &self,
        function: &FunctionDef,
        input_shapes: &[Vec<usize>],
    ) -> BackendResult<CompiledArtifact>;
}
