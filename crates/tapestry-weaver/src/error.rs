//! Weaver errors

use thiserror::Error;

use tapestry_classfile::{AssembleError, ClassFormatError};

use crate::violation::Violation;

pub type MergeResult<T> = Result<T, MergeError>;

/// Failure to apply a validated weave
///
/// Reaching any of these means the candidate is left untouched.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{method} uses unsupported instruction {mnemonic}")]
    UnsupportedInstruction { method: String, mnemonic: &'static str },

    #[error("{method} has no body")]
    MissingBody { method: String },

    #[error("field {name} already exists on {class}")]
    FieldCollision { class: String, name: String },

    #[error("method {name}{descriptor} already exists on {class}")]
    MethodCollision {
        class: String,
        name: String,
        descriptor: String,
    },

    #[error("{method} branches but carries no stack map frames for a class that needs them")]
    MissingFrames { method: String },

    #[error("weave cannot be applied: {} violation(s)", .0.len())]
    Precondition(Vec<Violation>),

    #[error("failed to assemble {method}: {source}")]
    Assemble {
        method: String,
        #[source]
        source: AssembleError,
    },

    #[error(transparent)]
    ClassFormat(#[from] ClassFormatError),
}

impl MergeError {
    pub(crate) fn assemble(method: impl Into<String>, source: AssembleError) -> Self {
        MergeError::Assemble {
            method: method.into(),
            source,
        }
    }
}

/// Failure to load a weave package
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid weave class {path}: {source}")]
    ClassFormat {
        path: String,
        #[source]
        source: ClassFormatError,
    },

    #[error(transparent)]
    Config(#[from] crate::package::ConfigError),
}
