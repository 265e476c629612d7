//! Tapestry Weaver
//!
//! Load-time weaving of JVM classes. This crate provides:
//! - Structural descriptors of weave and candidate classes
//! - The violation catalogue and the matcher that reports it in full
//! - The merger that splices weave code into candidate classes
//! - Front-end adapters for weave classes written in other JVM languages
//! - Weave packages (weave.toml) and the engine that applies them

#![warn(rust_2018_idioms)]

pub mod adapter;
pub mod classpath;
pub mod engine;
pub mod error;
pub mod marker;
pub mod matcher;
pub mod merger;
pub mod model;
pub mod package;
pub mod scan;
pub mod side_table;
pub mod violation;

pub use adapter::{adapt_all, default_adapters, LanguageAdapter, ScalaAdapter};
pub use classpath::{ClassPath, LayeredClassPath, MemoryClassPath};
pub use engine::{
    FailureReason, LoadContext, PackageOutcome, PackageReport, WeaveEngine, WeaveFailure, WeaveOutcome, WeaveReport,
};
pub use error::{MergeError, MergeResult, PackageError};
pub use marker::{ClassMarker, FieldMarker, MatchStrategy, MethodMarker, ScalaKind};
pub use matcher::{MatchResult, Matcher, MAX_WEAVE_MAJOR_VERSION};
pub use merger::{side_table_key, MergeOptions, Merger, NewFieldStorage, RELOCATED_PREFIX};
pub use model::{ClassDescriptor, FieldDescriptor, MethodDescriptor};
pub use package::{
    ConfigError, FieldStorageKind, PackageStatus, PackageValidation, WeavePackage, WeavePackageConfig, WeaveRole,
    MANIFEST_FILE,
};
pub use side_table::{IdentityHandle, IdentityTable};
pub use violation::{Violation, ViolationKind};
