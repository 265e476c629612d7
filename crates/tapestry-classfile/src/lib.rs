//! JVM class file container support
//!
//! This crate parses compiled classes into a structural shell that can be
//! written back byte for byte, and decodes method bodies into a label-based
//! instruction list that survives insertion and removal of instructions.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod analysis;
pub mod annotation;
pub mod attribute;
pub mod builder;
pub mod class;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod import;
pub mod io;
pub mod opcode;

pub use access::AccessFlags;
pub use annotation::{Annotation, ElementValue};
pub use attribute::Attribute;
pub use builder::{ClassBuilder, CodeBuilder};
pub use class::{ClassFile, MemberInfo, MAGIC, MAX_MAJOR_VERSION, MIN_MAJOR_VERSION};
pub use code::{AssembleError, Handler, Insn, Label, MethodBody, MethodContext};
pub use constant_pool::{Constant, ConstantPool, MemberRef, RefKind};
pub use descriptor::{FieldType, MethodType, ReturnType, ValueKind};
pub use error::{ClassFormatError, ClassResult};
pub use frame::{Frame, VerificationType};
pub use import::PoolImporter;
pub use io::{ClassReader, ClassWriter};
pub use opcode::Opcode;
