//! Errors raised while reading or writing class files

use thiserror::Error;

/// Result alias for container operations
pub type ClassResult<T> = Result<T, ClassFormatError>;

/// The byte stream is not a well-formed compiled class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFormatError {
    /// Magic number is not `0xCAFEBABE`
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// Major version outside the supported range
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version
        major: u16,
        /// Minor version
        minor: u16,
    },

    /// Input ended before a complete structure could be read
    #[error("unexpected end of class data at offset {0}")]
    UnexpectedEnd(usize),

    /// Unknown constant pool tag
    #[error("invalid constant pool tag {tag} at index {index}")]
    BadConstantTag {
        /// Tag byte
        tag: u8,
        /// Pool index
        index: u16,
    },

    /// Index does not refer to a constant of the expected kind
    #[error("constant pool index {index} is not a {expected}")]
    BadConstantIndex {
        /// Pool index
        index: u16,
        /// Expected constant kind
        expected: &'static str,
    },

    /// Constant kind that cannot be copied into another pool
    #[error("constant pool entry {index} (tag {tag}) cannot be imported")]
    Unimportable {
        /// Pool index in the source pool
        index: u16,
        /// Tag byte
        tag: u8,
    },

    /// Bytes remain after the last attribute
    #[error("{0} trailing bytes after class data")]
    TrailingBytes(usize),

    /// Field or method descriptor does not parse
    #[error("invalid descriptor `{0}`")]
    InvalidDescriptor(String),

    /// More than 65535 pool slots
    #[error("constant pool exceeds 65535 entries")]
    PoolOverflow,

    /// Attribute payload does not match its declared layout
    #[error("malformed {name} attribute: {reason}")]
    BadAttribute {
        /// Attribute name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Unknown or truncated instruction
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode {
        /// Opcode byte
        opcode: u8,
        /// Offset within the code array
        offset: usize,
    },
}

impl ClassFormatError {
    pub(crate) fn bad_attribute(name: &str, reason: impl Into<String>) -> Self {
        ClassFormatError::BadAttribute {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
