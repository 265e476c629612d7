//! Attributes
//!
//! Every attribute is kept as its raw payload. The typed decoders below
//! read the handful of attributes the weaver inspects.

use crate::access::AccessFlags;
use crate::constant_pool::ConstantPool;
use crate::error::{ClassFormatError, ClassResult};
use crate::io::{ClassReader, ClassWriter};

/// Attribute names used by this crate
#[allow(missing_docs)]
pub mod names {
    pub const CODE: &str = "Code";
    pub const CONSTANT_VALUE: &str = "ConstantValue";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const SOURCE_FILE: &str = "SourceFile";
    pub const INNER_CLASSES: &str = "InnerClasses";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const SIGNATURE: &str = "Signature";
    pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
    pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
}

/// Raw attribute: name index plus uninterpreted payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Utf8 index of the attribute name
    pub name_index: u16,
    /// Payload bytes following the length field
    pub info: Vec<u8>,
}

impl Attribute {
    /// Build an attribute, interning its name
    pub fn new(pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> ClassResult<Self> {
        Ok(Self {
            name_index: pool.utf8_index(name)?,
            info,
        })
    }

    /// Attribute name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> ClassResult<&'p str> {
        pool.utf8(self.name_index)
    }

    /// Decode one attribute
    pub fn decode(reader: &mut ClassReader<'_>) -> ClassResult<Self> {
        let name_index = reader.read_u16()?;
        let len = reader.read_u32()? as usize;
        let info = reader.read_bytes(len)?.to_vec();
        Ok(Self { name_index, info })
    }

    /// Encode one attribute
    pub fn encode(&self, writer: &mut ClassWriter) {
        writer.write_u16(self.name_index);
        writer.write_u32(self.info.len() as u32);
        writer.write_bytes(&self.info);
    }

    /// Decode a `u2`-counted attribute table
    pub fn decode_table(reader: &mut ClassReader<'_>) -> ClassResult<Vec<Self>> {
        let count = reader.read_u16()?;
        (0..count).map(|_| Self::decode(reader)).collect()
    }

    /// Encode a `u2`-counted attribute table
    pub fn encode_table(attributes: &[Self], writer: &mut ClassWriter) {
        writer.write_u16(attributes.len() as u16);
        for attribute in attributes {
            attribute.encode(writer);
        }
    }
}

/// First attribute with the given name
pub fn find<'a>(attributes: &'a [Attribute], pool: &ConstantPool, name: &str) -> Option<&'a Attribute> {
    attributes
        .iter()
        .find(|attribute| attribute.name(pool).map(|n| n == name).unwrap_or(false))
}

/// Position of the first attribute with the given name
pub fn position(attributes: &[Attribute], pool: &ConstantPool, name: &str) -> Option<usize> {
    attributes
        .iter()
        .position(|attribute| attribute.name(pool).map(|n| n == name).unwrap_or(false))
}

/// Class names listed in an `Exceptions` attribute
pub fn decode_exceptions(info: &[u8], pool: &ConstantPool) -> ClassResult<Vec<String>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u16()?;
    let mut exceptions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        exceptions.push(pool.class_name(reader.read_u16()?)?.to_string());
    }
    Ok(exceptions)
}

/// File name in a `SourceFile` attribute
pub fn decode_source_file(info: &[u8], pool: &ConstantPool) -> ClassResult<String> {
    if info.len() != 2 {
        return Err(ClassFormatError::bad_attribute(names::SOURCE_FILE, "length is not 2"));
    }
    let mut reader = ClassReader::new(info);
    Ok(pool.utf8(reader.read_u16()?)?.to_string())
}

/// One row of an `InnerClasses` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    /// Internal name of the nested class
    pub inner: String,
    /// Enclosing class, absent for local and anonymous classes
    pub outer: Option<String>,
    /// Simple name, absent for anonymous classes
    pub simple_name: Option<String>,
    /// Flags as declared in source
    pub access: AccessFlags,
}

/// Rows of an `InnerClasses` attribute
pub fn decode_inner_classes(info: &[u8], pool: &ConstantPool) -> ClassResult<Vec<InnerClass>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u16()?;
    let mut rows = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inner = pool.class_name(reader.read_u16()?)?.to_string();
        let outer = match reader.read_u16()? {
            0 => None,
            index => Some(pool.class_name(index)?.to_string()),
        };
        let simple_name = match reader.read_u16()? {
            0 => None,
            index => Some(pool.utf8(index)?.to_string()),
        };
        let access = AccessFlags(reader.read_u16()?);
        rows.push(InnerClass {
            inner,
            outer,
            simple_name,
            access,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceptions_attribute() {
        let mut pool = ConstantPool::new();
        let io = pool.class_index("java/io/IOException").unwrap();
        let mut writer = ClassWriter::new();
        writer.write_u16(1);
        writer.write_u16(io);
        let exceptions = decode_exceptions(writer.buffer(), &pool).unwrap();
        assert_eq!(exceptions, vec!["java/io/IOException".to_string()]);
    }

    #[test]
    fn test_find_by_name() {
        let mut pool = ConstantPool::new();
        let attrs = vec![
            Attribute::new(&mut pool, names::SIGNATURE, vec![0, 1]).unwrap(),
            Attribute::new(&mut pool, names::SOURCE_FILE, vec![0, 2]).unwrap(),
        ];
        assert_eq!(position(&attrs, &pool, names::SOURCE_FILE), Some(1));
        assert!(find(&attrs, &pool, names::CODE).is_none());
    }
}
