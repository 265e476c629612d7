//! Runtime annotations
//!
//! Decoding and encoding of `RuntimeVisibleAnnotations` and
//! `RuntimeInvisibleAnnotations` payloads.

use crate::constant_pool::{Constant, ConstantPool};
use crate::error::{ClassFormatError, ClassResult};
use crate::io::{ClassReader, ClassWriter};

/// One annotation instance
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Type descriptor, e.g. `Ljava/lang/Deprecated;`
    pub type_descriptor: String,
    /// Element name/value pairs in declaration order
    pub elements: Vec<(String, ElementValue)>,
}

/// Value of an annotation element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// `B`, `C`, `I`, `S` and `Z` constants
    Int {
        /// Element tag
        tag: u8,
        /// Value
        value: i32,
    },
    /// `J`
    Long(i64),
    /// `F`
    Float(f32),
    /// `D`
    Double(f64),
    /// `s`
    String(String),
    /// `e`
    Enum {
        /// Enum type descriptor
        type_descriptor: String,
        /// Constant name
        name: String,
    },
    /// `c`, holding a return descriptor
    Class(String),
    /// `@`
    Annotation(Box<Annotation>),
    /// `[`
    Array(Vec<ElementValue>),
}

impl ElementValue {
    /// String constant, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ElementValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Enum constant name, if this is one
    pub fn as_enum_name(&self) -> Option<&str> {
        match self {
            ElementValue::Enum { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Elements of an array value; a single value counts as a one-element array
    pub fn as_list(&self) -> Vec<&ElementValue> {
        match self {
            ElementValue::Array(values) => values.iter().collect(),
            other => vec![other],
        }
    }

    fn decode(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> ClassResult<Self> {
        let tag = reader.read_u8()?;
        let value = match tag {
            b'B' | b'C' | b'I' | b'S' | b'Z' => match pool.get(reader.read_u16()?)? {
                Constant::Integer(value) => ElementValue::Int { tag, value: *value },
                _ => return Err(bad("integer element does not reference an Integer")),
            },
            b'J' => match pool.get(reader.read_u16()?)? {
                Constant::Long(value) => ElementValue::Long(*value),
                _ => return Err(bad("long element does not reference a Long")),
            },
            b'F' => match pool.get(reader.read_u16()?)? {
                Constant::Float(bits) => ElementValue::Float(f32::from_bits(*bits)),
                _ => return Err(bad("float element does not reference a Float")),
            },
            b'D' => match pool.get(reader.read_u16()?)? {
                Constant::Double(bits) => ElementValue::Double(f64::from_bits(*bits)),
                _ => return Err(bad("double element does not reference a Double")),
            },
            b's' => ElementValue::String(pool.utf8(reader.read_u16()?)?.to_string()),
            b'e' => ElementValue::Enum {
                type_descriptor: pool.utf8(reader.read_u16()?)?.to_string(),
                name: pool.utf8(reader.read_u16()?)?.to_string(),
            },
            b'c' => ElementValue::Class(pool.utf8(reader.read_u16()?)?.to_string()),
            b'@' => ElementValue::Annotation(Box::new(Annotation::decode(reader, pool)?)),
            b'[' => {
                let count = reader.read_u16()?;
                let values = (0..count)
                    .map(|_| ElementValue::decode(reader, pool))
                    .collect::<ClassResult<Vec<_>>>()?;
                ElementValue::Array(values)
            }
            other => return Err(bad(format!("unknown element tag {}", other))),
        };
        Ok(value)
    }

    fn encode(&self, pool: &mut ConstantPool, writer: &mut ClassWriter) -> ClassResult<()> {
        match self {
            ElementValue::Int { tag, value } => {
                writer.write_u8(*tag);
                writer.write_u16(pool.integer_index(*value)?);
            }
            ElementValue::Long(value) => {
                writer.write_u8(b'J');
                writer.write_u16(pool.add(Constant::Long(*value))?);
            }
            ElementValue::Float(value) => {
                writer.write_u8(b'F');
                writer.write_u16(pool.add(Constant::Float(value.to_bits()))?);
            }
            ElementValue::Double(value) => {
                writer.write_u8(b'D');
                writer.write_u16(pool.add(Constant::Double(value.to_bits()))?);
            }
            ElementValue::String(value) => {
                writer.write_u8(b's');
                writer.write_u16(pool.utf8_index(value)?);
            }
            ElementValue::Enum {
                type_descriptor,
                name,
            } => {
                writer.write_u8(b'e');
                writer.write_u16(pool.utf8_index(type_descriptor)?);
                writer.write_u16(pool.utf8_index(name)?);
            }
            ElementValue::Class(descriptor) => {
                writer.write_u8(b'c');
                writer.write_u16(pool.utf8_index(descriptor)?);
            }
            ElementValue::Annotation(annotation) => {
                writer.write_u8(b'@');
                annotation.encode(pool, writer)?;
            }
            ElementValue::Array(values) => {
                writer.write_u8(b'[');
                writer.write_u16(values.len() as u16);
                for value in values {
                    value.encode(pool, writer)?;
                }
            }
        }
        Ok(())
    }
}

fn bad(reason: impl Into<String>) -> ClassFormatError {
    ClassFormatError::bad_attribute("annotation", reason)
}

impl Annotation {
    /// Annotation without elements
    pub fn marker(type_descriptor: impl Into<String>) -> Self {
        Self {
            type_descriptor: type_descriptor.into(),
            elements: Vec::new(),
        }
    }

    /// Add an element, builder style
    pub fn with(mut self, name: impl Into<String>, value: ElementValue) -> Self {
        self.elements.push((name.into(), value));
        self
    }

    /// Internal name of the annotation type
    pub fn type_name(&self) -> &str {
        self.type_descriptor
            .strip_prefix('L')
            .and_then(|rest| rest.strip_suffix(';'))
            .unwrap_or(&self.type_descriptor)
    }

    /// Value of a named element
    pub fn element(&self, name: &str) -> Option<&ElementValue> {
        self.elements
            .iter()
            .find(|(element, _)| element == name)
            .map(|(_, value)| value)
    }

    fn decode(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> ClassResult<Self> {
        let type_descriptor = pool.utf8(reader.read_u16()?)?.to_string();
        let count = reader.read_u16()?;
        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = pool.utf8(reader.read_u16()?)?.to_string();
            elements.push((name, ElementValue::decode(reader, pool)?));
        }
        Ok(Self {
            type_descriptor,
            elements,
        })
    }

    fn encode(&self, pool: &mut ConstantPool, writer: &mut ClassWriter) -> ClassResult<()> {
        writer.write_u16(pool.utf8_index(&self.type_descriptor)?);
        writer.write_u16(self.elements.len() as u16);
        for (name, value) in &self.elements {
            writer.write_u16(pool.utf8_index(name)?);
            value.encode(pool, writer)?;
        }
        Ok(())
    }
}

/// Decode an annotations attribute payload
pub fn decode_annotations(info: &[u8], pool: &ConstantPool) -> ClassResult<Vec<Annotation>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u16()?;
    let annotations = (0..count)
        .map(|_| Annotation::decode(&mut reader, pool))
        .collect::<ClassResult<Vec<_>>>()?;
    if reader.has_more() {
        return Err(bad("trailing bytes"));
    }
    Ok(annotations)
}

/// Encode an annotations attribute payload, interning names into `pool`
pub fn encode_annotations(annotations: &[Annotation], pool: &mut ConstantPool) -> ClassResult<Vec<u8>> {
    let mut writer = ClassWriter::new();
    writer.write_u16(annotations.len() as u16);
    for annotation in annotations {
        annotation.encode(pool, &mut writer)?;
    }
    Ok(writer.into_bytes())
}
