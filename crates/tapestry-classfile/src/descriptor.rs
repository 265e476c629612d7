//! Field and method descriptors

use crate::error::{ClassFormatError, ClassResult};
use crate::opcode::Opcode;

/// Operand category of a value, as seen by load/store/return instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// boolean, byte, char, short, int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// object or array
    Reference,
}

impl ValueKind {
    /// Local variable slots used by a value
    pub fn slots(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }

    /// Load instruction for this kind, using the short form where possible
    pub fn load(self, index: u16) -> (Opcode, Option<u16>) {
        let (base, short) = match self {
            ValueKind::Int => (Opcode::Iload, Opcode::Iload0 as u8),
            ValueKind::Long => (Opcode::Lload, Opcode::Lload0 as u8),
            ValueKind::Float => (Opcode::Fload, Opcode::Fload0 as u8),
            ValueKind::Double => (Opcode::Dload, Opcode::Dload0 as u8),
            ValueKind::Reference => (Opcode::Aload, Opcode::Aload0 as u8),
        };
        short_form(base, short, index)
    }

    /// Store instruction for this kind, using the short form where possible
    pub fn store(self, index: u16) -> (Opcode, Option<u16>) {
        let (base, short) = match self {
            ValueKind::Int => (Opcode::Istore, Opcode::Istore0 as u8),
            ValueKind::Long => (Opcode::Lstore, Opcode::Lstore0 as u8),
            ValueKind::Float => (Opcode::Fstore, Opcode::Fstore0 as u8),
            ValueKind::Double => (Opcode::Dstore, Opcode::Dstore0 as u8),
            ValueKind::Reference => (Opcode::Astore, Opcode::Astore0 as u8),
        };
        short_form(base, short, index)
    }

    /// Typed return instruction
    pub fn return_opcode(self) -> Opcode {
        match self {
            ValueKind::Int => Opcode::Ireturn,
            ValueKind::Long => Opcode::Lreturn,
            ValueKind::Float => Opcode::Freturn,
            ValueKind::Double => Opcode::Dreturn,
            ValueKind::Reference => Opcode::Areturn,
        }
    }
}

fn short_form(base: Opcode, short: u8, index: u16) -> (Opcode, Option<u16>) {
    if index <= 3 {
        match Opcode::from_u8(short + index as u8) {
            Some(op) => (op, None),
            None => (base, Some(index)),
        }
    } else {
        (base, Some(index))
    }
}

/// Type of a field, parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal name, e.g. `java/lang/String`
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a complete field descriptor
    pub fn parse(descriptor: &str) -> ClassResult<Self> {
        let bytes = descriptor.as_bytes();
        let mut pos = 0;
        let ty = Self::parse_at(descriptor, bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(ClassFormatError::InvalidDescriptor(descriptor.to_string()));
        }
        Ok(ty)
    }

    fn parse_at(descriptor: &str, bytes: &[u8], pos: &mut usize) -> ClassResult<Self> {
        let invalid = || ClassFormatError::InvalidDescriptor(descriptor.to_string());
        let tag = *bytes.get(*pos).ok_or_else(invalid)?;
        *pos += 1;
        let ty = match tag {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let start = *pos;
                let end = bytes[start..]
                    .iter()
                    .position(|b| *b == b';')
                    .map(|offset| start + offset)
                    .ok_or_else(invalid)?;
                if end == start {
                    return Err(invalid());
                }
                *pos = end + 1;
                FieldType::Object(descriptor[start..end].to_string())
            }
            b'[' => FieldType::Array(Box::new(Self::parse_at(descriptor, bytes, pos)?)),
            _ => return Err(invalid()),
        };
        Ok(ty)
    }

    /// Descriptor text
    pub fn descriptor(&self) -> String {
        match self {
            FieldType::Byte => "B".to_string(),
            FieldType::Char => "C".to_string(),
            FieldType::Double => "D".to_string(),
            FieldType::Float => "F".to_string(),
            FieldType::Int => "I".to_string(),
            FieldType::Long => "J".to_string(),
            FieldType::Short => "S".to_string(),
            FieldType::Boolean => "Z".to_string(),
            FieldType::Object(name) => format!("L{};", name),
            FieldType::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    /// Name used by `checkcast`, `anewarray` and Class constants
    pub fn internal_name(&self) -> String {
        match self {
            FieldType::Object(name) => name.clone(),
            other => other.descriptor(),
        }
    }

    /// Category used to pick load, store and return instructions
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Int
            | FieldType::Boolean => ValueKind::Int,
            FieldType::Long => ValueKind::Long,
            FieldType::Float => ValueKind::Float,
            FieldType::Double => ValueKind::Double,
            FieldType::Object(_) | FieldType::Array(_) => ValueKind::Reference,
        }
    }

    /// Local variable and operand stack slots taken by a value
    pub fn slots(&self) -> u16 {
        self.kind().slots()
    }

    /// Whether this is a primitive type
    pub fn is_primitive(&self) -> bool {
        self.kind() != ValueKind::Reference
    }

    /// Wrapper class for a primitive type
    pub fn boxed_class(&self) -> Option<&'static str> {
        Some(match self {
            FieldType::Byte => "java/lang/Byte",
            FieldType::Char => "java/lang/Character",
            FieldType::Double => "java/lang/Double",
            FieldType::Float => "java/lang/Float",
            FieldType::Int => "java/lang/Integer",
            FieldType::Long => "java/lang/Long",
            FieldType::Short => "java/lang/Short",
            FieldType::Boolean => "java/lang/Boolean",
            FieldType::Object(_) | FieldType::Array(_) => return None,
        })
    }

    /// Accessor name used by typed helper methods, e.g. `Int` for `getInt`
    pub fn accessor_suffix(&self) -> &'static str {
        match self {
            FieldType::Byte => "Byte",
            FieldType::Char => "Char",
            FieldType::Double => "Double",
            FieldType::Float => "Float",
            FieldType::Int => "Int",
            FieldType::Long => "Long",
            FieldType::Short => "Short",
            FieldType::Boolean => "Boolean",
            FieldType::Object(_) | FieldType::Array(_) => "Object",
        }
    }

    /// Replace `from` with `to` wherever it names this type or its element type
    pub fn rename(&self, from: &str, to: &str) -> FieldType {
        match self {
            FieldType::Object(name) if name == from => FieldType::Object(to.to_string()),
            FieldType::Array(element) => FieldType::Array(Box::new(element.rename(from, to))),
            other => other.clone(),
        }
    }
}

/// Return type of a method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// `V`
    Void,
    /// Any field type
    Value(FieldType),
}

impl ReturnType {
    /// Descriptor text
    pub fn descriptor(&self) -> String {
        match self {
            ReturnType::Void => "V".to_string(),
            ReturnType::Value(ty) => ty.descriptor(),
        }
    }

    /// Return instruction matching this type
    pub fn return_opcode(&self) -> Opcode {
        match self {
            ReturnType::Void => Opcode::Return,
            ReturnType::Value(ty) => ty.kind().return_opcode(),
        }
    }
}

/// Parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodType {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type
    pub ret: ReturnType,
}

impl MethodType {
    /// Parse a method descriptor such as `(ILjava/lang/String;)V`
    pub fn parse(descriptor: &str) -> ClassResult<Self> {
        let invalid = || ClassFormatError::InvalidDescriptor(descriptor.to_string());
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(invalid());
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while *bytes.get(pos).ok_or_else(invalid)? != b')' {
            params.push(FieldType::parse_at(descriptor, bytes, &mut pos)?);
        }
        pos += 1;
        let ret = if bytes.get(pos) == Some(&b'V') {
            pos += 1;
            ReturnType::Void
        } else {
            ReturnType::Value(FieldType::parse_at(descriptor, bytes, &mut pos)?)
        };
        if pos != bytes.len() {
            return Err(invalid());
        }
        Ok(Self { params, ret })
    }

    /// Descriptor text
    pub fn descriptor(&self) -> String {
        let params: String = self.params.iter().map(FieldType::descriptor).collect();
        format!("({}){}", params, self.ret.descriptor())
    }

    /// Local slots taken by the parameters, excluding `this`
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }
}

/// Rename class `from` to `to` inside a field or method descriptor
///
/// Text that is not a valid descriptor is returned unchanged.
pub fn rename_in_descriptor(descriptor: &str, from: &str, to: &str) -> String {
    if !descriptor.contains(from) {
        return descriptor.to_string();
    }
    if let Ok(method) = MethodType::parse(descriptor) {
        let renamed = MethodType {
            params: method.params.iter().map(|p| p.rename(from, to)).collect(),
            ret: match method.ret {
                ReturnType::Void => ReturnType::Void,
                ReturnType::Value(ty) => ReturnType::Value(ty.rename(from, to)),
            },
        };
        return renamed.descriptor();
    }
    match FieldType::parse(descriptor) {
        Ok(field) => field.rename(from, to).descriptor(),
        Err(_) => descriptor.to_string(),
    }
}

/// Rename class `from` to `to` in a Class constant name, which may be an array descriptor
pub fn rename_class_name(name: &str, from: &str, to: &str) -> String {
    if name == from {
        to.to_string()
    } else if name.starts_with('[') {
        rename_in_descriptor(name, from, to)
    } else {
        name.to_string()
    }
}
