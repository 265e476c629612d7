//! Constant pool
//!
//! Entries are stored by their one-based pool index. Long and Double
//! constants occupy two slots; the second slot is an unusable hole.
//! Parsed entries are kept exactly as read so an untouched pool writes
//! back to the same bytes.

use crate::error::{ClassFormatError, ClassResult};
use crate::io::{ClassReader, ClassWriter};

/// `CONSTANT_Utf8` tag
pub const TAG_UTF8: u8 = 1;
/// `CONSTANT_Integer` tag
pub const TAG_INTEGER: u8 = 3;
/// `CONSTANT_Float` tag
pub const TAG_FLOAT: u8 = 4;
/// `CONSTANT_Long` tag, a two-slot entry
pub const TAG_LONG: u8 = 5;
/// `CONSTANT_Double` tag, a two-slot entry
pub const TAG_DOUBLE: u8 = 6;
/// `CONSTANT_Class` tag
pub const TAG_CLASS: u8 = 7;
/// `CONSTANT_String` tag
pub const TAG_STRING: u8 = 8;
/// `CONSTANT_Fieldref` tag
pub const TAG_FIELDREF: u8 = 9;
/// `CONSTANT_Methodref` tag
pub const TAG_METHODREF: u8 = 10;
/// `CONSTANT_InterfaceMethodref` tag
pub const TAG_INTERFACE_METHODREF: u8 = 11;
/// `CONSTANT_NameAndType` tag
pub const TAG_NAME_AND_TYPE: u8 = 12;
/// `CONSTANT_MethodHandle` tag
pub const TAG_METHOD_HANDLE: u8 = 15;
/// `CONSTANT_MethodType` tag
pub const TAG_METHOD_TYPE: u8 = 16;
/// `CONSTANT_Dynamic` tag
pub const TAG_DYNAMIC: u8 = 17;
/// `CONSTANT_InvokeDynamic` tag
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
/// `CONSTANT_Module` tag
pub const TAG_MODULE: u8 = 19;
/// `CONSTANT_Package` tag
pub const TAG_PACKAGE: u8 = 20;

/// Text of a `CONSTANT_Utf8` entry
///
/// Class files use modified UTF-8. When the stored bytes are not the
/// canonical encoding of the decoded text, the original bytes are kept
/// so the entry can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Utf8 {
    text: String,
    raw: Option<Vec<u8>>,
}

impl Utf8 {
    /// Wrap text that will be written in canonical modified UTF-8
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw: None,
        }
    }

    /// Decoded text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn decode(bytes: &[u8]) -> Self {
        let text = decode_modified_utf8(bytes);
        let raw = if encode_modified_utf8(&text) == bytes {
            None
        } else {
            Some(bytes.to_vec())
        };
        Self { text, raw }
    }

    fn encoded(&self) -> Vec<u8> {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => encode_modified_utf8(&self.text),
        }
    }
}

fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            units.push((((b & 0x1F) as u16) << 6) | (bytes[i + 1] & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            units.push(
                (((b & 0x0F) as u16) << 12)
                    | (((bytes[i + 1] & 0x3F) as u16) << 6)
                    | (bytes[i + 2] & 0x3F) as u16,
            );
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// A single constant pool entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Constant {
    Utf8(Utf8),
    Integer(i32),
    /// IEEE bits, kept raw so NaN payloads survive
    Float(u32),
    Long(i64),
    /// IEEE bits, kept raw so NaN payloads survive
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl Constant {
    /// Tag byte written before the entry
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => TAG_UTF8,
            Constant::Integer(_) => TAG_INTEGER,
            Constant::Float(_) => TAG_FLOAT,
            Constant::Long(_) => TAG_LONG,
            Constant::Double(_) => TAG_DOUBLE,
            Constant::Class(_) => TAG_CLASS,
            Constant::String(_) => TAG_STRING,
            Constant::Fieldref { .. } => TAG_FIELDREF,
            Constant::Methodref { .. } => TAG_METHODREF,
            Constant::InterfaceMethodref { .. } => TAG_INTERFACE_METHODREF,
            Constant::NameAndType { .. } => TAG_NAME_AND_TYPE,
            Constant::MethodHandle { .. } => TAG_METHOD_HANDLE,
            Constant::MethodType(_) => TAG_METHOD_TYPE,
            Constant::Dynamic { .. } => TAG_DYNAMIC,
            Constant::InvokeDynamic { .. } => TAG_INVOKE_DYNAMIC,
            Constant::Module(_) => TAG_MODULE,
            Constant::Package(_) => TAG_PACKAGE,
        }
    }

    /// Long and Double take two pool slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn decode(reader: &mut ClassReader<'_>, index: u16) -> ClassResult<Self> {
        let tag = reader.read_u8()?;
        let constant = match tag {
            TAG_UTF8 => {
                let len = reader.read_u16()? as usize;
                Constant::Utf8(Utf8::decode(reader.read_bytes(len)?))
            }
            TAG_INTEGER => Constant::Integer(reader.read_i32()?),
            TAG_FLOAT => Constant::Float(reader.read_u32()?),
            TAG_LONG => Constant::Long(reader.read_u64()? as i64),
            TAG_DOUBLE => Constant::Double(reader.read_u64()?),
            TAG_CLASS => Constant::Class(reader.read_u16()?),
            TAG_STRING => Constant::String(reader.read_u16()?),
            TAG_FIELDREF => Constant::Fieldref {
                class: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            TAG_METHODREF => Constant::Methodref {
                class: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            TAG_INTERFACE_METHODREF => Constant::InterfaceMethodref {
                class: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name: reader.read_u16()?,
                descriptor: reader.read_u16()?,
            },
            TAG_METHOD_HANDLE => Constant::MethodHandle {
                kind: reader.read_u8()?,
                reference: reader.read_u16()?,
            },
            TAG_METHOD_TYPE => Constant::MethodType(reader.read_u16()?),
            TAG_DYNAMIC => Constant::Dynamic {
                bootstrap: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap: reader.read_u16()?,
                name_and_type: reader.read_u16()?,
            },
            TAG_MODULE => Constant::Module(reader.read_u16()?),
            TAG_PACKAGE => Constant::Package(reader.read_u16()?),
            _ => return Err(ClassFormatError::BadConstantTag { tag, index }),
        };
        Ok(constant)
    }

    fn encode(&self, writer: &mut ClassWriter) {
        writer.write_u8(self.tag());
        match self {
            Constant::Utf8(text) => {
                let bytes = text.encoded();
                writer.write_u16(bytes.len() as u16);
                writer.write_bytes(&bytes);
            }
            Constant::Integer(value) => writer.write_i32(*value),
            Constant::Float(bits) => writer.write_u32(*bits),
            Constant::Long(value) => writer.write_u64(*value as u64),
            Constant::Double(bits) => writer.write_u64(*bits),
            Constant::Class(index)
            | Constant::String(index)
            | Constant::MethodType(index)
            | Constant::Module(index)
            | Constant::Package(index) => writer.write_u16(*index),
            Constant::Fieldref { class, name_and_type }
            | Constant::Methodref { class, name_and_type }
            | Constant::InterfaceMethodref { class, name_and_type } => {
                writer.write_u16(*class);
                writer.write_u16(*name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                writer.write_u16(*name);
                writer.write_u16(*descriptor);
            }
            Constant::MethodHandle { kind, reference } => {
                writer.write_u8(*kind);
                writer.write_u16(*reference);
            }
            Constant::Dynamic { bootstrap, name_and_type }
            | Constant::InvokeDynamic { bootstrap, name_and_type } => {
                writer.write_u16(*bootstrap);
                writer.write_u16(*name_and_type);
            }
        }
    }
}

/// Which kind of member a reference constant names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// `CONSTANT_Fieldref`
    Field,
    /// `CONSTANT_Methodref`
    Method,
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethod,
}

/// Resolved field or method reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Reference kind
    pub kind: RefKind,
    /// Internal name of the owning class
    pub owner: &'a str,
    /// Member name
    pub name: &'a str,
    /// Member descriptor
    pub descriptor: &'a str,
}

/// Constant pool of one class file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Empty pool; slot 0 is reserved
    pub fn new() -> Self {
        Self {
            entries: vec![None],
        }
    }

    /// The `constant_pool_count` value written to the class file
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Iterate over populated slots
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|c| (index as u16, c)))
    }

    /// Decode `constant_pool_count` followed by the entries
    pub fn decode(reader: &mut ClassReader<'_>) -> ClassResult<Self> {
        let count = reader.read_u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(None);
        while entries.len() < count as usize {
            let constant = Constant::decode(reader, entries.len() as u16)?;
            let wide = constant.is_wide();
            entries.push(Some(constant));
            if wide {
                entries.push(None);
            }
        }
        if entries.len() != count as usize {
            return Err(ClassFormatError::BadConstantIndex {
                index: count.saturating_sub(1),
                expected: "single-slot constant",
            });
        }
        Ok(Self { entries })
    }

    /// Encode the count and every entry
    pub fn encode(&self, writer: &mut ClassWriter) {
        writer.write_u16(self.count());
        for constant in self.entries.iter().flatten() {
            constant.encode(writer);
        }
    }

    /// Look up an entry
    pub fn get(&self, index: u16) -> ClassResult<&Constant> {
        self.entries
            .get(index as usize)
            .and_then(|entry| entry.as_ref())
            .ok_or(ClassFormatError::BadConstantIndex {
                index,
                expected: "constant",
            })
    }

    /// Text of a Utf8 entry
    pub fn utf8(&self, index: u16) -> ClassResult<&str> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text.as_str()),
            _ => Err(ClassFormatError::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Internal name named by a Class entry
    pub fn class_name(&self, index: u16) -> ClassResult<&str> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }

    /// Text of a String entry
    pub fn string(&self, index: u16) -> ClassResult<&str> {
        match self.get(index)? {
            Constant::String(text) => self.utf8(*text),
            _ => Err(ClassFormatError::BadConstantIndex {
                index,
                expected: "String",
            }),
        }
    }

    /// Name and descriptor of a NameAndType entry
    pub fn name_and_type(&self, index: u16) -> ClassResult<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ClassFormatError::BadConstantIndex {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a Fieldref, Methodref or InterfaceMethodref
    pub fn member_ref(&self, index: u16) -> ClassResult<MemberRef<'_>> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::Fieldref { class, name_and_type } => (RefKind::Field, *class, *name_and_type),
            Constant::Methodref { class, name_and_type } => (RefKind::Method, *class, *name_and_type),
            Constant::InterfaceMethodref { class, name_and_type } => {
                (RefKind::InterfaceMethod, *class, *name_and_type)
            }
            _ => {
                return Err(ClassFormatError::BadConstantIndex {
                    index,
                    expected: "member reference",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            kind,
            owner: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    fn find(&self, constant: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|entry| entry.as_ref() == Some(constant))
            .map(|index| index as u16)
    }

    /// Append an entry without deduplication
    pub fn push(&mut self, constant: Constant) -> ClassResult<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(ClassFormatError::PoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(constant));
        if slots == 2 {
            self.entries.push(None);
        }
        Ok(index)
    }

    /// Index of an equal entry, appending one if none exists
    pub fn add(&mut self, constant: Constant) -> ClassResult<u16> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    /// Index of the `Utf8` entry holding `text`, appending one if none exists
    pub fn utf8_index(&mut self, text: &str) -> ClassResult<u16> {
        let existing = self.iter().find_map(|(index, constant)| match constant {
            Constant::Utf8(utf8) if utf8.as_str() == text => Some(index),
            _ => None,
        });
        match existing {
            Some(index) => Ok(index),
            None => self.push(Constant::Utf8(Utf8::new(text))),
        }
    }

    /// Index of the `Class` entry naming internal name `name`
    pub fn class_index(&mut self, name: &str) -> ClassResult<u16> {
        let name = self.utf8_index(name)?;
        self.add(Constant::Class(name))
    }

    /// Index of the `String` literal entry for `text`
    pub fn string_index(&mut self, text: &str) -> ClassResult<u16> {
        let text = self.utf8_index(text)?;
        self.add(Constant::String(text))
    }

    /// Index of the `Integer` entry for `value`
    pub fn integer_index(&mut self, value: i32) -> ClassResult<u16> {
        self.add(Constant::Integer(value))
    }

    /// Index of the `NameAndType` entry for a member name and descriptor
    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> ClassResult<u16> {
        let name = self.utf8_index(name)?;
        let descriptor = self.utf8_index(descriptor)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    /// Field, method or interface-method reference
    pub fn member_ref_index(
        &mut self,
        kind: RefKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> ClassResult<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, descriptor)?;
        let constant = match kind {
            RefKind::Field => Constant::Fieldref { class, name_and_type },
            RefKind::Method => Constant::Methodref { class, name_and_type },
            RefKind::InterfaceMethod => Constant::InterfaceMethodref { class, name_and_type },
        };
        self.add(constant)
    }
}
