//! Class file container
//!
//! `ClassFile::parse` and `ClassFile::to_bytes` are exact inverses for any
//! class that has not been edited: every constant, member and attribute is
//! kept in file order with its raw payload.

use crate::access::AccessFlags;
use crate::attribute::{self, names, Attribute};
use crate::code::{MethodBody, MethodContext};
use crate::constant_pool::ConstantPool;
use crate::error::{ClassFormatError, ClassResult};
use crate::io::{ClassReader, ClassWriter};

/// Class file magic number
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest supported major version (JDK 1.1)
pub const MIN_MAJOR_VERSION: u16 = 45;

/// Newest supported major version (Java 21)
pub const MAX_MAJOR_VERSION: u16 = 65;

/// First major version whose verifier requires stack map frames
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

/// Field or method entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access flags
    pub access: AccessFlags,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Attributes in file order
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    /// Member name
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> ClassResult<&'p str> {
        pool.utf8(self.name_index)
    }

    /// Member descriptor
    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> ClassResult<&'p str> {
        pool.utf8(self.descriptor_index)
    }

    /// First attribute with the given name
    pub fn attribute(&self, pool: &ConstantPool, name: &str) -> Option<&Attribute> {
        attribute::find(&self.attributes, pool, name)
    }

    /// Replace the attribute named `name`, or append it
    pub fn set_attribute(&mut self, pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> ClassResult<()> {
        match attribute::position(&self.attributes, pool, name) {
            Some(index) => self.attributes[index].info = info,
            None => self.attributes.push(Attribute::new(pool, name, info)?),
        }
        Ok(())
    }

    /// Drop every attribute named `name`
    pub fn remove_attribute(&mut self, pool: &ConstantPool, name: &str) {
        self.attributes
            .retain(|attribute| attribute.name(pool).map(|n| n != name).unwrap_or(true));
    }

    fn decode(reader: &mut ClassReader<'_>) -> ClassResult<Self> {
        Ok(Self {
            access: AccessFlags(reader.read_u16()?),
            name_index: reader.read_u16()?,
            descriptor_index: reader.read_u16()?,
            attributes: Attribute::decode_table(reader)?,
        })
    }

    fn encode(&self, writer: &mut ClassWriter) {
        writer.write_u16(self.access.bits());
        writer.write_u16(self.name_index);
        writer.write_u16(self.descriptor_index);
        Attribute::encode_table(&self.attributes, writer);
    }
}

/// Structural shell of a compiled class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access: AccessFlags,
    /// Class index of this class
    pub this_class: u16,
    /// Class index of the superclass, 0 for `java/lang/Object`
    pub super_class: u16,
    /// Class indices of direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<MemberInfo>,
    /// Declared methods
    pub methods: Vec<MemberInfo>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse a complete class file
    pub fn parse(bytes: &[u8]) -> ClassResult<Self> {
        let mut reader = ClassReader::new(bytes);
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(ClassFormatError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let constant_pool = ConstantPool::decode(&mut reader)?;
        let access = AccessFlags(reader.read_u16()?);
        let this_class = reader.read_u16()?;
        let super_class = reader.read_u16()?;
        let interface_count = reader.read_u16()?;
        let interfaces = (0..interface_count)
            .map(|_| reader.read_u16())
            .collect::<ClassResult<Vec<_>>>()?;
        let field_count = reader.read_u16()?;
        let fields = (0..field_count)
            .map(|_| MemberInfo::decode(&mut reader))
            .collect::<ClassResult<Vec<_>>>()?;
        let method_count = reader.read_u16()?;
        let methods = (0..method_count)
            .map(|_| MemberInfo::decode(&mut reader))
            .collect::<ClassResult<Vec<_>>>()?;
        let attributes = Attribute::decode_table(&mut reader)?;

        if reader.has_more() {
            return Err(ClassFormatError::TrailingBytes(reader.remaining()));
        }

        let class = Self {
            minor_version,
            major_version,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // name lookups must resolve for the class to be usable at all
        class.name()?;
        class.super_name()?;
        Ok(class)
    }

    /// Serialize to class file bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ClassWriter::with_capacity(1024);
        writer.write_u32(MAGIC);
        writer.write_u16(self.minor_version);
        writer.write_u16(self.major_version);
        self.constant_pool.encode(&mut writer);
        writer.write_u16(self.access.bits());
        writer.write_u16(self.this_class);
        writer.write_u16(self.super_class);
        writer.write_u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            writer.write_u16(*interface);
        }
        writer.write_u16(self.fields.len() as u16);
        for field in &self.fields {
            field.encode(&mut writer);
        }
        writer.write_u16(self.methods.len() as u16);
        for method in &self.methods {
            method.encode(&mut writer);
        }
        Attribute::encode_table(&self.attributes, &mut writer);
        writer.into_bytes()
    }

    /// Internal name of this class
    pub fn name(&self) -> ClassResult<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass
    pub fn super_name(&self) -> ClassResult<Option<&str>> {
        match self.super_class {
            0 => Ok(None),
            index => self.constant_pool.class_name(index).map(Some),
        }
    }

    /// Internal names of the direct superinterfaces
    pub fn interface_names(&self) -> ClassResult<Vec<&str>> {
        self.interfaces
            .iter()
            .map(|index| self.constant_pool.class_name(*index))
            .collect()
    }

    /// First class attribute with the given name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        attribute::find(&self.attributes, &self.constant_pool, name)
    }

    /// Replace the class attribute named `name`, or append it
    pub fn set_attribute(&mut self, name: &str, info: Vec<u8>) -> ClassResult<()> {
        match attribute::position(&self.attributes, &self.constant_pool, name) {
            Some(index) => self.attributes[index].info = info,
            None => {
                let attribute = Attribute::new(&mut self.constant_pool, name, info)?;
                self.attributes.push(attribute);
            }
        }
        Ok(())
    }

    /// Index of the method with this name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|method| {
            method.name(&self.constant_pool).ok() == Some(name)
                && method.descriptor(&self.constant_pool).ok() == Some(descriptor)
        })
    }

    /// Index of the field with this name
    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name(&self.constant_pool).ok() == Some(name))
    }

    /// Whether method bodies in this class must carry stack map frames
    pub fn requires_frames(&self) -> bool {
        self.major_version >= STACK_MAP_MAJOR_VERSION
    }

    /// Decode the body of the method at `index`, if it has one
    pub fn method_body(&self, index: usize) -> ClassResult<Option<MethodBody>> {
        let method = &self.methods[index];
        let code = match method.attribute(&self.constant_pool, names::CODE) {
            Some(code) => code,
            None => return Ok(None),
        };
        let context = MethodContext {
            owner: self.name()?,
            name: method.name(&self.constant_pool)?,
            descriptor: method.descriptor(&self.constant_pool)?,
            is_static: method.access.is_static(),
        };
        MethodBody::decode(&code.info, &self.constant_pool, &context).map(Some)
    }
}
