//! Descriptor view of a parsed class
//!
//! The matcher reasons about names, flags, descriptors and annotations.
//! [`ClassDescriptor`] extracts those once from a [`ClassFile`] and keeps the
//! class file itself so the merger can edit it afterwards.

use tapestry_classfile::attribute::{self, names, InnerClass};
use tapestry_classfile::annotation::decode_annotations;
use tapestry_classfile::{
    AccessFlags, Annotation, Attribute, ClassFile, ClassResult, ConstantPool, FieldType, MethodBody, MethodType,
};

use crate::marker::{ClassMarker, FieldMarker, MethodMarker};

/// Declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub descriptor: String,
    pub field_type: FieldType,
    pub access: AccessFlags,
    pub annotations: Vec<Annotation>,
    pub markers: Vec<FieldMarker>,
    /// Position in the class file's field table
    pub index: usize,
}

impl FieldDescriptor {
    /// Whether the field is introduced by a weave
    pub fn is_new(&self) -> bool {
        self.markers.contains(&FieldMarker::NewField)
    }
}

/// Declared method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    pub descriptor: String,
    pub method_type: MethodType,
    pub access: AccessFlags,
    /// Declared exceptions as internal names
    pub throws: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub markers: Vec<MethodMarker>,
    /// Position in the class file's method table
    pub index: usize,
}

impl MethodDescriptor {
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    /// Descriptor up to and including the closing parenthesis
    pub fn params_descriptor(&self) -> &str {
        match self.descriptor.find(')') {
            Some(end) => &self.descriptor[..=end],
            None => &self.descriptor,
        }
    }

    pub fn has_marker(&self, marker: &MethodMarker) -> bool {
        self.markers.contains(marker)
    }

    /// Annotation types required on the matched method, if any
    pub fn required_annotations(&self) -> Option<&[String]> {
        self.markers.iter().find_map(|marker| match marker {
            MethodMarker::WeaveWithAnnotation { annotation_classes } => Some(annotation_classes.as_slice()),
            MethodMarker::WeaveAllConstructors => None,
        })
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotations.iter().any(|a| a.type_name() == type_name)
    }

    /// `name(params)ret` label used in messages
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

/// Parsed class with its extracted descriptors
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    class: ClassFile,
    pub name: String,
    pub access: AccessFlags,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub major_version: u16,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
    pub annotations: Vec<Annotation>,
    pub inner_classes: Vec<InnerClass>,
    pub markers: Vec<ClassMarker>,
}

/// Visible and invisible annotations of one attribute table
fn member_annotations(attributes: &[Attribute], pool: &ConstantPool) -> ClassResult<Vec<Annotation>> {
    let mut annotations = Vec::new();
    for name in [names::RUNTIME_VISIBLE_ANNOTATIONS, names::RUNTIME_INVISIBLE_ANNOTATIONS] {
        if let Some(attribute) = attribute::find(attributes, pool, name) {
            annotations.extend(decode_annotations(&attribute.info, pool)?);
        }
    }
    Ok(annotations)
}

impl ClassDescriptor {
    pub fn parse(bytes: &[u8]) -> ClassResult<Self> {
        Self::from_class_file(ClassFile::parse(bytes)?)
    }

    pub fn from_class_file(class: ClassFile) -> ClassResult<Self> {
        let pool = &class.constant_pool;

        let mut fields = Vec::with_capacity(class.fields.len());
        for (index, field) in class.fields.iter().enumerate() {
            let descriptor = field.descriptor(pool)?.to_string();
            let annotations = member_annotations(&field.attributes, pool)?;
            fields.push(FieldDescriptor {
                name: field.name(pool)?.to_string(),
                field_type: FieldType::parse(&descriptor)?,
                descriptor,
                access: field.access,
                markers: annotations.iter().filter_map(FieldMarker::from_annotation).collect(),
                annotations,
                index,
            });
        }

        let mut methods = Vec::with_capacity(class.methods.len());
        for (index, method) in class.methods.iter().enumerate() {
            let descriptor = method.descriptor(pool)?.to_string();
            let annotations = member_annotations(&method.attributes, pool)?;
            let throws = match method.attribute(pool, names::EXCEPTIONS) {
                Some(exceptions) => attribute::decode_exceptions(&exceptions.info, pool)?,
                None => Vec::new(),
            };
            methods.push(MethodDescriptor {
                name: method.name(pool)?.to_string(),
                method_type: MethodType::parse(&descriptor)?,
                descriptor,
                access: method.access,
                throws,
                markers: annotations.iter().filter_map(MethodMarker::from_annotation).collect(),
                annotations,
                index,
            });
        }

        let annotations = member_annotations(&class.attributes, pool)?;
        let source_file = match class.attribute(names::SOURCE_FILE) {
            Some(attribute) => Some(attribute::decode_source_file(&attribute.info, pool)?),
            None => None,
        };
        let inner_classes = match class.attribute(names::INNER_CLASSES) {
            Some(attribute) => attribute::decode_inner_classes(&attribute.info, pool)?,
            None => Vec::new(),
        };

        Ok(Self {
            name: class.name()?.to_string(),
            access: class.access,
            super_name: class.super_name()?.map(str::to_string),
            interfaces: class.interface_names()?.into_iter().map(str::to_string).collect(),
            source_file,
            major_version: class.major_version,
            fields,
            methods,
            markers: annotations.iter().filter_map(ClassMarker::from_annotation).collect(),
            annotations,
            inner_classes,
            class,
        })
    }

    /// Serialized class bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.class.to_bytes()
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class
    }

    pub fn into_class_file(self) -> ClassFile {
        self.class
    }

    /// Decoded body of a method of this class
    pub fn body(&self, method: &MethodDescriptor) -> ClassResult<Option<MethodBody>> {
        self.class.method_body(method.index)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotations.iter().any(|a| a.type_name() == type_name)
    }

    /// The `@Weave`, `@WeaveWithAnnotation` or `@ScalaWeave` marker
    pub fn weave_marker(&self) -> Option<&ClassMarker> {
        self.markers
            .iter()
            .find(|marker| !matches!(marker, ClassMarker::SkipIfPresent { .. }))
    }

    /// Whether this class is a guard declared with `@SkipIfPresent`
    pub fn skip_if_present(&self) -> Option<&str> {
        self.markers.iter().find_map(|marker| match marker {
            ClassMarker::SkipIfPresent { original_name } => Some(original_name.as_deref().unwrap_or(&self.name)),
            _ => None,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    /// Row describing this class in its own InnerClasses table
    pub fn own_inner_class(&self) -> Option<&InnerClass> {
        self.inner_classes.iter().find(|row| row.inner == self.name)
    }
}
