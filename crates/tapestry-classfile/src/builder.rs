//! Programmatic class assembly
//!
//! A small assembler for producing class files without a Java compiler,
//! used by fixtures and tools. Pool failures are deferred and reported by
//! [`ClassBuilder::build`] so that call chains stay readable.
//!
//! ```
//! use tapestry_classfile::access::{ACC_PUBLIC, ACC_STATIC};
//! use tapestry_classfile::{ClassBuilder, Opcode};
//!
//! let mut class = ClassBuilder::new("demo/Counter", "java/lang/Object");
//! class.field(ACC_STATIC, "count", "I");
//! class.method(ACC_PUBLIC | ACC_STATIC, "next", "()I", |m| {
//!     m.code(0, |c| {
//!         c.getstatic("demo/Counter", "count", "I")
//!             .iconst(1)
//!             .op(Opcode::Iadd)
//!             .op(Opcode::Dup)
//!             .putstatic("demo/Counter", "count", "I")
//!             .op(Opcode::Ireturn);
//!     });
//! });
//! let bytes = class.to_bytes().unwrap();
//! assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! ```

use crate::access::AccessFlags;
use crate::analysis;
use crate::annotation::{encode_annotations, Annotation};
use crate::attribute::{names, Attribute, InnerClass};
use crate::class::{ClassFile, MemberInfo};
use crate::code::{Handler, Insn, Label, MethodBody, MethodContext};
use crate::constant_pool::{Constant, ConstantPool, RefKind};
use crate::descriptor::ValueKind;
use crate::error::{ClassFormatError, ClassResult};
use crate::frame::Frame;
use crate::io::ClassWriter;
use crate::opcode::Opcode;

/// Default class file version (Java 8)
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// Assembles one class
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    super_name: String,
    access: AccessFlags,
    version: u16,
    interfaces: Vec<String>,
    pool: ConstantPool,
    fields: Vec<MemberInfo>,
    methods: Vec<MemberInfo>,
    annotations: Vec<Annotation>,
    inner_classes: Vec<InnerClass>,
    source_file: Option<String>,
    error: Option<ClassFormatError>,
}

impl ClassBuilder {
    /// Public class `name` extending `super_name`
    pub fn new(name: &str, super_name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: super_name.to_string(),
            access: AccessFlags(crate::access::ACC_PUBLIC | crate::access::ACC_SUPER),
            version: DEFAULT_MAJOR_VERSION,
            interfaces: Vec::new(),
            pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
            inner_classes: Vec::new(),
            source_file: None,
            error: None,
        }
    }

    /// Replace the class access flags
    pub fn access(&mut self, flags: u16) -> &mut Self {
        self.access = AccessFlags(flags);
        self
    }

    /// Set the major version
    pub fn version(&mut self, major: u16) -> &mut Self {
        self.version = major;
        self
    }

    /// Add a direct superinterface
    pub fn interface(&mut self, name: &str) -> &mut Self {
        self.interfaces.push(name.to_string());
        self
    }

    /// Add a runtime-visible class annotation
    pub fn annotate(&mut self, annotation: Annotation) -> &mut Self {
        self.annotations.push(annotation);
        self
    }

    /// Set the `SourceFile` attribute
    pub fn source_file(&mut self, name: &str) -> &mut Self {
        self.source_file = Some(name.to_string());
        self
    }

    /// Add an `InnerClasses` row
    pub fn inner_class(&mut self, row: InnerClass) -> &mut Self {
        self.inner_classes.push(row);
        self
    }

    /// Declare a field
    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        self.field_with(access, name, descriptor, Vec::new(), None)
    }

    /// Declare a field carrying annotations and an optional `ConstantValue`
    pub fn field_with(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        annotations: Vec<Annotation>,
        constant: Option<Constant>,
    ) -> &mut Self {
        let result = (|| -> ClassResult<MemberInfo> {
            let mut field = MemberInfo {
                access: AccessFlags(access),
                name_index: self.pool.utf8_index(name)?,
                descriptor_index: self.pool.utf8_index(descriptor)?,
                attributes: Vec::new(),
            };
            if let Some(constant) = constant {
                let index = self.pool.add(constant)?;
                let mut info = ClassWriter::new();
                info.write_u16(index);
                field
                    .attributes
                    .push(Attribute::new(&mut self.pool, names::CONSTANT_VALUE, info.into_bytes())?);
            }
            if !annotations.is_empty() {
                let info = encode_annotations(&annotations, &mut self.pool)?;
                field
                    .attributes
                    .push(Attribute::new(&mut self.pool, names::RUNTIME_VISIBLE_ANNOTATIONS, info)?);
            }
            Ok(field)
        })();
        match result {
            Ok(field) => self.fields.push(field),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Declare a method; `define` adds its code, throws clause and annotations
    pub fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        define: impl FnOnce(&mut MethodBuilder<'_>),
    ) -> &mut Self {
        let mut method = MethodBuilder {
            pool: &mut self.pool,
            owner: &self.name,
            access: AccessFlags(access),
            name,
            descriptor,
            emit_frames: self.version >= crate::class::STACK_MAP_MAJOR_VERSION,
            throws: Vec::new(),
            annotations: Vec::new(),
            code: None,
            error: None,
        };
        define(&mut method);
        match method.finish() {
            Ok(member) => self.methods.push(member),
            Err(err) => self.fail(err),
        }
        self
    }

    fn fail(&mut self, err: ClassFormatError) {
        self.error.get_or_insert(err);
    }

    /// Finish the class
    pub fn build(self) -> ClassResult<ClassFile> {
        let Self {
            name,
            super_name,
            access,
            version,
            interfaces,
            mut pool,
            fields,
            methods,
            annotations,
            inner_classes,
            source_file,
            error,
        } = self;
        if let Some(err) = error {
            return Err(err);
        }

        let this_class = pool.class_index(&name)?;
        let super_class = pool.class_index(&super_name)?;
        let interfaces = interfaces
            .iter()
            .map(|interface| pool.class_index(interface))
            .collect::<ClassResult<Vec<_>>>()?;

        let mut attributes = Vec::new();
        if let Some(file) = source_file {
            let mut info = ClassWriter::new();
            info.write_u16(pool.utf8_index(&file)?);
            attributes.push(Attribute::new(&mut pool, names::SOURCE_FILE, info.into_bytes())?);
        }
        if !inner_classes.is_empty() {
            let mut info = ClassWriter::new();
            info.write_u16(inner_classes.len() as u16);
            for row in &inner_classes {
                info.write_u16(pool.class_index(&row.inner)?);
                info.write_u16(match &row.outer {
                    Some(outer) => pool.class_index(outer)?,
                    None => 0,
                });
                info.write_u16(match &row.simple_name {
                    Some(simple) => pool.utf8_index(simple)?,
                    None => 0,
                });
                info.write_u16(row.access.bits());
            }
            attributes.push(Attribute::new(&mut pool, names::INNER_CLASSES, info.into_bytes())?);
        }
        if !annotations.is_empty() {
            let info = encode_annotations(&annotations, &mut pool)?;
            attributes.push(Attribute::new(&mut pool, names::RUNTIME_VISIBLE_ANNOTATIONS, info)?);
        }

        Ok(ClassFile {
            minor_version: 0,
            major_version: version,
            constant_pool: pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Finish the class and serialize it
    pub fn to_bytes(self) -> ClassResult<Vec<u8>> {
        Ok(self.build()?.to_bytes())
    }
}

/// Assembles one method of a [`ClassBuilder`]
#[derive(Debug)]
pub struct MethodBuilder<'a> {
    pool: &'a mut ConstantPool,
    owner: &'a str,
    access: AccessFlags,
    name: &'a str,
    descriptor: &'a str,
    emit_frames: bool,
    throws: Vec<String>,
    annotations: Vec<Annotation>,
    code: Option<MethodBody>,
    error: Option<ClassFormatError>,
}

impl<'a> MethodBuilder<'a> {
    /// Add a class to the `Exceptions` attribute
    pub fn throws(&mut self, class: &str) -> &mut Self {
        self.throws.push(class.to_string());
        self
    }

    /// Add a runtime-visible method annotation
    pub fn annotate(&mut self, annotation: Annotation) -> &mut Self {
        self.annotations.push(annotation);
        self
    }

    /// Give the method a body; `max_stack` is computed
    pub fn code(&mut self, max_locals: u16, emit: impl FnOnce(&mut CodeBuilder<'_>)) -> &mut Self {
        let mut code = CodeBuilder {
            pool: &mut *self.pool,
            body: MethodBody::new(0, max_locals),
            error: None,
        };
        emit(&mut code);
        match code.error {
            Some(err) => {
                self.error.get_or_insert(err);
            }
            None => self.code = Some(code.body),
        }
        self
    }

    fn finish(self) -> ClassResult<MemberInfo> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut method = MemberInfo {
            access: self.access,
            name_index: self.pool.utf8_index(self.name)?,
            descriptor_index: self.pool.utf8_index(self.descriptor)?,
            attributes: Vec::new(),
        };
        if let Some(mut body) = self.code {
            body.max_stack = analysis::max_stack(&body, self.pool)?;
            let context = MethodContext {
                owner: self.owner,
                name: self.name,
                descriptor: self.descriptor,
                is_static: self.access.is_static(),
            };
            let info = body
                .encode(self.pool, &context, self.emit_frames)
                .map_err(|err| ClassFormatError::bad_attribute(names::CODE, err.to_string()))?;
            method.attributes.push(Attribute::new(self.pool, names::CODE, info)?);
        }
        if !self.throws.is_empty() {
            let mut info = ClassWriter::new();
            info.write_u16(self.throws.len() as u16);
            for class in &self.throws {
                info.write_u16(self.pool.class_index(class)?);
            }
            method
                .attributes
                .push(Attribute::new(self.pool, names::EXCEPTIONS, info.into_bytes())?);
        }
        if !self.annotations.is_empty() {
            let info = encode_annotations(&self.annotations, self.pool)?;
            method
                .attributes
                .push(Attribute::new(self.pool, names::RUNTIME_VISIBLE_ANNOTATIONS, info)?);
        }
        Ok(method)
    }
}

/// Emits instructions into a method body
#[derive(Debug)]
pub struct CodeBuilder<'a> {
    pool: &'a mut ConstantPool,
    body: MethodBody,
    error: Option<ClassFormatError>,
}

impl<'a> CodeBuilder<'a> {
    fn index(&mut self, result: ClassResult<u16>) -> u16 {
        result.unwrap_or_else(|err| {
            self.error.get_or_insert(err);
            0
        })
    }

    /// Append a raw instruction
    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.body.insns.push(insn);
        self
    }

    /// Instruction without operands
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.insn(Insn::Simple(opcode))
    }

    /// Push an int using the shortest encoding
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => match Opcode::from_u8((Opcode::Iconst0 as i32 + value) as u8) {
                Some(opcode) => self.op(opcode),
                None => self,
            },
            v if i8::try_from(v).is_ok() => self.insn(Insn::Push {
                opcode: Opcode::Bipush,
                value: v as i16,
            }),
            v if i16::try_from(v).is_ok() => self.insn(Insn::Push {
                opcode: Opcode::Sipush,
                value: v as i16,
            }),
            v => {
                let index = self.pool.integer_index(v);
                let index = self.index(index);
                self.insn(Insn::Constant {
                    opcode: Opcode::Ldc,
                    index,
                })
            }
        }
    }

    /// Push a string constant
    pub fn ldc_string(&mut self, text: &str) -> &mut Self {
        let index = self.pool.string_index(text);
        let index = self.index(index);
        self.insn(Insn::Constant {
            opcode: Opcode::Ldc,
            index,
        })
    }

    /// Push a long constant
    pub fn ldc_long(&mut self, value: i64) -> &mut Self {
        let index = self.pool.add(Constant::Long(value));
        let index = self.index(index);
        self.insn(Insn::Constant {
            opcode: Opcode::Ldc2W,
            index,
        })
    }

    /// Load a local
    pub fn load(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.insn(Insn::load(kind, index))
    }

    /// Store a local
    pub fn store(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.insn(Insn::store(kind, index))
    }

    /// `aload`
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.load(ValueKind::Reference, index)
    }

    /// `iload`
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.load(ValueKind::Int, index)
    }

    fn member(&mut self, opcode: Opcode, kind: RefKind, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.member_ref_index(kind, owner, name, descriptor);
        let index = self.index(index);
        self.insn(Insn::Constant { opcode, index })
    }

    /// `getstatic`
    pub fn getstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Getstatic, RefKind::Field, owner, name, descriptor)
    }

    /// `putstatic`
    pub fn putstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Putstatic, RefKind::Field, owner, name, descriptor)
    }

    /// `getfield`
    pub fn getfield(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Getfield, RefKind::Field, owner, name, descriptor)
    }

    /// `putfield`
    pub fn putfield(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Putfield, RefKind::Field, owner, name, descriptor)
    }

    /// `invokevirtual`
    pub fn invokevirtual(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Invokevirtual, RefKind::Method, owner, name, descriptor)
    }

    /// `invokespecial`
    pub fn invokespecial(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Invokespecial, RefKind::Method, owner, name, descriptor)
    }

    /// `invokestatic`
    pub fn invokestatic(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.member(Opcode::Invokestatic, RefKind::Method, owner, name, descriptor)
    }

    /// `invokeinterface`
    pub fn invokeinterface(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let count = crate::descriptor::MethodType::parse(descriptor)
            .map(|method| method.arg_slots() as u8 + 1)
            .unwrap_or_else(|err| {
                self.error.get_or_insert(err);
                1
            });
        let index = self
            .pool
            .member_ref_index(RefKind::InterfaceMethod, owner, name, descriptor);
        let index = self.index(index);
        self.insn(Insn::InvokeInterface { index, count })
    }

    fn class_insn(&mut self, opcode: Opcode, class: &str) -> &mut Self {
        let index = self.pool.class_index(class);
        let index = self.index(index);
        self.insn(Insn::Constant { opcode, index })
    }

    /// `new`
    pub fn new_instance(&mut self, class: &str) -> &mut Self {
        self.class_insn(Opcode::New, class)
    }

    /// `checkcast`
    pub fn checkcast(&mut self, class: &str) -> &mut Self {
        self.class_insn(Opcode::Checkcast, class)
    }

    /// Fresh unplaced label
    pub fn new_label(&mut self) -> Label {
        self.body.new_label()
    }

    /// Bind `label` to the next instruction
    pub fn place(&mut self, label: Label) -> &mut Self {
        self.insn(Insn::Label(label))
    }

    /// Branch to `target`
    pub fn jump(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        self.insn(Insn::Jump { opcode, target })
    }

    /// Record the verifier frame at `label`
    pub fn frame(&mut self, label: Label, frame: Frame) -> &mut Self {
        self.body.frames.push((label, frame));
        self
    }

    /// Record a source line starting at `label`
    pub fn line(&mut self, label: Label, line: u16) -> &mut Self {
        self.body.line_numbers.push((label, line));
        self
    }

    /// Add an exception handler
    pub fn handler(&mut self, start: Label, end: Label, handler: Label, catch_type: Option<&str>) -> &mut Self {
        self.body.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }
}
