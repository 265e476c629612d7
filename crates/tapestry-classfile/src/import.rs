//! Copying constants between pools
//!
//! Code moved from one class into another carries pool indices that are
//! only meaningful in the source class. [`PoolImporter`] re-creates the
//! referenced constants in the destination pool, deduplicating against
//! what is already there, and can rename one class on the way so that
//! references to the source class point at the destination class.

use rustc_hash::FxHashMap;

use crate::code::{Handler, Insn, MethodBody};
use crate::constant_pool::{Constant, ConstantPool};
use crate::descriptor::{rename_class_name, rename_in_descriptor};
use crate::error::{ClassFormatError, ClassResult};
use crate::frame::VerificationType;

/// Imports constants from a source pool into destination pools
#[derive(Debug)]
pub struct PoolImporter<'s> {
    source: &'s ConstantPool,
    rename: Option<(String, String)>,
    cache: FxHashMap<u16, u16>,
}

impl<'s> PoolImporter<'s> {
    /// Importer reading from `source`
    pub fn new(source: &'s ConstantPool) -> Self {
        Self {
            source,
            rename: None,
            cache: FxHashMap::default(),
        }
    }

    /// Rewrite class `from` to `to` in class names and descriptors
    pub fn renaming(mut self, from: &str, to: &str) -> Self {
        self.rename = Some((from.to_string(), to.to_string()));
        self
    }

    /// Apply the class rename to an internal name
    pub fn rename_class(&self, name: &str) -> String {
        match &self.rename {
            Some((from, to)) => rename_class_name(name, from, to),
            None => name.to_string(),
        }
    }

    /// Apply the class rename to a descriptor
    pub fn rename_descriptor(&self, descriptor: &str) -> String {
        match &self.rename {
            Some((from, to)) => rename_in_descriptor(descriptor, from, to),
            None => descriptor.to_string(),
        }
    }

    /// Import the constant at `index`, returning its index in `target`
    ///
    /// The cache assumes a single destination pool per importer.
    pub fn import(&mut self, index: u16, target: &mut ConstantPool) -> ClassResult<u16> {
        if let Some(imported) = self.cache.get(&index) {
            return Ok(*imported);
        }
        let source = self.source;
        let imported = match source.get(index)? {
            Constant::Utf8(utf8) => target.add(Constant::Utf8(utf8.clone()))?,
            constant @ (Constant::Integer(_) | Constant::Float(_) | Constant::Long(_) | Constant::Double(_)) => {
                target.add(constant.clone())?
            }
            Constant::Class(name) => {
                let name = self.rename_class(source.utf8(*name)?);
                target.class_index(&name)?
            }
            Constant::String(text) => {
                let text = self.import(*text, target)?;
                target.add(Constant::String(text))?
            }
            Constant::Fieldref { class, name_and_type } => {
                let class = self.import(*class, target)?;
                let name_and_type = self.import(*name_and_type, target)?;
                target.add(Constant::Fieldref { class, name_and_type })?
            }
            Constant::Methodref { class, name_and_type } => {
                let class = self.import(*class, target)?;
                let name_and_type = self.import(*name_and_type, target)?;
                target.add(Constant::Methodref { class, name_and_type })?
            }
            Constant::InterfaceMethodref { class, name_and_type } => {
                let class = self.import(*class, target)?;
                let name_and_type = self.import(*name_and_type, target)?;
                target.add(Constant::InterfaceMethodref { class, name_and_type })?
            }
            Constant::NameAndType { name, descriptor } => {
                let descriptor = self.rename_descriptor(source.utf8(*descriptor)?);
                target.name_and_type_index(source.utf8(*name)?, &descriptor)?
            }
            Constant::MethodHandle { kind, reference } => {
                let reference = self.import(*reference, target)?;
                target.add(Constant::MethodHandle { kind: *kind, reference })?
            }
            Constant::MethodType(descriptor) => {
                let descriptor = self.rename_descriptor(source.utf8(*descriptor)?);
                let descriptor = target.utf8_index(&descriptor)?;
                target.add(Constant::MethodType(descriptor))?
            }
            // bootstrap methods and module metadata live outside the pool
            other @ (Constant::Dynamic { .. }
            | Constant::InvokeDynamic { .. }
            | Constant::Module(_)
            | Constant::Package(_)) => {
                return Err(ClassFormatError::Unimportable {
                    index,
                    tag: other.tag(),
                })
            }
        };
        self.cache.insert(index, imported);
        Ok(imported)
    }

    /// Copy of `insn` with pool operands imported into `target`
    pub fn import_insn(&mut self, insn: &Insn, target: &mut ConstantPool) -> ClassResult<Insn> {
        Ok(match insn {
            Insn::Constant { opcode, index } => Insn::Constant {
                opcode: *opcode,
                index: self.import(*index, target)?,
            },
            Insn::InvokeInterface { index, count } => Insn::InvokeInterface {
                index: self.import(*index, target)?,
                count: *count,
            },
            Insn::InvokeDynamic { index } => Insn::InvokeDynamic {
                index: self.import(*index, target)?,
            },
            Insn::MultiANewArray { index, dimensions } => Insn::MultiANewArray {
                index: self.import(*index, target)?,
                dimensions: *dimensions,
            },
            other => other.clone(),
        })
    }

    /// Copy of a whole body with every pool reference and class name
    /// moved into `target`
    pub fn import_body(&mut self, body: &MethodBody, target: &mut ConstantPool) -> ClassResult<MethodBody> {
        let mut imported = body.clone();
        imported.insns = body
            .insns
            .iter()
            .map(|insn| self.import_insn(insn, target))
            .collect::<ClassResult<Vec<_>>>()?;
        imported.handlers = body
            .handlers
            .iter()
            .map(|handler| Handler {
                catch_type: handler.catch_type.as_deref().map(|name| self.rename_class(name)),
                ..handler.clone()
            })
            .collect();
        for (_, frame) in &mut imported.frames {
            for item in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
                if let VerificationType::Object(name) = item {
                    *name = self.rename_class(name);
                }
            }
        }
        Ok(imported)
    }
}
