//! Moving weave code into a candidate class

use tapestry_classfile::access::{ACC_PRIVATE, ACC_STATIC, ACC_STRICT, ACC_SYNCHRONIZED, ACC_SYNTHETIC};
use tapestry_classfile::attribute::{self, names};
use tapestry_classfile::{
    analysis, AccessFlags, ClassFile, ClassWriter, ConstantPool, MemberInfo, MethodBody, MethodContext,
    PoolImporter,
};

use crate::error::{MergeError, MergeResult};
use crate::model::{ClassDescriptor, MethodDescriptor};
use crate::scan::BodyScan;

/// Prefix of the names given to relocated original bodies
pub const RELOCATED_PREFIX: &str = "weave$original$";

/// Decode a weave method body, refusing instructions that cannot move
pub(crate) fn weave_body(weave: &ClassDescriptor, method: &MethodDescriptor) -> MergeResult<MethodBody> {
    let body = weave.body(method)?.ok_or_else(|| MergeError::MissingBody {
        method: format!("{}.{}", weave.name, method.signature()),
    })?;
    let scan = BodyScan::of(&body, &weave.class_file().constant_pool)?;
    if let Some((_, opcode)) = scan.unsupported.first() {
        return Err(MergeError::UnsupportedInstruction {
            method: format!("{}.{}", weave.name, method.signature()),
            mnemonic: opcode.mnemonic(),
        });
    }
    Ok(body)
}

/// Copies weave bodies into the candidate's constant pool
pub(crate) struct Transplant<'w> {
    importer: PoolImporter<'w>,
}

impl<'w> Transplant<'w> {
    pub fn new(weave: &'w ClassDescriptor, candidate: &str) -> Self {
        Self {
            importer: PoolImporter::new(&weave.class_file().constant_pool).renaming(&weave.name, candidate),
        }
    }

    pub fn rename_descriptor(&self, descriptor: &str) -> String {
        self.importer.rename_descriptor(descriptor)
    }

    pub fn import_body(&mut self, body: &MethodBody, target: &mut ConstantPool) -> MergeResult<MethodBody> {
        Ok(self.importer.import_body(body, target)?)
    }

    pub fn import_constant(&mut self, index: u16, target: &mut ConstantPool) -> MergeResult<u16> {
        Ok(self.importer.import(index, target)?)
    }
}

/// First `weave$original$<name>$<n>` not declared by `class`
fn free_relocated_name(class: &ClassFile, name: &str) -> String {
    let taken = |candidate: &str| {
        class
            .methods
            .iter()
            .any(|m| m.name(&class.constant_pool).ok() == Some(candidate))
    };
    let mut n = 0usize;
    loop {
        let candidate = format!("{}{}${}", RELOCATED_PREFIX, name, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Copy the method at `index` under a fresh private synthetic name and
/// return that name
///
/// The copy keeps the body and the declared exceptions; everything else
/// belongs to the method that keeps the original name.
pub(crate) fn relocate_original(class: &mut ClassFile, index: usize) -> MergeResult<String> {
    let original = &class.methods[index];
    let name = original.name(&class.constant_pool)?.to_string();
    let relocated = free_relocated_name(class, &name);

    let kept = ACC_STATIC | ACC_SYNCHRONIZED | ACC_STRICT;
    let access = AccessFlags(ACC_PRIVATE | ACC_SYNTHETIC | (original.access.bits() & kept));
    let attributes = [names::CODE, names::EXCEPTIONS]
        .into_iter()
        .filter_map(|attr| attribute::find(&original.attributes, &class.constant_pool, attr).cloned())
        .collect();
    let descriptor_index = original.descriptor_index;

    let name_index = class.constant_pool.utf8_index(&relocated)?;
    class.methods.push(MemberInfo {
        access,
        name_index,
        descriptor_index,
        attributes,
    });
    Ok(relocated)
}

/// `Exceptions` attribute payload for `throws`
pub(crate) fn exceptions_attribute(pool: &mut ConstantPool, throws: &[String]) -> MergeResult<Vec<u8>> {
    let mut info = ClassWriter::new();
    info.write_u16(throws.len() as u16);
    for class in throws {
        info.write_u16(pool.class_index(class)?);
    }
    Ok(info.into_bytes())
}

/// Assemble `body` and install it as the code of method `index`
pub(crate) fn install_body(class: &mut ClassFile, index: usize, mut body: MethodBody) -> MergeResult<()> {
    let owner = class.name()?.to_string();
    let method = &class.methods[index];
    let name = method.name(&class.constant_pool)?.to_string();
    let descriptor = method.descriptor(&class.constant_pool)?.to_string();
    let is_static = method.access.is_static();
    let label = format!("{}.{}{}", owner, name, descriptor);

    let emit_frames = class.requires_frames();
    let branches = !body.handlers.is_empty() || body.insns.iter().any(|insn| !insn.targets().is_empty());
    if emit_frames && branches && body.frames.is_empty() {
        return Err(MergeError::MissingFrames { method: label });
    }

    body.max_stack = analysis::max_stack(&body, &class.constant_pool)?;
    let context = MethodContext {
        owner: &owner,
        name: &name,
        descriptor: &descriptor,
        is_static,
    };
    let info = body
        .encode(&mut class.constant_pool, &context, emit_frames)
        .map_err(|err| MergeError::assemble(label, err))?;
    class.methods[index].set_attribute(&mut class.constant_pool, names::CODE, info)?;
    Ok(())
}
