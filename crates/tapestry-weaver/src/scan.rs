//! Instruction scans over weave method bodies

use tapestry_classfile::{ClassResult, ConstantPool, Insn, MethodBody, Opcode};

use crate::marker::is_call_original;

/// Member reference made by one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUse {
    /// Position in the instruction list
    pub position: usize,
    pub opcode: Opcode,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Everything the matcher and merger need to know about a body
#[derive(Debug, Clone, Default)]
pub struct BodyScan {
    /// Positions of invoke-original calls
    pub call_original: Vec<usize>,
    /// Invocations other than invoke-original
    pub invocations: Vec<MemberUse>,
    pub field_accesses: Vec<MemberUse>,
    /// `jsr`, `ret` and `invokedynamic`, which cannot be relocated
    pub unsupported: Vec<(usize, Opcode)>,
}

/// Synthetic outer-class accessors are named `access$` followed by digits
pub fn is_synthetic_accessor_name(name: &str) -> bool {
    match name.strip_prefix("access$") {
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

impl BodyScan {
    /// Scan a decoded body
    pub fn of(body: &MethodBody, pool: &ConstantPool) -> ClassResult<Self> {
        let mut scan = BodyScan::default();
        for (position, insn) in body.instructions() {
            let Some(opcode) = insn.opcode() else { continue };
            match opcode {
                Opcode::Jsr | Opcode::JsrW | Opcode::Ret | Opcode::Invokedynamic => {
                    scan.unsupported.push((position, opcode));
                    continue;
                }
                _ => {}
            }
            let Some(index) = insn.member_index() else { continue };
            let reference = pool.member_ref(index)?;
            let member = MemberUse {
                position,
                opcode,
                owner: reference.owner.to_string(),
                name: reference.name.to_string(),
                descriptor: reference.descriptor.to_string(),
            };
            if opcode.is_field_access() {
                scan.field_accesses.push(member);
            } else if is_call_original(reference.owner, reference.name, reference.descriptor) {
                scan.call_original.push(position);
            } else {
                scan.invocations.push(member);
            }
        }
        Ok(scan)
    }

    /// Calls to synthetic accessors of other classes
    pub fn synthetic_accessor_calls<'a>(&'a self, own_class: &'a str) -> impl Iterator<Item = &'a MemberUse> + 'a {
        self.invocations
            .iter()
            .filter(move |call| call.owner != own_class && is_synthetic_accessor_name(&call.name))
    }
}

/// Whether `insn` is an invoke-original call
pub fn is_call_original_insn(insn: &Insn, pool: &ConstantPool) -> bool {
    match insn {
        Insn::Constant {
            opcode: Opcode::Invokestatic,
            index,
        } => pool
            .member_ref(*index)
            .map(|r| is_call_original(r.owner, r.name, r.descriptor))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_classfile::constant_pool::RefKind;

    #[test]
    fn test_accessor_names() {
        assert!(is_synthetic_accessor_name("access$000"));
        assert!(is_synthetic_accessor_name("access$1"));
        assert!(!is_synthetic_accessor_name("access$"));
        assert!(!is_synthetic_accessor_name("access$foo"));
        assert!(!is_synthetic_accessor_name("process"));
    }

    #[test]
    fn test_scan_classifies_references() {
        let mut pool = ConstantPool::new();
        let original = pool
            .member_ref_index(RefKind::Method, "tapestry/api/Weaver", "callOriginal", "()Ljava/lang/Object;")
            .unwrap();
        let field = pool.member_ref_index(RefKind::Field, "w/W", "count", "I").unwrap();
        let accessor = pool
            .member_ref_index(RefKind::Method, "w/Outer", "access$000", "(Lw/Outer;)I")
            .unwrap();
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![
            Insn::Constant {
                opcode: Opcode::Invokestatic,
                index: original,
            },
            Insn::Simple(Opcode::Pop),
            Insn::Simple(Opcode::Aload0),
            Insn::Constant {
                opcode: Opcode::Getfield,
                index: field,
            },
            Insn::Constant {
                opcode: Opcode::Invokestatic,
                index: accessor,
            },
            Insn::Simple(Opcode::Return),
        ];
        let scan = BodyScan::of(&body, &pool).unwrap();
        assert_eq!(scan.call_original, vec![0]);
        assert_eq!(scan.field_accesses.len(), 1);
        assert_eq!(scan.field_accesses[0].name, "count");
        assert_eq!(scan.synthetic_accessor_calls("w/W").count(), 1);
        assert!(is_call_original_insn(&body.insns[0], &pool));
        assert!(scan.unsupported.is_empty());
    }
}
