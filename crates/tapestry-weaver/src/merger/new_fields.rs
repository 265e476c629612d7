//! Storage for fields introduced by weaves
//!
//! New fields are either injected into the candidate or kept out of it
//! entirely. In the second mode every `getfield`/`putfield` on a new
//! instance field becomes a static call on a host-provided store class,
//! keyed by the object and `"<class>.<field>"`.

use rustc_hash::FxHashMap;
use tapestry_classfile::constant_pool::RefKind;
use tapestry_classfile::{ClassResult, ConstantPool, FieldType, Insn, MethodBody, Opcode};

/// Where new instance fields live
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NewFieldStorage {
    /// Appended to the candidate's field table
    #[default]
    Injected,
    /// Held by the store class `owner`, which provides `getX(Object,String)`
    /// and `putX(Object,X,String)` for every accessor suffix `X`
    SideTable { owner: String },
}

/// New instance fields routed through a store class
#[derive(Debug, Clone)]
pub(crate) struct SideTableFields {
    pub owner: String,
    pub candidate: String,
    pub fields: FxHashMap<String, FieldType>,
}

fn accessor_type(ty: &FieldType) -> String {
    if ty.is_primitive() {
        ty.descriptor()
    } else {
        "Ljava/lang/Object;".to_string()
    }
}

/// Side-table key of a field
pub fn side_table_key(class: &str, field: &str) -> String {
    format!("{}.{}", class, field)
}

impl SideTableFields {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rewrite accesses to the side-table fields in `body`
    pub fn rewrite(&self, body: &mut MethodBody, pool: &mut ConstantPool) -> ClassResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut rewritten = Vec::with_capacity(body.insns.len());
        for insn in std::mem::take(&mut body.insns) {
            let Insn::Constant {
                opcode: opcode @ (Opcode::Getfield | Opcode::Putfield),
                index,
            } = insn
            else {
                rewritten.push(insn);
                continue;
            };
            let reference = pool.member_ref(index)?;
            let field = (reference.owner == self.candidate)
                .then(|| self.fields.get_key_value(reference.name))
                .flatten();
            let Some((name, ty)) = field else {
                rewritten.push(insn);
                continue;
            };

            let key = pool.string_index(&side_table_key(&self.candidate, name))?;
            rewritten.push(Insn::Constant {
                opcode: Opcode::Ldc,
                index: key,
            });
            let value = accessor_type(ty);
            let (method, descriptor) = if opcode == Opcode::Getfield {
                (
                    format!("get{}", ty.accessor_suffix()),
                    format!("(Ljava/lang/Object;Ljava/lang/String;){}", value),
                )
            } else {
                (
                    format!("put{}", ty.accessor_suffix()),
                    format!("(Ljava/lang/Object;{}Ljava/lang/String;)V", value),
                )
            };
            let call = pool.member_ref_index(RefKind::Method, &self.owner, &method, &descriptor)?;
            rewritten.push(Insn::Constant {
                opcode: Opcode::Invokestatic,
                index: call,
            });
            if opcode == Opcode::Getfield && !ty.is_primitive() && ty.internal_name() != "java/lang/Object" {
                rewritten.push(Insn::Constant {
                    opcode: Opcode::Checkcast,
                    index: pool.class_index(&ty.internal_name())?,
                });
            }
        }
        body.insns = rewritten;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getfield_becomes_store_call() {
        let mut pool = ConstantPool::new();
        let field = pool
            .member_ref_index(RefKind::Field, "t/Target", "tag", "Ljava/lang/String;")
            .unwrap();
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![
            Insn::Simple(Opcode::Aload0),
            Insn::Constant {
                opcode: Opcode::Getfield,
                index: field,
            },
            Insn::Simple(Opcode::Areturn),
        ];
        let mut fields = FxHashMap::default();
        fields.insert("tag".to_string(), FieldType::Object("java/lang/String".into()));
        let table = SideTableFields {
            owner: "host/Store".into(),
            candidate: "t/Target".into(),
            fields,
        };
        table.rewrite(&mut body, &mut pool).unwrap();

        assert_eq!(body.insns.len(), 5);
        let Insn::Constant { index, .. } = body.insns[1] else {
            panic!("expected ldc");
        };
        assert_eq!(pool.string(index).unwrap(), "t/Target.tag");
        let Insn::Constant { index, .. } = body.insns[2] else {
            panic!("expected invokestatic");
        };
        let call = pool.member_ref(index).unwrap();
        assert_eq!(call.owner, "host/Store");
        assert_eq!(call.name, "getObject");
        assert_eq!(call.descriptor, "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;");
        assert!(matches!(
            body.insns[3],
            Insn::Constant {
                opcode: Opcode::Checkcast,
                ..
            }
        ));
    }

    #[test]
    fn test_other_fields_untouched() {
        let mut pool = ConstantPool::new();
        let field = pool.member_ref_index(RefKind::Field, "t/Target", "count", "I").unwrap();
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![
            Insn::Simple(Opcode::Aload0),
            Insn::Constant {
                opcode: Opcode::Getfield,
                index: field,
            },
            Insn::Simple(Opcode::Ireturn),
        ];
        let original = body.clone();
        let mut fields = FxHashMap::default();
        fields.insert("hits".to_string(), FieldType::Int);
        let table = SideTableFields {
            owner: "host/Store".into(),
            candidate: "t/Target".into(),
            fields,
        };
        table.rewrite(&mut body, &mut pool).unwrap();
        assert_eq!(body, original);
    }
}
