//! Appending weave initialiser code to candidate initialisers

use rustc_hash::FxHashSet;
use tapestry_classfile::{analysis, ClassResult, ConstantPool, Frame, Insn, Label, MethodBody, Opcode};

/// Position of the `invokespecial <init>` that initialises `this`
///
/// Argument evaluation may itself construct objects; only the call that
/// leaves an empty operand stack behind is the super or delegating call.
pub(crate) fn super_call_position(body: &MethodBody, pool: &ConstantPool) -> ClassResult<Option<usize>> {
    let mut depth = 0i32;
    for (position, insn) in body.instructions() {
        depth += analysis::stack_effect(insn, pool)?;
        if let Insn::Constant {
            opcode: Opcode::Invokespecial,
            index,
        } = insn
        {
            if depth == 0 && pool.member_ref(*index)?.name == "<init>" {
                return Ok(Some(position));
            }
        }
    }
    Ok(None)
}

/// Class whose constructor the super call invokes
pub(crate) fn super_call_owner(body: &MethodBody, pool: &ConstantPool) -> ClassResult<Option<String>> {
    let Some(position) = super_call_position(body, pool)? else {
        return Ok(None);
    };
    Ok(body.insns[position]
        .member_index()
        .map(|index| pool.member_ref(index).map(|r| r.owner.to_string()))
        .transpose()?)
}

/// The part of a constructor body after its super call
///
/// Handlers, frames and line entries that refer to labels outside the tail
/// are dropped along with the prefix.
pub(crate) fn constructor_tail(mut body: MethodBody, pool: &ConstantPool) -> ClassResult<MethodBody> {
    let Some(position) = super_call_position(&body, pool)? else {
        return Ok(body);
    };
    body.insns.drain(..=position);
    let placed: FxHashSet<Label> = body
        .insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Label(label) => Some(*label),
            _ => None,
        })
        .collect();
    body.handlers
        .retain(|h| placed.contains(&h.start) && placed.contains(&h.end) && placed.contains(&h.handler));
    body.frames.retain(|(label, _)| placed.contains(label));
    body.line_numbers.retain(|(label, _)| placed.contains(label));
    Ok(body)
}

/// Run `tail` wherever `target` would return
///
/// Every `return` of `target` jumps to a join point, described by
/// `join_frame`, where the tail starts. The tail's own `return` ends the
/// combined method.
pub(crate) fn append_at_returns(target: &mut MethodBody, tail: MethodBody, join_frame: Frame) {
    let tail = target.adopt(tail);
    let join = target.new_label();
    for insn in &mut target.insns {
        if *insn == Insn::Simple(Opcode::Return) {
            *insn = Insn::Jump {
                opcode: Opcode::Goto,
                target: join,
            };
        }
    }
    target.insns.push(Insn::Label(join));
    target.frames.push((join, join_frame));
    target.max_locals = target.max_locals.max(tail.max_locals);
    target.insns.extend(tail.insns);
    target.handlers.extend(tail.handlers);
    target.frames.extend(tail.frames);
    target.line_numbers.extend(tail.line_numbers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_classfile::constant_pool::RefKind;
    use tapestry_classfile::VerificationType;

    fn pool_with(refs: &[(&str, &str)]) -> (ConstantPool, Vec<u16>) {
        let mut pool = ConstantPool::new();
        let indices = refs
            .iter()
            .map(|(owner, desc)| pool.member_ref_index(RefKind::Method, owner, "<init>", desc).unwrap())
            .collect();
        (pool, indices)
    }

    #[test]
    fn test_nested_construction_is_not_the_super_call() {
        let (mut pool, inits) = pool_with(&[("java/lang/StringBuilder", "()V"), ("t/Base", "(Ljava/lang/Object;)V")]);
        let builder = pool.class_index("java/lang/StringBuilder").unwrap();
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![
            Insn::Simple(Opcode::Aload0),
            Insn::Constant {
                opcode: Opcode::New,
                index: builder,
            },
            Insn::Simple(Opcode::Dup),
            Insn::Constant {
                opcode: Opcode::Invokespecial,
                index: inits[0],
            },
            Insn::Constant {
                opcode: Opcode::Invokespecial,
                index: inits[1],
            },
            Insn::Simple(Opcode::Aload0),
            Insn::Simple(Opcode::Pop),
            Insn::Simple(Opcode::Return),
        ];
        assert_eq!(super_call_position(&body, &pool).unwrap(), Some(4));
        assert_eq!(super_call_owner(&body, &pool).unwrap().as_deref(), Some("t/Base"));

        let tail = constructor_tail(body, &pool).unwrap();
        assert_eq!(
            tail.insns,
            vec![
                Insn::Simple(Opcode::Aload0),
                Insn::Simple(Opcode::Pop),
                Insn::Simple(Opcode::Return)
            ]
        );
    }

    #[test]
    fn test_returns_jump_to_tail() {
        let mut target = MethodBody::new(1, 1);
        let early = target.new_label();
        target.insns = vec![
            Insn::Simple(Opcode::Iconst0),
            Insn::Jump {
                opcode: Opcode::Ifne,
                target: early,
            },
            Insn::Simple(Opcode::Return),
            Insn::Label(early),
            Insn::Simple(Opcode::Return),
        ];
        target.frames.push((early, Frame::default()));

        let mut tail = MethodBody::new(1, 3);
        tail.insns = vec![Insn::Simple(Opcode::Nop), Insn::Simple(Opcode::Return)];

        let join_frame = Frame::with_locals(vec![VerificationType::Object("t/Target".into())]);
        append_at_returns(&mut target, tail, join_frame.clone());

        let returns = target
            .insns
            .iter()
            .filter(|insn| **insn == Insn::Simple(Opcode::Return))
            .count();
        assert_eq!(returns, 1);
        let gotos: Vec<Label> = target
            .insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Jump {
                    opcode: Opcode::Goto,
                    target,
                } => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(gotos.len(), 2);
        assert_eq!(gotos[0], gotos[1]);
        assert_eq!(target.frame_at(gotos[0]), Some(&join_frame));
        assert_eq!(target.max_locals, 3);
        assert_eq!(target.insns.last(), Some(&Insn::Simple(Opcode::Return)));
    }
}
