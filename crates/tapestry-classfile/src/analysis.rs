//! Operand stack analysis
//!
//! Computes the maximum operand stack depth of a body by walking every
//! reachable path once. Paths are assumed to agree on the depth at merge
//! points, as the verifier demands.

use rustc_hash::FxHashMap;

use crate::code::{Insn, Label, MethodBody};
use crate::constant_pool::{Constant, ConstantPool};
use crate::descriptor::{FieldType, MethodType, ReturnType};
use crate::error::{ClassFormatError, ClassResult};
use crate::opcode::Opcode;

/// Maximum operand stack depth over all reachable instructions
pub fn max_stack(body: &MethodBody, pool: &ConstantPool) -> ClassResult<u16> {
    Ok(walk(body, pool)?.1)
}

/// Operand stack depth before each position, `None` where unreachable
pub fn stack_depths(body: &MethodBody, pool: &ConstantPool) -> ClassResult<Vec<Option<i32>>> {
    Ok(walk(body, pool)?.0)
}

fn walk(body: &MethodBody, pool: &ConstantPool) -> ClassResult<(Vec<Option<i32>>, u16)> {
    let positions: FxHashMap<Label, usize> = body
        .insns
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Insn::Label(label) => Some((*label, i)),
            _ => None,
        })
        .collect();
    let position_of = |label: Label| {
        positions.get(&label).copied().ok_or_else(|| ClassFormatError::BadAttribute {
            name: "Code".to_string(),
            reason: format!("label {:?} is not placed", label),
        })
    };

    let mut depth_at: Vec<Option<i32>> = vec![None; body.insns.len()];
    let mut worklist = vec![(0usize, 0i32)];
    for handler in &body.handlers {
        worklist.push((position_of(handler.handler)?, 1));
    }

    let mut max = 0i32;
    while let Some((start, depth)) = worklist.pop() {
        let mut position = start;
        let mut depth = depth;
        while position < body.insns.len() {
            if depth_at[position].is_some() {
                break;
            }
            depth_at[position] = Some(depth);
            max = max.max(depth);
            let insn = &body.insns[position];
            let opcode = match insn.opcode() {
                Some(opcode) => opcode,
                None => {
                    position += 1;
                    continue;
                }
            };

            depth += stack_effect(insn, pool)?;
            max = max.max(depth);

            for target in insn.targets() {
                worklist.push((position_of(target)?, depth));
            }
            // the return address only exists at the subroutine entry
            if matches!(opcode, Opcode::Jsr | Opcode::JsrW) {
                depth -= 1;
            }
            if opcode.ends_block() {
                break;
            }
            position += 1;
        }
    }
    Ok((depth_at, max.max(0) as u16))
}

fn value_slots(descriptor: &str) -> ClassResult<i32> {
    Ok(FieldType::parse(descriptor)?.slots() as i32)
}

fn invoke_effect(descriptor: &str, has_receiver: bool) -> ClassResult<i32> {
    let method = MethodType::parse(descriptor)?;
    let returned = match &method.ret {
        ReturnType::Void => 0,
        ReturnType::Value(ty) => ty.slots() as i32,
    };
    Ok(returned - method.arg_slots() as i32 - has_receiver as i32)
}

/// Net change in operand stack slots caused by one instruction
///
/// `jsr` is counted as pushing its return address.
pub fn stack_effect(insn: &Insn, pool: &ConstantPool) -> ClassResult<i32> {
    use Opcode::*;

    let opcode = match insn {
        Insn::Label(_) => return Ok(0),
        Insn::InvokeInterface { index, .. } => {
            return invoke_effect(pool.member_ref(*index)?.descriptor, true);
        }
        Insn::InvokeDynamic { index } => {
            return match pool.get(*index)? {
                Constant::InvokeDynamic { name_and_type, .. } => {
                    invoke_effect(pool.name_and_type(*name_and_type)?.1, false)
                }
                _ => Err(ClassFormatError::BadConstantIndex {
                    index: *index,
                    expected: "InvokeDynamic",
                }),
            };
        }
        Insn::MultiANewArray { dimensions, .. } => return Ok(1 - *dimensions as i32),
        other => match other.opcode() {
            Some(opcode) => opcode,
            None => return Ok(0),
        },
    };

    if let Insn::Constant { index, .. } = insn {
        match opcode {
            Getstatic => return value_slots(pool.member_ref(*index)?.descriptor),
            Putstatic => return Ok(-value_slots(pool.member_ref(*index)?.descriptor)?),
            Getfield => return Ok(value_slots(pool.member_ref(*index)?.descriptor)? - 1),
            Putfield => return Ok(-value_slots(pool.member_ref(*index)?.descriptor)? - 1),
            Invokevirtual | Invokespecial => return invoke_effect(pool.member_ref(*index)?.descriptor, true),
            Invokestatic => return invoke_effect(pool.member_ref(*index)?.descriptor, false),
            _ => {}
        }
    }

    Ok(match opcode {
        Nop => 0,
        AconstNull | IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5 => 1,
        Lconst0 | Lconst1 => 2,
        Fconst0 | Fconst1 | Fconst2 => 1,
        Dconst0 | Dconst1 => 2,
        Bipush | Sipush | Ldc | LdcW => 1,
        Ldc2W => 2,
        Iload | Fload | Aload => 1,
        Lload | Dload => 2,
        Iload0 | Iload1 | Iload2 | Iload3 => 1,
        Lload0 | Lload1 | Lload2 | Lload3 => 2,
        Fload0 | Fload1 | Fload2 | Fload3 => 1,
        Dload0 | Dload1 | Dload2 | Dload3 => 2,
        Aload0 | Aload1 | Aload2 | Aload3 => 1,
        Iaload | Faload | Aaload | Baload | Caload | Saload => -1,
        Laload | Daload => 0,
        Istore | Fstore | Astore => -1,
        Lstore | Dstore => -2,
        Istore0 | Istore1 | Istore2 | Istore3 => -1,
        Lstore0 | Lstore1 | Lstore2 | Lstore3 => -2,
        Fstore0 | Fstore1 | Fstore2 | Fstore3 => -1,
        Dstore0 | Dstore1 | Dstore2 | Dstore3 => -2,
        Astore0 | Astore1 | Astore2 | Astore3 => -1,
        Iastore | Fastore | Aastore | Bastore | Castore | Sastore => -3,
        Lastore | Dastore => -4,
        Pop => -1,
        Pop2 => -2,
        Dup | DupX1 | DupX2 => 1,
        Dup2 | Dup2X1 | Dup2X2 => 2,
        Swap => 0,
        Iadd | Fadd | Isub | Fsub | Imul | Fmul | Idiv | Fdiv | Irem | Frem => -1,
        Ladd | Dadd | Lsub | Dsub | Lmul | Dmul | Ldiv | Ddiv | Lrem | Drem => -2,
        Ineg | Lneg | Fneg | Dneg => 0,
        Ishl | Lshl | Ishr | Lshr | Iushr | Lushr => -1,
        Iand | Ior | Ixor => -1,
        Land | Lor | Lxor => -2,
        Iinc => 0,
        I2l | I2d | F2l | F2d => 1,
        L2i | L2f | D2i | D2f => -1,
        I2f | L2d | F2i | D2l | I2b | I2c | I2s => 0,
        Lcmp | Dcmpl | Dcmpg => -3,
        Fcmpl | Fcmpg => -1,
        Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | Ifnull | Ifnonnull => -1,
        IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple | IfAcmpeq | IfAcmpne => -2,
        Goto | GotoW | Ret => 0,
        Jsr | JsrW => 1,
        Tableswitch | Lookupswitch => -1,
        Ireturn | Freturn | Areturn => -1,
        Lreturn | Dreturn => -2,
        Return => 0,
        New => 1,
        Newarray | Anewarray | Arraylength | Checkcast | Instanceof => 0,
        Athrow => -1,
        Monitorenter | Monitorexit => -1,
        Wide => 0,
        Getstatic | Putstatic | Getfield | Putfield | Invokevirtual | Invokespecial | Invokestatic
        | Invokeinterface | Invokedynamic | Multianewarray => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_pool::RefKind;

    #[test]
    fn test_straight_line_depth() {
        let mut pool = ConstantPool::new();
        let sum = pool
            .member_ref_index(RefKind::Method, "a/B", "sum", "(JJ)J")
            .unwrap();
        let mut body = MethodBody::new(0, 4);
        body.insns = vec![
            Insn::Simple(Opcode::Lload0),
            Insn::Simple(Opcode::Lload2),
            Insn::Constant {
                opcode: Opcode::Invokestatic,
                index: sum,
            },
            Insn::Simple(Opcode::Lreturn),
        ];
        assert_eq!(max_stack(&body, &pool).unwrap(), 4);
        assert_eq!(
            stack_depths(&body, &pool).unwrap(),
            vec![Some(0), Some(2), Some(4), Some(2)]
        );
    }

    #[test]
    fn test_handler_starts_with_exception() {
        let pool = ConstantPool::new();
        let mut body = MethodBody::new(0, 1);
        let (start, end, handler) = (body.new_label(), body.new_label(), body.new_label());
        body.insns = vec![
            Insn::Label(start),
            Insn::Simple(Opcode::Return),
            Insn::Label(end),
            Insn::Label(handler),
            Insn::Simple(Opcode::Dup),
            Insn::Simple(Opcode::Pop),
            Insn::Simple(Opcode::Athrow),
        ];
        body.handlers.push(crate::code::Handler {
            start,
            end,
            handler,
            catch_type: None,
        });
        assert_eq!(max_stack(&body, &pool).unwrap(), 2);
    }
}
