//! Invoke-original call sites
//!
//! Java code consumes the `Object` returned by `Weaver.callOriginal()` in a
//! handful of compiler-generated shapes. Each accepted shape is rewritten so
//! the relocated original's real return value flows into the weave code
//! without a detour through `Object`.

use std::ops::Range;

use tapestry_classfile::constant_pool::RefKind;
use tapestry_classfile::{ClassResult, ConstantPool, FieldType, Insn, MethodBody, MethodType, Opcode, ReturnType};

use crate::scan::is_call_original_insn;

/// How the weave consumes the invoke-original result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultShape {
    /// Result popped; `pop` is the position of the pop
    Discard { pop: usize },
    /// `checkcast Boxed; invokevirtual Boxed.xValue()`
    Unbox { cast: usize, unbox: usize },
    /// `checkcast Boxed` kept as a boxed value
    CastToBox { cast: usize },
    /// Primitive result used as an `Object`
    Boxed,
    /// Reference result, with a redundant cast to the declared type
    Reference { cast: Option<usize> },
}

fn unbox_method(ty: &FieldType) -> Option<&'static str> {
    Some(match ty {
        FieldType::Boolean => "booleanValue",
        FieldType::Byte => "byteValue",
        FieldType::Char => "charValue",
        FieldType::Short => "shortValue",
        FieldType::Int => "intValue",
        FieldType::Long => "longValue",
        FieldType::Float => "floatValue",
        FieldType::Double => "doubleValue",
        FieldType::Object(_) | FieldType::Array(_) => return None,
    })
}

fn cast_target<'p>(insn: &Insn, pool: &'p ConstantPool) -> ClassResult<Option<&'p str>> {
    match insn {
        Insn::Constant {
            opcode: Opcode::Checkcast,
            index,
        } => Ok(Some(pool.class_name(*index)?)),
        _ => Ok(None),
    }
}

fn is_unbox_call(insn: &Insn, pool: &ConstantPool, boxed: &str, ty: &FieldType) -> ClassResult<bool> {
    let (Insn::Constant {
        opcode: Opcode::Invokevirtual,
        index,
    }, Some(method)) = (insn, unbox_method(ty))
    else {
        return Ok(false);
    };
    let reference = pool.member_ref(*index)?;
    Ok(reference.owner == boxed
        && reference.name == method
        && reference.descriptor == format!("(){}", ty.descriptor()))
}

/// Shape of the invoke-original call at `position`, `None` when the result
/// is used in a way incompatible with `ret`
pub(crate) fn classify(
    body: &MethodBody,
    pool: &ConstantPool,
    position: usize,
    ret: &ReturnType,
) -> ClassResult<Option<ResultShape>> {
    let next = body.next_instruction(position);
    let next_insn = next.map(|i| &body.insns[i]);

    let ty = match ret {
        ReturnType::Void => {
            return Ok(match (next, next_insn) {
                (Some(pop), Some(Insn::Simple(Opcode::Pop))) => Some(ResultShape::Discard { pop }),
                _ => None,
            })
        }
        ReturnType::Value(ty) => ty,
    };

    let (Some(next), Some(next_insn)) = (next, next_insn) else {
        return Ok(None);
    };
    let cast = cast_target(next_insn, pool)?;

    if !ty.is_primitive() {
        let redundant = cast.is_some_and(|name| name == ty.internal_name());
        return Ok(Some(ResultShape::Reference {
            cast: redundant.then_some(next),
        }));
    }

    if matches!(next_insn, Insn::Simple(Opcode::Pop)) {
        return Ok(Some(ResultShape::Discard { pop: next }));
    }
    let Some(cast) = cast else {
        return Ok(Some(ResultShape::Boxed));
    };
    let boxed = ty.boxed_class().unwrap_or_default();
    if cast != boxed {
        return Ok(None);
    }
    if let Some(unbox) = body.next_instruction(next) {
        if is_unbox_call(&body.insns[unbox], pool, boxed, ty)? {
            return Ok(Some(ResultShape::Unbox { cast: next, unbox }));
        }
    }
    Ok(Some(ResultShape::CastToBox { cast: next }))
}

fn box_call(pool: &mut ConstantPool, ty: &FieldType) -> ClassResult<Insn> {
    let boxed = ty.boxed_class().unwrap_or("java/lang/Object");
    let index = pool.member_ref_index(
        RefKind::Method,
        boxed,
        "valueOf",
        &format!("({})L{};", ty.descriptor(), boxed),
    )?;
    Ok(Insn::Constant {
        opcode: Opcode::Invokestatic,
        index,
    })
}

/// Call to the relocated original
#[derive(Debug, Clone, Copy)]
pub(crate) struct Relocated<'a> {
    /// Class declaring the relocated method
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_static: bool,
}

/// Replace the invoke-original call at `position` with a call to the
/// relocated method, adapting its result to `shape`
///
/// Returns the positions of the argument loads and the call itself.
pub(crate) fn replace(
    body: &mut MethodBody,
    pool: &mut ConstantPool,
    position: usize,
    shape: ResultShape,
    target: Relocated<'_>,
) -> ClassResult<Range<usize>> {
    let method = MethodType::parse(target.descriptor)?;

    // edits after the call first so `position` stays valid
    match (shape, &method.ret) {
        (ResultShape::Discard { pop }, ReturnType::Void) => {
            body.insns.remove(pop);
        }
        (ResultShape::Discard { pop }, ReturnType::Value(ty)) => {
            body.insns[pop] = Insn::Simple(if ty.slots() == 2 { Opcode::Pop2 } else { Opcode::Pop });
        }
        (ResultShape::Unbox { cast, unbox }, _) => {
            body.insns.remove(unbox);
            body.insns.remove(cast);
        }
        (ResultShape::CastToBox { cast }, ReturnType::Value(ty)) => {
            body.insns[cast] = box_call(pool, ty)?;
        }
        (ResultShape::Boxed, ReturnType::Value(ty)) => {
            let call = box_call(pool, ty)?;
            body.insns.insert(position + 1, call);
        }
        (ResultShape::Reference { cast: Some(cast) }, _) => {
            body.insns.remove(cast);
        }
        _ => {}
    }

    let mut replacement = Vec::with_capacity(method.params.len() + 2);
    let mut slot = 0u16;
    if !target.is_static {
        replacement.push(Insn::Simple(Opcode::Aload0));
        slot = 1;
    }
    for param in &method.params {
        replacement.push(Insn::load(param.kind(), slot));
        slot += param.slots();
    }
    let index = pool.member_ref_index(RefKind::Method, target.owner, target.name, target.descriptor)?;
    replacement.push(Insn::Constant {
        opcode: if target.is_static {
            Opcode::Invokestatic
        } else {
            Opcode::Invokespecial
        },
        index,
    });
    let len = replacement.len();
    body.insns.splice(position..=position, replacement);
    Ok(position..position + len)
}

/// Problem found while stripping invoke-original field initialisers
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InitializerProblem {
    /// Invoke-original outside the `field = callOriginal()` idiom
    StrayCallOriginal { position: usize },
    /// Write to a matched field that is not the idiom
    MatchedFieldWrite { field: String },
}

fn previous_instruction(body: &MethodBody, position: usize) -> Option<usize> {
    (0..position).rev().find(|i| !matches!(body.insns[*i], Insn::Label(_)))
}

/// Remove `field = Weaver.callOriginal()` initialisers of matched fields
///
/// These keep the original's value and exist only to satisfy the Java
/// compiler. `put` is `Putfield` for constructors and `Putstatic` for
/// static initialisers; `owner` is the class the field references name.
pub(crate) fn strip_field_initializers(
    body: &mut MethodBody,
    pool: &ConstantPool,
    owner: &str,
    matched_fields: &[String],
    put: Opcode,
) -> ClassResult<Vec<InitializerProblem>> {
    let is_matched_put = |insn: &Insn| -> ClassResult<Option<String>> {
        match insn {
            Insn::Constant { opcode, index } if *opcode == put => {
                let reference = pool.member_ref(*index)?;
                Ok((reference.owner == owner && matched_fields.iter().any(|f| f == reference.name))
                    .then(|| reference.name.to_string()))
            }
            _ => Ok(None),
        }
    };

    let mut problems = Vec::new();
    let mut removed = Vec::new();
    for position in 0..body.insns.len() {
        if !is_call_original_insn(&body.insns[position], pool) {
            continue;
        }
        let receiver = match put {
            Opcode::Putfield => match previous_instruction(body, position) {
                Some(p) if body.insns[p] == Insn::Simple(Opcode::Aload0) => Some(p),
                _ => {
                    problems.push(InitializerProblem::StrayCallOriginal { position });
                    continue;
                }
            },
            _ => None,
        };

        let mut pattern: Vec<usize> = receiver.into_iter().chain(Some(position)).collect();
        let mut cursor = body.next_instruction(position);
        let mut store = None;
        // at most a cast and an unboxing call sit between the call and the store
        for _ in 0..3 {
            let Some(at) = cursor else { break };
            let insn = &body.insns[at];
            if is_matched_put(insn)?.is_some() {
                store = Some(at);
                break;
            }
            match insn {
                Insn::Constant {
                    opcode: Opcode::Checkcast | Opcode::Invokevirtual,
                    ..
                } => pattern.push(at),
                _ => break,
            }
            cursor = body.next_instruction(at);
        }
        match store {
            Some(at) => {
                pattern.push(at);
                removed.extend(pattern);
            }
            None => problems.push(InitializerProblem::StrayCallOriginal { position }),
        }
    }

    for (position, insn) in body.insns.iter().enumerate() {
        if removed.contains(&position) {
            continue;
        }
        if let Some(field) = is_matched_put(insn)? {
            problems.push(InitializerProblem::MatchedFieldWrite { field });
        }
    }

    removed.sort_unstable();
    for position in removed.into_iter().rev() {
        body.insns.remove(position);
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{CALL_ORIGINAL_DESCRIPTOR, CALL_ORIGINAL_NAME, WEAVER_CLASS};

    struct Fixture {
        pool: ConstantPool,
        call: Insn,
    }

    fn fixture() -> Fixture {
        let mut pool = ConstantPool::new();
        let index = pool
            .member_ref_index(RefKind::Method, WEAVER_CLASS, CALL_ORIGINAL_NAME, CALL_ORIGINAL_DESCRIPTOR)
            .unwrap();
        Fixture {
            pool,
            call: Insn::Constant {
                opcode: Opcode::Invokestatic,
                index,
            },
        }
    }

    fn checkcast(pool: &mut ConstantPool, class: &str) -> Insn {
        Insn::Constant {
            opcode: Opcode::Checkcast,
            index: pool.class_index(class).unwrap(),
        }
    }

    #[test]
    fn test_unboxed_int_result() {
        let Fixture { mut pool, call } = fixture();
        let cast = checkcast(&mut pool, "java/lang/Integer");
        let unbox = Insn::Constant {
            opcode: Opcode::Invokevirtual,
            index: pool
                .member_ref_index(RefKind::Method, "java/lang/Integer", "intValue", "()I")
                .unwrap(),
        };
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![call, cast, unbox, Insn::Simple(Opcode::Ireturn)];
        let ret = ReturnType::Value(FieldType::Int);
        let shape = classify(&body, &pool, 0, &ret).unwrap().unwrap();
        assert_eq!(shape, ResultShape::Unbox { cast: 1, unbox: 2 });

        let target = Relocated {
            owner: "t/Target",
            name: "weave$original$count$0",
            descriptor: "()I",
            is_static: false,
        };
        let call = replace(&mut body, &mut pool, 0, shape, target).unwrap();
        assert_eq!(call, 0..2);
        assert_eq!(body.insns.len(), 3);
        assert_eq!(body.insns[0], Insn::Simple(Opcode::Aload0));
        let Insn::Constant { opcode, index } = &body.insns[1] else {
            panic!("expected invocation");
        };
        assert_eq!(*opcode, Opcode::Invokespecial);
        assert_eq!(pool.member_ref(*index).unwrap().name, "weave$original$count$0");
        assert_eq!(body.insns[2], Insn::Simple(Opcode::Ireturn));
    }

    #[test]
    fn test_void_result_must_be_discarded() {
        let Fixture { pool, call } = fixture();
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![call.clone(), Insn::Simple(Opcode::Pop), Insn::Simple(Opcode::Return)];
        assert_eq!(
            classify(&body, &pool, 0, &ReturnType::Void).unwrap(),
            Some(ResultShape::Discard { pop: 1 })
        );
        body.insns = vec![call, Insn::Simple(Opcode::Areturn)];
        assert_eq!(classify(&body, &pool, 0, &ReturnType::Void).unwrap(), None);
    }

    #[test]
    fn test_wrong_box_is_rejected() {
        let Fixture { mut pool, call } = fixture();
        let cast = checkcast(&mut pool, "java/lang/String");
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![call, cast, Insn::Simple(Opcode::Areturn)];
        let ret = ReturnType::Value(FieldType::Long);
        assert_eq!(classify(&body, &pool, 0, &ret).unwrap(), None);
    }

    #[test]
    fn test_wide_discard_becomes_pop2() {
        let Fixture { mut pool, call } = fixture();
        let mut body = MethodBody::new(0, 3);
        body.insns = vec![call, Insn::Simple(Opcode::Pop), Insn::Simple(Opcode::Return)];
        let ret = ReturnType::Value(FieldType::Long);
        let shape = classify(&body, &pool, 0, &ret).unwrap().unwrap();
        let target = Relocated {
            owner: "t/Target",
            name: "weave$original$sum$0",
            descriptor: "(J)J",
            is_static: true,
        };
        replace(&mut body, &mut pool, 0, shape, target).unwrap();
        assert_eq!(body.insns[0], Insn::Simple(Opcode::Lload0));
        assert_eq!(body.insns[2], Insn::Simple(Opcode::Pop2));
    }

    #[test]
    fn test_strip_field_initializer() {
        let Fixture { mut pool, call } = fixture();
        let cast = checkcast(&mut pool, "java/lang/String");
        let put = Insn::Constant {
            opcode: Opcode::Putfield,
            index: pool
                .member_ref_index(RefKind::Field, "w/Weave", "name", "Ljava/lang/String;")
                .unwrap(),
        };
        let mut body = MethodBody::new(0, 1);
        body.insns = vec![
            Insn::Simple(Opcode::Aload0),
            call,
            cast,
            put.clone(),
            Insn::Simple(Opcode::Aload0),
            Insn::Simple(Opcode::AconstNull),
            put,
            Insn::Simple(Opcode::Return),
        ];
        let matched = vec!["name".to_string()];
        let problems = strip_field_initializers(&mut body, &pool, "w/Weave", &matched, Opcode::Putfield).unwrap();
        assert_eq!(
            problems,
            vec![InitializerProblem::MatchedFieldWrite {
                field: "name".to_string()
            }]
        );
        assert_eq!(body.insns.len(), 4);
        assert_eq!(body.insns[0], Insn::Simple(Opcode::Aload0));
        assert_eq!(body.insns[1], Insn::Simple(Opcode::AconstNull));
    }
}
