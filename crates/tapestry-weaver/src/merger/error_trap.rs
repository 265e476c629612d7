//! Error traps around woven method code
//!
//! With an error handler configured, the weave code before and after the
//! relocated original call is covered by `Throwable` handlers. A trapped
//! exception is passed to the handler's static `onWeaverThrow` and the
//! method then returns what the original returned, so broken
//! instrumentation never changes the result of the call. The call to the
//! original itself is never covered, and exceptions the weave throws with
//! an explicit `athrow` are rethrown untouched.

use std::ops::Range;

use tapestry_classfile::analysis;
use tapestry_classfile::constant_pool::RefKind;
use tapestry_classfile::{
    ConstantPool, Frame, Handler, Insn, Label, MethodBody, MethodContext, MethodType, Opcode, ReturnType, ValueKind,
    VerificationType,
};

use crate::error::MergeResult;

/// Static method every error handler class declares
pub const HANDLER_METHOD: &str = "onWeaverThrow";
/// Descriptor of [`HANDLER_METHOD`]
pub const HANDLER_DESCRIPTOR: &str = "(Ljava/lang/Throwable;)V";

const THROWABLE: &str = "java/lang/Throwable";

/// Where to trap: a woven candidate method and its relocated call
pub(crate) struct TrapSite<'a> {
    /// Error handler class
    pub handler: &'a str,
    pub method: MethodContext<'a>,
    /// Argument loads and call of the relocated original
    pub call: Range<usize>,
}

fn zero(kind: ValueKind) -> Insn {
    Insn::Simple(match kind {
        ValueKind::Int => Opcode::Iconst0,
        ValueKind::Long => Opcode::Lconst0,
        ValueKind::Float => Opcode::Fconst0,
        ValueKind::Double => Opcode::Dconst0,
        ValueKind::Reference => Opcode::AconstNull,
    })
}

/// `locals` padded with `Top` up to `base`, followed by `extra`
fn with_extra_locals(locals: &[VerificationType], base: u16, extra: &[VerificationType]) -> Vec<VerificationType> {
    let mut out = locals.to_vec();
    let mut slots = Frame::with_locals(out.clone()).local_slots();
    while slots < base {
        out.push(VerificationType::Top);
        slots += 1;
    }
    out.extend_from_slice(extra);
    out
}

/// Wrap the weave code around `site.call` in error traps
///
/// Returns `false` and leaves the body alone when the relocated call does
/// not start on an empty operand stack, since the code before it cannot be
/// closed off as its own region then.
pub(crate) fn wrap(body: &mut MethodBody, pool: &mut ConstantPool, site: &TrapSite<'_>) -> MergeResult<bool> {
    let depths = analysis::stack_depths(body, pool)?;
    if depths.get(site.call.start).copied().flatten() != Some(0) {
        return Ok(false);
    }

    let ret = MethodType::parse(site.method.descriptor)?.ret;
    let ret_kind = match &ret {
        ReturnType::Void => None,
        ReturnType::Value(ty) => Some((ty.kind(), ty.internal_name())),
    };
    let explicit_throws = body.insns.iter().any(|insn| *insn == Insn::Simple(Opcode::Athrow));

    // new locals live above everything the weave uses
    let base = body.max_locals;
    let mut extra = Vec::new();
    let mut next_slot = base;
    let original_slot = ret_kind.as_ref().map(|(kind, name)| {
        let slot = next_slot;
        next_slot += kind.slots();
        extra.push(VerificationType::of_kind(*kind, || name.clone()));
        slot
    });
    let explicit_slot = explicit_throws.then(|| {
        let slot = next_slot;
        next_slot += 1;
        extra.push(VerificationType::Object(THROWABLE.to_string()));
        slot
    });
    body.max_locals = next_slot;

    // both locals are assigned on entry, so every existing frame carries them
    for (_, frame) in &mut body.frames {
        frame.locals = with_extra_locals(&frame.locals, base, &extra);
    }

    let call = body.insns[site.call.clone()].to_vec();
    let (pre_start, pre_end, post_start, post_end) =
        (body.new_label(), body.new_label(), body.new_label(), body.new_label());

    let mut after_call = Vec::new();
    if let (Some((kind, _)), Some(slot)) = (&ret_kind, original_slot) {
        after_call.push(Insn::Simple(if kind.slots() == 2 { Opcode::Dup2 } else { Opcode::Dup }));
        after_call.push(Insn::store(*kind, slot));
    }
    after_call.push(Insn::Label(post_start));
    body.insns.splice(site.call.end..site.call.end, after_call);
    body.insns.insert(site.call.start, Insn::Label(pre_end));

    if let Some(slot) = explicit_slot {
        let throws: Vec<usize> = body
            .insns
            .iter()
            .enumerate()
            .filter(|(_, insn)| **insn == Insn::Simple(Opcode::Athrow))
            .map(|(position, _)| position)
            .collect();
        for position in throws.into_iter().rev() {
            body.insns.splice(
                position..position,
                [Insn::store(ValueKind::Reference, slot), Insn::load(ValueKind::Reference, slot)],
            );
        }
    }

    let mut prologue = Vec::new();
    if let (Some((kind, _)), Some(slot)) = (&ret_kind, original_slot) {
        prologue.push(zero(*kind));
        prologue.push(Insn::store(*kind, slot));
    }
    if let Some(slot) = explicit_slot {
        prologue.push(Insn::Simple(Opcode::AconstNull));
        prologue.push(Insn::store(ValueKind::Reference, slot));
    }
    prologue.push(Insn::Label(pre_start));
    body.insns.splice(0..0, prologue);
    body.insns.push(Insn::Label(post_end));

    let entry = Frame::initial(&site.method)?;
    let handler_frame = Frame {
        locals: with_extra_locals(&entry.locals, base, &extra),
        stack: vec![VerificationType::Object(THROWABLE.to_string())],
    };
    let notify = Insn::Constant {
        opcode: Opcode::Invokestatic,
        index: pool.member_ref_index(RefKind::Method, site.handler, HANDLER_METHOD, HANDLER_DESCRIPTOR)?,
    };

    // before the call: report, then run the original as if nothing happened
    let pre_handler = body.new_label();
    handler_entry(body, pre_handler, &handler_frame, explicit_slot);
    body.insns.push(notify.clone());
    body.insns.extend(call);
    body.insns.push(Insn::Simple(ret.return_opcode()));

    // after the call: report, then return the saved result
    let post_handler = body.new_label();
    handler_entry(body, post_handler, &handler_frame, explicit_slot);
    body.insns.push(notify);
    if let (Some((kind, _)), Some(slot)) = (&ret_kind, original_slot) {
        body.insns.push(Insn::load(*kind, slot));
    }
    body.insns.push(Insn::Simple(ret.return_opcode()));

    for (start, end, handler) in [(pre_start, pre_end, pre_handler), (post_start, post_end, post_handler)] {
        body.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: Some(THROWABLE.to_string()),
        });
    }
    Ok(true)
}

/// Handler label and frame, rethrowing exceptions the weave threw itself
fn handler_entry(body: &mut MethodBody, label: Label, frame: &Frame, explicit_slot: Option<u16>) {
    body.insns.push(Insn::Label(label));
    body.frames.push((label, frame.clone()));
    if let Some(slot) = explicit_slot {
        let trapped = body.new_label();
        body.insns.extend([
            Insn::load(ValueKind::Reference, slot),
            Insn::Jump {
                opcode: Opcode::Ifnull,
                target: trapped,
            },
            Insn::Simple(Opcode::Athrow),
            Insn::Label(trapped),
        ]);
        body.frames.push((trapped, frame.clone()));
    }
}
