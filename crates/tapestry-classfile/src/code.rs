//! Method bodies
//!
//! A `Code` attribute is decoded into a flat instruction list in which
//! branch targets, handler ranges, frames and line numbers refer to
//! [`Label`]s instead of byte offsets. Instructions can then be inserted or
//! removed freely; [`MethodBody::encode`] recomputes every offset, picks
//! wide encodings where operands no longer fit, and re-emits the
//! `StackMapTable` and `LineNumberTable`.
//!
//! Other code attributes (local variable tables and the like) describe
//! offsets of the original layout and are not carried over.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::attribute::names;
use crate::constant_pool::ConstantPool;
use crate::descriptor::ValueKind;
use crate::error::{ClassFormatError, ClassResult};
use crate::frame::{self, Frame, VerificationType};
use crate::io::{ClassReader, ClassWriter};
use crate::opcode::Opcode;

/// Largest code array the JVM accepts
pub const MAX_CODE_LENGTH: usize = 65535;

/// Position marker inside a method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// Identity of the method a body belongs to, needed to expand the implicit
/// first frame
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    /// Internal name of the declaring class
    pub owner: &'a str,
    /// Method name
    pub name: &'a str,
    /// Method descriptor
    pub descriptor: &'a str,
    /// Whether the method is static
    pub is_static: bool,
}

/// One instruction, or a label pseudo-instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Binds a label to the next instruction
    Label(Label),
    /// Instruction without operands
    Simple(Opcode),
    /// `bipush` or `sipush`
    Push {
        /// `Bipush` or `Sipush`
        opcode: Opcode,
        /// Pushed value
        value: i16,
    },
    /// `newarray` with its primitive type code
    NewArray(u8),
    /// Load, store or `ret` with an explicit local index
    Var {
        /// Long-form opcode
        opcode: Opcode,
        /// Local slot
        index: u16,
    },
    /// `iinc`
    Iinc {
        /// Local slot
        index: u16,
        /// Increment
        delta: i16,
    },
    /// Instruction with a single constant pool operand: `ldc` family, field
    /// access, non-interface invocations, `new`, `anewarray`, `checkcast`
    /// and `instanceof`
    Constant {
        /// Opcode
        opcode: Opcode,
        /// Pool index
        index: u16,
    },
    /// `invokeinterface`
    InvokeInterface {
        /// InterfaceMethodref index
        index: u16,
        /// Argument slot count including the receiver
        count: u8,
    },
    /// `invokedynamic`
    InvokeDynamic {
        /// InvokeDynamic index
        index: u16,
    },
    /// `multianewarray`
    MultiANewArray {
        /// Class index of the array type
        index: u16,
        /// Dimensions to allocate
        dimensions: u8,
    },
    /// Branch with a single target
    Jump {
        /// Branch opcode
        opcode: Opcode,
        /// Destination
        target: Label,
    },
    /// `tableswitch`
    TableSwitch {
        /// Target when out of range
        default: Label,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// Targets for `low..=high`
        targets: Vec<Label>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Target when no key matches
        default: Label,
        /// Sorted key/target pairs
        pairs: Vec<(i32, Label)>,
    },
}

/// Local variable access performed by an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAccess {
    /// Value kind moved
    pub kind: ValueKind,
    /// Local slot
    pub index: u16,
    /// Store rather than load
    pub store: bool,
}

const KINDS: [ValueKind; 5] = [
    ValueKind::Int,
    ValueKind::Long,
    ValueKind::Float,
    ValueKind::Double,
    ValueKind::Reference,
];

impl Insn {
    /// Load of a local, using the short form where possible
    pub fn load(kind: ValueKind, index: u16) -> Insn {
        match kind.load(index) {
            (opcode, None) => Insn::Simple(opcode),
            (opcode, Some(index)) => Insn::Var { opcode, index },
        }
    }

    /// Store to a local, using the short form where possible
    pub fn store(kind: ValueKind, index: u16) -> Insn {
        match kind.store(index) {
            (opcode, None) => Insn::Simple(opcode),
            (opcode, Some(index)) => Insn::Var { opcode, index },
        }
    }

    /// Opcode of a real instruction, `None` for labels
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Insn::Label(_) => return None,
            Insn::Simple(opcode)
            | Insn::Push { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Constant { opcode, .. }
            | Insn::Jump { opcode, .. } => *opcode,
            Insn::NewArray(_) => Opcode::Newarray,
            Insn::Iinc { .. } => Opcode::Iinc,
            Insn::InvokeInterface { .. } => Opcode::Invokeinterface,
            Insn::InvokeDynamic { .. } => Opcode::Invokedynamic,
            Insn::MultiANewArray { .. } => Opcode::Multianewarray,
            Insn::TableSwitch { .. } => Opcode::Tableswitch,
            Insn::LookupSwitch { .. } => Opcode::Lookupswitch,
        })
    }

    /// Pool index referenced by a member access or invocation
    pub fn member_index(&self) -> Option<u16> {
        match self {
            Insn::Constant { opcode, index } if opcode.is_field_access() || opcode.is_invoke() => Some(*index),
            Insn::InvokeInterface { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Local variable load or store, for both short and explicit forms
    pub fn local_access(&self) -> Option<LocalAccess> {
        let (op, explicit) = match self {
            Insn::Simple(opcode) => (*opcode as u8, None),
            Insn::Var { opcode, index } => (*opcode as u8, Some(*index)),
            _ => return None,
        };
        let (kind, index, store) = match (op, explicit) {
            (0x15..=0x19, Some(index)) => (KINDS[(op - 0x15) as usize], index, false),
            (0x1a..=0x2d, None) => {
                let n = op - 0x1a;
                (KINDS[(n / 4) as usize], (n % 4) as u16, false)
            }
            (0x36..=0x3a, Some(index)) => (KINDS[(op - 0x36) as usize], index, true),
            (0x3b..=0x4e, None) => {
                let n = op - 0x3b;
                (KINDS[(n / 4) as usize], (n % 4) as u16, true)
            }
            _ => return None,
        };
        Some(LocalAccess { kind, index, store })
    }

    /// Labels this instruction may transfer control to
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch { default, targets, .. } => {
                std::iter::once(*default).chain(targets.iter().copied()).collect()
            }
            Insn::LookupSwitch { default, pairs } => {
                std::iter::once(*default).chain(pairs.iter().map(|(_, l)| *l)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn map_labels(&mut self, f: &dyn Fn(Label) -> Label) {
        match self {
            Insn::Label(label) => *label = f(*label),
            Insn::Jump { target, .. } => *target = f(*target),
            Insn::TableSwitch { default, targets, .. } => {
                *default = f(*default);
                targets.iter_mut().for_each(|t| *t = f(*t));
            }
            Insn::LookupSwitch { default, pairs } => {
                *default = f(*default);
                pairs.iter_mut().for_each(|(_, t)| *t = f(*t));
            }
            _ => {}
        }
    }
}

/// Exception handler entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// First covered instruction
    pub start: Label,
    /// End of the covered range, exclusive
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// Caught class, `None` for `finally`
    pub catch_type: Option<String>,
}

/// Failure to lay out a method body
#[derive(Debug, Error)]
pub enum AssembleError {
    /// A referenced label is not placed in the instruction list
    #[error("label {0:?} is referenced but never placed")]
    UnboundLabel(Label),

    /// A conditional branch cannot reach its target
    #[error("branch at offset {from} cannot reach offset {to}")]
    BranchOutOfRange {
        /// Branch offset
        from: u32,
        /// Target offset
        to: u32,
    },

    /// The laid out code exceeds the JVM limit
    #[error("code length {0} exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    /// Pool or descriptor failure while emitting
    #[error(transparent)]
    ClassFormat(#[from] ClassFormatError),
}

/// Decoded method body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodBody {
    /// Declared operand stack depth
    pub max_stack: u16,
    /// Declared local slots
    pub max_locals: u16,
    /// Instructions and labels in order
    pub insns: Vec<Insn>,
    /// Exception table in priority order
    pub handlers: Vec<Handler>,
    /// Expanded frames keyed by label
    pub frames: Vec<(Label, Frame)>,
    /// Source line starts
    pub line_numbers: Vec<(Label, u16)>,
    next_label: u32,
}

struct LabelTable {
    by_offset: BTreeMap<usize, Label>,
    next: u32,
}

impl LabelTable {
    fn at(&mut self, offset: usize) -> Label {
        let next = &mut self.next;
        *self.by_offset.entry(offset).or_insert_with(|| {
            let label = Label(*next);
            *next += 1;
            label
        })
    }
}

impl MethodBody {
    /// Empty body
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            max_stack,
            max_locals,
            ..Self::default()
        }
    }

    /// Fresh label, not yet placed
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Real instructions, skipping labels, with their list positions
    pub fn instructions(&self) -> impl Iterator<Item = (usize, &Insn)> + '_ {
        self.insns
            .iter()
            .enumerate()
            .filter(|(_, insn)| !matches!(insn, Insn::Label(_)))
    }

    /// Position of the first real instruction after `position`
    pub fn next_instruction(&self, position: usize) -> Option<usize> {
        (position + 1..self.insns.len()).find(|i| !matches!(self.insns[*i], Insn::Label(_)))
    }

    /// Frame recorded at a label
    pub fn frame_at(&self, label: Label) -> Option<&Frame> {
        self.frames.iter().find(|(l, _)| *l == label).map(|(_, f)| f)
    }

    /// Move every label of `other` past this body's labels and return the
    /// relocated body
    ///
    /// Instructions of the result can be spliced into `self` without label
    /// clashes.
    pub fn adopt(&mut self, mut other: MethodBody) -> MethodBody {
        let base = self.next_label;
        let shift = move |label: Label| Label(label.0 + base);
        other.insns.iter_mut().for_each(|insn| insn.map_labels(&shift));
        for handler in &mut other.handlers {
            handler.start = shift(handler.start);
            handler.end = shift(handler.end);
            handler.handler = shift(handler.handler);
        }
        for (label, frame) in &mut other.frames {
            *label = shift(*label);
            for item in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
                if let VerificationType::Uninitialized(l) = item {
                    *l = shift(*l);
                }
            }
        }
        other.line_numbers.iter_mut().for_each(|(label, _)| *label = shift(*label));
        self.next_label += other.next_label;
        other.next_label = self.next_label;
        other
    }

    /// Decode a `Code` attribute payload
    pub fn decode(info: &[u8], pool: &ConstantPool, context: &MethodContext<'_>) -> ClassResult<Self> {
        let mut reader = ClassReader::new(info);
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_length = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_length)?;

        let mut labels = LabelTable {
            by_offset: BTreeMap::new(),
            next: 0,
        };
        let decoded = decode_instructions(code, &mut labels)?;

        let handler_count = reader.read_u16()?;
        let mut handlers = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start = labels.at(reader.read_u16()? as usize);
            let end = labels.at(reader.read_u16()? as usize);
            let handler = labels.at(reader.read_u16()? as usize);
            let catch_type = match reader.read_u16()? {
                0 => None,
                index => Some(pool.class_name(index)?.to_string()),
            };
            handlers.push(Handler {
                start,
                end,
                handler,
                catch_type,
            });
        }

        let mut frames = Vec::new();
        let mut line_numbers = Vec::new();
        let attribute_count = reader.read_u16()?;
        for _ in 0..attribute_count {
            let name = pool.utf8(reader.read_u16()?)?;
            let len = reader.read_u32()? as usize;
            let payload = reader.read_bytes(len)?;
            match name {
                names::STACK_MAP_TABLE => {
                    let initial = Frame::initial(context)?;
                    let decoded = frame::decode_stack_map(payload, pool, &initial, &mut |o| labels.at(o))?;
                    for (offset, frame) in decoded {
                        frames.push((labels.at(offset), frame));
                    }
                }
                names::LINE_NUMBER_TABLE => {
                    let mut lines = ClassReader::new(payload);
                    let count = lines.read_u16()?;
                    for _ in 0..count {
                        let start = lines.read_u16()? as usize;
                        let line = lines.read_u16()?;
                        line_numbers.push((labels.at(start), line));
                    }
                }
                _ => {}
            }
        }
        if reader.has_more() {
            return Err(ClassFormatError::bad_attribute(names::CODE, "trailing bytes"));
        }

        // every label must sit on an instruction boundary or at the end
        for offset in labels.by_offset.keys() {
            if *offset != code_length && decoded.binary_search_by_key(offset, |(o, _)| *o).is_err() {
                return Err(ClassFormatError::bad_attribute(
                    names::CODE,
                    format!("offset {} is not an instruction boundary", offset),
                ));
            }
        }

        let mut insns = Vec::with_capacity(decoded.len() + labels.by_offset.len());
        let mut pending = labels.by_offset.iter().peekable();
        for (offset, insn) in decoded {
            while let Some((_, label)) = pending.next_if(|(o, _)| **o == offset) {
                insns.push(Insn::Label(*label));
            }
            insns.push(insn);
        }
        for (_, label) in pending {
            insns.push(Insn::Label(*label));
        }

        Ok(Self {
            max_stack,
            max_locals,
            insns,
            handlers,
            frames,
            line_numbers,
            next_label: labels.next,
        })
    }

    /// Assemble into a `Code` attribute payload
    ///
    /// Frames are written only when `emit_frames` is set; pass the owning
    /// class's [`ClassFile::requires_frames`](crate::ClassFile::requires_frames).
    pub fn encode(
        &self,
        pool: &mut ConstantPool,
        context: &MethodContext<'_>,
        emit_frames: bool,
    ) -> Result<Vec<u8>, AssembleError> {
        let (offsets, label_offsets, wide) = self.layout()?;
        let offset_of = |label: Label| -> Result<u32, AssembleError> {
            label_offsets
                .get(&label)
                .copied()
                .ok_or(AssembleError::UnboundLabel(label))
        };

        let mut code = ClassWriter::with_capacity(offsets.last().copied().unwrap_or(0) as usize);
        for (i, insn) in self.insns.iter().enumerate() {
            debug_assert_eq!(code.offset() as u32, offsets[i]);
            emit(insn, offsets[i], wide[i], &mut code, &offset_of)?;
        }
        let code = code.into_bytes();
        if code.len() > MAX_CODE_LENGTH {
            return Err(AssembleError::CodeTooLarge(code.len()));
        }

        let mut out = ClassWriter::with_capacity(code.len() + 64);
        out.write_u16(self.max_stack);
        out.write_u16(self.max_locals);
        out.write_u32(code.len() as u32);
        out.write_bytes(&code);

        let mut table = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            let start = offset_of(handler.start)?;
            let end = offset_of(handler.end)?;
            // ranges emptied by removed instructions are illegal
            if start >= end {
                continue;
            }
            let catch_type = match &handler.catch_type {
                Some(name) => pool.class_index(name)?,
                None => 0,
            };
            table.push((start, end, offset_of(handler.handler)?, catch_type));
        }
        out.write_u16(table.len() as u16);
        for (start, end, handler, catch_type) in table {
            out.write_u16(start as u16);
            out.write_u16(end as u16);
            out.write_u16(handler as u16);
            out.write_u16(catch_type);
        }

        let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
        if emit_frames && !self.frames.is_empty() {
            let mut by_offset: BTreeMap<u32, &Frame> = BTreeMap::new();
            for (label, frame) in &self.frames {
                let offset = offset_of(*label)?;
                if (offset as usize) < code.len() {
                    by_offset.insert(offset, frame);
                }
            }
            let ordered: Vec<(u32, &Frame)> = by_offset.into_iter().collect();
            let initial = Frame::initial(context)?;
            let payload = frame::encode_stack_map(&ordered, &initial, pool, &offset_of)?;
            attributes.push((pool.utf8_index(names::STACK_MAP_TABLE)?, payload));
        }
        if !self.line_numbers.is_empty() {
            let mut lines = ClassWriter::new();
            lines.write_u16(self.line_numbers.len() as u16);
            for (label, line) in &self.line_numbers {
                lines.write_u16(offset_of(*label)? as u16);
                lines.write_u16(*line);
            }
            attributes.push((pool.utf8_index(names::LINE_NUMBER_TABLE)?, lines.into_bytes()));
        }
        out.write_u16(attributes.len() as u16);
        for (name, payload) in attributes {
            out.write_u16(name);
            out.write_u32(payload.len() as u32);
            out.write_bytes(&payload);
        }
        Ok(out.into_bytes())
    }

    /// Compute instruction offsets, widening `goto`/`jsr` until every
    /// unconditional branch fits
    #[allow(clippy::type_complexity)]
    fn layout(&self) -> Result<(Vec<u32>, FxHashMap<Label, u32>, Vec<bool>), AssembleError> {
        let mut wide = vec![false; self.insns.len()];
        loop {
            let mut offsets = Vec::with_capacity(self.insns.len() + 1);
            let mut labels = FxHashMap::default();
            let mut offset = 0u32;
            for (i, insn) in self.insns.iter().enumerate() {
                offsets.push(offset);
                if let Insn::Label(label) = insn {
                    labels.insert(*label, offset);
                }
                offset += size(insn, offset, wide[i]);
            }
            offsets.push(offset);
            if offset as usize > MAX_CODE_LENGTH {
                return Err(AssembleError::CodeTooLarge(offset as usize));
            }

            let mut changed = false;
            for (i, insn) in self.insns.iter().enumerate() {
                if let Insn::Jump {
                    opcode: Opcode::Goto | Opcode::Jsr,
                    target,
                } = insn
                {
                    let to = *labels.get(target).ok_or(AssembleError::UnboundLabel(*target))?;
                    let delta = to as i64 - offsets[i] as i64;
                    if !wide[i] && i16::try_from(delta).is_err() {
                        wide[i] = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok((offsets, labels, wide));
            }
        }
    }
}

fn switch_padding(offset: u32) -> u32 {
    (4 - (offset + 1) % 4) % 4
}

fn size(insn: &Insn, offset: u32, wide: bool) -> u32 {
    match insn {
        Insn::Label(_) => 0,
        Insn::Simple(_) => 1,
        Insn::Push { opcode, .. } => {
            if *opcode == Opcode::Bipush {
                2
            } else {
                3
            }
        }
        Insn::NewArray(_) => 2,
        Insn::Var { index, .. } => {
            if *index <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Constant {
            opcode: Opcode::Ldc,
            index,
        } => {
            if *index <= u8::MAX as u16 {
                2
            } else {
                3
            }
        }
        Insn::Constant { .. } => 3,
        Insn::InvokeInterface { .. } | Insn::InvokeDynamic { .. } => 5,
        Insn::MultiANewArray { .. } => 4,
        Insn::Jump { opcode, .. } => match opcode {
            Opcode::GotoW | Opcode::JsrW => 5,
            _ if wide => 5,
            _ => 3,
        },
        Insn::TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len() as u32,
        Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(offset) + 8 + 8 * pairs.len() as u32,
    }
}

fn emit(
    insn: &Insn,
    offset: u32,
    wide: bool,
    code: &mut ClassWriter,
    offset_of: &dyn Fn(Label) -> Result<u32, AssembleError>,
) -> Result<(), AssembleError> {
    let relative = |label: Label| -> Result<i64, AssembleError> { Ok(offset_of(label)? as i64 - offset as i64) };
    match insn {
        Insn::Label(_) => {}
        Insn::Simple(opcode) => code.write_u8(*opcode as u8),
        Insn::Push { opcode, value } => {
            code.write_u8(*opcode as u8);
            if *opcode == Opcode::Bipush {
                code.write_i8(*value as i8);
            } else {
                code.write_i16(*value);
            }
        }
        Insn::NewArray(atype) => {
            code.write_u8(Opcode::Newarray as u8);
            code.write_u8(*atype);
        }
        Insn::Var { opcode, index } => {
            if *index <= u8::MAX as u16 {
                code.write_u8(*opcode as u8);
                code.write_u8(*index as u8);
            } else {
                code.write_u8(Opcode::Wide as u8);
                code.write_u8(*opcode as u8);
                code.write_u16(*index);
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                code.write_u8(Opcode::Iinc as u8);
                code.write_u8(*index as u8);
                code.write_i8(*delta as i8);
            } else {
                code.write_u8(Opcode::Wide as u8);
                code.write_u8(Opcode::Iinc as u8);
                code.write_u16(*index);
                code.write_i16(*delta);
            }
        }
        Insn::Constant {
            opcode: Opcode::Ldc,
            index,
        } => {
            if *index <= u8::MAX as u16 {
                code.write_u8(Opcode::Ldc as u8);
                code.write_u8(*index as u8);
            } else {
                code.write_u8(Opcode::LdcW as u8);
                code.write_u16(*index);
            }
        }
        Insn::Constant { opcode, index } => {
            code.write_u8(*opcode as u8);
            code.write_u16(*index);
        }
        Insn::InvokeInterface { index, count } => {
            code.write_u8(Opcode::Invokeinterface as u8);
            code.write_u16(*index);
            code.write_u8(*count);
            code.write_u8(0);
        }
        Insn::InvokeDynamic { index } => {
            code.write_u8(Opcode::Invokedynamic as u8);
            code.write_u16(*index);
            code.write_u16(0);
        }
        Insn::MultiANewArray { index, dimensions } => {
            code.write_u8(Opcode::Multianewarray as u8);
            code.write_u16(*index);
            code.write_u8(*dimensions);
        }
        Insn::Jump { opcode, target } => {
            let delta = relative(*target)?;
            match opcode {
                Opcode::GotoW | Opcode::JsrW => {
                    code.write_u8(*opcode as u8);
                    code.write_i32(delta as i32);
                }
                Opcode::Goto | Opcode::Jsr if wide => {
                    let widened = if *opcode == Opcode::Goto {
                        Opcode::GotoW
                    } else {
                        Opcode::JsrW
                    };
                    code.write_u8(widened as u8);
                    code.write_i32(delta as i32);
                }
                _ => {
                    let short = i16::try_from(delta).map_err(|_| AssembleError::BranchOutOfRange {
                        from: offset,
                        to: (offset as i64 + delta) as u32,
                    })?;
                    code.write_u8(*opcode as u8);
                    code.write_i16(short);
                }
            }
        }
        Insn::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            code.write_u8(Opcode::Tableswitch as u8);
            for _ in 0..switch_padding(offset) {
                code.write_u8(0);
            }
            code.write_i32(relative(*default)? as i32);
            code.write_i32(*low);
            code.write_i32(*high);
            for target in targets {
                code.write_i32(relative(*target)? as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            code.write_u8(Opcode::Lookupswitch as u8);
            for _ in 0..switch_padding(offset) {
                code.write_u8(0);
            }
            code.write_i32(relative(*default)? as i32);
            code.write_i32(pairs.len() as i32);
            for (key, target) in pairs {
                code.write_i32(*key);
                code.write_i32(relative(*target)? as i32);
            }
        }
    }
    Ok(())
}

fn decode_instructions(code: &[u8], labels: &mut LabelTable) -> ClassResult<Vec<(usize, Insn)>> {
    let mut reader = ClassReader::new(code);
    let mut out = Vec::new();
    let target = |labels: &mut LabelTable, start: usize, delta: i64| -> ClassResult<Label> {
        let to = start as i64 + delta;
        if to < 0 || to as usize >= code.len() {
            return Err(ClassFormatError::bad_attribute(
                names::CODE,
                format!("branch at {} leaves the method", start),
            ));
        }
        Ok(labels.at(to as usize))
    };

    while reader.has_more() {
        let start = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(ClassFormatError::InvalidOpcode {
            opcode: byte,
            offset: start,
        })?;
        let insn = match opcode {
            Opcode::Bipush => Insn::Push {
                opcode,
                value: reader.read_i8()? as i16,
            },
            Opcode::Sipush => Insn::Push {
                opcode,
                value: reader.read_i16()?,
            },
            Opcode::Ldc => Insn::Constant {
                opcode,
                index: reader.read_u8()? as u16,
            },
            Opcode::LdcW | Opcode::Ldc2W => Insn::Constant {
                opcode,
                index: reader.read_u16()?,
            },
            Opcode::Iload
            | Opcode::Lload
            | Opcode::Fload
            | Opcode::Dload
            | Opcode::Aload
            | Opcode::Istore
            | Opcode::Lstore
            | Opcode::Fstore
            | Opcode::Dstore
            | Opcode::Astore
            | Opcode::Ret => Insn::Var {
                opcode,
                index: reader.read_u8()? as u16,
            },
            Opcode::Iinc => Insn::Iinc {
                index: reader.read_u8()? as u16,
                delta: reader.read_i8()? as i16,
            },
            Opcode::GotoW | Opcode::JsrW => {
                let delta = reader.read_i32()? as i64;
                Insn::Jump {
                    opcode,
                    target: target(labels, start, delta)?,
                }
            }
            op if op.is_jump() => {
                let delta = reader.read_i16()? as i64;
                Insn::Jump {
                    opcode,
                    target: target(labels, start, delta)?,
                }
            }
            Opcode::Tableswitch => {
                reader.skip(switch_padding(start as u32) as usize)?;
                let default = target(labels, start, reader.read_i32()? as i64)?;
                let low = reader.read_i32()?;
                let high = reader.read_i32()?;
                if high < low {
                    return Err(ClassFormatError::bad_attribute(names::CODE, "tableswitch high < low"));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(target(labels, start, reader.read_i32()? as i64)?);
                }
                Insn::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                }
            }
            Opcode::Lookupswitch => {
                reader.skip(switch_padding(start as u32) as usize)?;
                let default = target(labels, start, reader.read_i32()? as i64)?;
                let count = reader.read_i32()?;
                if count < 0 {
                    return Err(ClassFormatError::bad_attribute(names::CODE, "negative lookupswitch size"));
                }
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = reader.read_i32()?;
                    pairs.push((key, target(labels, start, reader.read_i32()? as i64)?));
                }
                Insn::LookupSwitch { default, pairs }
            }
            Opcode::Getstatic
            | Opcode::Putstatic
            | Opcode::Getfield
            | Opcode::Putfield
            | Opcode::Invokevirtual
            | Opcode::Invokespecial
            | Opcode::Invokestatic
            | Opcode::New
            | Opcode::Anewarray
            | Opcode::Checkcast
            | Opcode::Instanceof => Insn::Constant {
                opcode,
                index: reader.read_u16()?,
            },
            Opcode::Invokeinterface => {
                let index = reader.read_u16()?;
                let count = reader.read_u8()?;
                reader.skip(1)?;
                Insn::InvokeInterface { index, count }
            }
            Opcode::Invokedynamic => {
                let index = reader.read_u16()?;
                reader.skip(2)?;
                Insn::InvokeDynamic { index }
            }
            Opcode::Newarray => Insn::NewArray(reader.read_u8()?),
            Opcode::Multianewarray => Insn::MultiANewArray {
                index: reader.read_u16()?,
                dimensions: reader.read_u8()?,
            },
            Opcode::Wide => {
                let inner_byte = reader.read_u8()?;
                let inner = Opcode::from_u8(inner_byte).ok_or(ClassFormatError::InvalidOpcode {
                    opcode: inner_byte,
                    offset: start + 1,
                })?;
                match inner {
                    Opcode::Iinc => Insn::Iinc {
                        index: reader.read_u16()?,
                        delta: reader.read_i16()?,
                    },
                    Opcode::Iload
                    | Opcode::Lload
                    | Opcode::Fload
                    | Opcode::Dload
                    | Opcode::Aload
                    | Opcode::Istore
                    | Opcode::Lstore
                    | Opcode::Fstore
                    | Opcode::Dstore
                    | Opcode::Astore
                    | Opcode::Ret => Insn::Var {
                        opcode: inner,
                        index: reader.read_u16()?,
                    },
                    _ => {
                        return Err(ClassFormatError::InvalidOpcode {
                            opcode: inner_byte,
                            offset: start + 1,
                        })
                    }
                }
            }
            _ => Insn::Simple(opcode),
        };
        out.push((start, insn));
    }
    Ok(out)
}
