//! Stack map frames
//!
//! Frames are held in expanded form: every frame lists its complete locals
//! and operand stack. The compact encodings (`same`, `chop`, `append`, ...)
//! only exist on the wire and are recomputed from the preceding frame when
//! a body is assembled, so frames stay correct when new ones are inserted
//! between existing ones.

use crate::code::{AssembleError, Label, MethodContext};
use crate::constant_pool::ConstantPool;
use crate::descriptor::{MethodType, ValueKind};
use crate::error::{ClassFormatError, ClassResult};
use crate::io::{ClassReader, ClassWriter};

const ITEM_TOP: u8 = 0;
const ITEM_INTEGER: u8 = 1;
const ITEM_FLOAT: u8 = 2;
const ITEM_DOUBLE: u8 = 3;
const ITEM_LONG: u8 = 4;
const ITEM_NULL: u8 = 5;
const ITEM_UNINITIALIZED_THIS: u8 = 6;
const ITEM_OBJECT: u8 = 7;
const ITEM_UNINITIALIZED: u8 = 8;

const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const SAME_FRAME_EXTENDED: u8 = 251;
const FULL_FRAME: u8 = 255;

/// Verification type of one local or stack entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// Unusable slot
    Top,
    /// int-like value
    Integer,
    /// float
    Float,
    /// double, one entry covering two slots
    Double,
    /// long, one entry covering two slots
    Long,
    /// null reference
    Null,
    /// `this` before the superclass constructor ran
    UninitializedThis,
    /// Class or array type by internal name
    Object(String),
    /// Result of the `new` instruction at a label
    Uninitialized(Label),
}

impl VerificationType {
    /// Verification type of a value of the given kind and reference name
    pub fn of_kind(kind: ValueKind, reference: impl FnOnce() -> String) -> Self {
        match kind {
            ValueKind::Int => VerificationType::Integer,
            ValueKind::Long => VerificationType::Long,
            ValueKind::Float => VerificationType::Float,
            ValueKind::Double => VerificationType::Double,
            ValueKind::Reference => VerificationType::Object(reference()),
        }
    }

    fn decode(
        reader: &mut ClassReader<'_>,
        pool: &ConstantPool,
        label_at: &mut dyn FnMut(usize) -> Label,
    ) -> ClassResult<Self> {
        let tag = reader.read_u8()?;
        Ok(match tag {
            ITEM_TOP => VerificationType::Top,
            ITEM_INTEGER => VerificationType::Integer,
            ITEM_FLOAT => VerificationType::Float,
            ITEM_DOUBLE => VerificationType::Double,
            ITEM_LONG => VerificationType::Long,
            ITEM_NULL => VerificationType::Null,
            ITEM_UNINITIALIZED_THIS => VerificationType::UninitializedThis,
            ITEM_OBJECT => VerificationType::Object(pool.class_name(reader.read_u16()?)?.to_string()),
            ITEM_UNINITIALIZED => VerificationType::Uninitialized(label_at(reader.read_u16()? as usize)),
            other => {
                return Err(ClassFormatError::bad_attribute(
                    "StackMapTable",
                    format!("unknown verification type {}", other),
                ))
            }
        })
    }

    fn encode(
        &self,
        writer: &mut ClassWriter,
        pool: &mut ConstantPool,
        offset_of: &dyn Fn(Label) -> Result<u32, AssembleError>,
    ) -> Result<(), AssembleError> {
        match self {
            VerificationType::Top => writer.write_u8(ITEM_TOP),
            VerificationType::Integer => writer.write_u8(ITEM_INTEGER),
            VerificationType::Float => writer.write_u8(ITEM_FLOAT),
            VerificationType::Double => writer.write_u8(ITEM_DOUBLE),
            VerificationType::Long => writer.write_u8(ITEM_LONG),
            VerificationType::Null => writer.write_u8(ITEM_NULL),
            VerificationType::UninitializedThis => writer.write_u8(ITEM_UNINITIALIZED_THIS),
            VerificationType::Object(name) => {
                writer.write_u8(ITEM_OBJECT);
                writer.write_u16(pool.class_index(name)?);
            }
            VerificationType::Uninitialized(label) => {
                writer.write_u8(ITEM_UNINITIALIZED);
                writer.write_u16(offset_of(*label)? as u16);
            }
        }
        Ok(())
    }
}

/// Complete verifier state at one instruction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Local variable entries; long and double take a single entry
    pub locals: Vec<VerificationType>,
    /// Operand stack entries, bottom first
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// Frame with the given locals and an empty stack
    pub fn with_locals(locals: Vec<VerificationType>) -> Self {
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    /// Implicit frame at the start of a method
    pub fn initial(context: &MethodContext<'_>) -> ClassResult<Self> {
        let mut locals = Vec::new();
        if !context.is_static {
            if context.name == "<init>" && context.owner != "java/lang/Object" {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(context.owner.to_string()));
            }
        }
        let method = MethodType::parse(context.descriptor)?;
        for param in &method.params {
            locals.push(VerificationType::of_kind(param.kind(), || param.internal_name()));
        }
        Ok(Self::with_locals(locals))
    }

    /// Local variable slots spanned by the locals
    pub fn local_slots(&self) -> u16 {
        self.locals
            .iter()
            .map(|local| match local {
                VerificationType::Long | VerificationType::Double => 2,
                _ => 1,
            })
            .sum()
    }
}

/// Decode a `StackMapTable` payload into absolute offsets and expanded frames
pub(crate) fn decode_stack_map(
    info: &[u8],
    pool: &ConstantPool,
    initial: &Frame,
    label_at: &mut dyn FnMut(usize) -> Label,
) -> ClassResult<Vec<(usize, Frame)>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u16()?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut previous = initial.clone();
    let mut previous_offset: Option<usize> = None;

    for _ in 0..count {
        let frame_type = reader.read_u8()?;
        let (delta, frame) = match frame_type {
            0..=63 => (frame_type as usize, Frame::with_locals(previous.locals.clone())),
            64..=127 => {
                let item = VerificationType::decode(&mut reader, pool, label_at)?;
                (
                    (frame_type - 64) as usize,
                    Frame {
                        locals: previous.locals.clone(),
                        stack: vec![item],
                    },
                )
            }
            SAME_LOCALS_1_STACK_ITEM_EXTENDED => {
                let delta = reader.read_u16()? as usize;
                let item = VerificationType::decode(&mut reader, pool, label_at)?;
                (
                    delta,
                    Frame {
                        locals: previous.locals.clone(),
                        stack: vec![item],
                    },
                )
            }
            248..=250 => {
                let delta = reader.read_u16()? as usize;
                let chop = (SAME_FRAME_EXTENDED - frame_type) as usize;
                if chop > previous.locals.len() {
                    return Err(ClassFormatError::bad_attribute(
                        "StackMapTable",
                        "chop frame removes more locals than exist",
                    ));
                }
                let keep = previous.locals.len() - chop;
                (delta, Frame::with_locals(previous.locals[..keep].to_vec()))
            }
            SAME_FRAME_EXTENDED => {
                let delta = reader.read_u16()? as usize;
                (delta, Frame::with_locals(previous.locals.clone()))
            }
            252..=254 => {
                let delta = reader.read_u16()? as usize;
                let mut locals = previous.locals.clone();
                for _ in 0..(frame_type - SAME_FRAME_EXTENDED) {
                    locals.push(VerificationType::decode(&mut reader, pool, label_at)?);
                }
                (delta, Frame::with_locals(locals))
            }
            FULL_FRAME => {
                let delta = reader.read_u16()? as usize;
                let local_count = reader.read_u16()?;
                let locals = (0..local_count)
                    .map(|_| VerificationType::decode(&mut reader, pool, label_at))
                    .collect::<ClassResult<Vec<_>>>()?;
                let stack_count = reader.read_u16()?;
                let stack = (0..stack_count)
                    .map(|_| VerificationType::decode(&mut reader, pool, label_at))
                    .collect::<ClassResult<Vec<_>>>()?;
                (delta, Frame { locals, stack })
            }
            reserved => {
                return Err(ClassFormatError::bad_attribute(
                    "StackMapTable",
                    format!("reserved frame type {}", reserved),
                ))
            }
        };

        let offset = match previous_offset {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous_offset = Some(offset);
        previous = frame.clone();
        frames.push((offset, frame));
    }

    if reader.has_more() {
        return Err(ClassFormatError::bad_attribute("StackMapTable", "trailing bytes"));
    }
    Ok(frames)
}

/// Encode frames sorted by strictly increasing offset
pub(crate) fn encode_stack_map(
    frames: &[(u32, &Frame)],
    initial: &Frame,
    pool: &mut ConstantPool,
    offset_of: &dyn Fn(Label) -> Result<u32, AssembleError>,
) -> Result<Vec<u8>, AssembleError> {
    let mut writer = ClassWriter::new();
    writer.write_u16(frames.len() as u16);
    let mut previous = initial;
    let mut previous_offset: Option<u32> = None;

    for (offset, frame) in frames {
        let delta = match previous_offset {
            None => *offset,
            Some(prev) => offset - prev - 1,
        };
        let same_locals = frame.locals == previous.locals;

        if same_locals && frame.stack.is_empty() {
            if delta < 64 {
                writer.write_u8(delta as u8);
            } else {
                writer.write_u8(SAME_FRAME_EXTENDED);
                writer.write_u16(delta as u16);
            }
        } else if same_locals && frame.stack.len() == 1 {
            if delta < 64 {
                writer.write_u8(64 + delta as u8);
            } else {
                writer.write_u8(SAME_LOCALS_1_STACK_ITEM_EXTENDED);
                writer.write_u16(delta as u16);
            }
            frame.stack[0].encode(&mut writer, pool, offset_of)?;
        } else if let Some(kind) = frame.stack.is_empty().then(|| locals_change(previous, frame)).flatten() {
            match kind {
                LocalsChange::Append(added) => {
                    writer.write_u8(SAME_FRAME_EXTENDED + added.len() as u8);
                    writer.write_u16(delta as u16);
                    for item in added {
                        item.encode(&mut writer, pool, offset_of)?;
                    }
                }
                LocalsChange::Chop(count) => {
                    writer.write_u8(SAME_FRAME_EXTENDED - count as u8);
                    writer.write_u16(delta as u16);
                }
            }
        } else {
            writer.write_u8(FULL_FRAME);
            writer.write_u16(delta as u16);
            writer.write_u16(frame.locals.len() as u16);
            for item in &frame.locals {
                item.encode(&mut writer, pool, offset_of)?;
            }
            writer.write_u16(frame.stack.len() as u16);
            for item in &frame.stack {
                item.encode(&mut writer, pool, offset_of)?;
            }
        }

        previous = frame;
        previous_offset = Some(*offset);
    }
    Ok(writer.into_bytes())
}

enum LocalsChange<'a> {
    Append(&'a [VerificationType]),
    Chop(usize),
}

fn locals_change<'a>(previous: &Frame, frame: &'a Frame) -> Option<LocalsChange<'a>> {
    let (prev, next) = (&previous.locals, &frame.locals);
    if next.len() > prev.len() && next.len() - prev.len() <= 3 && next.starts_with(prev) {
        return Some(LocalsChange::Append(&next[prev.len()..]));
    }
    if prev.len() > next.len() && prev.len() - next.len() <= 3 && prev.starts_with(next) {
        return Some(LocalsChange::Chop(prev.len() - next.len()));
    }
    None
}
