use std::collections::BTreeSet;

use crate::binary::BinaryReader;
use crate::error::{Diagnostics, Ed9Error, Position, Result};
use crate::opcode::{Opcode, OperandKind};
use crate::script::{Instruction, Operand};
use crate::tagged::{TaggedValue, TaggedWord};

/// Bounds of the code section in file offsets.
#[derive(Debug, Clone, Copy)]
pub struct CodeRange {
    pub start: usize,
    pub end: usize,
}

impl CodeRange {
    pub fn contains(&self, abs: u32) -> bool {
        (abs as usize) >= self.start && (abs as usize) <= self.end
    }
}

/// Decode the instruction at `addr` (relative to the code section).
pub fn decode_instruction(
    reader: &BinaryReader<'_>,
    code: CodeRange,
    addr: u32,
    diags: &mut Diagnostics,
) -> Result<Instruction> {
    let abs = code.start + addr as usize;
    let byte = reader.read_u8(abs)?;
    let opcode = Opcode::try_from(byte).map_err(Ed9Error::UnknownOpcode)?;
    let info = opcode.info();

    let len = info.encoded_len();
    if abs + len > code.end {
        return Err(Ed9Error::TruncatedSection {
            what: "instruction",
            offset: abs,
            needed: len,
            len: code.end,
        });
    }

    let mut at = abs + 1;
    let mut operands = Vec::with_capacity(info.operands.len());
    for kind in info.operands {
        let op = match kind {
            OperandKind::Tagged => {
                let w = TaggedWord(reader.read_u32(at)?);
                let (v, err) = TaggedValue::decode(reader, w);
                if let Some(e) = err {
                    diags.warn(Position::Offset(at as u64), e);
                }
                Operand::Tagged(v)
            }
            OperandKind::U8 => Operand::U8(reader.read_u8(at)?),
            OperandKind::U16 => Operand::U16(reader.read_u16(at)?),
            OperandKind::I32 => Operand::I32(reader.read_i32(at)?),
            OperandKind::Address => Operand::Address(reader.read_u32(at)?),
            OperandKind::FunctionIndex => Operand::Function(reader.read_u16(at)?),
        };
        operands.push(op);
        at += kind.size();
    }

    Ok(Instruction::new(opcode, addr, operands))
}

/// Result of walking one function body.
#[derive(Debug, Default)]
pub struct Body {
    pub instructions: Vec<Instruction>,
    /// Relative offset right past the last decoded byte.
    pub end: u32,
    /// Decoding stopped on an error before reaching a natural end.
    pub halted: bool,
}

/// Decode from `start` until the body ends.
///
/// A body ends at an `EXIT` that no forward jump of the body reaches past,
/// at `limit` (the next function start or the code end), or at the first
/// undecodable instruction. Errors are recorded, never returned.
pub fn decode_body(
    reader: &BinaryReader<'_>,
    code: CodeRange,
    start: u32,
    limit: u32,
    diags: &mut Diagnostics,
) -> Body {
    let mut body = Body {
        end: start,
        ..Body::default()
    };
    let mut forward: BTreeSet<u32> = BTreeSet::new();
    let mut addr = start;

    while addr < limit {
        let inst = match decode_instruction(reader, code, addr, diags) {
            Ok(inst) => inst,
            Err(e) => {
                let context = body
                    .instructions
                    .last()
                    .map(|i| format!(" after {} at 0x{:X}", i.opcode, code.start + i.addr as usize))
                    .unwrap_or_default();
                log::debug!("function body halted at 0x{:X}{}", code.start + addr as usize, context);
                diags.error(Position::Offset((code.start + addr as usize) as u64), e);
                body.halted = true;
                break;
            }
        };

        if inst.end() > limit {
            diags.warn(
                Position::Offset((code.start + addr as usize) as u64),
                Ed9Error::TruncatedSection {
                    what: "function body",
                    offset: code.start + addr as usize,
                    needed: inst.len() as usize,
                    len: code.start + limit as usize,
                },
            );
            body.halted = true;
            break;
        }

        if inst.opcode.is_jump() || inst.opcode == Opcode::PushReturnAddressXScript {
            if let Some(Operand::Address(target)) = inst.operands.first() {
                if let Some(rel) = (*target as usize).checked_sub(code.start) {
                    if rel as u32 > addr {
                        forward.insert(rel as u32);
                    }
                }
            }
        }

        addr = inst.end();
        let is_exit = inst.opcode == Opcode::Exit;
        body.instructions.push(inst);
        body.end = addr;

        if is_exit && forward.range(addr..).next().is_none() {
            break;
        }
    }

    if !body.halted && body.end < limit {
        let offset = code.start + body.end as usize;
        diags.warn(
            Position::Offset(offset as u64),
            Ed9Error::UndecodedBytes {
                offset,
                len: (limit - body.end) as usize,
            },
        );
    }

    body
}
