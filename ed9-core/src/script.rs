use flate2::Crc;

use crate::error::{Ed9Error, Result};
use crate::opcode::Opcode;
use crate::tagged::TaggedValue;

/// CRC-32 of a function name, the identity stored in the function header.
pub fn name_hash(name: &str) -> u32 {
    let mut crc = Crc::new();
    crc.update(name.as_bytes());
    crc.sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub vars_in: Vec<(TaggedValue, TaggedValue)>,
    pub vars_out: Vec<(TaggedValue, TaggedValue)>,
    pub functions: Vec<Function>,
}

impl Script {
    pub fn new(
        name: impl Into<String>,
        vars_in: Vec<(TaggedValue, TaggedValue)>,
        vars_out: Vec<(TaggedValue, TaggedValue)>,
    ) -> Self {
        Self {
            name: name.into(),
            vars_in,
            vars_out,
            functions: Vec::new(),
        }
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub id: u16,
    pub name: String,
    pub input_args: Vec<TaggedValue>,
    pub output_args: Vec<TaggedValue>,
    pub b0: u8,
    pub b1: u8,
    pub structs: Vec<Struct>,
    pub instructions: Vec<Instruction>,
    code_start: Option<u32>,
}

impl Function {
    pub fn new(
        id: u16,
        name: impl Into<String>,
        input_args: Vec<TaggedValue>,
        output_args: Vec<TaggedValue>,
        b0: u8,
        b1: u8,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            input_args,
            output_args,
            b0,
            b1,
            structs: Vec::new(),
            instructions: Vec::new(),
            code_start: None,
        }
    }

    pub fn hash(&self) -> u32 {
        name_hash(&self.name)
    }

    /// Offset of the body inside the code section, once known.
    pub fn code_start(&self) -> Option<u32> {
        self.code_start
    }

    pub fn set_code_start(&mut self, offset: u32) -> Result<()> {
        if self.code_start.is_some() {
            return Err(Ed9Error::FunctionAlreadyEmitted(self.name.clone()));
        }
        self.code_start = Some(offset);
        Ok(())
    }

    /// Offset right past the last instruction.
    pub fn code_end(&self) -> Option<u32> {
        match self.instructions.last() {
            Some(last) => Some(last.end()),
            None => self.code_start,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    pub id: i32,
    pub nb_sth1: u16,
    pub params: Vec<TaggedValue>,
}

/// Display overrides the disassembler puts on a plain `PUSH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRole {
    CallerFunctionIndex,
    ReturnAddress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Tagged(TaggedValue),
    U8(u8),
    U16(u16),
    I32(i32),
    /// An absolute code address that is not tied to a label.
    Address(u32),
    /// A symbolic code address.
    Label(String),
    Function(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Offset inside the code section.
    pub addr: u32,
    pub operands: Vec<Operand>,
    pub role: Option<PushRole>,
}

impl Instruction {
    pub fn new(opcode: Opcode, addr: u32, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            addr,
            operands,
            role: None,
        }
    }

    pub fn len(&self) -> u32 {
        self.opcode.info().encoded_len() as u32
    }

    pub fn end(&self) -> u32 {
        self.addr + self.len()
    }

    pub fn tagged(&self, ix: usize) -> Option<&TaggedValue> {
        match self.operands.get(ix) {
            Some(Operand::Tagged(v)) => Some(v),
            _ => None,
        }
    }

    pub fn u8_at(&self, ix: usize) -> Option<u8> {
        match self.operands.get(ix) {
            Some(Operand::U8(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn i32_at(&self, ix: usize) -> Option<i32> {
        match self.operands.get(ix) {
            Some(Operand::I32(v)) => Some(*v),
            _ => None,
        }
    }
}
