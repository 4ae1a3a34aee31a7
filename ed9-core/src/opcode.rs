use std::fmt;

/// Operand layout of one instruction field, in byte order after the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// 32-bit tagged word.
    Tagged,
    U8,
    U16,
    I32,
    /// Absolute code address, stored as a plain u32.
    Address,
    /// Index into the script's function table, stored as u16.
    FunctionIndex,
}

impl OperandKind {
    pub fn size(self) -> usize {
        match self {
            OperandKind::U8 => 1,
            OperandKind::U16 | OperandKind::FunctionIndex => 2,
            OperandKind::Tagged | OperandKind::I32 | OperandKind::Address => 4,
        }
    }
}

/// How an instruction changes the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// +1, pushes its immediate.
    Push,
    /// −(bytes / 4).
    PopBytes,
    /// −count.
    PopCount,
    /// +1, copies the slot at a byte offset from the top.
    ReadSlot,
    /// −1, pops the top into the slot at a byte offset from the top.
    WriteSlot,
    /// +1, loads from outside the operand stack.
    Load,
    /// −1, stores outside the operand stack.
    Store,
    Jump,
    /// −1.
    CondJump,
    /// −(argc + 2), argc taken from the callee's input args.
    Call,
    /// −(argc + 5).
    CrossCall,
    /// 0, the callee cleans up itself.
    CrossCallKeep,
    /// +5, the frame pushed ahead of a cross-script call.
    LabelPush,
    /// Clears the stack.
    Return,
    /// −1.
    BinOp,
    /// 0.
    UnOp,
    /// 0, arguments are dropped by the `POP` that follows.
    RunCmd,
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    Push = 0x00,
    Pop = 0x01,
    RetrieveAtIndex = 0x02,
    RetrieveAtIndex2 = 0x03,
    PushConvertInt = 0x04,
    PutBackAtIndex = 0x05,
    PutBack = 0x06,
    Load32 = 0x07,
    Store32 = 0x08,
    LoadResult = 0x09,
    SaveResult = 0x0A,
    Jump = 0x0B,
    Call = 0x0C,
    Exit = 0x0D,
    JumpIfTrue = 0x0E,
    JumpIfFalse = 0x0F,
    Add = 0x10,
    Subtract = 0x11,
    Multiply = 0x12,
    Divide = 0x13,
    Modulo = 0x14,
    Equal = 0x15,
    NonEqual = 0x16,
    GreaterThan = 0x17,
    GreaterOrEq = 0x18,
    LowerThan = 0x19,
    LowerOrEq = 0x1A,
    And = 0x1B,
    Or = 0x1C,
    Or2 = 0x1D,
    Or3 = 0x1E,
    Neg = 0x1F,
    Not = 0x20,
    Xor = 0x21,
    CallFromOtherScript = 0x22,
    CallFromOtherScript2 = 0x23,
    RunCmd = 0x24,
    PushReturnAddressXScript = 0x25,
    LineMarker = 0x26,
    Pop2 = 0x27,
    Debug = 0x28,
}

/// One row of the instruction set table.
#[derive(Debug)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub name: &'static str,
    pub operands: &'static [OperandKind],
    pub effect: StackEffect,
}

impl OpcodeInfo {
    /// Encoded length including the opcode byte.
    pub fn encoded_len(&self) -> usize {
        1 + self.operands.iter().map(|k| k.size()).sum::<usize>()
    }
}

use OperandKind as K;
use StackEffect as E;

const fn row(
    opcode: Opcode,
    name: &'static str,
    operands: &'static [OperandKind],
    effect: StackEffect,
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        operands,
        effect,
    }
}

/// Indexed by opcode byte.
pub static OPCODES: [OpcodeInfo; 0x29] = [
    row(Opcode::Push, "PUSH", &[K::Tagged], E::Push),
    row(Opcode::Pop, "POP", &[K::U8], E::PopBytes),
    row(Opcode::RetrieveAtIndex, "RETRIEVE_AT_INDEX", &[K::I32], E::ReadSlot),
    row(Opcode::RetrieveAtIndex2, "RETRIEVE_AT_INDEX2", &[K::I32], E::ReadSlot),
    row(Opcode::PushConvertInt, "PUSH_CONVERT_INT", &[K::I32], E::ReadSlot),
    row(Opcode::PutBackAtIndex, "PUT_BACK_AT_INDEX", &[K::I32], E::WriteSlot),
    row(Opcode::PutBack, "PUT_BACK", &[K::I32], E::WriteSlot),
    row(Opcode::Load32, "LOAD32", &[K::I32], E::Load),
    row(Opcode::Store32, "STORE32", &[K::I32], E::Store),
    row(Opcode::LoadResult, "LOADRESULT", &[K::U8], E::Load),
    row(Opcode::SaveResult, "SAVERESULT", &[K::U8], E::Store),
    row(Opcode::Jump, "JUMP", &[K::Address], E::Jump),
    row(Opcode::Call, "CALL", &[K::FunctionIndex], E::Call),
    row(Opcode::Exit, "EXIT", &[], E::Return),
    row(Opcode::JumpIfTrue, "JUMP_IF_TRUE", &[K::Address], E::CondJump),
    row(Opcode::JumpIfFalse, "JUMP_IF_FALSE", &[K::Address], E::CondJump),
    row(Opcode::Add, "ADD", &[], E::BinOp),
    row(Opcode::Subtract, "SUBTRACT", &[], E::BinOp),
    row(Opcode::Multiply, "MULTIPLY", &[], E::BinOp),
    row(Opcode::Divide, "DIVIDE", &[], E::BinOp),
    row(Opcode::Modulo, "MODULO", &[], E::BinOp),
    row(Opcode::Equal, "EQUAL", &[], E::BinOp),
    row(Opcode::NonEqual, "NONEQUAL", &[], E::BinOp),
    row(Opcode::GreaterThan, "GREATERTHAN", &[], E::BinOp),
    row(Opcode::GreaterOrEq, "GREATEROREQ", &[], E::BinOp),
    row(Opcode::LowerThan, "LOWERTHAN", &[], E::BinOp),
    row(Opcode::LowerOrEq, "LOWEROREQ", &[], E::BinOp),
    row(Opcode::And, "AND", &[], E::BinOp),
    row(Opcode::Or, "OR", &[], E::BinOp),
    row(Opcode::Or2, "OR2", &[], E::BinOp),
    row(Opcode::Or3, "OR3", &[], E::BinOp),
    row(Opcode::Neg, "NEG", &[], E::UnOp),
    row(Opcode::Not, "NOT", &[], E::UnOp),
    row(Opcode::Xor, "XOR", &[], E::UnOp),
    row(
        Opcode::CallFromOtherScript,
        "CALL_FROM_OTHER_SCRIPT",
        &[K::Tagged, K::Tagged, K::U8],
        E::CrossCall,
    ),
    row(
        Opcode::CallFromOtherScript2,
        "CALL_FROM_OTHER_SCRIPT2",
        &[K::Tagged, K::Tagged, K::U8],
        E::CrossCallKeep,
    ),
    row(Opcode::RunCmd, "RUNCMD", &[K::U8, K::U8, K::U8], E::RunCmd),
    row(
        Opcode::PushReturnAddressXScript,
        "PUSH_RETURN_ADDRESS_XSCRIPT",
        &[K::Address],
        E::LabelPush,
    ),
    row(Opcode::LineMarker, "LINE_MARKER", &[K::U16], E::Misc),
    row(Opcode::Pop2, "POP2", &[K::U8], E::PopCount),
    row(Opcode::Debug, "DEBUG", &[K::I32], E::Misc),
];

impl Opcode {
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Look up an instruction by its canonical table name.
    pub fn from_name(name: &str) -> Option<Self> {
        OPCODES.iter().find(|row| row.name == name).map(|row| row.opcode)
    }

    pub fn is_jump(self) -> bool {
        matches!(self.info().effect, StackEffect::Jump | StackEffect::CondJump)
    }

    pub fn is_call(self) -> bool {
        matches!(
            self,
            Opcode::Call | Opcode::CallFromOtherScript | Opcode::CallFromOtherScript2
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        OPCODES
            .get(value as usize)
            .map(|row| row.opcode)
            .ok_or(value)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_opcode() {
        for (i, row) in OPCODES.iter().enumerate() {
            assert_eq!(row.opcode as usize, i, "{}", row.name);
        }
    }

    #[test]
    fn names_round_trip() {
        for row in OPCODES.iter() {
            assert_eq!(Opcode::from_name(row.name), Some(row.opcode));
        }
        assert_eq!(Opcode::from_name("NOPE"), None);
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(Opcode::Push.info().encoded_len(), 5);
        assert_eq!(Opcode::Call.info().encoded_len(), 3);
        assert_eq!(Opcode::Exit.info().encoded_len(), 1);
        assert_eq!(Opcode::CallFromOtherScript.info().encoded_len(), 10);
        assert_eq!(Opcode::RunCmd.info().encoded_len(), 4);
        assert_eq!(Opcode::LineMarker.info().encoded_len(), 3);
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert_eq!(Opcode::try_from(0x28), Ok(Opcode::Debug));
        assert_eq!(Opcode::try_from(0x29), Err(0x29));
        assert_eq!(Opcode::try_from(0xFF), Err(0xFF));
    }
}
