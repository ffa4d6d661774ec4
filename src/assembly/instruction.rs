//! Decoded CIL instructions and their static properties.
//!
//! An [`Instruction`] is one decoded opcode with its operand, position and resolved branch
//! targets. Branch targets are absolute code offsets; the raw relative displacement is kept in
//! the operand.

use std::fmt;

use crate::metadata::token::Token;

/// The encoding of an instruction's inline operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit (short branches, `ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit (short local/argument indices)
    UInt8,
    /// Unsigned 16-bit (long local/argument indices)
    UInt16,
    /// Signed 32-bit (long branches, `ldc.i4`)
    Int32,
    /// Signed 64-bit
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Metadata token
    Token,
    /// Jump table: count followed by count 32-bit displacements
    Switch,
}

impl OperandType {
    /// Fixed operand size in bytes, `None` for `switch`
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// An inline immediate value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit
    Int8(i8),
    /// Unsigned 8-bit
    UInt8(u8),
    /// Unsigned 16-bit
    UInt16(u16),
    /// Signed 32-bit
    Int32(i32),
    /// Signed 64-bit
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

/// The decoded operand of an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Inline immediate value, including local and argument indices
    Immediate(Immediate),
    /// Relative branch displacement, measured from the end of the instruction
    Branch(i32),
    /// Metadata token
    Token(Token),
    /// `switch` displacements, each measured from the end of the instruction
    Switch(Vec<i32>),
}

impl Operand {
    /// Returns the token operand, if any
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self {
            Operand::Token(token) => Some(*token),
            _ => None,
        }
    }
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Calls and continues (`call`, `newobj`, also `jmp`)
    Call,
    /// `ret`
    Return,
    /// Jump table
    Switch,
    /// `throw` and `rethrow`
    Throw,
    /// `endfinally` and `endfilter`
    EndFinally,
    /// `leave` out of a protected region
    Leave,
    /// Prefix modifying the next instruction
    Prefix,
}

/// Static description of one opcode
#[derive(Debug, Clone, Copy)]
pub struct CilInstruction<'a> {
    /// Operand encoding
    pub op_type: OperandType,
    /// Mnemonic, empty for reserved opcodes
    pub instr: &'a str,
    /// Control flow kind
    pub flow: FlowType,
    /// Values popped; 0 for calls, whose effect depends on the signature
    pub stack_pops: u8,
    /// Values pushed; 0 for calls, whose effect depends on the signature
    pub stack_pushes: u8,
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the first byte, relative to the start of the code
    pub offset: u32,
    /// Encoded size in bytes, including prefix byte and operand
    pub size: u32,
    /// Opcode byte (second byte for `0xFE` opcodes)
    pub opcode: u8,
    /// `0xFE` for two-byte opcodes, otherwise 0
    pub prefix: u8,
    /// Mnemonic
    pub mnemonic: &'static str,
    /// Control flow kind
    pub flow_type: FlowType,
    /// Decoded operand
    pub operand: Operand,
    /// Absolute targets of branches, leaves and switches
    pub branch_targets: Vec<u32>,
}

impl Instruction {
    /// Offset just past this instruction
    #[must_use]
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Returns `true` for conditional, unconditional, leave and switch transfers
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Returns `true` if execution never falls through to the next instruction
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        )
    }

    /// Returns `true` for the single-byte short branch forms
    #[must_use]
    pub fn is_short_branch(&self) -> bool {
        self.prefix == 0
            && matches!(self.operand, Operand::Branch(_))
            && self.size == 2
    }

    /// Returns `true` if this opcode is `(prefix, opcode)`
    #[must_use]
    pub fn is(&self, prefix: u8, opcode: u8) -> bool {
        self.prefix == prefix && self.opcode == opcode
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.mnemonic)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(value) => write!(f, " {value:?}"),
            Operand::Branch(_) => match self.branch_targets.first() {
                Some(target) => write!(f, " IL_{target:04x}"),
                None => Ok(()),
            },
            Operand::Token(token) => write!(f, " {token}"),
            Operand::Switch(_) => {
                let targets: Vec<String> = self
                    .branch_targets
                    .iter()
                    .map(|target| format!("IL_{target:04x}"))
                    .collect();
                write!(f, " ({})", targets.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(size: u32, prefix: u8) -> Instruction {
        Instruction {
            offset: 4,
            size,
            opcode: 0x2B,
            prefix,
            mnemonic: "br.s",
            flow_type: FlowType::UnconditionalBranch,
            operand: Operand::Branch(3),
            branch_targets: vec![4 + size + 3],
        }
    }

    #[test]
    fn test_branch_predicates() {
        let short = branch(2, 0);
        assert!(short.is_branch());
        assert!(short.is_terminal());
        assert!(short.is_short_branch());
        assert_eq!(short.end(), 6);
        assert!(!branch(5, 0).is_short_branch());
    }

    #[test]
    fn test_display() {
        assert_eq!(branch(2, 0).to_string(), "IL_0004: br.s IL_0009");

        let call = Instruction {
            offset: 0x10,
            size: 5,
            opcode: 0x28,
            prefix: 0,
            mnemonic: "call",
            flow_type: FlowType::Call,
            operand: Operand::Token(Token::new(0x0A00_0001)),
            branch_targets: Vec::new(),
        };
        assert_eq!(call.to_string(), "IL_0010: call 0x0a000001");
        assert!(!call.is_terminal());
    }
}
