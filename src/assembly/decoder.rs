//! CIL instruction decoding.
//!
//! [`decode_instruction`] reads one instruction at the parser's position; [`decode_stream`]
//! decodes a complete method code array and checks that every branch, leave and switch target
//! lands on an instruction boundary inside the code.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::{decode_stream, FlowType};
//!
//! // ldarg.0; brtrue.s +1; nop; ret
//! let code = [0x02, 0x2D, 0x01, 0x00, 0x2A];
//! let instructions = decode_stream(&code)?;
//!
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[1].flow_type, FlowType::ConditionalBranch);
//! assert_eq!(instructions[1].branch_targets, vec![4]);
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{CilInstruction, FlowType, Immediate, Instruction, Operand, OperandType},
        instructions::{INSTRUCTIONS, INSTRUCTIONS_FE},
        opcodes::FE_PREFIX,
    },
    io::Parser,
    metadata::token::Token,
    Result,
};

/// Look up the table entry of `(prefix, opcode)`; `None` for reserved or out-of-range opcodes.
#[must_use]
pub fn opcode_info(prefix: u8, opcode: u8) -> Option<&'static CilInstruction<'static>> {
    let entry = match prefix {
        0 => INSTRUCTIONS.get(opcode as usize),
        FE_PREFIX => INSTRUCTIONS_FE.get(opcode as usize),
        _ => None,
    }?;

    (!entry.instr.is_empty()).then_some(entry)
}

/// Decodes the instruction at the parser's current position.
///
/// The instruction offset is the parser position, so the parser must be positioned relative to
/// the start of the code. Branch targets are resolved to absolute offsets.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] for reserved opcodes and branches before the start
/// of the code, and [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let first = parser.read_le::<u8>()?;

    let (prefix, opcode) = if first == FE_PREFIX {
        (FE_PREFIX, parser.read_le::<u8>()?)
    } else {
        (0, first)
    };

    let Some(info) = opcode_info(prefix, opcode) else {
        return Err(if prefix == FE_PREFIX {
            malformed_error!("Invalid opcode FE {:02X} at offset {}", opcode, start)
        } else {
            malformed_error!("Invalid opcode {:02X} at offset {}", opcode, start)
        });
    };

    let operand = match info.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 if is_branch_flow(info.flow) => {
            Operand::Branch(i32::from(parser.read_le::<i8>()?))
        }
        OperandType::Int32 if is_branch_flow(info.flow) => Operand::Branch(parser.read_le::<i32>()?),
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let count = parser.read_le::<u32>()? as usize;
            if count > parser.remaining() / 4 {
                return Err(malformed_error!(
                    "Switch at offset {} declares {} targets, only {} bytes remain",
                    start,
                    count,
                    parser.remaining()
                ));
            }

            let mut displacements = Vec::with_capacity(count);
            for _ in 0..count {
                displacements.push(parser.read_le::<i32>()?);
            }
            Operand::Switch(displacements)
        }
    };

    let offset = u32::try_from(start).map_err(|_| malformed_error!("Code offset overflow"))?;
    let size = u32::try_from(parser.pos() - start)
        .map_err(|_| malformed_error!("Instruction size overflow"))?;
    let end = i64::from(offset) + i64::from(size);

    let branch_targets = match &operand {
        Operand::Branch(displacement) => vec![resolve_target(end, *displacement, start)?],
        Operand::Switch(displacements) => displacements
            .iter()
            .map(|displacement| resolve_target(end, *displacement, start))
            .collect::<Result<Vec<u32>>>()?,
        _ => Vec::new(),
    };

    Ok(Instruction {
        offset,
        size,
        opcode,
        prefix,
        mnemonic: info.instr,
        flow_type: info.flow,
        operand,
        branch_targets,
    })
}

/// Decodes a complete code array.
///
/// # Errors
///
/// Returns [`crate::Error::MetadataCorrupt`] if an instruction is invalid, a prefix is not
/// followed by an instruction, or a transfer target is not an instruction boundary within the
/// code; [`crate::Error::OutOfBounds`] if the last instruction is truncated.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    if let Some(last) = instructions.last() {
        if last.flow_type == FlowType::Prefix {
            return Err(malformed_error!(
                "Prefix {} at offset {} ends the code",
                last.mnemonic,
                last.offset
            ));
        }
    }

    let mut boundaries = vec![false; code.len()];
    for instruction in &instructions {
        boundaries[instruction.offset as usize] = true;
    }

    for instruction in &instructions {
        for &target in &instruction.branch_targets {
            if !boundaries.get(target as usize).copied().unwrap_or(false) {
                return Err(malformed_error!(
                    "{} at offset {} targets {}, which is not an instruction boundary",
                    instruction.mnemonic,
                    instruction.offset,
                    target
                ));
            }
        }
    }

    Ok(instructions)
}

fn is_branch_flow(flow: FlowType) -> bool {
    matches!(
        flow,
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
    )
}

fn resolve_target(end: i64, displacement: i32, start: usize) -> Result<u32> {
    u32::try_from(end + i64::from(displacement)).map_err(|_| {
        malformed_error!(
            "Branch at offset {} leaves the code with displacement {}",
            start,
            displacement
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_decode_single_byte() -> Result<()> {
        let mut parser = Parser::new(&[0x11, 0x10]);
        let instruction = decode_instruction(&mut parser)?;

        assert_eq!(instruction.offset, 0);
        assert_eq!(instruction.size, 2);
        assert_eq!(instruction.opcode, 0x11);
        assert_eq!(instruction.prefix, 0);
        assert_eq!(instruction.mnemonic, "ldloc.s");
        assert_eq!(instruction.operand, Operand::Immediate(Immediate::UInt8(0x10)));
        Ok(())
    }

    #[test]
    fn test_decode_two_byte() -> Result<()> {
        let mut parser = Parser::new(&[0xFE, 0x0C, 0x02, 0x01]);
        let instruction = decode_instruction(&mut parser)?;

        assert_eq!(instruction.prefix, 0xFE);
        assert_eq!(instruction.mnemonic, "ldloc");
        assert_eq!(instruction.size, 4);
        assert_eq!(instruction.operand, Operand::Immediate(Immediate::UInt16(0x0102)));
        Ok(())
    }

    #[test]
    fn test_decode_backward_branch() -> Result<()> {
        // nop; nop; br.s -4
        let instructions = decode_stream(&[0x00, 0x00, 0x2B, 0xFC])?;
        assert_eq!(instructions[2].operand, Operand::Branch(-4));
        assert_eq!(instructions[2].branch_targets, vec![0]);
        Ok(())
    }

    #[test]
    fn test_decode_switch() -> Result<()> {
        // ldarg.0; switch (2) +0 +1; nop; ret
        let code = [
            0x02, 0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x2A,
        ];
        let instructions = decode_stream(&code)?;

        assert_eq!(instructions[1].size, 13);
        assert_eq!(instructions[1].flow_type, FlowType::Switch);
        assert_eq!(instructions[1].branch_targets, vec![14, 15]);
        Ok(())
    }

    #[test]
    fn test_decode_token() -> Result<()> {
        let mut parser = Parser::new(&[0x28, 0x01, 0x00, 0x00, 0x0A]);
        let instruction = decode_instruction(&mut parser)?;
        assert_eq!(instruction.operand.token(), Some(Token::new(0x0A00_0001)));
        assert_eq!(instruction.flow_type, FlowType::Call);
        Ok(())
    }

    #[test]
    fn test_reserved_opcode() {
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[0x24])),
            Err(Error::MetadataCorrupt { .. })
        ));
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[0xFE, 0x1B])),
            Err(Error::MetadataCorrupt { .. })
        ));
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[0xFE, 0x40])),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn test_truncated_operand() {
        assert!(matches!(
            decode_stream(&[0x20, 0x01, 0x02]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn test_switch_count_overflow() {
        assert!(matches!(
            decode_stream(&[0x45, 0xFF, 0xFF, 0xFF, 0x7F]),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn test_branch_into_instruction() {
        // br.s +1 lands inside ldc.i4
        let code = [0x2B, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert!(matches!(
            decode_stream(&code),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn test_branch_past_end() {
        assert!(matches!(
            decode_stream(&[0x2B, 0x05, 0x2A]),
            Err(Error::MetadataCorrupt { .. })
        ));
        assert!(matches!(
            decode_stream(&[0x2B, 0x80]),
            Err(Error::MetadataCorrupt { .. })
        ));
    }

    #[test]
    fn test_trailing_prefix() {
        assert!(matches!(
            decode_stream(&[0x00, 0xFE, 0x14]),
            Err(Error::MetadataCorrupt { .. })
        ));
    }
}
