//! CIL instruction decoding and encoding.
//!
//! Both directions share the static opcode tables [`INSTRUCTIONS`] and [`INSTRUCTIONS_FE`]:
//!
//! - [`decode_instruction`] / [`decode_stream`] turn code bytes into [`Instruction`]s with
//!   resolved branch targets and validate that every transfer lands on an instruction boundary.
//! - [`InstructionEncoder`] emits instructions by mnemonic with label resolution and stack depth
//!   tracking; the rewriter builds its probe sequences with it.
//! - [`MethodBodyBuilder`] adds the body header and EH section on top of the encoder.
//! - [`opcodes`] holds the raw opcode bytes the rewriter patches directly.

mod builder;
mod decoder;
mod encoder;
mod instruction;
mod instructions;
pub mod opcodes;

pub use builder::MethodBodyBuilder;
pub use decoder::{decode_instruction, decode_stream, opcode_info};
pub use encoder::{InstructionEncoder, LabelFixup};
pub use instruction::{CilInstruction, FlowType, Immediate, Instruction, Operand, OperandType};
pub use instructions::{INSTRUCTIONS, INSTRUCTIONS_FE};
