//! CIL instruction encoding.
//!
//! [`InstructionEncoder`] is the reverse of the decoder: it resolves mnemonics through the same
//! opcode tables, writes operands, resolves labels and tracks the evaluation stack depth so the
//! rewriter and the tests get a precise `max_stack` for every emitted sequence.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::InstructionEncoder;
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_ldarg(0)?;
//! encoder.emit_branch("brtrue", "done")?;
//! encoder.emit_ldc_i4(7)?;
//! encoder.emit_instruction("pop", None)?;
//! encoder.define_label("done")?;
//! encoder.emit_instruction("ret", None)?;
//!
//! let (code, max_stack, labels) = encoder.finalize()?;
//! assert_eq!(code, vec![0x02, 0x3A, 0x02, 0x00, 0x00, 0x00, 0x1D, 0x26, 0x2A]);
//! assert_eq!(max_stack, 1);
//! assert_eq!(labels["done"], 8);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    assembly::{
        instruction::{CilInstruction, FlowType, Immediate, Operand, OperandType},
        instructions::{INSTRUCTIONS, INSTRUCTIONS_FE},
        opcodes::FE_PREFIX,
    },
    metadata::token::Token,
    Error, Result,
};

type MnemonicEntry = (u8, u8, &'static CilInstruction<'static>);

static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, MnemonicEntry>> = OnceLock::new();

fn mnemonic_lookup() -> &'static HashMap<&'static str, MnemonicEntry> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        let mut map = HashMap::new();

        for (opcode, entry) in (0_u8..).zip(INSTRUCTIONS.iter()) {
            if !entry.instr.is_empty() {
                map.insert(entry.instr, (opcode, 0, entry));
            }
        }
        for (opcode, entry) in (0_u8..).zip(INSTRUCTIONS_FE.iter()) {
            if !entry.instr.is_empty() {
                map.insert(entry.instr, (opcode, FE_PREFIX, entry));
            }
        }

        map
    })
}

/// An unresolved branch displacement.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// Target label
    pub label: String,
    /// Position of the displacement in the bytecode
    pub fixup_position: usize,
    /// Width of the displacement (1 or 4 bytes)
    pub offset_size: u8,
    /// Position just past the branch instruction
    pub instruction_end: usize,
}

/// Emits CIL bytecode with label resolution and stack depth tracking.
///
/// Every instruction is validated against the opcode tables: unknown mnemonics fail with
/// [`Error::InvalidMnemonic`], operands of the wrong kind with [`Error::InvalidOperand`] and stack
/// underflow with [`Error::InvalidBranch`]. After an instruction that never falls through, the
/// tracked depth is reset to the depth recorded for the next label, if any.
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    bytecode: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
    label_depths: HashMap<String, i16>,
    stack_depth: i16,
    max_stack: u16,
}

impl InstructionEncoder {
    /// Create an empty encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a non-branch instruction.
    ///
    /// # Errors
    ///
    /// Fails for unknown mnemonics, branch mnemonics (use [`Self::emit_branch`] or
    /// [`Self::emit_switch`]), mismatched operands and stack underflow.
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<()> {
        let (opcode, prefix, info) = lookup(mnemonic)?;
        if matches!(
            info.flow,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Leave
                | FlowType::Switch
        ) {
            return Err(Error::InvalidOperand {
                mnemonic: info.instr,
                expected: "a label".to_string(),
            });
        }

        self.write_opcode(opcode, prefix);
        self.write_operand(info, operand)?;
        self.update_stack_depth(info.stack_pops, info.stack_pushes)?;
        if matches!(
            info.flow,
            FlowType::Return | FlowType::Throw | FlowType::EndFinally
        ) {
            self.stack_depth = 0;
        }

        Ok(())
    }

    /// Emit a branch or `leave` to `label`, in the width the mnemonic selects.
    ///
    /// # Errors
    ///
    /// Fails for unknown or non-branch mnemonics and stack underflow.
    pub fn emit_branch(&mut self, mnemonic: &str, label: &str) -> Result<()> {
        let (opcode, prefix, info) = lookup(mnemonic)?;
        let offset_size = match (info.flow, info.op_type) {
            (
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave,
                OperandType::Int8,
            ) => 1,
            (
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave,
                OperandType::Int32,
            ) => 4,
            _ => return Err(Error::InvalidMnemonic(mnemonic.to_string())),
        };

        self.write_opcode(opcode, prefix);
        let fixup_position = self.bytecode.len();
        self.bytecode.resize(fixup_position + offset_size, 0);
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position,
            offset_size: offset_size as u8,
            instruction_end: self.bytecode.len(),
        });

        self.update_stack_depth(info.stack_pops, info.stack_pushes)?;
        self.record_label_stack_depth(label);
        if info.flow != FlowType::ConditionalBranch {
            self.stack_depth = 0;
        }

        Ok(())
    }

    /// Emit a `switch` over `labels`.
    ///
    /// # Errors
    ///
    /// Fails on stack underflow.
    pub fn emit_switch(&mut self, labels: &[&str]) -> Result<()> {
        let (opcode, prefix, info) = lookup("switch")?;
        self.write_opcode(opcode, prefix);

        let count = u32::try_from(labels.len())
            .map_err(|_| Error::InvalidBranch("switch table too large".to_string()))?;
        self.bytecode.extend_from_slice(&count.to_le_bytes());

        let table_start = self.bytecode.len();
        let instruction_end = table_start + labels.len() * 4;
        self.bytecode.resize(instruction_end, 0);

        self.update_stack_depth(info.stack_pops, info.stack_pushes)?;
        for (index, label) in labels.iter().enumerate() {
            self.fixups.push(LabelFixup {
                label: (*label).to_string(),
                fixup_position: table_start + index * 4,
                offset_size: 4,
                instruction_end,
            });
            self.record_label_stack_depth(label);
        }

        Ok(())
    }

    /// Emit `call`, `callvirt` or `newobj` with an explicit stack effect.
    ///
    /// `arg_count` includes `this` for instance calls. `newobj` always pushes the new object.
    ///
    /// # Errors
    ///
    /// Fails for other mnemonics and stack underflow.
    pub fn emit_call(
        &mut self,
        mnemonic: &str,
        method: Token,
        arg_count: u16,
        has_result: bool,
    ) -> Result<()> {
        let (opcode, prefix, info) = lookup(mnemonic)?;
        if !matches!(info.instr, "call" | "callvirt" | "newobj") {
            return Err(Error::InvalidMnemonic(mnemonic.to_string()));
        }

        self.write_opcode(opcode, prefix);
        self.bytecode.extend_from_slice(&method.value().to_le_bytes());

        let pops = i16::try_from(arg_count)
            .map_err(|_| Error::InvalidBranch(format!("{arg_count} call arguments")))?;
        let pushes = i16::from(has_result || info.instr == "newobj");
        self.apply_stack_effect(pops, pushes)
    }

    /// Emit `ldarg` in its shortest form
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn emit_ldarg(&mut self, index: u16) -> Result<()> {
        match index {
            0..=3 => {
                let short = ["ldarg.0", "ldarg.1", "ldarg.2", "ldarg.3"];
                self.emit_instruction(short[index as usize], None)
            }
            4..=255 => self.emit_instruction(
                "ldarg.s",
                Some(Operand::Immediate(Immediate::UInt8(index as u8))),
            ),
            _ => self.emit_instruction("ldarg", Some(Operand::Immediate(Immediate::UInt16(index)))),
        }
    }

    /// Emit `ldarga` in its shortest form
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn emit_ldarga(&mut self, index: u16) -> Result<()> {
        match u8::try_from(index) {
            Ok(short) => {
                self.emit_instruction("ldarga.s", Some(Operand::Immediate(Immediate::UInt8(short))))
            }
            Err(_) => {
                self.emit_instruction("ldarga", Some(Operand::Immediate(Immediate::UInt16(index))))
            }
        }
    }

    /// Emit `ldloc` in its shortest form
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn emit_ldloc(&mut self, index: u16) -> Result<()> {
        match index {
            0..=3 => {
                let short = ["ldloc.0", "ldloc.1", "ldloc.2", "ldloc.3"];
                self.emit_instruction(short[index as usize], None)
            }
            4..=255 => self.emit_instruction(
                "ldloc.s",
                Some(Operand::Immediate(Immediate::UInt8(index as u8))),
            ),
            _ => self.emit_instruction("ldloc", Some(Operand::Immediate(Immediate::UInt16(index)))),
        }
    }

    /// Emit `stloc` in its shortest form
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn emit_stloc(&mut self, index: u16) -> Result<()> {
        match index {
            0..=3 => {
                let short = ["stloc.0", "stloc.1", "stloc.2", "stloc.3"];
                self.emit_instruction(short[index as usize], None)
            }
            4..=255 => self.emit_instruction(
                "stloc.s",
                Some(Operand::Immediate(Immediate::UInt8(index as u8))),
            ),
            _ => self.emit_instruction("stloc", Some(Operand::Immediate(Immediate::UInt16(index)))),
        }
    }

    /// Emit an `int32` constant in its shortest form
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<()> {
        const SHORT: [&str; 10] = [
            "ldc.i4.m1", "ldc.i4.0", "ldc.i4.1", "ldc.i4.2", "ldc.i4.3", "ldc.i4.4", "ldc.i4.5",
            "ldc.i4.6", "ldc.i4.7", "ldc.i4.8",
        ];

        match value {
            -1..=8 => self.emit_instruction(SHORT[(value + 1) as usize], None),
            _ => match i8::try_from(value) {
                Ok(short) => {
                    self.emit_instruction("ldc.i4.s", Some(Operand::Immediate(Immediate::Int8(short))))
                }
                Err(_) => {
                    self.emit_instruction("ldc.i4", Some(Operand::Immediate(Immediate::Int32(value))))
                }
            },
        }
    }

    /// Emit an instruction taking a metadata token
    ///
    /// # Errors
    ///
    /// Propagates encoding errors.
    pub fn emit_token(&mut self, mnemonic: &str, token: Token) -> Result<()> {
        self.emit_instruction(mnemonic, Some(Operand::Token(token)))
    }

    /// Bind `name` to the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if the label is already defined.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::InvalidBranch(format!("label '{name}' defined twice")));
        }

        let position = self.current_position();
        self.labels.insert(name.to_string(), position);
        if let Some(depth) = self.label_depths.get(name) {
            self.stack_depth = *depth;
        }

        Ok(())
    }

    /// Current position in the bytecode
    #[must_use]
    pub fn current_position(&self) -> u32 {
        u32::try_from(self.bytecode.len()).unwrap_or(u32::MAX)
    }

    /// Position of a defined label
    #[must_use]
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// Highest stack depth reached so far
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack
    }

    /// Stack depth at the current position
    #[must_use]
    pub fn current_stack_depth(&self) -> i16 {
        self.stack_depth
    }

    /// Override the tracked depth, e.g. to 1 at the start of a catch handler
    pub fn set_stack_depth(&mut self, depth: i16) {
        self.stack_depth = depth;
        self.max_stack = self.max_stack.max(u16::try_from(depth).unwrap_or(0));
    }

    /// Resolve all labels and return the code, the maximum stack depth and the label positions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] for undefined labels and short displacements out of range.
    pub fn finalize(mut self) -> Result<(Vec<u8>, u16, HashMap<String, u32>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let Some(&target) = self.labels.get(&fixup.label) else {
                return Err(Error::InvalidBranch(format!(
                    "undefined label '{}'",
                    fixup.label
                )));
            };

            let displacement = i64::from(target) - fixup.instruction_end as i64;
            match fixup.offset_size {
                1 => {
                    let short = i8::try_from(displacement).map_err(|_| {
                        Error::InvalidBranch(format!(
                            "label '{}' is {} bytes away, out of short branch range",
                            fixup.label, displacement
                        ))
                    })?;
                    self.bytecode[fixup.fixup_position] = short.to_le_bytes()[0];
                }
                _ => {
                    let long = i32::try_from(displacement).map_err(|_| {
                        Error::InvalidBranch(format!("label '{}' out of range", fixup.label))
                    })?;
                    self.bytecode[fixup.fixup_position..fixup.fixup_position + 4]
                        .copy_from_slice(&long.to_le_bytes());
                }
            }
        }

        Ok((self.bytecode, self.max_stack, self.labels))
    }

    fn write_opcode(&mut self, opcode: u8, prefix: u8) {
        if prefix == FE_PREFIX {
            self.bytecode.push(FE_PREFIX);
        }
        self.bytecode.push(opcode);
    }

    fn write_operand(
        &mut self,
        info: &CilInstruction<'static>,
        operand: Option<Operand>,
    ) -> Result<()> {
        let mismatch = || Error::InvalidOperand {
            mnemonic: info.instr,
            expected: format!("{:?}", info.op_type),
        };

        match (info.op_type, operand) {
            (OperandType::None, None | Some(Operand::None)) => {}
            (OperandType::Int8, Some(Operand::Immediate(Immediate::Int8(value)))) => {
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::UInt8, Some(Operand::Immediate(Immediate::UInt8(value)))) => {
                self.bytecode.push(value);
            }
            (OperandType::UInt16, Some(Operand::Immediate(Immediate::UInt16(value)))) => {
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Int32, Some(Operand::Immediate(Immediate::Int32(value)))) => {
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Int64, Some(Operand::Immediate(Immediate::Int64(value)))) => {
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Float32, Some(Operand::Immediate(Immediate::Float32(value)))) => {
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Float64, Some(Operand::Immediate(Immediate::Float64(value)))) => {
                self.bytecode.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Token, Some(Operand::Token(token))) => {
                self.bytecode.extend_from_slice(&token.value().to_le_bytes());
            }
            _ => return Err(mismatch()),
        }

        Ok(())
    }

    fn update_stack_depth(&mut self, pops: u8, pushes: u8) -> Result<()> {
        self.apply_stack_effect(i16::from(pops), i16::from(pushes))
    }

    fn apply_stack_effect(&mut self, pops: i16, pushes: i16) -> Result<()> {
        if self.stack_depth < pops {
            return Err(Error::InvalidBranch(format!(
                "stack underflow at offset {}: depth {}, popping {}",
                self.bytecode.len(),
                self.stack_depth,
                pops
            )));
        }

        self.stack_depth = self.stack_depth - pops + pushes;
        self.max_stack = self
            .max_stack
            .max(u16::try_from(self.stack_depth).unwrap_or(0));
        Ok(())
    }

    fn record_label_stack_depth(&mut self, label: &str) {
        self.label_depths
            .entry(label.to_string())
            .or_insert(self.stack_depth);
    }
}

fn lookup(mnemonic: &str) -> Result<MnemonicEntry> {
    mnemonic_lookup()
        .get(mnemonic)
        .copied()
        .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
}
