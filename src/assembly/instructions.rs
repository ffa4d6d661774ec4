//! Static opcode tables.
//!
//! [`INSTRUCTIONS`] is indexed by the single opcode byte (`0x00` to `0xE0`), [`INSTRUCTIONS_FE`]
//! by the second byte of `0xFE`-prefixed opcodes (`0x00` to `0x1E`). Reserved slots carry an empty
//! mnemonic and are rejected by the decoder and never produced by the encoder.

use crate::assembly::instruction::{CilInstruction, FlowType, OperandType};

const RESERVED: CilInstruction<'static> = CilInstruction {
    op_type: OperandType::None,
    instr: "",
    flow: FlowType::Sequential,
    stack_pops: 0,
    stack_pushes: 0,
};

const fn op(
    instr: &'static str,
    op_type: OperandType,
    flow: FlowType,
    stack_pops: u8,
    stack_pushes: u8,
) -> CilInstruction<'static> {
    CilInstruction {
        op_type,
        instr,
        flow,
        stack_pops,
        stack_pushes,
    }
}

/// Single-byte opcodes
pub const INSTRUCTIONS: [CilInstruction<'static>; 225] = [
    /* 00 */ op("nop", OperandType::None, FlowType::Sequential, 0, 0),
    /* 01 */ op("break", OperandType::None, FlowType::Sequential, 0, 0),
    /* 02 */ op("ldarg.0", OperandType::None, FlowType::Sequential, 0, 1),
    /* 03 */ op("ldarg.1", OperandType::None, FlowType::Sequential, 0, 1),
    /* 04 */ op("ldarg.2", OperandType::None, FlowType::Sequential, 0, 1),
    /* 05 */ op("ldarg.3", OperandType::None, FlowType::Sequential, 0, 1),
    /* 06 */ op("ldloc.0", OperandType::None, FlowType::Sequential, 0, 1),
    /* 07 */ op("ldloc.1", OperandType::None, FlowType::Sequential, 0, 1),
    /* 08 */ op("ldloc.2", OperandType::None, FlowType::Sequential, 0, 1),
    /* 09 */ op("ldloc.3", OperandType::None, FlowType::Sequential, 0, 1),
    /* 0A */ op("stloc.0", OperandType::None, FlowType::Sequential, 1, 0),
    /* 0B */ op("stloc.1", OperandType::None, FlowType::Sequential, 1, 0),
    /* 0C */ op("stloc.2", OperandType::None, FlowType::Sequential, 1, 0),
    /* 0D */ op("stloc.3", OperandType::None, FlowType::Sequential, 1, 0),
    /* 0E */ op("ldarg.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    /* 0F */ op("ldarga.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    /* 10 */ op("starg.s", OperandType::UInt8, FlowType::Sequential, 1, 0),
    /* 11 */ op("ldloc.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    /* 12 */ op("ldloca.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    /* 13 */ op("stloc.s", OperandType::UInt8, FlowType::Sequential, 1, 0),
    /* 14 */ op("ldnull", OperandType::None, FlowType::Sequential, 0, 1),
    /* 15 */ op("ldc.i4.m1", OperandType::None, FlowType::Sequential, 0, 1),
    /* 16 */ op("ldc.i4.0", OperandType::None, FlowType::Sequential, 0, 1),
    /* 17 */ op("ldc.i4.1", OperandType::None, FlowType::Sequential, 0, 1),
    /* 18 */ op("ldc.i4.2", OperandType::None, FlowType::Sequential, 0, 1),
    /* 19 */ op("ldc.i4.3", OperandType::None, FlowType::Sequential, 0, 1),
    /* 1A */ op("ldc.i4.4", OperandType::None, FlowType::Sequential, 0, 1),
    /* 1B */ op("ldc.i4.5", OperandType::None, FlowType::Sequential, 0, 1),
    /* 1C */ op("ldc.i4.6", OperandType::None, FlowType::Sequential, 0, 1),
    /* 1D */ op("ldc.i4.7", OperandType::None, FlowType::Sequential, 0, 1),
    /* 1E */ op("ldc.i4.8", OperandType::None, FlowType::Sequential, 0, 1),
    /* 1F */ op("ldc.i4.s", OperandType::Int8, FlowType::Sequential, 0, 1),
    /* 20 */ op("ldc.i4", OperandType::Int32, FlowType::Sequential, 0, 1),
    /* 21 */ op("ldc.i8", OperandType::Int64, FlowType::Sequential, 0, 1),
    /* 22 */ op("ldc.r4", OperandType::Float32, FlowType::Sequential, 0, 1),
    /* 23 */ op("ldc.r8", OperandType::Float64, FlowType::Sequential, 0, 1),
    /* 24 */ RESERVED,
    /* 25 */ op("dup", OperandType::None, FlowType::Sequential, 1, 2),
    /* 26 */ op("pop", OperandType::None, FlowType::Sequential, 1, 0),
    /* 27 */ op("jmp", OperandType::Token, FlowType::Call, 0, 0),
    /* 28 */ op("call", OperandType::Token, FlowType::Call, 0, 0),
    /* 29 */ op("calli", OperandType::Token, FlowType::Call, 0, 0),
    /* 2A */ op("ret", OperandType::None, FlowType::Return, 0, 0),
    /* 2B */ op("br.s", OperandType::Int8, FlowType::UnconditionalBranch, 0, 0),
    /* 2C */ op("brfalse.s", OperandType::Int8, FlowType::ConditionalBranch, 1, 0),
    /* 2D */ op("brtrue.s", OperandType::Int8, FlowType::ConditionalBranch, 1, 0),
    /* 2E */ op("beq.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 2F */ op("bge.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 30 */ op("bgt.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 31 */ op("ble.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 32 */ op("blt.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 33 */ op("bne.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 34 */ op("bge.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 35 */ op("bgt.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 36 */ op("ble.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 37 */ op("blt.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    /* 38 */ op("br", OperandType::Int32, FlowType::UnconditionalBranch, 0, 0),
    /* 39 */ op("brfalse", OperandType::Int32, FlowType::ConditionalBranch, 1, 0),
    /* 3A */ op("brtrue", OperandType::Int32, FlowType::ConditionalBranch, 1, 0),
    /* 3B */ op("beq", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 3C */ op("bge", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 3D */ op("bgt", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 3E */ op("ble", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 3F */ op("blt", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 40 */ op("bne.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 41 */ op("bge.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 42 */ op("bgt.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 43 */ op("ble.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 44 */ op("blt.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    /* 45 */ op("switch", OperandType::Switch, FlowType::Switch, 1, 0),
    /* 46 */ op("ldind.i1", OperandType::None, FlowType::Sequential, 1, 1),
    /* 47 */ op("ldind.u1", OperandType::None, FlowType::Sequential, 1, 1),
    /* 48 */ op("ldind.i2", OperandType::None, FlowType::Sequential, 1, 1),
    /* 49 */ op("ldind.u2", OperandType::None, FlowType::Sequential, 1, 1),
    /* 4A */ op("ldind.i4", OperandType::None, FlowType::Sequential, 1, 1),
    /* 4B */ op("ldind.u4", OperandType::None, FlowType::Sequential, 1, 1),
    /* 4C */ op("ldind.i8", OperandType::None, FlowType::Sequential, 1, 1),
    /* 4D */ op("ldind.i", OperandType::None, FlowType::Sequential, 1, 1),
    /* 4E */ op("ldind.r4", OperandType::None, FlowType::Sequential, 1, 1),
    /* 4F */ op("ldind.r8", OperandType::None, FlowType::Sequential, 1, 1),
    /* 50 */ op("ldind.ref", OperandType::None, FlowType::Sequential, 1, 1),
    /* 51 */ op("stind.ref", OperandType::None, FlowType::Sequential, 2, 0),
    /* 52 */ op("stind.i1", OperandType::None, FlowType::Sequential, 2, 0),
    /* 53 */ op("stind.i2", OperandType::None, FlowType::Sequential, 2, 0),
    /* 54 */ op("stind.i4", OperandType::None, FlowType::Sequential, 2, 0),
    /* 55 */ op("stind.i8", OperandType::None, FlowType::Sequential, 2, 0),
    /* 56 */ op("stind.r4", OperandType::None, FlowType::Sequential, 2, 0),
    /* 57 */ op("stind.r8", OperandType::None, FlowType::Sequential, 2, 0),
    /* 58 */ op("add", OperandType::None, FlowType::Sequential, 2, 1),
    /* 59 */ op("sub", OperandType::None, FlowType::Sequential, 2, 1),
    /* 5A */ op("mul", OperandType::None, FlowType::Sequential, 2, 1),
    /* 5B */ op("div", OperandType::None, FlowType::Sequential, 2, 1),
    /* 5C */ op("div.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* 5D */ op("rem", OperandType::None, FlowType::Sequential, 2, 1),
    /* 5E */ op("rem.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* 5F */ op("and", OperandType::None, FlowType::Sequential, 2, 1),
    /* 60 */ op("or", OperandType::None, FlowType::Sequential, 2, 1),
    /* 61 */ op("xor", OperandType::None, FlowType::Sequential, 2, 1),
    /* 62 */ op("shl", OperandType::None, FlowType::Sequential, 2, 1),
    /* 63 */ op("shr", OperandType::None, FlowType::Sequential, 2, 1),
    /* 64 */ op("shr.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* 65 */ op("neg", OperandType::None, FlowType::Sequential, 1, 1),
    /* 66 */ op("not", OperandType::None, FlowType::Sequential, 1, 1),
    /* 67 */ op("conv.i1", OperandType::None, FlowType::Sequential, 1, 1),
    /* 68 */ op("conv.i2", OperandType::None, FlowType::Sequential, 1, 1),
    /* 69 */ op("conv.i4", OperandType::None, FlowType::Sequential, 1, 1),
    /* 6A */ op("conv.i8", OperandType::None, FlowType::Sequential, 1, 1),
    /* 6B */ op("conv.r4", OperandType::None, FlowType::Sequential, 1, 1),
    /* 6C */ op("conv.r8", OperandType::None, FlowType::Sequential, 1, 1),
    /* 6D */ op("conv.u4", OperandType::None, FlowType::Sequential, 1, 1),
    /* 6E */ op("conv.u8", OperandType::None, FlowType::Sequential, 1, 1),
    /* 6F */ op("callvirt", OperandType::Token, FlowType::Call, 0, 0),
    /* 70 */ op("cpobj", OperandType::Token, FlowType::Sequential, 2, 0),
    /* 71 */ op("ldobj", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 72 */ op("ldstr", OperandType::Token, FlowType::Sequential, 0, 1),
    /* 73 */ op("newobj", OperandType::Token, FlowType::Call, 0, 0),
    /* 74 */ op("castclass", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 75 */ op("isinst", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 76 */ op("conv.r.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 77 */ RESERVED,
    /* 78 */ RESERVED,
    /* 79 */ op("unbox", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 7A */ op("throw", OperandType::None, FlowType::Throw, 1, 0),
    /* 7B */ op("ldfld", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 7C */ op("ldflda", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 7D */ op("stfld", OperandType::Token, FlowType::Sequential, 2, 0),
    /* 7E */ op("ldsfld", OperandType::Token, FlowType::Sequential, 0, 1),
    /* 7F */ op("ldsflda", OperandType::Token, FlowType::Sequential, 0, 1),
    /* 80 */ op("stsfld", OperandType::Token, FlowType::Sequential, 1, 0),
    /* 81 */ op("stobj", OperandType::Token, FlowType::Sequential, 2, 0),
    /* 82 */ op("conv.ovf.i1.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 83 */ op("conv.ovf.i2.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 84 */ op("conv.ovf.i4.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 85 */ op("conv.ovf.i8.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 86 */ op("conv.ovf.u1.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 87 */ op("conv.ovf.u2.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 88 */ op("conv.ovf.u4.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 89 */ op("conv.ovf.u8.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 8A */ op("conv.ovf.i.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 8B */ op("conv.ovf.u.un", OperandType::None, FlowType::Sequential, 1, 1),
    /* 8C */ op("box", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 8D */ op("newarr", OperandType::Token, FlowType::Sequential, 1, 1),
    /* 8E */ op("ldlen", OperandType::None, FlowType::Sequential, 1, 1),
    /* 8F */ op("ldelema", OperandType::Token, FlowType::Sequential, 2, 1),
    /* 90 */ op("ldelem.i1", OperandType::None, FlowType::Sequential, 2, 1),
    /* 91 */ op("ldelem.u1", OperandType::None, FlowType::Sequential, 2, 1),
    /* 92 */ op("ldelem.i2", OperandType::None, FlowType::Sequential, 2, 1),
    /* 93 */ op("ldelem.u2", OperandType::None, FlowType::Sequential, 2, 1),
    /* 94 */ op("ldelem.i4", OperandType::None, FlowType::Sequential, 2, 1),
    /* 95 */ op("ldelem.u4", OperandType::None, FlowType::Sequential, 2, 1),
    /* 96 */ op("ldelem.i8", OperandType::None, FlowType::Sequential, 2, 1),
    /* 97 */ op("ldelem.i", OperandType::None, FlowType::Sequential, 2, 1),
    /* 98 */ op("ldelem.r4", OperandType::None, FlowType::Sequential, 2, 1),
    /* 99 */ op("ldelem.r8", OperandType::None, FlowType::Sequential, 2, 1),
    /* 9A */ op("ldelem.ref", OperandType::None, FlowType::Sequential, 2, 1),
    /* 9B */ op("stelem.i", OperandType::None, FlowType::Sequential, 3, 0),
    /* 9C */ op("stelem.i1", OperandType::None, FlowType::Sequential, 3, 0),
    /* 9D */ op("stelem.i2", OperandType::None, FlowType::Sequential, 3, 0),
    /* 9E */ op("stelem.i4", OperandType::None, FlowType::Sequential, 3, 0),
    /* 9F */ op("stelem.i8", OperandType::None, FlowType::Sequential, 3, 0),
    /* A0 */ op("stelem.r4", OperandType::None, FlowType::Sequential, 3, 0),
    /* A1 */ op("stelem.r8", OperandType::None, FlowType::Sequential, 3, 0),
    /* A2 */ op("stelem.ref", OperandType::None, FlowType::Sequential, 3, 0),
    /* A3 */ op("ldelem", OperandType::Token, FlowType::Sequential, 2, 1),
    /* A4 */ op("stelem", OperandType::Token, FlowType::Sequential, 3, 0),
    /* A5 */ op("unbox.any", OperandType::Token, FlowType::Sequential, 1, 1),
    /* A6 */ RESERVED,
    /* A7 */ RESERVED,
    /* A8 */ RESERVED,
    /* A9 */ RESERVED,
    /* AA */ RESERVED,
    /* AB */ RESERVED,
    /* AC */ RESERVED,
    /* AD */ RESERVED,
    /* AE */ RESERVED,
    /* AF */ RESERVED,
    /* B0 */ RESERVED,
    /* B1 */ RESERVED,
    /* B2 */ RESERVED,
    /* B3 */ op("conv.ovf.i1", OperandType::None, FlowType::Sequential, 1, 1),
    /* B4 */ op("conv.ovf.u1", OperandType::None, FlowType::Sequential, 1, 1),
    /* B5 */ op("conv.ovf.i2", OperandType::None, FlowType::Sequential, 1, 1),
    /* B6 */ op("conv.ovf.u2", OperandType::None, FlowType::Sequential, 1, 1),
    /* B7 */ op("conv.ovf.i4", OperandType::None, FlowType::Sequential, 1, 1),
    /* B8 */ op("conv.ovf.u4", OperandType::None, FlowType::Sequential, 1, 1),
    /* B9 */ op("conv.ovf.i8", OperandType::None, FlowType::Sequential, 1, 1),
    /* BA */ op("conv.ovf.u8", OperandType::None, FlowType::Sequential, 1, 1),
    /* BB */ RESERVED,
    /* BC */ RESERVED,
    /* BD */ RESERVED,
    /* BE */ RESERVED,
    /* BF */ RESERVED,
    /* C0 */ RESERVED,
    /* C1 */ RESERVED,
    /* C2 */ op("refanyval", OperandType::Token, FlowType::Sequential, 1, 1),
    /* C3 */ op("ckfinite", OperandType::None, FlowType::Sequential, 1, 1),
    /* C4 */ RESERVED,
    /* C5 */ RESERVED,
    /* C6 */ op("mkrefany", OperandType::Token, FlowType::Sequential, 1, 1),
    /* C7 */ RESERVED,
    /* C8 */ RESERVED,
    /* C9 */ RESERVED,
    /* CA */ RESERVED,
    /* CB */ RESERVED,
    /* CC */ RESERVED,
    /* CD */ RESERVED,
    /* CE */ RESERVED,
    /* CF */ RESERVED,
    /* D0 */ op("ldtoken", OperandType::Token, FlowType::Sequential, 0, 1),
    /* D1 */ op("conv.u2", OperandType::None, FlowType::Sequential, 1, 1),
    /* D2 */ op("conv.u1", OperandType::None, FlowType::Sequential, 1, 1),
    /* D3 */ op("conv.i", OperandType::None, FlowType::Sequential, 1, 1),
    /* D4 */ op("conv.ovf.i", OperandType::None, FlowType::Sequential, 1, 1),
    /* D5 */ op("conv.ovf.u", OperandType::None, FlowType::Sequential, 1, 1),
    /* D6 */ op("add.ovf", OperandType::None, FlowType::Sequential, 2, 1),
    /* D7 */ op("add.ovf.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* D8 */ op("mul.ovf", OperandType::None, FlowType::Sequential, 2, 1),
    /* D9 */ op("mul.ovf.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* DA */ op("sub.ovf", OperandType::None, FlowType::Sequential, 2, 1),
    /* DB */ op("sub.ovf.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* DC */ op("endfinally", OperandType::None, FlowType::EndFinally, 0, 0),
    /* DD */ op("leave", OperandType::Int32, FlowType::Leave, 0, 0),
    /* DE */ op("leave.s", OperandType::Int8, FlowType::Leave, 0, 0),
    /* DF */ op("stind.i", OperandType::None, FlowType::Sequential, 2, 0),
    /* E0 */ op("conv.u", OperandType::None, FlowType::Sequential, 1, 1),
];

/// `0xFE`-prefixed opcodes
pub const INSTRUCTIONS_FE: [CilInstruction<'static>; 31] = [
    /* FE 00 */ op("arglist", OperandType::None, FlowType::Sequential, 0, 1),
    /* FE 01 */ op("ceq", OperandType::None, FlowType::Sequential, 2, 1),
    /* FE 02 */ op("cgt", OperandType::None, FlowType::Sequential, 2, 1),
    /* FE 03 */ op("cgt.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* FE 04 */ op("clt", OperandType::None, FlowType::Sequential, 2, 1),
    /* FE 05 */ op("clt.un", OperandType::None, FlowType::Sequential, 2, 1),
    /* FE 06 */ op("ldftn", OperandType::Token, FlowType::Sequential, 0, 1),
    /* FE 07 */ op("ldvirtftn", OperandType::Token, FlowType::Sequential, 1, 1),
    /* FE 08 */ RESERVED,
    /* FE 09 */ op("ldarg", OperandType::UInt16, FlowType::Sequential, 0, 1),
    /* FE 0A */ op("ldarga", OperandType::UInt16, FlowType::Sequential, 0, 1),
    /* FE 0B */ op("starg", OperandType::UInt16, FlowType::Sequential, 1, 0),
    /* FE 0C */ op("ldloc", OperandType::UInt16, FlowType::Sequential, 0, 1),
    /* FE 0D */ op("ldloca", OperandType::UInt16, FlowType::Sequential, 0, 1),
    /* FE 0E */ op("stloc", OperandType::UInt16, FlowType::Sequential, 1, 0),
    /* FE 0F */ op("localloc", OperandType::None, FlowType::Sequential, 1, 1),
    /* FE 10 */ RESERVED,
    /* FE 11 */ op("endfilter", OperandType::None, FlowType::EndFinally, 1, 0),
    /* FE 12 */ op("unaligned.", OperandType::UInt8, FlowType::Prefix, 0, 0),
    /* FE 13 */ op("volatile.", OperandType::None, FlowType::Prefix, 0, 0),
    /* FE 14 */ op("tail.", OperandType::None, FlowType::Prefix, 0, 0),
    /* FE 15 */ op("initobj", OperandType::Token, FlowType::Sequential, 1, 0),
    /* FE 16 */ op("constrained.", OperandType::Token, FlowType::Prefix, 0, 0),
    /* FE 17 */ op("cpblk", OperandType::None, FlowType::Sequential, 3, 0),
    /* FE 18 */ op("initblk", OperandType::None, FlowType::Sequential, 3, 0),
    /* FE 19 */ op("no.", OperandType::UInt8, FlowType::Prefix, 0, 0),
    /* FE 1A */ op("rethrow", OperandType::None, FlowType::Throw, 0, 0),
    /* FE 1B */ RESERVED,
    /* FE 1C */ op("sizeof", OperandType::Token, FlowType::Sequential, 0, 1),
    /* FE 1D */ op("refanytype", OperandType::None, FlowType::Sequential, 1, 1),
    /* FE 1E */ op("readonly.", OperandType::None, FlowType::Prefix, 0, 0),
];
