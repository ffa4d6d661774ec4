//! Opcode byte values the rewriter emits or inspects.
//!
//! Two-byte opcodes share the [`FE_PREFIX`] first byte; their second byte is named with an `FE_`
//! prefix. Short branch opcodes `br.s` through `blt.un.s` map to their long forms by adding
//! [`SHORT_TO_LONG_BRANCH`].
#![allow(missing_docs)]

pub const FE_PREFIX: u8 = 0xFE;

pub const NOP: u8 = 0x00;

pub const LDARG_0: u8 = 0x02;
pub const LDARG_1: u8 = 0x03;
pub const LDARG_2: u8 = 0x04;
pub const LDARG_3: u8 = 0x05;
pub const LDARG_S: u8 = 0x0E;
pub const LDARGA_S: u8 = 0x0F;

pub const LDLOC_0: u8 = 0x06;
pub const LDLOC_S: u8 = 0x11;
pub const LDLOCA_S: u8 = 0x12;
pub const STLOC_0: u8 = 0x0A;
pub const STLOC_S: u8 = 0x13;

pub const LDNULL: u8 = 0x14;
pub const LDC_I4_M1: u8 = 0x15;
pub const LDC_I4_0: u8 = 0x16;
pub const LDC_I4_8: u8 = 0x1E;
pub const LDC_I4_S: u8 = 0x1F;
pub const LDC_I4: u8 = 0x20;

pub const DUP: u8 = 0x25;
pub const POP: u8 = 0x26;

pub const JMP: u8 = 0x27;
pub const CALL: u8 = 0x28;
pub const CALLI: u8 = 0x29;
pub const RET: u8 = 0x2A;

pub const BR_S: u8 = 0x2B;
pub const BLT_UN_S: u8 = 0x37;
pub const BR: u8 = 0x38;
pub const BLT_UN: u8 = 0x44;
pub const SWITCH: u8 = 0x45;
pub const SHORT_TO_LONG_BRANCH: u8 = BR - BR_S;

pub const CALLVIRT: u8 = 0x6F;
pub const LDSTR: u8 = 0x72;
pub const NEWOBJ: u8 = 0x73;
pub const THROW: u8 = 0x7A;
pub const BOX: u8 = 0x8C;
pub const NEWARR: u8 = 0x8D;
pub const STELEM_REF: u8 = 0xA2;
pub const LDTOKEN: u8 = 0xD0;

pub const ENDFINALLY: u8 = 0xDC;
pub const LEAVE: u8 = 0xDD;
pub const LEAVE_S: u8 = 0xDE;

pub const FE_LDARG: u8 = 0x09;
pub const FE_LDARGA: u8 = 0x0A;
pub const FE_LDLOC: u8 = 0x0C;
pub const FE_LDLOCA: u8 = 0x0D;
pub const FE_STLOC: u8 = 0x0E;
pub const FE_ENDFILTER: u8 = 0x11;
pub const FE_TAIL: u8 = 0x14;
pub const FE_RETHROW: u8 = 0x1A;

/// Long form of a short branch or `leave.s`, `None` for anything else
#[must_use]
pub const fn long_branch_form(opcode: u8) -> Option<u8> {
    match opcode {
        BR_S..=BLT_UN_S => Some(opcode + SHORT_TO_LONG_BRANCH),
        LEAVE_S => Some(LEAVE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_branch_form() {
        assert_eq!(long_branch_form(BR_S), Some(BR));
        assert_eq!(long_branch_form(BLT_UN_S), Some(BLT_UN));
        assert_eq!(long_branch_form(0x2C), Some(0x39));
        assert_eq!(long_branch_form(LEAVE_S), Some(LEAVE));
        assert_eq!(long_branch_form(BR), None);
        assert_eq!(long_branch_form(RET), None);
    }
}
