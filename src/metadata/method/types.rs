//! Method attribute and body header flags.
//!
//! # Key Types
//! - [`MethodAttributes`], [`MethodImplCodeType`]: what kind of method a `MethodDef` row describes
//! - [`MethodBodyFlags`], [`SectionFlags`]: method body header and extra data section flags

use bitflags::bitflags;

/// Mask selecting the code type bits of `MethodImplAttributes`
pub const METHOD_IMPL_CODE_TYPE_MASK: u32 = 0x0003;

bitflags! {
    /// Code type of a method implementation (II.23.1.11)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodImplCodeType: u32 {
        /// Method body is CIL
        const IL = 0x0000;
        /// Method body is native code
        const NATIVE = 0x0001;
        /// Reserved
        const OPTIL = 0x0002;
        /// Implementation provided by the runtime
        const RUNTIME = 0x0003;
    }
}

impl MethodImplCodeType {
    /// Extract the code type from raw `MethodImplAttributes`
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_IMPL_CODE_TYPE_MASK)
    }
}

bitflags! {
    /// The subset of `MethodAttributes` (II.23.1.10) that decides whether and how a method can be
    /// instrumented.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MethodAttributes: u32 {
        /// No `this` argument
        const STATIC = 0x0010;
        /// Virtual dispatch
        const VIRTUAL = 0x0040;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Name is special (accessors, constructors)
        const SPECIAL_NAME = 0x0800;
        /// Runtime checks the name (constructors)
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
    }
}

bitflags! {
    /// Method body header flags (II.25.4.4)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header
        const TINY_FORMAT = 0x2;
        /// Fat header
        const FAT_FORMAT = 0x3;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize locals
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Extra data section flags (II.25.4.5)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Exception handling table
        const EHTABLE = 0x1;
        /// Reserved, must not be set
        const OPT_ILTABLE = 0x2;
        /// Fat clauses and 24-bit size
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}
