//! Exception handler clauses of CIL method bodies (ECMA-335 II.25.4.6).
//!
//! Clauses are kept in the order they appear in the body. Nested regions come before the regions
//! that enclose them, and the rewriter relies on that order when it appends its own outermost
//! clause.

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Kind of an exception handler clause.
    ///
    /// `EXCEPTION` is the empty set; any bits other than the three defined ones are retained as
    /// read so that the rewriter can refuse them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// Typed catch clause
        const EXCEPTION = 0x0000;
        /// Filter clause
        const FILTER = 0x0001;
        /// Finally clause
        const FINALLY = 0x0002;
        /// Fault clause
        const FAULT = 0x0004;
    }
}

/// The decoded kind of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// `catch (T)`, with the `TypeDefOrRefOrSpec` token of `T`
    Catch(Token),
    /// `filter`, with the offset of the filter block
    Filter(u32),
    /// `finally`
    Finally,
    /// `fault`
    Fault,
}

/// One exception handler clause.
///
/// All offsets are relative to the first byte of the method's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind, raw
    pub flags: ExceptionHandlerFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler block
    pub handler_offset: u32,
    /// Length of the handler block
    pub handler_length: u32,
    /// Class token for catch clauses, filter offset for filter clauses, otherwise zero
    pub filter_offset: u32,
}

impl ExceptionHandler {
    /// Create a typed catch clause
    #[must_use]
    pub fn catch(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        class: Token,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
            filter_offset: class.value(),
        }
    }

    /// Decode the clause kind; `None` if the flags are not one of the four valid kinds.
    #[must_use]
    pub fn kind(&self) -> Option<HandlerKind> {
        match self.flags.bits() {
            0x0000 => Some(HandlerKind::Catch(Token::new(self.filter_offset))),
            0x0001 => Some(HandlerKind::Filter(self.filter_offset)),
            0x0002 => Some(HandlerKind::Finally),
            0x0004 => Some(HandlerKind::Fault),
            _ => None,
        }
    }

    /// End of the protected region (exclusive)
    #[must_use]
    pub fn try_end(&self) -> u64 {
        u64::from(self.try_offset) + u64::from(self.try_length)
    }

    /// End of the handler block (exclusive)
    #[must_use]
    pub fn handler_end(&self) -> u64 {
        u64::from(self.handler_offset) + u64::from(self.handler_length)
    }

    /// Returns `true` if `offset` lies in the handler block, or in the filter block of a filter
    /// clause (which ends where the handler starts).
    #[must_use]
    pub fn handler_contains(&self, offset: u32) -> bool {
        let offset = u64::from(offset);
        let in_handler = offset >= u64::from(self.handler_offset) && offset < self.handler_end();
        let in_filter = self.flags == ExceptionHandlerFlags::FILTER
            && offset >= u64::from(self.filter_offset)
            && offset < u64::from(self.handler_offset);

        in_handler || in_filter
    }

    /// Returns `true` if the clause fits in the 12-byte small encoding
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}
